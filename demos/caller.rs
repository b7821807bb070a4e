//! Caller demo — invokes the responder's demonstration operations.
//!
//! Run the `responder` example first, then:
//!
//! ```text
//! cargo run --example caller -- 60000 15
//! ```
//!
//! The second argument is a mode bitmask: 1 = value echo, 2 = buffer
//! fill, 4 = callback, 8 = ping. Default runs all four.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use loopwire::bridge::CallbackHost;
use loopwire::{Endpoint, OpError};

const OP_GET_VALUE: i32 = 1;
const OP_FILL_BUFFER: i32 = 2;
const OP_NOTIFY: i32 = 3;
const OP_PING: i32 = 4;

const DEFAULT_PORT: u16 = 60000;
const FILL_LEN: usize = 16 * 1024 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let port: u16 = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let mode: u32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(0x0F);

    let mut endpoint = Endpoint::connect(port).await?;

    if mode & 0x01 != 0 {
        let started = Instant::now();
        let mut payload = BytesMut::new();
        payload.extend_from_slice(&2u32.to_be_bytes());
        payload.extend_from_slice(&0u32.to_be_bytes());
        endpoint.invoke(OP_GET_VALUE, &mut payload).await?;
        let got = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        tracing::info!(got, elapsed = ?started.elapsed(), "value echo done");
    }

    if mode & 0x02 != 0 {
        let started = Instant::now();
        let mut payload = BytesMut::zeroed(FILL_LEN);
        endpoint.invoke(OP_FILL_BUFFER, &mut payload).await?;
        tracing::info!(
            len = payload.len(),
            first = payload[0],
            last = payload[FILL_LEN - 1],
            elapsed = ?started.elapsed(),
            "buffer fill done"
        );
    }

    if mode & 0x04 != 0 {
        let started = Instant::now();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let host = CallbackHost::open(OP_NOTIFY, move |value: &[u8], _cookie: &[u8]| {
            let value = value
                .try_into()
                .map(u32::from_be_bytes)
                .map_err(|_| OpError::new(-3))?;
            tx.send(value).map_err(|_| OpError::new(-9))?;
            Ok(())
        })
        .await?;

        let token = host.token(Bytes::from_static(&[0xBE, 0xEF]));
        let mut payload = token.encode(&12345u32.to_be_bytes())?;
        endpoint.invoke(OP_NOTIFY, &mut payload).await?;

        // The responder fires the callback from a detached task.
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(value)) => {
                tracing::info!(value, elapsed = ?started.elapsed(), "callback received")
            }
            _ => tracing::error!("no callback within 5s"),
        }
        host.close().await?;
    }

    if mode & 0x08 != 0 {
        let started = Instant::now();
        let mut payload = BytesMut::new();
        endpoint.invoke(OP_PING, &mut payload).await?;
        tracing::info!(elapsed = ?started.elapsed(), "ping done");
    }

    endpoint.close().await?;
    Ok(())
}
