//! Responder demo — serves the four demonstration operations.
//!
//! Run with an optional port (default 60000):
//!
//! ```text
//! cargo run --example responder -- 60000
//! ```
//!
//! Pair it with the `caller` example from another terminal.

use std::time::Duration;

use bytes::BytesMut;

use loopwire::bridge::{fire_callback, CallbackToken};
use loopwire::{Listener, OpError};

/// Writes a fixed value into the second word of an 8-byte payload.
const OP_GET_VALUE: i32 = 1;
/// Fills the payload with an index pattern.
const OP_FILL_BUFFER: i32 = 2;
/// Registers a callback token; the callback fires from a detached task.
const OP_NOTIFY: i32 = 3;
/// No-op round trip.
const OP_PING: i32 = 4;

const DEFAULT_PORT: u16 = 60000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let port = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let listener = Listener::builder()
        .operation(OP_GET_VALUE, |mut payload: BytesMut| async move {
            if payload.len() != 8 {
                return Err(OpError::new(-22));
            }
            // First word is the caller's set value, second word is ours.
            payload[4..8].copy_from_slice(&10u32.to_be_bytes());
            Ok(payload)
        })
        .operation(OP_FILL_BUFFER, |mut payload: BytesMut| async move {
            for (i, b) in payload.iter_mut().enumerate() {
                *b = i as u8;
            }
            Ok(payload)
        })
        .operation(OP_NOTIFY, |payload: BytesMut| async move {
            let (token, value) = CallbackToken::decode(&payload).map_err(|e| {
                tracing::warn!(error = %e, "notify request carried a bad token");
                OpError::new(-2)
            })?;
            tracing::info!(
                callback_port = token.port,
                value_len = value.len(),
                "scheduling callback"
            );
            // Fire from a detached task so the original invoke returns
            // without waiting on the reverse leg.
            tokio::spawn(async move {
                if let Err(e) = fire_callback(&token, OP_NOTIFY, &1u32.to_be_bytes()).await {
                    tracing::error!(error = %e, "callback failed");
                }
            });
            Ok(payload)
        })
        .operation(OP_PING, |payload: BytesMut| async move { Ok(payload) })
        .bind(port)
        .await?;

    tracing::info!(port = listener.local_port(), "responder ready, ctrl-c to exit");
    tokio::signal::ctrl_c().await?;

    listener.shutdown(Duration::from_secs(2)).await?;
    Ok(())
}
