//! Caller-side endpoint — one outbound connection and the synchronous
//! invoke cycle.
//!
//! An [`Endpoint`] owns exactly one connection to a responder on the
//! loopback interface. [`Endpoint::invoke`] performs a full round trip:
//! send header, send payload, receive header, receive payload into the
//! caller's buffer. The protocol is strictly one outstanding request per
//! connection, so `invoke` takes `&mut self` and awaits the response
//! before returning.
//!
//! # Example
//!
//! ```ignore
//! use bytes::BytesMut;
//! use loopwire::Endpoint;
//!
//! let mut endpoint = Endpoint::connect(60000).await?;
//! let mut payload = BytesMut::from(&[0u8; 8][..]);
//! endpoint.invoke(1, &mut payload).await?;
//! endpoint.close().await?;
//! ```

use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::error::{LoopwireError, Result};
use crate::protocol::io::{read_header, read_payload, write_frame};
use crate::protocol::{FrameHeader, DEFAULT_MAX_PAYLOAD_SIZE};

/// Default delay between connect attempts while the responder is not yet
/// listening.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for opening an endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Delay between connect attempts when the peer refuses.
    pub retry_interval: Duration,
    /// Total time to keep retrying before giving up with
    /// [`LoopwireError::ConnectTimeout`]. `None` retries forever, which
    /// is the block-until-available default.
    pub connect_deadline: Option<Duration>,
    /// Disable send coalescing so small messages are not delayed.
    pub nodelay: bool,
    /// Cap on the payload length a response header may declare.
    pub max_payload_size: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            connect_deadline: None,
            nodelay: true,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// A caller-owned handle to one active outbound connection.
#[derive(Debug)]
pub struct Endpoint {
    stream: TcpStream,
    port: u16,
    max_payload_size: u32,
}

impl Endpoint {
    /// Connect to a responder on `127.0.0.1:port` with default
    /// configuration.
    ///
    /// If nothing is listening yet, this retries once per second until
    /// the responder appears — it blocks until the peer becomes
    /// available rather than failing fast.
    pub async fn connect(port: u16) -> Result<Self> {
        Self::connect_with(port, EndpointConfig::default()).await
    }

    /// Connect with explicit configuration.
    ///
    /// Setting [`EndpointConfig::connect_deadline`] bounds the retry
    /// loop; any other socket error fails immediately.
    pub async fn connect_with(port: u16, config: EndpointConfig) -> Result<Self> {
        let started = Instant::now();
        let stream = loop {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(stream) => break stream,
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    let waited = started.elapsed();
                    if let Some(deadline) = config.connect_deadline {
                        if waited >= deadline {
                            return Err(LoopwireError::ConnectTimeout { port, waited });
                        }
                        let remaining = deadline - waited;
                        tracing::debug!(port, "responder not reachable yet, retrying");
                        tokio::time::sleep(config.retry_interval.min(remaining)).await;
                    } else {
                        tracing::debug!(port, "responder not reachable yet, retrying");
                        tokio::time::sleep(config.retry_interval).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        };

        if config.nodelay {
            stream.set_nodelay(true)?;
        }

        tracing::debug!(port, "connected");
        Ok(Self {
            stream,
            port,
            max_payload_size: config.max_payload_size,
        })
    }

    /// Port this endpoint is connected to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Invoke an operation on the responder and wait for its response.
    ///
    /// `payload` is in/out: its contents are sent as the request payload
    /// and replaced by the response payload before this returns. The
    /// replacement happens even when the responder reports failure, so a
    /// failed call still surfaces whatever payload the responder sent
    /// (an empty buffer for handler errors).
    ///
    /// Returns `Ok(())` only when every transfer moved the exact declared
    /// byte count and the response's `result_code` is the success value;
    /// a non-zero code becomes [`LoopwireError::Remote`].
    pub async fn invoke(&mut self, operation_id: i32, payload: &mut BytesMut) -> Result<()> {
        let request = FrameHeader::request(operation_id, payload.len() as u32);
        write_frame(&mut self.stream, &request, payload).await?;

        let response = match read_header(&mut self.stream).await? {
            Some(header) => header,
            None => {
                tracing::warn!(operation_id, "peer closed before responding");
                return Err(LoopwireError::PeerClosed);
            }
        };
        response.validate(self.max_payload_size)?;

        let body = read_payload(&mut self.stream, response.payload_length).await?;
        *payload = body;

        if !response.is_ok() {
            tracing::debug!(
                operation_id,
                result_code = response.result_code,
                secondary_code = response.secondary_code,
                "responder reported failure"
            );
            return Err(LoopwireError::Remote {
                result_code: response.result_code,
                secondary_code: response.secondary_code,
            });
        }
        Ok(())
    }

    /// Close the connection and release the endpoint.
    ///
    /// Consumes the handle; a closed endpoint cannot be used again.
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
