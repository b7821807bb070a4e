//! Callback bridge — emulating a responder-to-caller call with two
//! independent request/response legs.
//!
//! The base protocol is strictly caller-initiated: the responder cannot
//! push a call back over the connection it accepted. The bridge works
//! around this with a convention, not a new wire format:
//!
//! 1. Before invoking an operation that may call back, the caller opens
//!    a [`CallbackHost`] — an ephemeral listener on an OS-assigned port
//!    wrapping one local callback function.
//! 2. The caller encodes the host's [`CallbackToken`] (port + opaque
//!    cookie) into the request payload and issues the normal invoke.
//! 3. When the responder's handler wants to fire the callback, it calls
//!    [`fire_callback`]: a transient endpoint to the token's port, one
//!    full invoke carrying the value and the cookie, then close.
//! 4. The host's session serves that reverse call like any other
//!    request and returns the local callback's result.
//!
//! The host's lifetime is managed by convention: at most one callback is
//! expected, and the caller tears the host down once it no longer
//! expects one. There is no negotiated close signal.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::dispatch::OpError;
use crate::endpoint::{Endpoint, EndpointConfig};
use crate::error::{LoopwireError, Result};
use crate::listener::Listener;

/// `result_code` reported when a callback request's payload does not
/// carry a decodable token.
pub const STATUS_BAD_TOKEN: i32 = -98;

/// How long [`fire_callback`] retries its transient connect before
/// giving up. The host is listening before the token ever leaves the
/// caller, so the first attempt succeeds in any healthy exchange.
const CALLBACK_CONNECT_DEADLINE: Duration = Duration::from_secs(10);
const CALLBACK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Address of an ephemeral callback listener, carried inside an ordinary
/// request payload.
///
/// The token is explicit payload data — a port is never smuggled through
/// a field sized for something else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackToken {
    /// Port of the caller's ephemeral listener.
    pub port: u16,
    /// Opaque bytes echoed back to the callback, letting the caller
    /// correlate the reverse call with its own state.
    pub cookie: Bytes,
}

impl CallbackToken {
    /// Create a token for `port` with an opaque cookie.
    pub fn new(port: u16, cookie: impl Into<Bytes>) -> Self {
        Self {
            port,
            cookie: cookie.into(),
        }
    }

    /// Encode the token followed by `value` into one payload:
    /// `port (2B BE) | cookie length (2B BE) | cookie | value`.
    ///
    /// # Example
    ///
    /// ```
    /// use loopwire::bridge::CallbackToken;
    ///
    /// let token = CallbackToken::new(40123, &[0xBE, 0xEF][..]);
    /// let payload = token.encode(&12345u32.to_be_bytes()).unwrap();
    /// let (decoded, value) = CallbackToken::decode(&payload).unwrap();
    /// assert_eq!(decoded, token);
    /// assert_eq!(value, 12345u32.to_be_bytes());
    /// ```
    pub fn encode(&self, value: &[u8]) -> Result<BytesMut> {
        let cookie_len = u16::try_from(self.cookie.len()).map_err(|_| {
            LoopwireError::Protocol(format!("cookie too long: {} bytes", self.cookie.len()))
        })?;

        let mut buf = BytesMut::with_capacity(4 + self.cookie.len() + value.len());
        buf.put_u16(self.port);
        buf.put_u16(cookie_len);
        buf.put_slice(&self.cookie);
        buf.put_slice(value);
        Ok(buf)
    }

    /// Decode a token from the front of a payload, returning it together
    /// with the trailing value bytes.
    pub fn decode(payload: &[u8]) -> Result<(Self, &[u8])> {
        if payload.len() < 4 {
            return Err(LoopwireError::Protocol(
                "payload too short for callback token".to_string(),
            ));
        }
        let port = u16::from_be_bytes([payload[0], payload[1]]);
        let cookie_len = u16::from_be_bytes([payload[2], payload[3]]) as usize;
        let rest = &payload[4..];
        if rest.len() < cookie_len {
            return Err(LoopwireError::Protocol(format!(
                "callback token declares {cookie_len} cookie bytes, {} present",
                rest.len()
            )));
        }
        let token = Self {
            port,
            cookie: Bytes::copy_from_slice(&rest[..cookie_len]),
        };
        Ok((token, &rest[cookie_len..]))
    }
}

/// An ephemeral listener standing in for one local callback function.
///
/// The wrapped function receives the reverse call's value bytes and the
/// cookie from its token, and its result becomes the reverse call's
/// `result_code`.
#[derive(Debug)]
pub struct CallbackHost {
    listener: Listener,
    operation_id: i32,
}

impl CallbackHost {
    /// Open an ephemeral listener (port 0) serving `operation_id` by
    /// forwarding to `callback`.
    pub async fn open<F>(operation_id: i32, callback: F) -> Result<Self>
    where
        F: Fn(&[u8], &[u8]) -> std::result::Result<(), OpError> + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let listener = Listener::builder()
            .operation(operation_id, move |payload: BytesMut| {
                let callback = Arc::clone(&callback);
                async move {
                    let (token, value) = match CallbackToken::decode(&payload) {
                        Ok(decoded) => decoded,
                        Err(e) => {
                            tracing::warn!(error = %e, "reverse call carried a bad token");
                            return Err(OpError::new(STATUS_BAD_TOKEN));
                        }
                    };
                    callback(value, &token.cookie)?;
                    Ok(payload)
                }
            })
            .bind(0)
            .await?;

        tracing::debug!(
            port = listener.local_port(),
            operation_id,
            "callback host ready"
        );
        Ok(Self {
            listener,
            operation_id,
        })
    }

    /// Build the token that addresses this host.
    pub fn token(&self, cookie: impl Into<Bytes>) -> CallbackToken {
        CallbackToken::new(self.listener.local_port(), cookie)
    }

    /// The host's bound port.
    pub fn port(&self) -> u16 {
        self.listener.local_port()
    }

    /// The operation id the host serves.
    pub fn operation_id(&self) -> i32 {
        self.operation_id
    }

    /// Tear the host down. New reverse calls are refused afterwards.
    pub async fn close(self) -> Result<()> {
        self.listener.close().await
    }
}

/// Fire one callback through a transient endpoint: connect to the
/// token's port, perform a single invoke carrying the value and the
/// re-encoded token, and close.
///
/// This is a full independent call/response cycle; the returned bytes
/// are the reverse call's (typically ignored) response payload.
pub async fn fire_callback(
    token: &CallbackToken,
    operation_id: i32,
    value: &[u8],
) -> Result<BytesMut> {
    let config = EndpointConfig {
        retry_interval: CALLBACK_RETRY_INTERVAL,
        connect_deadline: Some(CALLBACK_CONNECT_DEADLINE),
        ..EndpointConfig::default()
    };
    let endpoint = Endpoint::connect_with(token.port, config).await?;
    fire_callback_on(endpoint, token, operation_id, value).await
}

async fn fire_callback_on(
    mut endpoint: Endpoint,
    token: &CallbackToken,
    operation_id: i32,
    value: &[u8],
) -> Result<BytesMut> {
    let mut payload = token.encode(value)?;
    let invoked = endpoint.invoke(operation_id, &mut payload).await;
    let closed = endpoint.close().await;
    invoked?;
    closed?;
    Ok(payload)
}
