//! Responder-side listener — accept loop and per-connection sessions.
//!
//! A [`Listener`] binds a loopback port, accepts connections on a
//! background task, and serves each accepted connection with an
//! independent session task until that peer disconnects. Sessions read
//! one request at a time, dispatch it through the listener's immutable
//! [`DispatchTable`], and write the response back on the same
//! connection.
//!
//! Shutdown comes in two shapes. [`Listener::close`] stops accepting and
//! deliberately leaves live sessions alone — they belong to their peers
//! and run until those disconnect. [`Listener::shutdown`] additionally
//! waits for sessions to drain, cancelling any that outlive the
//! deadline.
//!
//! # Example
//!
//! ```ignore
//! use bytes::BytesMut;
//! use loopwire::Listener;
//!
//! let listener = Listener::builder()
//!     .operation(1, |mut payload: BytesMut| async move {
//!         payload.iter_mut().for_each(|b| *b ^= 0xFF);
//!         Ok(payload)
//!     })
//!     .bind(0)
//!     .await?;
//! println!("serving on port {}", listener.local_port());
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::dispatch::{DispatchTable, DispatchTableBuilder, OpResult, OperationHandler};
use crate::error::{LoopwireError, Result};
use crate::protocol::io::{read_header, read_payload, write_frame};
use crate::protocol::{
    FrameHeader, DEFAULT_MAX_PAYLOAD_SIZE, ERRNO_NO_HANDLER, STATUS_NO_HANDLER, STATUS_OK,
};

/// Default drain deadline for [`Listener::shutdown`].
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Maximum concurrent sessions. `None` leaves session growth
    /// unbounded, which is the default contract; setting a limit makes
    /// the listener refuse connections beyond it.
    pub max_sessions: Option<usize>,
    /// Cap on the payload length a request header may declare.
    pub max_payload_size: u32,
    /// Disable send coalescing on accepted connections.
    pub nodelay: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_sessions: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            nodelay: true,
        }
    }
}

/// Builder for configuring and starting a [`Listener`].
#[derive(Debug)]
pub struct ListenerBuilder {
    table: DispatchTableBuilder,
    config: ListenerConfig,
}

impl ListenerBuilder {
    /// Register an async closure as the handler for `operation_id`.
    pub fn operation<F, Fut>(mut self, operation_id: i32, handler: F) -> Self
    where
        F: Fn(BytesMut) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OpResult> + Send + 'static,
    {
        self.table = self.table.operation(operation_id, handler);
        self
    }

    /// Register a pre-built handler for `operation_id`.
    pub fn handler(mut self, operation_id: i32, handler: impl OperationHandler) -> Self {
        self.table = self.table.handler(operation_id, handler);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }

    /// Bound the number of concurrent sessions.
    pub fn max_sessions(mut self, limit: usize) -> Self {
        self.config.max_sessions = Some(limit);
        self
    }

    /// Freeze the dispatch table, bind `127.0.0.1:port` and start
    /// accepting.
    ///
    /// Port `0` requests an OS-assigned ephemeral port; retrieve it with
    /// [`Listener::local_port`].
    pub async fn bind(self, port: u16) -> Result<Listener> {
        Listener::bind(port, self.table.build()?, self.config).await
    }
}

/// A responder-owned handle that accepts connections and dispatches
/// requests to registered handlers.
#[derive(Debug)]
pub struct Listener {
    port: u16,
    accept_cancel: CancellationToken,
    session_cancel: CancellationToken,
    sessions: TaskTracker,
    accept_task: JoinHandle<()>,
}

impl Listener {
    /// Create a new listener builder.
    pub fn builder() -> ListenerBuilder {
        ListenerBuilder {
            table: DispatchTable::builder(),
            config: ListenerConfig::default(),
        }
    }

    async fn bind(port: u16, table: DispatchTable, config: ListenerConfig) -> Result<Self> {
        let socket = TcpListener::bind(("127.0.0.1", port)).await?;
        let local_port = socket.local_addr()?.port();

        let accept_cancel = CancellationToken::new();
        let session_cancel = CancellationToken::new();
        let sessions = TaskTracker::new();

        let accept_task = tokio::spawn(accept_loop(
            socket,
            Arc::new(table),
            config,
            accept_cancel.clone(),
            session_cancel.clone(),
            sessions.clone(),
        ));

        tracing::info!(port = local_port, "listener started");
        Ok(Self {
            port: local_port,
            accept_cancel,
            session_cancel,
            sessions,
            accept_task,
        })
    }

    /// The actually-bound port (differs from the requested port when `0`
    /// was requested).
    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Stop accepting and close the listening socket.
    ///
    /// Sessions that were already accepted are not signalled: each is
    /// owned by its peer and keeps serving until that peer disconnects.
    /// Callers that need drain semantics use [`Listener::shutdown`].
    pub async fn close(self) -> Result<()> {
        self.accept_cancel.cancel();
        self.accept_task
            .await
            .map_err(|e| LoopwireError::Protocol(format!("accept task failed: {e}")))?;
        tracing::info!(port = self.port, "listener closed");
        Ok(())
    }

    /// Stop accepting, then wait up to `drain` for live sessions to end
    /// on their own. Sessions still running at the deadline are
    /// cancelled (observed at their next message boundary) and awaited.
    pub async fn shutdown(self, drain: Duration) -> Result<()> {
        self.accept_cancel.cancel();
        self.accept_task
            .await
            .map_err(|e| LoopwireError::Protocol(format!("accept task failed: {e}")))?;

        self.sessions.close();
        if tokio::time::timeout(drain, self.sessions.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                port = self.port,
                remaining = self.sessions.len(),
                "drain deadline expired, cancelling sessions"
            );
            self.session_cancel.cancel();
            self.sessions.wait().await;
        }
        tracing::info!(port = self.port, "listener shut down");
        Ok(())
    }
}

/// Accept loop — runs until cancelled or a fatal accept error.
///
/// Accept never waits on a session: each accepted connection is handed
/// to its own tracked task immediately.
async fn accept_loop(
    socket: TcpListener,
    table: Arc<DispatchTable>,
    config: ListenerConfig,
    accept_cancel: CancellationToken,
    session_cancel: CancellationToken,
    sessions: TaskTracker,
) {
    let gate = config
        .max_sessions
        .map(|limit| Arc::new(Semaphore::new(limit)));

    loop {
        tokio::select! {
            _ = accept_cancel.cancelled() => {
                tracing::debug!("accept loop stopping");
                break;
            }
            accepted = socket.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) if matches!(
                        e.kind(),
                        std::io::ErrorKind::ConnectionAborted | std::io::ErrorKind::ConnectionReset
                    ) => {
                        // The peer vanished between connect and accept.
                        tracing::debug!(error = %e, "transient accept failure");
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "fatal accept failure, stopping");
                        break;
                    }
                };

                let permit = match &gate {
                    Some(semaphore) => match semaphore.clone().try_acquire_owned() {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            tracing::warn!(%peer, "session limit reached, refusing connection");
                            drop(stream);
                            continue;
                        }
                    },
                    None => None,
                };

                if config.nodelay {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::warn!(%peer, error = %e, "failed to set nodelay");
                    }
                }

                tracing::debug!(%peer, "accepted connection");
                let table = Arc::clone(&table);
                let cancel = session_cancel.clone();
                let max_payload_size = config.max_payload_size;
                sessions.spawn(async move {
                    let _permit: Option<OwnedSemaphorePermit> = permit;
                    match session_loop(stream, table, cancel, max_payload_size).await {
                        Ok(()) => tracing::debug!(%peer, "session ended"),
                        Err(e) => tracing::warn!(%peer, error = %e, "session failed"),
                    }
                });
            }
        }
    }
}

/// Session loop — serves one connection's sequence of requests.
///
/// Ends quietly on clean peer close; any transport error or size
/// mismatch ends it with the error surfaced to the accept-side log.
async fn session_loop(
    mut stream: TcpStream,
    table: Arc<DispatchTable>,
    cancel: CancellationToken,
    max_payload_size: u32,
) -> Result<()> {
    loop {
        let header = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("session cancelled");
                return Ok(());
            }
            read = read_header(&mut stream) => match read? {
                Some(header) => header,
                None => return Ok(()), // clean peer close
            }
        };
        header.validate(max_payload_size)?;

        let payload = read_payload(&mut stream, header.payload_length).await?;

        let (result_code, secondary_code, reply) = match table.get(header.operation_id) {
            None => {
                // Distinguished outcome, not a connection error: the
                // session stays usable and the request payload is echoed
                // back unchanged.
                tracing::warn!(
                    operation_id = header.operation_id,
                    "no handler for operation"
                );
                (STATUS_NO_HANDLER, ERRNO_NO_HANDLER, payload)
            }
            Some(handler) => match handler.call(payload).await {
                Ok(reply) => (STATUS_OK, 0, reply),
                Err(e) => {
                    tracing::debug!(
                        operation_id = header.operation_id,
                        code = e.code,
                        os_error = e.os_error,
                        "handler reported failure"
                    );
                    // A zero code would masquerade as success.
                    let code = if e.code == STATUS_OK { -1 } else { e.code };
                    (code, e.os_error, BytesMut::new())
                }
            },
        };

        let response = FrameHeader::response(
            header.operation_id,
            reply.len() as u32,
            result_code,
            secondary_code,
        );
        write_frame(&mut stream, &response, &reply).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_is_unbounded() {
        let config = ListenerConfig::default();
        assert!(config.max_sessions.is_none());
        assert_eq!(config.max_payload_size, DEFAULT_MAX_PAYLOAD_SIZE);
        assert!(config.nodelay);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port_reports_nonzero() {
        let listener = Listener::builder()
            .operation(1, |payload: BytesMut| async move { Ok(payload) })
            .bind(0)
            .await
            .unwrap();

        assert_ne!(listener.local_port(), 0);
        listener.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails_at_bind() {
        let result = Listener::builder()
            .operation(1, |payload: BytesMut| async move { Ok(payload) })
            .operation(1, |payload: BytesMut| async move { Ok(payload) })
            .bind(0)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_with_no_sessions_is_immediate() {
        let listener = Listener::builder()
            .operation(1, |payload: BytesMut| async move { Ok(payload) })
            .bind(0)
            .await
            .unwrap();

        listener.shutdown(Duration::from_millis(50)).await.unwrap();
    }
}
