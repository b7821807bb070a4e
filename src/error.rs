//! Error types for loopwire.

use thiserror::Error;

use crate::protocol::STATUS_NO_HANDLER;

/// Main error type for all loopwire operations.
#[derive(Debug, Error)]
pub enum LoopwireError {
    /// I/O error during socket setup or transfer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connect retry loop ran past its configured deadline.
    #[error("connect to 127.0.0.1:{port} timed out after {waited:?}")]
    ConnectTimeout {
        /// Port the endpoint was trying to reach.
        port: u16,
        /// Total time spent retrying.
        waited: std::time::Duration,
    },

    /// A transfer moved fewer bytes than the frame declared.
    ///
    /// The connection is unusable after this; the stream position is
    /// somewhere inside a frame.
    #[error("short transfer: expected {expected} bytes, got {got}")]
    ShortTransfer {
        /// Bytes the frame declared.
        expected: usize,
        /// Bytes actually transferred.
        got: usize,
    },

    /// Protocol error (malformed or oversized frame).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer closed the connection cleanly.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The responder reported a non-zero result code.
    #[error("remote operation failed: result_code={result_code}, secondary_code={secondary_code}")]
    Remote {
        /// Handler status echoed from the response header.
        result_code: i32,
        /// OS error number echoed from the response header.
        secondary_code: i32,
    },

    /// The handle was closed and can no longer be used.
    #[error("connection closed")]
    Closed,
}

impl LoopwireError {
    /// True when the responder had no handler registered for the
    /// invoked operation id.
    pub fn is_no_handler(&self) -> bool {
        matches!(self, Self::Remote { result_code, .. } if *result_code == STATUS_NO_HANDLER)
    }
}

/// Result type alias using LoopwireError.
pub type Result<T> = std::result::Result<T, LoopwireError>;
