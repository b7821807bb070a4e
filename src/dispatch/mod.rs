//! Operation dispatch — handler trait and the per-listener registry.
//!
//! Handlers own the request payload for the duration of the call and
//! return the response payload; by convention they transform the buffer
//! in place and return it at the same length, which is what keeps the
//! caller's in/out `invoke` contract meaningful. On failure the handler
//! returns an [`OpError`] instead; the session then answers with an
//! empty payload and the error's codes in the response header.

mod registry;

pub use registry::{DispatchTable, DispatchTableBuilder};

use std::future::Future;
use std::pin::Pin;

use bytes::BytesMut;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure reported by an operation handler.
///
/// `code` is surfaced to the caller as the response's `result_code` and
/// must be non-zero; `os_error` travels in `secondary_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpError {
    /// Handler status code (non-zero).
    pub code: i32,
    /// OS error number, `0` when not applicable.
    pub os_error: i32,
}

impl OpError {
    /// Create an error with no accompanying OS error number.
    pub fn new(code: i32) -> Self {
        Self { code, os_error: 0 }
    }

    /// Create an error carrying an OS error number.
    pub fn with_os_error(code: i32, os_error: i32) -> Self {
        Self { code, os_error }
    }
}

/// Result of one handler invocation: the response payload on success.
pub type OpResult = std::result::Result<BytesMut, OpError>;

/// Async handler for a registered operation.
pub trait OperationHandler: Send + Sync + 'static {
    /// Handle a request. The payload buffer is owned for the call's
    /// duration; the returned buffer becomes the response payload.
    fn call(&self, payload: BytesMut) -> BoxFuture<'static, OpResult>;
}

/// Adapter implementing [`OperationHandler`] for plain async closures.
pub(crate) struct FnHandler<F>(pub(crate) F);

impl<F, Fut> OperationHandler for FnHandler<F>
where
    F: Fn(BytesMut) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = OpResult> + Send + 'static,
{
    fn call(&self, payload: BytesMut) -> BoxFuture<'static, OpResult> {
        Box::pin((self.0)(payload))
    }
}
