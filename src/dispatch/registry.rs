//! Dispatch table mapping operation ids to handlers.
//!
//! The table is built once, before the listener starts accepting, and is
//! immutable for the listener's lifetime. Each session borrows it
//! through an `Arc`, so lookup needs no locking. Registration after bind
//! is not representable: the builder is consumed by the build.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use bytes::BytesMut;

use super::{FnHandler, OpResult, OperationHandler};
use crate::error::{LoopwireError, Result};
use crate::protocol::OP_ID_INVALID;

/// Immutable registry of operation handlers.
pub struct DispatchTable {
    handlers: HashMap<i32, Box<dyn OperationHandler>>,
}

impl DispatchTable {
    /// Start building a table.
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder {
            entries: Vec::new(),
        }
    }

    /// Look up the handler for an operation id.
    ///
    /// The reserved id `0` and negative ids never match, regardless of
    /// what was registered.
    pub fn get(&self, operation_id: i32) -> Option<&dyn OperationHandler> {
        if operation_id <= OP_ID_INVALID {
            return None;
        }
        self.handlers.get(&operation_id).map(|h| h.as_ref())
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no operations are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<i32> = self.handlers.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("DispatchTable").field("ids", &ids).finish()
    }
}

/// Builder collecting (operation id, handler) pairs.
pub struct DispatchTableBuilder {
    entries: Vec<(i32, Box<dyn OperationHandler>)>,
}

impl DispatchTableBuilder {
    /// Register an async closure as the handler for `operation_id`.
    pub fn operation<F, Fut>(mut self, operation_id: i32, handler: F) -> Self
    where
        F: Fn(BytesMut) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OpResult> + Send + 'static,
    {
        self.entries
            .push((operation_id, Box::new(FnHandler(handler))));
        self
    }

    /// Register a pre-built handler for `operation_id`.
    pub fn handler(mut self, operation_id: i32, handler: impl OperationHandler) -> Self {
        self.entries.push((operation_id, Box::new(handler)));
        self
    }

    /// Validate the registrations and freeze the table.
    ///
    /// Fails on a reserved/non-positive id or a duplicate registration.
    pub fn build(self) -> Result<DispatchTable> {
        let mut handlers = HashMap::with_capacity(self.entries.len());
        for (operation_id, handler) in self.entries {
            if operation_id <= OP_ID_INVALID {
                return Err(LoopwireError::Protocol(format!(
                    "operation id {operation_id} is reserved"
                )));
            }
            if handlers.insert(operation_id, handler).is_some() {
                return Err(LoopwireError::Protocol(format!(
                    "operation id {operation_id} registered twice"
                )));
            }
        }
        Ok(DispatchTable { handlers })
    }
}

impl fmt::Debug for DispatchTableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<i32> = self.entries.iter().map(|(id, _)| *id).collect();
        f.debug_struct("DispatchTableBuilder")
            .field("ids", &ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(payload: BytesMut) -> impl Future<Output = OpResult> {
        async move { Ok(payload) }
    }

    #[test]
    fn test_build_and_lookup() {
        let table = DispatchTable::builder()
            .operation(1, echo)
            .operation(2, echo)
            .build()
            .unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.get(1).is_some());
        assert!(table.get(2).is_some());
        assert!(table.get(3).is_none());
    }

    #[test]
    fn test_reserved_and_negative_ids_never_match() {
        let table = DispatchTable::builder().operation(1, echo).build().unwrap();

        assert!(table.get(0).is_none());
        assert!(table.get(-1).is_none());
    }

    #[test]
    fn test_registering_reserved_id_fails() {
        let result = DispatchTable::builder().operation(0, echo).build();
        assert!(result.is_err());

        let result = DispatchTable::builder().operation(-7, echo).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let result = DispatchTable::builder()
            .operation(5, echo)
            .operation(5, echo)
            .build();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("registered twice"));
    }

    #[test]
    fn test_empty_table() {
        let table = DispatchTable::builder().build().unwrap();
        assert!(table.is_empty());
        assert!(table.get(1).is_none());
    }

    #[tokio::test]
    async fn test_registered_handler_is_callable() {
        let table = DispatchTable::builder()
            .operation(1, |mut payload: BytesMut| async move {
                payload.reverse();
                Ok(payload)
            })
            .build()
            .unwrap();

        let handler = table.get(1).unwrap();
        let reply = handler.call(BytesMut::from(&b"abc"[..])).await.unwrap();
        assert_eq!(&reply[..], b"cba");
    }
}
