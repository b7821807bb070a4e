//! # loopwire
//!
//! Loopback RPC over TCP: a caller process invokes operations
//! implemented by a responder process as if they were local function
//! calls, with synchronous request/response semantics and opaque binary
//! payloads.
//!
//! ## Architecture
//!
//! - **Frame codec** ([`protocol`]): fixed 16-byte header + payload,
//!   with loop-until-complete reads and writes masking partial
//!   transfers.
//! - **Endpoint** ([`endpoint`]): caller side — one outbound connection,
//!   one blocking `invoke` at a time.
//! - **Listener** ([`listener`]): responder side — accept loop plus an
//!   independent session per connection, dispatching through an
//!   immutable registry of handlers.
//! - **Callback bridge** ([`bridge`]): a convention for the responder to
//!   call back into the caller, built from two independent
//!   request/response legs.
//!
//! ## Example
//!
//! ```ignore
//! use bytes::BytesMut;
//! use loopwire::{Endpoint, Listener};
//!
//! #[tokio::main]
//! async fn main() -> loopwire::Result<()> {
//!     let listener = Listener::builder()
//!         .operation(1, |mut payload: BytesMut| async move {
//!             payload.iter_mut().for_each(|b| *b ^= 0xFF);
//!             Ok(payload)
//!         })
//!         .bind(0)
//!         .await?;
//!
//!     let mut endpoint = Endpoint::connect(listener.local_port()).await?;
//!     let mut payload = BytesMut::from(&[0x00, 0x0F][..]);
//!     endpoint.invoke(1, &mut payload).await?;
//!     assert_eq!(&payload[..], &[0xFF, 0xF0]);
//!
//!     endpoint.close().await?;
//!     listener.close().await?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod protocol;

pub use bridge::{fire_callback, CallbackHost, CallbackToken};
pub use dispatch::{DispatchTable, OpError, OpResult, OperationHandler};
pub use endpoint::{Endpoint, EndpointConfig};
pub use error::{LoopwireError, Result};
pub use listener::{Listener, ListenerBuilder, ListenerConfig};
