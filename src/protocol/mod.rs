//! Wire protocol — frame header layout and reliable framed I/O.
//!
//! Every message on a connection is a fixed 16-byte [`FrameHeader`]
//! followed by exactly `payload_length` opaque bytes. The header's
//! declared length is the sole framing mechanism; there is no delimiter.
//! [`io`] provides the loop-until-complete read/write discipline that
//! turns a stream socket into that message abstraction.

pub mod io;
mod wire_format;

pub use wire_format::{
    FrameHeader, DEFAULT_MAX_PAYLOAD_SIZE, ERRNO_NO_HANDLER, HEADER_SIZE, OP_ID_INVALID,
    STATUS_NO_HANDLER, STATUS_OK,
};
