//! Reliable framed I/O over a connected byte stream.
//!
//! A stream socket may transfer fewer bytes than asked; these helpers
//! loop until the full count has moved, turning short reads and writes
//! into an all-or-nothing message abstraction. A read of zero bytes is
//! the one state that needs care: before the first byte of a header it
//! means the peer closed cleanly, anywhere else it means a frame was cut
//! off mid-transfer.

use std::io::IoSlice;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::wire_format::{FrameHeader, HEADER_SIZE};
use crate::error::{LoopwireError, Result};

/// Read exactly `buf.len()` bytes.
///
/// Returns `Ok(true)` on a complete read and `Ok(false)` if the peer
/// closed before the first byte arrived. A close after a partial read is
/// a [`LoopwireError::ShortTransfer`].
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut got = 0;
    while got < buf.len() {
        let n = reader.read(&mut buf[got..]).await?;
        if n == 0 {
            if got == 0 {
                return Ok(false);
            }
            return Err(LoopwireError::ShortTransfer {
                expected: buf.len(),
                got,
            });
        }
        got += n;
    }
    Ok(true)
}

/// Read one frame header from the stream.
///
/// Returns `None` on clean EOF (the peer closed between messages).
pub async fn read_header<R>(reader: &mut R) -> Result<Option<FrameHeader>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_SIZE];
    if !read_full(reader, &mut buf).await? {
        return Ok(None);
    }
    FrameHeader::decode(&buf)
        .map(Some)
        .ok_or_else(|| LoopwireError::Protocol("undecodable frame header".to_string()))
}

/// Read exactly `length` payload bytes following a header.
///
/// At this point the header has committed the peer to `length` more
/// bytes, so EOF anywhere in the payload is a short transfer, never a
/// clean close.
pub async fn read_payload<R>(reader: &mut R, length: u32) -> Result<BytesMut>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::zeroed(length as usize);
    if length == 0 {
        return Ok(buf);
    }
    if !read_full(reader, &mut buf).await? {
        return Err(LoopwireError::ShortTransfer {
            expected: length as usize,
            got: 0,
        });
    }
    Ok(buf)
}

/// Write one complete frame (header + payload) and flush.
///
/// Uses a vectored write for the common case where header and payload go
/// out in one syscall, continuing byte-exact after partial writes.
pub async fn write_frame<W>(writer: &mut W, header: &FrameHeader, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let head = header.encode();
    let total = HEADER_SIZE + payload.len();
    let mut written = 0;

    while written < total {
        let n = if written < HEADER_SIZE {
            let slices = [IoSlice::new(&head[written..]), IoSlice::new(payload)];
            writer.write_vectored(&slices).await?
        } else {
            writer.write(&payload[written - HEADER_SIZE..]).await?
        };
        if n == 0 {
            return Err(LoopwireError::ShortTransfer {
                expected: total,
                got: written,
            });
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}
