//! Wire format encoding and decoding.
//!
//! Implements the 16-byte header format:
//! ```text
//! ┌──────────────┬────────────────┬─────────────┬────────────────┐
//! │ operation_id │ payload_length │ result_code │ secondary_code │
//! │ 4 bytes      │ 4 bytes        │ 4 bytes     │ 4 bytes        │
//! │ int32 BE     │ uint32 BE      │ int32 BE    │ int32 BE       │
//! └──────────────┴────────────────┴─────────────┴────────────────┘
//! ```
//!
//! All fields are Big Endian. The same header precedes every payload in
//! both directions; `result_code`/`secondary_code` are only meaningful
//! in responses.

use crate::error::{LoopwireError, Result};

/// Header size in bytes (fixed, exactly 16).
pub const HEADER_SIZE: usize = 16;

/// Default maximum payload size (1 GB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1_073_741_824;

/// Reserved operation id (never dispatched).
pub const OP_ID_INVALID: i32 = 0;

/// `result_code` value for a successful operation.
pub const STATUS_OK: i32 = 0;

/// `result_code` value for a request whose operation id had no handler.
pub const STATUS_NO_HANDLER: i32 = -99;

/// `secondary_code` accompanying [`STATUS_NO_HANDLER`] (ENXIO).
pub const ERRNO_NO_HANDLER: i32 = 6;

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Application-defined operation identifier (`0` reserved).
    pub operation_id: i32,
    /// Payload length in bytes.
    pub payload_length: u32,
    /// Handler status; `0` = success. Meaningful only in responses.
    pub result_code: i32,
    /// OS error number accompanying a non-zero `result_code`.
    pub secondary_code: i32,
}

impl FrameHeader {
    /// Create a request header. Result fields are zeroed; the caller
    /// ignores them in this direction.
    pub fn request(operation_id: i32, payload_length: u32) -> Self {
        Self {
            operation_id,
            payload_length,
            result_code: 0,
            secondary_code: 0,
        }
    }

    /// Create a response header echoing the request's operation id.
    pub fn response(
        operation_id: i32,
        payload_length: u32,
        result_code: i32,
        secondary_code: i32,
    ) -> Self {
        Self {
            operation_id,
            payload_length,
            result_code,
            secondary_code,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use loopwire::protocol::FrameHeader;
    ///
    /// let header = FrameHeader::request(1, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 16);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.operation_id.to_be_bytes());
        buf[4..8].copy_from_slice(&self.payload_length.to_be_bytes());
        buf[8..12].copy_from_slice(&self.result_code.to_be_bytes());
        buf[12..16].copy_from_slice(&self.secondary_code.to_be_bytes());
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            operation_id: i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            payload_length: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            result_code: i32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            secondary_code: i32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }

    /// Validate the declared payload length against a configured cap.
    ///
    /// A header declaring more poisons the connection: the peer is about
    /// to stream that many bytes and the frame boundary is lost.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(LoopwireError::Protocol(format!(
                "payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }
        Ok(())
    }

    /// Check whether this response reports success.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.result_code == STATUS_OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = FrameHeader::response(7, 1024, -3, 6);
        let encoded = original.encode();
        let decoded = FrameHeader::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = FrameHeader {
            operation_id: 0x0102_0304,
            payload_length: 0x0506_0708,
            result_code: 0x090A_0B0C,
            secondary_code: 0x0D0E_0F10,
        };
        let bytes = header.encode();

        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[4..8], &[0x05, 0x06, 0x07, 0x08]);
        assert_eq!(&bytes[8..12], &[0x09, 0x0A, 0x0B, 0x0C]);
        assert_eq!(&bytes[12..16], &[0x0D, 0x0E, 0x0F, 0x10]);
    }

    #[test]
    fn test_negative_codes_roundtrip() {
        let header = FrameHeader::response(-1, 0, STATUS_NO_HANDLER, ERRNO_NO_HANDLER);
        let decoded = FrameHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded.operation_id, -1);
        assert_eq!(decoded.result_code, STATUS_NO_HANDLER);
        assert_eq!(decoded.secondary_code, ERRNO_NO_HANDLER);
        assert!(!decoded.is_ok());
    }

    #[test]
    fn test_header_size_is_exactly_16() {
        assert_eq!(HEADER_SIZE, 16);
        let header = FrameHeader::request(1, 0);
        assert_eq!(header.encode().len(), 16);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 15]; // One byte short
        assert!(FrameHeader::decode(&buf).is_none());
    }

    #[test]
    fn test_validate_payload_too_large() {
        let header = FrameHeader::request(1, 1_000_000);
        let result = header.validate(100); // Max 100 bytes
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_validate_at_limit_allowed() {
        let header = FrameHeader::request(1, 100);
        assert!(header.validate(100).is_ok());
    }

    #[test]
    fn test_request_zeroes_result_fields() {
        let header = FrameHeader::request(42, 8);
        assert_eq!(header.result_code, 0);
        assert_eq!(header.secondary_code, 0);
        assert!(header.is_ok());
    }
}
