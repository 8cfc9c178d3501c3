//! Wire format encoding and decoding.
//!
//! One frame:
//! ```text
//! ┌──────────────┬────────────┬──────────────┬─────────────┬─────────┬──────────┐
//! │ total_length │ request_id │ name_length  │ type name   │ payload │ checksum │
//! │ u32 LE       │ u64 LE     │ u32 LE       │ n bytes,    │ opaque  │ u32 LE   │
//! │              │            │              │ NUL-ended   │         │ Adler-32 │
//! └──────────────┴────────────┴──────────────┴─────────────┴─────────┴──────────┘
//!  ◄──── 12-byte header ─────► ◄────────────── total_length bytes ──────────────►
//! ```
//!
//! The checksum covers everything between the header and the checksum itself.
//! All integers are little-endian.

use crate::error::{Result, RpcError};

/// Fixed header size in bytes: `total_length` + `request_id`.
pub const HEADER_SIZE: usize = 12;

/// Size of the `type_name_length` field.
pub const NAME_LENGTH_SIZE: usize = 4;

/// Size of the trailing checksum.
pub const CHECKSUM_SIZE: usize = 4;

/// Smallest type name on the wire: one character plus the terminator.
pub const MIN_NAME_LENGTH: usize = 2;

/// Smallest valid `total_length`.
pub const MIN_BODY_SIZE: usize = NAME_LENGTH_SIZE + MIN_NAME_LENGTH + CHECKSUM_SIZE;

/// Decoded fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Bytes following the header, up to and including the checksum.
    pub total_length: u32,
    /// Correlation id.
    pub request_id: u64,
}

impl FrameHeader {
    /// Create a new header.
    pub fn new(total_length: u32, request_id: u64) -> Self {
        Self {
            total_length,
            request_id,
        }
    }

    /// Encode header to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use meshwire::protocol::FrameHeader;
    ///
    /// let bytes = FrameHeader::new(20, 7).encode();
    /// assert_eq!(bytes.len(), 12);
    /// assert_eq!(bytes[0], 20);
    /// assert_eq!(bytes[4], 7);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.total_length.to_le_bytes());
        buf[4..12].copy_from_slice(&self.request_id.to_le_bytes());
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let total_length = u32::from_le_bytes(buf.get(0..4)?.try_into().ok()?);
        let request_id = u64::from_le_bytes(buf.get(4..12)?.try_into().ok()?);
        Some(Self {
            total_length,
            request_id,
        })
    }

    /// Full on-wire size of the frame this header starts.
    #[inline]
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + self.total_length as usize
    }

    /// Reject lengths beyond `max_frame_size`.
    pub fn validate(&self, max_frame_size: usize) -> Result<()> {
        let size = self.total_length as usize;
        if size > max_frame_size {
            return Err(RpcError::FrameTooLarge {
                size,
                max: max_frame_size,
            });
        }
        Ok(())
    }
}

/// Adler-32 over `data` (zlib-compatible, initial value 1).
#[inline]
pub fn checksum(data: &[u8]) -> u32 {
    adler2::adler32_slice(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = FrameHeader::new(100, 0xDEAD_BEEF_0102_0304);
        let decoded = FrameHeader::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_little_endian_byte_order() {
        let bytes = FrameHeader::new(0x0403_0201, 0x0C0B_0A09_0807_0605).encode();
        assert_eq!(bytes, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(FrameHeader::decode(&[0u8; 11]).is_none());
    }

    #[test]
    fn test_frame_size_includes_header() {
        assert_eq!(FrameHeader::new(10, 1).frame_size(), 22);
    }

    #[test]
    fn test_validate_cap() {
        assert!(FrameHeader::new(4096, 1).validate(4096).is_ok());

        let err = FrameHeader::new(4097, 1).validate(4096).unwrap_err();
        assert!(matches!(
            err,
            RpcError::FrameTooLarge {
                size: 4097,
                max: 4096
            }
        ));
    }

    #[test]
    fn test_checksum_known_vector() {
        // zlib: adler32(1, "Wikipedia") == 0x11E60398
        assert_eq!(checksum(b"Wikipedia"), 0x11E6_0398);
        assert_eq!(checksum(b""), 1);
    }
}
