//! Frame struct, encoding and body validation.
//!
//! # Example
//!
//! ```
//! use meshwire::codec::Message;
//! use meshwire::protocol::{Frame, FrameDecoder};
//!
//! let frame = Frame::new(42, Message::new("demo.Echo", &b"hello"[..]));
//! let bytes = frame.encode(4096).unwrap();
//!
//! let mut decoder = FrameDecoder::new(4096);
//! decoder.decode(&bytes).unwrap();
//! assert_eq!(decoder.take_next(), Some(frame));
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    checksum, FrameHeader, CHECKSUM_SIZE, HEADER_SIZE, MIN_BODY_SIZE, MIN_NAME_LENGTH,
    NAME_LENGTH_SIZE,
};
use crate::codec::Message;
use crate::error::{Result, RpcError};

/// One decoded RPC message with its correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlation id.
    pub request_id: u64,
    /// Type-tagged payload.
    pub message: Message,
}

impl Frame {
    /// Create a new frame.
    pub fn new(request_id: u64, message: Message) -> Self {
        Self {
            request_id,
            message,
        }
    }

    /// Get the request ID.
    #[inline]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Get the message type name.
    #[inline]
    pub fn type_name(&self) -> &str {
        self.message.type_name()
    }

    /// Consume the frame, keeping the message.
    #[inline]
    pub fn into_message(self) -> Message {
        self.message
    }

    /// Encode to wire bytes.
    ///
    /// Fails if the type name is unusable on the wire or the frame would exceed
    /// `max_frame_size` (the peer would reject it and drop the connection).
    pub fn encode(&self, max_frame_size: usize) -> Result<Bytes> {
        build_frame(self.request_id, &self.message, max_frame_size)
    }
}

/// Encode a message into a complete frame.
pub fn build_frame(request_id: u64, message: &Message, max_frame_size: usize) -> Result<Bytes> {
    let name = message.type_name().as_bytes();
    if name.is_empty() || name.contains(&0) {
        return Err(RpcError::Protocol(format!(
            "Invalid type name {:?}",
            message.type_name()
        )));
    }

    let name_len = name.len() + 1;
    let total = NAME_LENGTH_SIZE + name_len + message.body().len() + CHECKSUM_SIZE;
    if total > max_frame_size {
        return Err(RpcError::FrameTooLarge {
            size: total,
            max: max_frame_size,
        });
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + total);
    buf.put_slice(&FrameHeader::new(total as u32, request_id).encode());
    buf.put_u32_le(name_len as u32);
    buf.put_slice(name);
    buf.put_u8(0);
    buf.put_slice(message.body());
    let sum = checksum(&buf[HEADER_SIZE..]);
    buf.put_u32_le(sum);

    Ok(buf.freeze())
}

/// Validate and split a frame body (`total_length` bytes after the header).
pub(crate) fn parse_body(request_id: u64, body: &Bytes) -> Result<Frame> {
    let len = body.len();
    if len < MIN_BODY_SIZE {
        return Err(RpcError::Protocol(format!("Frame body too short: {len}")));
    }

    let (covered, trailer) = body.split_at(len - CHECKSUM_SIZE);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = checksum(covered);
    if expected != actual {
        return Err(RpcError::Protocol(format!(
            "Checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
        )));
    }

    let name_len = u32::from_le_bytes([covered[0], covered[1], covered[2], covered[3]]) as usize;
    if name_len < MIN_NAME_LENGTH || name_len > len - NAME_LENGTH_SIZE - CHECKSUM_SIZE {
        return Err(RpcError::Protocol(format!(
            "Type name length {name_len} out of range for body of {len}"
        )));
    }

    let name_end = NAME_LENGTH_SIZE + name_len;
    let name = &covered[NAME_LENGTH_SIZE..name_end];
    let Some((&0, name)) = name.split_last() else {
        return Err(RpcError::Protocol("Type name is not terminated".to_string()));
    };
    let type_name = std::str::from_utf8(name)
        .map_err(|_| RpcError::Protocol("Type name is not UTF-8".to_string()))?;

    let payload = body.slice(name_end..len - CHECKSUM_SIZE);
    Ok(Frame::new(request_id, Message::new(type_name, payload)))
}
