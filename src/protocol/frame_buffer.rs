//! Incremental frame decoder.
//!
//! Uses `bytes::BytesMut` to accumulate socket reads and peels complete frames
//! off the front. Decoding never performs I/O: the caller reads the socket and
//! hands the bytes over.
//!
//! A frame whose body fails validation (checksum, name length, terminator) is
//! dropped on its own; the length prefix already told us where the next frame
//! starts. A length prefix above the cap is different: nothing after it can be
//! trusted, so the whole buffer is discarded and an error is returned.
//!
//! # Example
//!
//! ```ignore
//! use meshwire::protocol::FrameDecoder;
//!
//! let mut decoder = FrameDecoder::new(4096);
//!
//! // Data arrives in chunks from socket
//! let frames = decoder.push(&chunk)?;
//!
//! for frame in frames {
//!     println!("request {} carries {}", frame.request_id, frame.type_name());
//! }
//! ```

use std::collections::VecDeque;

use bytes::BytesMut;

use super::frame::parse_body;
use super::wire_format::{FrameHeader, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

/// Decoder state for one connection.
pub struct FrameDecoder {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Frames decoded but not yet taken.
    ready: VecDeque<Frame>,
    /// Hard cap on `total_length`.
    max_frame_size: usize,
    /// Frames discarded for failing validation.
    dropped: u64,
}

impl FrameDecoder {
    /// Create a decoder with the given cap on `total_length`.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(HEADER_SIZE + max_frame_size),
            ready: VecDeque::new(),
            max_frame_size,
            dropped: 0,
        }
    }

    /// Append bytes and decode every complete frame now available.
    ///
    /// Returns how many frames were queued for [`take_next`](Self::take_next).
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` if a length prefix exceeds the cap. The buffer is
    /// cleared; the connection cannot be resynchronized and should be closed.
    pub fn decode(&mut self, data: &[u8]) -> Result<usize> {
        self.buffer.extend_from_slice(data);

        let mut queued = 0;
        while let Some(header) = FrameHeader::decode(&self.buffer) {
            if let Err(e) = header.validate(self.max_frame_size) {
                self.buffer.clear();
                return Err(e);
            }

            if self.buffer.len() < header.frame_size() {
                break;
            }

            let mut frame = self.buffer.split_to(header.frame_size());
            let body = frame.split_off(HEADER_SIZE).freeze();

            match parse_body(header.request_id, &body) {
                Ok(frame) => {
                    self.ready.push_back(frame);
                    queued += 1;
                }
                Err(e) => {
                    self.dropped += 1;
                    tracing::warn!(request_id = header.request_id, "Dropping frame: {}", e);
                }
            }
        }

        Ok(queued)
    }

    /// Take the oldest decoded frame, if any.
    pub fn take_next(&mut self) -> Option<Frame> {
        self.ready.pop_front()
    }

    /// Decode and drain in one call.
    ///
    /// This is the main API for processing incoming data from the socket.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.decode(data)?;
        Ok(self.ready.drain(..).collect())
    }

    /// Number of undecoded bytes buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of decoded frames waiting in the queue.
    pub fn pending(&self) -> usize {
        self.ready.len()
    }

    /// Frames dropped so far for failing validation.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Clear buffered bytes and queued frames.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.ready.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Message;
    use crate::error::RpcError;
    use crate::protocol::build_frame;

    const MAX: usize = 4096;

    /// Helper to create a valid frame as bytes.
    fn make_frame_bytes(request_id: u64, type_name: &str, payload: &[u8]) -> Vec<u8> {
        build_frame(request_id, &Message::new(type_name, payload.to_vec()), MAX)
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut decoder = FrameDecoder::new(MAX);
        let frames = decoder
            .push(&make_frame_bytes(42, "echo", b"hello"))
            .unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].request_id, 42);
        assert_eq!(frames[0].type_name(), "echo");
        assert_eq!(frames[0].message.body(), b"hello");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_take_next_in_arrival_order() {
        let mut decoder = FrameDecoder::new(MAX);
        let mut combined = make_frame_bytes(9, "a", b"first");
        combined.extend(make_frame_bytes(3, "b", b"second"));
        combined.extend(make_frame_bytes(5, "c", b"third"));

        assert_eq!(decoder.decode(&combined).unwrap(), 3);
        assert_eq!(decoder.pending(), 3);

        let ids: Vec<u64> = std::iter::from_fn(|| decoder.take_next())
            .map(|f| f.request_id)
            .collect();
        assert_eq!(ids, vec![9, 3, 5]);
        assert!(decoder.take_next().is_none());
    }

    #[test]
    fn test_fragmented_header() {
        let mut decoder = FrameDecoder::new(MAX);
        let bytes = make_frame_bytes(42, "t", b"test");

        assert!(decoder.push(&bytes[..5]).unwrap().is_empty());
        assert_eq!(decoder.buffered(), 5);

        let frames = decoder.push(&bytes[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_fragmented_body() {
        let mut decoder = FrameDecoder::new(MAX);
        let payload = b"this is a longer payload that will be fragmented";
        let bytes = make_frame_bytes(42, "t", payload);

        let split = HEADER_SIZE + 10;
        assert!(decoder.push(&bytes[..split]).unwrap().is_empty());

        let frames = decoder.push(&bytes[split..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message.body(), payload);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut decoder = FrameDecoder::new(MAX);
        let bytes = make_frame_bytes(42, "t", b"hi");

        let mut all = Vec::new();
        for byte in &bytes {
            all.extend(decoder.push(&[*byte]).unwrap());
        }

        assert_eq!(all.len(), 1);
        assert_eq!(all[0].request_id, 42);
        assert_eq!(all[0].message.body(), b"hi");
    }

    #[test]
    fn test_corrupt_frame_dropped_next_frame_survives() {
        let mut decoder = FrameDecoder::new(MAX);
        let mut bad = make_frame_bytes(1, "t", b"corrupted");
        let last_payload_byte = bad.len() - 5;
        bad[last_payload_byte] ^= 0x80;
        let good = make_frame_bytes(2, "t", b"intact");

        let mut data = bad;
        data.extend(good);

        let frames = decoder.push(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].request_id, 2);
        assert_eq!(decoder.dropped_frames(), 1);
    }

    #[test]
    fn test_oversize_length_clears_buffer() {
        let mut decoder = FrameDecoder::new(100);
        let header = FrameHeader::new(1000, 42).encode();

        let err = decoder.push(&header).unwrap_err();
        assert!(matches!(err, RpcError::FrameTooLarge { size: 1000, max: 100 }));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_oversize_checked_before_body_arrives() {
        let mut decoder = FrameDecoder::new(MAX);
        let mut data = FrameHeader::new(u32::MAX, 1).encode().to_vec();
        data.extend_from_slice(&[0u8; 16]);

        assert!(decoder.decode(&data).is_err());
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut decoder = FrameDecoder::new(MAX);
        let frame1 = make_frame_bytes(1, "a", b"first");
        let frame2 = make_frame_bytes(2, "b", b"second");

        let mut data = frame1.clone();
        data.extend_from_slice(&frame2[..5]);

        let frames = decoder.push(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].request_id, 1);
        assert_eq!(decoder.buffered(), 5);

        let frames = decoder.push(&frame2[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].request_id, 2);
    }

    #[test]
    fn test_length_below_minimum_is_dropped_not_fatal() {
        let mut decoder = FrameDecoder::new(MAX);
        let mut data = FrameHeader::new(3, 1).encode().to_vec();
        data.extend_from_slice(&[0u8; 3]);
        data.extend(make_frame_bytes(2, "t", b"ok"));

        let frames = decoder.push(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].request_id, 2);
        assert_eq!(decoder.dropped_frames(), 1);
    }

    #[test]
    fn test_clear() {
        let mut decoder = FrameDecoder::new(MAX);
        let bytes = make_frame_bytes(1, "t", b"x");
        decoder.decode(&bytes).unwrap();
        decoder.decode(&bytes[..4]).unwrap();

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.pending(), 0);
    }
}
