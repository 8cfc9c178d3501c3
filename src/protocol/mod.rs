//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary protocol spoken between producers and
//! providers:
//! - 12-byte header (`total_length`, `request_id`)
//! - type-named, checksummed frame bodies
//! - incremental decoder for accumulating partial reads

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameDecoder;
pub use wire_format::{
    checksum, FrameHeader, CHECKSUM_SIZE, HEADER_SIZE, MIN_BODY_SIZE, MIN_NAME_LENGTH,
    NAME_LENGTH_SIZE,
};
