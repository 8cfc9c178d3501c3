//! Codec module - payload serialization behind a type-tagged envelope.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde`
//! - [`Message`] - type name + encoded body, the unit the transport moves
//! - [`RpcMessage`] - implemented by payload types to give them a type name
//!
//! # Example
//!
//! ```
//! use meshwire::codec::{Message, RpcMessage};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Echo {
//!     data: String,
//! }
//!
//! impl RpcMessage for Echo {
//!     const TYPE_NAME: &'static str = "demo.Echo";
//! }
//!
//! let msg = Message::encode(&Echo { data: "hello".into() }).unwrap();
//! assert_eq!(msg.type_name(), "demo.Echo");
//! let back: Echo = msg.decode().unwrap();
//! assert_eq!(back.data, "hello");
//! ```

mod message;
mod msgpack;

pub use message::{Message, RpcMessage};
pub use msgpack::MsgPackCodec;
