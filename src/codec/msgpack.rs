//! MsgPack codec using `rmp-serde`.
//!
//! Structs are written with `to_vec_named` (struct-as-map), so a field added on
//! one side of a connection does not shift the positions of the others.
//!
//! # Example
//!
//! ```
//! use meshwire::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Order {
//!     id: u32,
//!     sku: String,
//! }
//!
//! let order = Order { id: 42, sku: "A-1".to_string() };
//! let encoded = MsgPackCodec::encode(&order).unwrap();
//! let decoded: Order = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, order);
//! ```

use crate::error::Result;

/// MessagePack codec for payload bodies.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
