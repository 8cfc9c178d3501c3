//! Type-tagged message envelope.
//!
//! The transport never looks inside a payload. It moves a [`Message`]: a type
//! name plus the bytes the payload codec produced. Typed code crosses that
//! boundary through [`RpcMessage`].

use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::MsgPackCodec;
use crate::error::{Result, RpcError};

/// A payload type that can travel over the wire.
///
/// `TYPE_NAME` is the dispatch key on the provider side, so it must be unique
/// among the message types a provider serves.
///
/// ```
/// use meshwire::codec::RpcMessage;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Ping {
///     seq: u32,
/// }
///
/// impl RpcMessage for Ping {
///     const TYPE_NAME: &'static str = "demo.Ping";
/// }
/// ```
pub trait RpcMessage: Serialize + DeserializeOwned {
    /// Stable type tag written into every frame carrying this message.
    const TYPE_NAME: &'static str;
}

/// An encoded message: type tag plus opaque body.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    type_name: String,
    body: Bytes,
}

impl Message {
    /// Build a message from an already-encoded body.
    pub fn new(type_name: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            type_name: type_name.into(),
            body: body.into(),
        }
    }

    /// Encode a typed value.
    pub fn encode<T: RpcMessage>(value: &T) -> Result<Self> {
        let body = MsgPackCodec::encode(value)?;
        Ok(Self::new(T::TYPE_NAME, body))
    }

    /// Decode into a typed value, checking the type tag first.
    pub fn decode<T: RpcMessage>(&self) -> Result<T> {
        if self.type_name != T::TYPE_NAME {
            return Err(RpcError::TypeMismatch {
                expected: T::TYPE_NAME.to_string(),
                actual: self.type_name.clone(),
            });
        }
        MsgPackCodec::decode(&self.body)
    }

    /// Check whether this message carries `T`.
    #[inline]
    pub fn is<T: RpcMessage>(&self) -> bool {
        self.type_name == T::TYPE_NAME
    }

    /// The type tag.
    #[inline]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The encoded body.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Cheap clone of the body.
    #[inline]
    pub fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type_name", &self.type_name)
            .field("body_len", &self.body.len())
            .finish()
    }
}
