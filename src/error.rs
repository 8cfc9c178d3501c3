//! Error types for meshwire.

use thiserror::Error;

/// Main error type for all meshwire operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (configuration and registry documents).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// HTTP error talking to the coordination store.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Protocol error (malformed frame, bad checksum, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Declared frame length exceeds the configured cap.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// A message carried a different type name than the one requested.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// `call` was issued for a service that this node does not produce.
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// No response arrived within the call timeout window.
    #[error("Call timed out")]
    Timeout,

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The provider could not bind a listening socket.
    #[error("Failed to bind a listening socket after {attempts} attempts")]
    BindFailed { attempts: u32 },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
