//! Handler module - request handling and dispatch.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps message type names to handlers
//! - [`Handler`] - the object-safe handler interface
//! - [`TypedHandler`] / [`RawHandler`] - adapters for typed and raw closures

mod registry;

pub use registry::{Handler, HandlerRegistry, RawHandler, TypedHandler};
