//! Handler registry for dispatching requests by message type name.
//!
//! The registry is filled while building a node and is read-only once the node
//! starts serving, so it is shared behind a plain `Rc` without interior
//! mutability.
//!
//! # Example
//!
//! ```
//! use meshwire::codec::{Message, RpcMessage};
//! use meshwire::handler::HandlerRegistry;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Echo {
//!     data: String,
//! }
//!
//! impl RpcMessage for Echo {
//!     const TYPE_NAME: &'static str = "demo.Echo";
//! }
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(|req: Echo| Ok::<_, meshwire::RpcError>(req));
//!
//! let request = Message::encode(&Echo { data: "hi".into() }).unwrap();
//! let response = registry.dispatch(&request).unwrap().unwrap();
//! assert_eq!(response.decode::<Echo>().unwrap().data, "hi");
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;

use crate::codec::{Message, RpcMessage};
use crate::error::Result;

/// Trait for handler functions.
pub trait Handler: 'static {
    /// Handle one request, producing the response message.
    fn call(&self, request: &Message) -> Result<Message>;
}

/// Wrapper that decodes the request and encodes the response around a typed
/// closure.
pub struct TypedHandler<F, Req, Rsp>
where
    F: Fn(Req) -> Result<Rsp> + 'static,
    Req: RpcMessage + 'static,
    Rsp: RpcMessage + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(Req) -> Rsp>,
}

impl<F, Req, Rsp> TypedHandler<F, Req, Rsp>
where
    F: Fn(Req) -> Result<Rsp> + 'static,
    Req: RpcMessage + 'static,
    Rsp: RpcMessage + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Req, Rsp> Handler for TypedHandler<F, Req, Rsp>
where
    F: Fn(Req) -> Result<Rsp> + 'static,
    Req: RpcMessage + 'static,
    Rsp: RpcMessage + 'static,
{
    fn call(&self, request: &Message) -> Result<Message> {
        let parsed: Req = request.decode()?;
        let response = (self.handler)(parsed)?;
        Message::encode(&response)
    }
}

/// Handler working on undecoded messages.
pub struct RawHandler<F>
where
    F: Fn(&Message) -> Result<Message> + 'static,
{
    handler: F,
}

impl<F> RawHandler<F>
where
    F: Fn(&Message) -> Result<Message> + 'static,
{
    /// Create a new raw handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> Handler for RawHandler<F>
where
    F: Fn(&Message) -> Result<Message> + 'static,
{
    fn call(&self, request: &Message) -> Result<Message> {
        (self.handler)(request)
    }
}

/// Registry mapping message type names to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler under `Req::TYPE_NAME`.
    ///
    /// Registering the same type twice replaces the earlier handler.
    pub fn register<F, Req, Rsp>(&mut self, handler: F)
    where
        F: Fn(Req) -> Result<Rsp> + 'static,
        Req: RpcMessage + 'static,
        Rsp: RpcMessage + 'static,
    {
        self.insert(Req::TYPE_NAME, Box::new(TypedHandler::new(handler)));
    }

    /// Register a handler for raw messages of `type_name`.
    pub fn register_raw<F>(&mut self, type_name: impl Into<String>, handler: F)
    where
        F: Fn(&Message) -> Result<Message> + 'static,
    {
        self.insert(type_name, Box::new(RawHandler::new(handler)));
    }

    fn insert(&mut self, type_name: impl Into<String>, handler: Box<dyn Handler>) {
        let type_name = type_name.into();
        if self.handlers.insert(type_name.clone(), handler).is_some() {
            tracing::debug!(type_name = %type_name, "Replaced handler");
        }
    }

    /// Get a handler by type name.
    pub fn get(&self, type_name: &str) -> Option<&dyn Handler> {
        self.handlers.get(type_name).map(|h| h.as_ref())
    }

    /// Check whether a handler exists for `type_name`.
    pub fn contains(&self, type_name: &str) -> bool {
        self.handlers.contains_key(type_name)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch a request to the handler for its type.
    ///
    /// Returns `None` when no handler is registered for the type.
    pub fn dispatch(&self, request: &Message) -> Option<Result<Message>> {
        self.get(request.type_name())
            .map(|handler| handler.call(request))
    }
}
