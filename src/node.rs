//! Node builder and process-scoped runtime state.
//!
//! The [`NodeBuilder`] collects configuration and handlers. The resulting
//! [`Node`] owns everything the RPC layer shares across tasks: the id
//! generator, the pending-call table, and one provider or producer per service.
//!
//! Handlers are registered before the node is built and never change after,
//! which is what lets every connection share them without locking.
//!
//! # Example
//!
//! ```ignore
//! use meshwire::{Message, Node};
//!
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let node = Node::builder()
//!         .handle_raw("echo", |msg: &Message| Ok(msg.clone()))
//!         .build()?;
//!
//!     node.provide("echo").await?;
//!     node.produce("echo");
//!
//!     let reply = node.call("echo", Message::new("echo", &b"hello"[..])).await?;
//!     Ok::<_, meshwire::RpcError>(())
//! }).await?;
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::codec::{Message, RpcMessage};
use crate::config::RpcConfig;
use crate::discovery::{CoordinationStore, EtcdStore, ProviderRecord};
use crate::error::{Result, RpcError};
use crate::handler::HandlerRegistry;
use crate::id::{auto_machine_id, IdGenerator};
use crate::pending::{run_sweeper, PendingCalls};
use crate::producer::Producer;
use crate::protocol::build_frame;
use crate::provider::Provider;

/// Builder for configuring and creating a [`Node`].
pub struct NodeBuilder {
    config: RpcConfig,
    handlers: HandlerRegistry,
    store: Option<Rc<dyn CoordinationStore>>,
}

impl NodeBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: RpcConfig::default(),
            handlers: HandlerRegistry::new(),
            store: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the machine id embedded in request ids.
    ///
    /// Nodes sharing a machine id can generate equal ids, including the
    /// provider key they publish. Left unset, each node gets its own.
    pub fn machine_id(mut self, machine_id: u16) -> Self {
        self.config.machine_id = Some(machine_id);
        self
    }

    /// Set the key namespace in the coordination store.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Set the coordination-store URL used when no store is supplied.
    pub fn store_url(mut self, url: impl Into<String>) -> Self {
        self.config.store_url = url.into();
        self
    }

    /// Set how long a call may wait for its response.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Use `store` instead of an etcd client built from `store_url`.
    pub fn store(mut self, store: Rc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a typed handler, keyed by `Req::TYPE_NAME`.
    pub fn handle<F, Req, Rsp>(mut self, handler: F) -> Self
    where
        F: Fn(Req) -> Result<Rsp> + 'static,
        Req: RpcMessage + 'static,
        Rsp: RpcMessage + 'static,
    {
        self.handlers.register(handler);
        self
    }

    /// Register a handler for raw messages of `type_name`.
    pub fn handle_raw<F>(mut self, type_name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Message) -> Result<Message> + 'static,
    {
        self.handlers.register_raw(type_name, handler);
        self
    }

    /// Validate the configuration and build the node.
    ///
    /// Nothing is spawned yet; call [`Node::provide`] / [`Node::produce`]
    /// from inside a `LocalSet`.
    pub fn build(self) -> Result<Node> {
        self.config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => Rc::new(EtcdStore::new(
                &self.config.store_url,
                self.config.store_timeout,
            )?),
        };

        let machine_id = self.config.machine_id.unwrap_or_else(auto_machine_id);
        tracing::debug!(machine_id, "Node built");

        Ok(Node {
            inner: Rc::new(NodeInner {
                ids: RefCell::new(IdGenerator::new(machine_id)),
                config: Rc::new(self.config),
                handlers: Rc::new(self.handlers),
                pending: Rc::new(PendingCalls::new()),
                store,
                providers: RefCell::new(Vec::new()),
                producers: RefCell::new(HashMap::new()),
                sweeper: RefCell::new(None),
            }),
        })
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct NodeInner {
    config: Rc<RpcConfig>,
    handlers: Rc<HandlerRegistry>,
    ids: RefCell<IdGenerator>,
    pending: Rc<PendingCalls>,
    store: Rc<dyn CoordinationStore>,
    providers: RefCell<Vec<Provider>>,
    producers: RefCell<HashMap<String, Rc<Producer>>>,
    sweeper: RefCell<Option<JoinHandle<()>>>,
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.get_mut().take() {
            task.abort();
        }
    }
}

/// A running RPC node.
///
/// Cheap to clone; clones share all state. Dropping the last clone stops
/// every task the node started.
#[derive(Clone)]
pub struct Node {
    inner: Rc<NodeInner>,
}

impl Node {
    /// Create a new node builder.
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    /// The node's configuration.
    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// Machine id embedded in this node's ids.
    pub fn machine_id(&self) -> u16 {
        self.inner.ids.borrow().machine_id()
    }

    /// Generate a fresh request id.
    pub fn next_id(&self) -> u64 {
        self.inner.ids.borrow_mut().generate()
    }

    /// Start answering requests for `service` and publish this node as a
    /// provider of it.
    ///
    /// Returns the address the listener is bound to.
    ///
    /// # Errors
    ///
    /// `BindFailed` if `max_bind_attempts` is set and every attempt failed.
    pub async fn provide(&self, service: &str) -> Result<SocketAddr> {
        let node_id = self.next_id();
        let provider = Provider::start(
            service,
            node_id,
            self.inner.config.clone(),
            self.inner.handlers.clone(),
            self.inner.store.clone(),
        )
        .await?;

        let addr = provider.local_addr();
        self.inner.providers.borrow_mut().push(provider);
        Ok(addr)
    }

    /// Start discovering and connecting to providers of `service`.
    ///
    /// Calling it again for the same service does nothing.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `LocalSet`.
    pub fn produce(&self, service: &str) {
        self.ensure_sweeper();

        let mut producers = self.inner.producers.borrow_mut();
        if producers.contains_key(service) {
            return;
        }
        let producer = Producer::start(
            service,
            self.inner.config.clone(),
            self.inner.store.clone(),
            self.inner.pending.clone(),
        );
        producers.insert(service.to_string(), producer);
    }

    fn ensure_sweeper(&self) {
        let mut sweeper = self.inner.sweeper.borrow_mut();
        if sweeper.is_none() {
            *sweeper = Some(tokio::task::spawn_local(run_sweeper(
                self.inner.pending.clone(),
                self.inner.config.sweep_interval,
                self.inner.config.call_timeout,
            )));
        }
    }

    /// Send `request` to some provider of `service` and wait for the response.
    ///
    /// # Errors
    ///
    /// - `UnknownService` if [`produce`](Self::produce) was never called for it
    /// - `FrameTooLarge` if the request cannot fit in one frame
    /// - `Timeout` if no response arrived within the call timeout
    pub async fn call(&self, service: &str, request: Message) -> Result<Message> {
        let producer = self
            .inner
            .producers
            .borrow()
            .get(service)
            .cloned()
            .ok_or_else(|| RpcError::UnknownService(service.to_string()))?;

        let request_id = self.next_id();
        let frame = build_frame(request_id, &request, self.inner.config.max_frame_size)?;

        tracing::trace!(service, request_id, type_name = request.type_name(), "Calling");
        let result = producer.call(request_id, frame).await;
        if let Err(RpcError::Timeout) = &result {
            tracing::debug!(service, request_id, "Call timed out");
        }
        result
    }

    /// Typed form of [`call`](Self::call).
    ///
    /// A response of a type other than `Rsp` fails with `TypeMismatch`.
    pub async fn invoke<Req, Rsp>(&self, service: &str, request: &Req) -> Result<Rsp>
    where
        Req: RpcMessage,
        Rsp: RpcMessage,
    {
        let response = self.call(service, Message::encode(request)?).await?;
        response.decode()
    }

    /// Providers of `service` seen in the latest successful listing.
    pub fn known_peers(&self, service: &str) -> Vec<ProviderRecord> {
        self.inner
            .producers
            .borrow()
            .get(service)
            .map(|p| p.known_peers())
            .unwrap_or_default()
    }

    /// Calls currently waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Store records this node publishes as a provider.
    pub fn published(&self) -> Vec<ProviderRecord> {
        self.inner
            .providers
            .borrow()
            .iter()
            .map(|p| p.record().clone())
            .collect()
    }
}
