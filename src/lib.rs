//! # meshwire
//!
//! Peer-to-peer RPC with service discovery, for a single-threaded tokio
//! runtime.
//!
//! A node can be a **provider** of a service (listens on TCP, publishes its
//! address to a coordination store, answers requests with registered handlers)
//! and a **producer** of services (lists providers in the store, keeps a
//! connection to each, and spreads calls over them).
//!
//! ## Architecture
//!
//! - **Wire protocol**: length-prefixed binary frames carrying a request id, a
//!   message type name, an opaque payload, and an Adler-32 checksum
//! - **Discovery**: providers refresh a TTL'd `host:port` record; producers
//!   poll the service directory and diff it against what they know
//! - **Correlation**: request ids embed a millisecond timestamp, so expiring
//!   stale calls is a range split on the pending-call table
//!
//! Everything runs on one thread inside a `tokio::task::LocalSet`. Shared state
//! is `Rc`/`RefCell`, never locked.
//!
//! ## Example
//!
//! ```ignore
//! use std::rc::Rc;
//! use meshwire::{discovery::MemoryStore, Message, Node};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> meshwire::Result<()> {
//!     let local = tokio::task::LocalSet::new();
//!     local
//!         .run_until(async {
//!             let node = Node::builder()
//!                 .store(Rc::new(MemoryStore::new()))
//!                 .handle_raw("echo", |msg: &Message| Ok(msg.clone()))
//!                 .build()?;
//!
//!             node.provide("echo").await?;
//!             node.produce("echo");
//!
//!             let reply = node.call("echo", Message::new("echo", &b"hello"[..])).await?;
//!             assert_eq!(reply.body(), b"hello");
//!             Ok(())
//!         })
//!         .await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod handler;
pub mod id;
pub mod pending;
pub mod protocol;
pub mod transport;
pub mod writer;

mod node;
mod producer;
mod provider;

pub use codec::{Message, RpcMessage};
pub use config::RpcConfig;
pub use error::{Result, RpcError};
pub use node::{Node, NodeBuilder};
pub use producer::Producer;
pub use provider::Provider;
