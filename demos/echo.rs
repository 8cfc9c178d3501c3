//! Echo service - provider and producer in one process.
//!
//! This example demonstrates:
//! - Registering a typed handler with the node builder
//! - Providing a service and discovering it through the coordination store
//! - Calling the service with a typed request
//!
//! By default the coordination store lives in-process. Point it at a real etcd
//! v2 server to run providers and producers as separate processes:
//!
//! ```sh
//! MESHWIRE_STORE_URL=http://127.0.0.1:2379/v2/keys cargo run --example echo
//! RUST_LOG=meshwire=debug cargo run --example echo
//! ```

use std::rc::Rc;
use std::time::Duration;

use meshwire::discovery::{CoordinationStore, EtcdStore, MemoryStore};
use meshwire::{Node, RpcConfig, RpcMessage};
use serde::{Deserialize, Serialize};

/// Request for the echo service.
#[derive(Serialize, Deserialize, Debug)]
struct EchoInput {
    message: String,
}

impl RpcMessage for EchoInput {
    const TYPE_NAME: &'static str = "demo.EchoInput";
}

/// Response from the echo service.
#[derive(Serialize, Deserialize, Debug)]
struct EchoOutput {
    echo: String,
}

impl RpcMessage for EchoOutput {
    const TYPE_NAME: &'static str = "demo.EchoOutput";
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = RpcConfig {
        poll_interval: Duration::from_millis(500),
        ..RpcConfig::default()
    };

    let store: Rc<dyn CoordinationStore> = match std::env::var("MESHWIRE_STORE_URL") {
        Ok(url) => Rc::new(EtcdStore::new(&url, config.store_timeout)?),
        Err(_) => Rc::new(MemoryStore::new()),
    };

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let node = Node::builder()
                .config(config)
                .store(store)
                .handle(|input: EchoInput| {
                    Ok(EchoOutput {
                        echo: input.message,
                    })
                })
                .build()?;

            let addr = node.provide("echo").await?;
            tracing::info!(%addr, "Echo provider up");

            node.produce("echo");
            while node.known_peers("echo").is_empty() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }

            for i in 0..3 {
                let request = EchoInput {
                    message: format!("hello #{i}"),
                };
                let response: EchoOutput = node.invoke("echo", &request).await?;
                println!("{} -> {}", request.message, response.echo);
            }

            Ok::<(), Box<dyn std::error::Error>>(())
        })
        .await
}
