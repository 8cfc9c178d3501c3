//! TCP listener and connector.
//!
//! Providers listen on a random port from the configured range so several can
//! share a host without coordination. A failed bind (usually the port is taken)
//! is retried on a fresh random port after a delay.
//!
//! # Example
//!
//! ```ignore
//! use meshwire::transport::{bind_in_range, connect};
//!
//! let listener = bind_in_range(&config).await?;
//! let addr = listener.local_addr()?;
//! let (stream, peer) = listener.accept().await?;
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use tokio::net::{TcpListener, TcpStream};

use crate::config::RpcConfig;
use crate::error::{Result, RpcError};

/// Pick a random port in `range`.
pub fn random_port(range: &std::ops::Range<u16>) -> u16 {
    rand::thread_rng().gen_range(range.clone())
}

/// Bind a listener on `config.bind_host` at a random port from
/// `config.port_range`.
///
/// Sleeps `config.bind_retry_delay` between attempts. With
/// `max_bind_attempts == None` this never gives up.
pub async fn bind_in_range(config: &RpcConfig) -> Result<TcpListener> {
    if config.port_range.is_empty() {
        return Err(RpcError::Config("port_range is empty".to_string()));
    }

    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let port = random_port(&config.port_range);

        match TcpListener::bind((config.bind_host.as_str(), port)).await {
            Ok(listener) => {
                tracing::debug!(host = %config.bind_host, port, attempts, "Listener bound");
                return Ok(listener);
            }
            Err(e) => {
                tracing::warn!(host = %config.bind_host, port, attempts, "Bind failed: {}", e);
            }
        }

        if config.max_bind_attempts.is_some_and(|max| attempts >= max) {
            return Err(RpcError::BindFailed { attempts });
        }
        tokio::time::sleep(config.bind_retry_delay).await;
    }
}

/// Open a connection to a provider.
///
/// `addr` is the `host:port` string the provider published.
pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {addr} timed out"),
            ))
        })??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// The address a provider publishes for itself.
pub fn advertised_addr(config: &RpcConfig, local: SocketAddr) -> String {
    format!("{}:{}", config.advertise_host, local.port())
}
