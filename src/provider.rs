//! Provider side: accept connections and answer requests.
//!
//! Each accepted connection gets a read loop and a dedicated writer task. Every
//! decoded frame is dispatched on its own task so a slow handler does not hold
//! up decoding of the frames behind it. Handler results are framed with the
//! request's id and handed to the connection's writer.
//!
//! A request whose type has no handler, or whose handler fails, is not
//! answered. The caller sees a timeout.

use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::RpcConfig;
use crate::discovery::{provider_key, run_publisher, CoordinationStore, ProviderRecord};
use crate::error::{Result, RpcError};
use crate::handler::HandlerRegistry;
use crate::protocol::{build_frame, Frame, FrameDecoder};
use crate::transport::{advertised_addr, bind_in_range};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Pause after a failed `accept` before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A running provider for one service.
///
/// Dropping it stops accepting and publishing. Connections already accepted
/// run until the peer disconnects.
pub struct Provider {
    service: String,
    local_addr: SocketAddr,
    record: ProviderRecord,
    accept_task: JoinHandle<()>,
    publish_task: JoinHandle<()>,
}

impl Provider {
    /// Bind a listener, start serving, and start publishing the address.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `LocalSet`.
    pub async fn start(
        service: &str,
        node_id: u64,
        config: Rc<RpcConfig>,
        handlers: Rc<HandlerRegistry>,
        store: Rc<dyn CoordinationStore>,
    ) -> Result<Self> {
        let listener = bind_in_range(&config).await?;
        let local_addr = listener.local_addr()?;
        let record = ProviderRecord::new(
            provider_key(&config.namespace, service, node_id),
            advertised_addr(&config, local_addr),
        );

        tracing::info!(
            service,
            addr = %record.value,
            key = %record.key,
            handlers = handlers.len(),
            "Provider listening"
        );

        let accept_task = tokio::task::spawn_local(accept_loop(
            listener,
            service.to_string(),
            config.clone(),
            handlers,
        ));
        let publish_task = tokio::task::spawn_local(run_publisher(
            store,
            record.clone(),
            config.publish_interval,
            config.record_ttl,
        ));

        Ok(Self {
            service: service.to_string(),
            local_addr,
            record,
            accept_task,
            publish_task,
        })
    }

    /// Service name this provider answers for.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The record published to the coordination store.
    pub fn record(&self) -> &ProviderRecord {
        &self.record
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.publish_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    service: String,
    config: Rc<RpcConfig>,
    handlers: Rc<HandlerRegistry>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(service = %service, "Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "set_nodelay failed: {}", e);
        }
        tracing::debug!(service = %service, %peer, "Accepted connection");

        let (reader, writer) = stream.into_split();
        let config = config.clone();
        let handlers = handlers.clone();
        tokio::task::spawn_local(async move {
            match serve_connection(reader, writer, &config, handlers).await {
                Ok(()) => tracing::debug!(%peer, "Connection closed"),
                Err(e) => tracing::debug!(%peer, "Connection dropped: {}", e),
            }
        });
    }
}

/// Serve one connection until EOF or a read/decode error.
///
/// On return the writer task is aborted; responses still queued are dropped.
pub(crate) async fn serve_connection<R, W>(
    mut reader: R,
    writer: W,
    config: &RpcConfig,
    handlers: Rc<HandlerRegistry>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + 'static,
{
    let (writer, writer_task) = spawn_writer_task(writer, config.channel_capacity);
    let result = read_loop(&mut reader, &writer, config, &handlers).await;
    writer_task.abort();
    result
}

async fn read_loop<R>(
    reader: &mut R,
    writer: &WriterHandle,
    config: &RpcConfig,
    handlers: &Rc<HandlerRegistry>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new(config.max_frame_size);
    let mut buf = vec![0u8; config.read_buffer_size];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if writer.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }

        for frame in decoder.push(&buf[..n])? {
            tokio::task::spawn_local(dispatch(
                frame,
                handlers.clone(),
                writer.clone(),
                config.max_frame_size,
            ));
        }
    }
}

async fn dispatch(
    frame: Frame,
    handlers: Rc<HandlerRegistry>,
    writer: WriterHandle,
    max_frame_size: usize,
) {
    let request_id = frame.request_id;
    let request = frame.into_message();

    let Some(result) = handlers.dispatch(&request) else {
        tracing::debug!(request_id, type_name = request.type_name(), "No handler");
        return;
    };

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                request_id,
                type_name = request.type_name(),
                "Handler failed: {}",
                e
            );
            return;
        }
    };

    let bytes = match build_frame(request_id, &response, max_frame_size) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id, "Cannot frame response: {}", e);
            return;
        }
    };

    if writer.send(bytes).await.is_err() {
        tracing::debug!(request_id, "Connection gone before response was sent");
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::io::{duplex, split, AsyncWriteExt};
    use tokio::task::LocalSet;

    use super::*;
    use crate::codec::Message;

    fn registry() -> Rc<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();
        registry.register_raw("echo", |msg: &Message| Ok(msg.clone()));
        registry.register_raw("fail", |_: &Message| {
            Err(RpcError::Protocol("refused".to_string()))
        });
        Rc::new(registry)
    }

    fn request(id: u64, type_name: &str, body: &'static [u8]) -> Bytes {
        build_frame(id, &Message::new(type_name, body), 4096).unwrap()
    }

    /// Run a connection against an in-memory pipe; returns the client end.
    fn serve(local: &LocalSet) -> tokio::io::DuplexStream {
        let (client, server) = duplex(64 * 1024);
        let (reader, writer) = split(server);
        local.spawn_local(async move {
            let _ = serve_connection(reader, writer, &RpcConfig::default(), registry()).await;
        });
        client
    }

    async fn read_frame(client: &mut tokio::io::DuplexStream, decoder: &mut FrameDecoder) -> Frame {
        let mut buf = [0u8; 256];
        loop {
            if let Some(frame) = decoder.take_next() {
                return frame;
            }
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed");
            decoder.decode(&buf[..n]).unwrap();
        }
    }

    #[tokio::test]
    async fn test_echo_response_keeps_request_id() {
        let local = LocalSet::new();
        let mut client = serve(&local);

        local
            .run_until(async {
                client.write_all(&request(77, "echo", b"hello")).await.unwrap();

                let mut decoder = FrameDecoder::new(4096);
                let frame = read_frame(&mut client, &mut decoder).await;
                assert_eq!(frame.request_id, 77);
                assert_eq!(frame.type_name(), "echo");
                assert_eq!(frame.message.body(), b"hello");
            })
            .await;
    }

    #[tokio::test]
    async fn test_unhandled_and_failed_requests_get_no_response() {
        let local = LocalSet::new();
        let mut client = serve(&local);

        local
            .run_until(async {
                let mut batch = Vec::new();
                batch.extend_from_slice(&request(1, "missing", b"x"));
                batch.extend_from_slice(&request(2, "fail", b"x"));
                batch.extend_from_slice(&request(3, "echo", b"ok"));
                client.write_all(&batch).await.unwrap();

                let mut decoder = FrameDecoder::new(4096);
                let frame = read_frame(&mut client, &mut decoder).await;
                assert_eq!(frame.request_id, 3);

                let mut buf = [0u8; 64];
                let more =
                    tokio::time::timeout(Duration::from_millis(50), client.read(&mut buf)).await;
                assert!(more.is_err(), "unexpected extra response");
            })
            .await;
    }

    #[tokio::test]
    async fn test_corrupt_frame_does_not_close_connection() {
        let local = LocalSet::new();
        let mut client = serve(&local);

        local
            .run_until(async {
                let mut bad = request(1, "echo", b"bad").to_vec();
                let last = bad.len() - 1;
                bad[last] ^= 0xFF;
                client.write_all(&bad).await.unwrap();
                client.write_all(&request(2, "echo", b"good")).await.unwrap();

                let mut decoder = FrameDecoder::new(4096);
                let frame = read_frame(&mut client, &mut decoder).await;
                assert_eq!(frame.request_id, 2);
            })
            .await;
    }

    #[tokio::test]
    async fn test_oversize_frame_closes_connection() {
        let local = LocalSet::new();
        let mut client = serve(&local);

        local
            .run_until(async {
                let header = crate::protocol::FrameHeader::new(1 << 20, 9).encode();
                client.write_all(&header).await.unwrap();

                let mut buf = [0u8; 16];
                let n = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(n, 0);
            })
            .await;
    }
}
