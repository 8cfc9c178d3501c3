//! Producer side: discover providers of a service and send them requests.
//!
//! Every service a node produces gets one bounded outbound queue. Each live
//! provider connection runs a writer that pulls from that shared queue, so a
//! request goes to whichever connection takes it first. Responses are matched
//! to callers through the pending-call table by request id.
//!
//! ```text
//!                         ┌─► peer A (writer ─► socket ─► reader) ─┐
//! call ─► outbound queue ─┼─► peer B (writer ─► socket ─► reader) ─┼─► pending calls ─► caller
//!                         └─► peer C ...                           ┘
//! ```
//!
//! The poll loop lists the service directory every `poll_interval` and starts a
//! connection task for each listed provider that has none. A provider dropped
//! from the listing is left alone: its connection serves until it fails and is
//! then not re-established.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinHandle;

use crate::codec::Message;
use crate::config::RpcConfig;
use crate::discovery::{diff_listing, provider_dir, CoordinationStore, ProviderRecord};
use crate::error::{Result, RpcError};
use crate::pending::PendingCalls;
use crate::protocol::FrameDecoder;
use crate::transport::connect;
use crate::writer::{write_batch, MAX_BATCH_SIZE};

/// An encoded request waiting for a connection to take it.
#[derive(Debug)]
pub(crate) struct OutboundRequest {
    pub(crate) request_id: u64,
    pub(crate) frame: Bytes,
}

/// Connection pool and discovery state for one service.
pub struct Producer {
    service: String,
    dir: String,
    config: Rc<RpcConfig>,
    store: Rc<dyn CoordinationStore>,
    pending: Rc<PendingCalls>,
    tx: flume::Sender<OutboundRequest>,
    rx: flume::Receiver<OutboundRequest>,
    /// Latest listing: store key -> address.
    known: RefCell<HashMap<String, String>>,
    /// Connection task per store key.
    peers: RefCell<HashMap<String, JoinHandle<()>>>,
    poll_task: RefCell<Option<JoinHandle<()>>>,
}

impl Producer {
    /// Create the producer and start polling the store.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `LocalSet`.
    pub fn start(
        service: &str,
        config: Rc<RpcConfig>,
        store: Rc<dyn CoordinationStore>,
        pending: Rc<PendingCalls>,
    ) -> Rc<Self> {
        let (tx, rx) = flume::bounded(config.channel_capacity);
        let producer = Rc::new(Self {
            service: service.to_string(),
            dir: provider_dir(&config.namespace, service),
            config,
            store,
            pending,
            tx,
            rx,
            known: RefCell::new(HashMap::new()),
            peers: RefCell::new(HashMap::new()),
            poll_task: RefCell::new(None),
        });

        let task = tokio::task::spawn_local(poll_loop(Rc::downgrade(&producer)));
        *producer.poll_task.borrow_mut() = Some(task);
        tracing::info!(service, dir = %producer.dir, "Producing");
        producer
    }

    /// Service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Providers in the latest successful listing, sorted by key.
    pub fn known_peers(&self) -> Vec<ProviderRecord> {
        let mut peers: Vec<_> = self
            .known
            .borrow()
            .iter()
            .map(|(key, addr)| ProviderRecord::new(key.clone(), addr.clone()))
            .collect();
        peers.sort();
        peers
    }

    /// Number of connection tasks currently running.
    pub fn connection_tasks(&self) -> usize {
        self.peers.borrow().len()
    }

    /// Requests queued but not yet taken by a connection.
    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    /// Send an encoded request and wait for its response.
    ///
    /// The call is registered before it is queued, so a fast response cannot
    /// miss it. If the queue is full the caller waits for room, but the sweeper
    /// can still time the call out while it waits.
    pub(crate) async fn call(&self, request_id: u64, frame: Bytes) -> Result<Message> {
        let mut response = self.pending.register(request_id);
        let request = OutboundRequest { request_id, frame };

        tokio::select! {
            biased;
            result = &mut response => return result.map_err(|_| RpcError::Timeout),
            sent = self.tx.send_async(request) => {
                if sent.is_err() {
                    self.pending.remove(request_id);
                    return Err(RpcError::ConnectionClosed);
                }
            }
        }

        response.await.map_err(|_| RpcError::Timeout)
    }

    /// List the store once and apply the result.
    pub async fn poll_once(self: &Rc<Self>) {
        match self.store.list(&self.dir).await {
            Ok(Some(records)) => self.apply_listing(&records),
            Ok(None) => {
                tracing::debug!(service = %self.service, "No usable listing, keeping peers");
            }
            Err(e) => {
                tracing::warn!(service = %self.service, "Discovery failed: {}", e);
            }
        }
    }

    /// Replace the known set with `records` and start missing connections.
    pub fn apply_listing(self: &Rc<Self>, records: &[ProviderRecord]) {
        let diff = diff_listing(&self.known.borrow(), records);

        {
            let mut known = self.known.borrow_mut();
            for record in diff.added.iter().chain(diff.moved.iter()) {
                known.insert(record.key.clone(), record.value.clone());
            }
            for key in &diff.removed {
                known.remove(key);
            }
        }

        for record in &diff.added {
            tracing::info!(service = %self.service, key = %record.key, addr = %record.value, "Provider discovered");
        }
        for record in &diff.moved {
            tracing::info!(service = %self.service, key = %record.key, addr = %record.value, "Provider moved");
        }
        for key in &diff.removed {
            tracing::info!(service = %self.service, key = %key, "Provider no longer listed");
        }

        let keys: Vec<String> = self.known.borrow().keys().cloned().collect();
        for key in keys {
            self.ensure_connection(key);
        }
    }

    fn ensure_connection(self: &Rc<Self>, key: String) {
        let mut peers = self.peers.borrow_mut();
        if peers.get(&key).is_some_and(|task| !task.is_finished()) {
            return;
        }
        let task = tokio::task::spawn_local(peer_loop(Rc::downgrade(self), key.clone()));
        peers.insert(key, task);
    }

    fn address_of(&self, key: &str) -> Option<String> {
        self.known.borrow().get(key).cloned()
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        if let Some(task) = self.poll_task.get_mut().take() {
            task.abort();
        }
        for (_, task) in self.peers.get_mut().drain() {
            task.abort();
        }
    }
}

async fn poll_loop(producer: Weak<Producer>) {
    let Some(interval) = producer.upgrade().map(|p| p.config.poll_interval) else {
        return;
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(producer) = producer.upgrade() else {
            return;
        };
        producer.poll_once().await;
    }
}

/// Keep one provider connected while it stays listed.
async fn peer_loop(producer: Weak<Producer>, key: String) {
    loop {
        let Some(this) = producer.upgrade() else {
            return;
        };
        let Some(addr) = this.address_of(&key) else {
            tracing::debug!(service = %this.service, key = %key, "Provider gone, not reconnecting");
            this.peers.borrow_mut().remove(&key);
            return;
        };

        let service = this.service.clone();
        let config = this.config.clone();
        let pending = this.pending.clone();
        let outbound = this.rx.clone();
        drop(this);

        match connect(&addr, config.call_timeout).await {
            Ok(stream) => {
                tracing::info!(service = %service, addr = %addr, "Connected to provider");
                let (reader, writer) = stream.into_split();
                let reason = run_connection(reader, writer, &outbound, &pending, &config).await;
                match reason {
                    Ok(()) => tracing::info!(service = %service, addr = %addr, "Provider closed connection"),
                    Err(e) => tracing::warn!(service = %service, addr = %addr, "Provider connection lost: {}", e),
                }
            }
            Err(e) => {
                tracing::warn!(service = %service, addr = %addr, "Connect failed: {}", e);
            }
        }

        tokio::time::sleep(config.reconnect_delay).await;
    }
}

/// Drive one connection until either direction fails.
///
/// Returns `Ok(())` on a clean EOF from the provider.
pub(crate) async fn run_connection<R, W>(
    reader: R,
    writer: W,
    outbound: &flume::Receiver<OutboundRequest>,
    pending: &PendingCalls,
    config: &RpcConfig,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tokio::select! {
        result = write_requests(writer, outbound, pending) => result,
        result = read_responses(reader, pending, config) => result,
    }
}

async fn write_requests<W>(
    mut writer: W,
    outbound: &flume::Receiver<OutboundRequest>,
    pending: &PendingCalls,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    loop {
        let first = outbound
            .recv_async()
            .await
            .map_err(|_| RpcError::ConnectionClosed)?;

        batch.clear();
        let mut next = Some(first);
        while let Some(request) = next.take() {
            if pending.contains(request.request_id) {
                batch.push(request.frame);
            } else {
                tracing::trace!(request_id = request.request_id, "Skipping expired request");
            }
            if batch.len() < MAX_BATCH_SIZE {
                next = outbound.try_recv().ok();
            }
        }

        if !batch.is_empty() {
            write_batch(&mut writer, &batch).await?;
        }
    }
}

async fn read_responses<R>(mut reader: R, pending: &PendingCalls, config: &RpcConfig) -> Result<()>
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

        for frame in decoder.push(&buf[..n])? {
            let request_id = frame.request_id;
            if !pending.resolve(request_id, frame.into_message()) {
                tracing::debug!(request_id, "Discarding response with no waiting call");
            }
        }
    }
}
