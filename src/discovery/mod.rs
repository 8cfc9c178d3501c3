//! Service discovery through a coordination store.
//!
//! Providers publish `host:port` under a per-service directory with a TTL and
//! keep refreshing it; producers list that directory and diff it against what
//! they already know. A provider that stops refreshing simply expires.
//!
//! Key layout, relative to the store root:
//!
//! ```text
//! /<namespace>/<service>/provider/<node-id>  ->  "host:port"
//! ```
//!
//! Two stores are provided:
//! - [`EtcdStore`] - an etcd v2 keys API over HTTP
//! - [`MemoryStore`] - in-process, for tests and single-process setups

mod etcd;
mod memory;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

use crate::error::Result;

/// Boxed future that stays on the current thread.
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// One live provider entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderRecord {
    /// Full store key, unique per provider instance.
    pub key: String,
    /// Reachable address, `host:port`.
    pub value: String,
}

impl ProviderRecord {
    /// Create a new record.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A key/value store with TTL expiry, used only for discovery.
pub trait CoordinationStore: 'static {
    /// Create or refresh `key` with `value`, expiring after `ttl`.
    fn publish<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> LocalBoxFuture<'a, Result<()>>;

    /// List live records directly under `dir`.
    ///
    /// `Ok(None)` means the store answered but not with a usable listing; the
    /// caller keeps its current view for this cycle.
    fn list<'a>(&'a self, dir: &'a str) -> LocalBoxFuture<'a, Result<Option<Vec<ProviderRecord>>>>;
}

/// Directory holding every provider record of `service`.
pub fn provider_dir(namespace: &str, service: &str) -> String {
    format!("/{namespace}/{service}/provider")
}

/// Key of one provider instance.
pub fn provider_key(namespace: &str, service: &str, node_id: u64) -> String {
    format!("{}/{node_id}", provider_dir(namespace, service))
}

/// Keep `record` alive in the store, refreshing it every `interval`.
///
/// The first publish happens immediately. Failures are logged and retried on
/// the next tick; the loop only ends when its task is aborted.
pub async fn run_publisher(
    store: Rc<dyn CoordinationStore>,
    record: ProviderRecord,
    interval: Duration,
    ttl: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut healthy = true;

    loop {
        ticker.tick().await;
        match store.publish(&record.key, &record.value, ttl).await {
            Ok(()) => {
                if !healthy {
                    tracing::info!(key = %record.key, "Publish recovered");
                }
                healthy = true;
                tracing::trace!(key = %record.key, addr = %record.value, "Published");
            }
            Err(e) => {
                healthy = false;
                tracing::warn!(key = %record.key, "Publish failed: {}", e);
            }
        }
    }
}

/// Changes between the known peer set and a fresh listing.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ListingDiff {
    /// Keys present in the listing but not known before.
    pub added: Vec<ProviderRecord>,
    /// Known keys whose address changed.
    pub moved: Vec<ProviderRecord>,
    /// Known keys missing from the listing.
    pub removed: Vec<String>,
}

impl ListingDiff {
    /// Check whether the listing matched the known set.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.moved.is_empty() && self.removed.is_empty()
    }
}

/// Compare `known` (key -> address) against `listing`.
///
/// Output vectors are sorted by key.
pub fn diff_listing(known: &HashMap<String, String>, listing: &[ProviderRecord]) -> ListingDiff {
    let mut diff = ListingDiff::default();
    let mut seen = HashMap::with_capacity(listing.len());

    for record in listing {
        seen.insert(record.key.as_str(), ());
        match known.get(&record.key) {
            None => diff.added.push(record.clone()),
            Some(addr) if *addr != record.value => diff.moved.push(record.clone()),
            Some(_) => {}
        }
    }

    diff.removed = known
        .keys()
        .filter(|key| !seen.contains_key(key.as_str()))
        .cloned()
        .collect();

    diff.added.sort();
    diff.moved.sort();
    diff.removed.sort();
    diff
}
