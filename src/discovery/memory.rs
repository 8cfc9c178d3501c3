//! In-process coordination store.
//!
//! Keeps records in a map with per-key expiry measured on the tokio clock, so
//! tests running with paused time see TTLs elapse deterministically. Share one
//! instance between nodes through an `Rc`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::{CoordinationStore, LocalBoxFuture, ProviderRecord};
use crate::error::{Result, RpcError};

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Coordination store living in this process.
#[derive(Default)]
pub struct MemoryStore {
    entries: RefCell<HashMap<String, Entry>>,
    offline: Cell<bool>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete `key` immediately, as if its TTL had run out.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.borrow_mut().remove(key).is_some()
    }

    /// Value stored at `key`, if it has not expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .borrow()
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .borrow()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    /// Check whether no key is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every request fail until switched back, like an unreachable server.
    pub fn set_offline(&self, offline: bool) {
        self.offline.set(offline);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.get() {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "coordination store offline",
            )));
        }
        Ok(())
    }

    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_online()?;
        self.entries.borrow_mut().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn children(&self, dir: &str) -> Result<Option<Vec<ProviderRecord>>> {
        self.check_online()?;

        let now = Instant::now();
        let mut entries = self.entries.borrow_mut();
        entries.retain(|_, e| e.expires_at > now);

        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut records: Vec<ProviderRecord> = entries
            .iter()
            .filter_map(|(key, e)| {
                let rest = key.strip_prefix(&prefix)?;
                (!rest.is_empty() && !rest.contains('/'))
                    .then(|| ProviderRecord::new(key.clone(), e.value.clone()))
            })
            .collect();
        records.sort();
        Ok(Some(records))
    }
}

impl CoordinationStore for MemoryStore {
    fn publish<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> LocalBoxFuture<'a, Result<()>> {
        Box::pin(async move { self.put(key, value, ttl) })
    }

    fn list<'a>(&'a self, dir: &'a str) -> LocalBoxFuture<'a, Result<Option<Vec<ProviderRecord>>>> {
        Box::pin(async move { self.children(dir) })
    }
}
