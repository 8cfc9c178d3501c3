//! etcd v2 keys API client.
//!
//! Publishing is a form-encoded `PUT <base><key>` with `value` and `ttl` (whole
//! seconds, rounded up). Listing is `GET <base><dir>/`, answered with a JSON document:
//!
//! ```text
//! {"action":"get","node":{"key":"/ns/svc/provider","dir":true,
//!   "nodes":[{"key":"/ns/svc/provider/42","value":"10.0.0.5:6123", ...}]}}
//! ```
//!
//! Error documents (`{"errorCode":100,...}`) and anything else that is not a
//! `get` listing are reported as "no listing".

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use super::{CoordinationStore, LocalBoxFuture, ProviderRecord};
use crate::config::record_ttl_secs;
use crate::error::{Result, RpcError};

#[derive(Deserialize)]
struct EtcdResponse {
    action: Option<String>,
    node: Option<EtcdNode>,
}

#[derive(Deserialize)]
struct EtcdNode {
    key: Option<String>,
    value: Option<String>,
    #[serde(default)]
    nodes: Vec<EtcdNode>,
}

/// Coordination store backed by an etcd v2 server.
#[derive(Debug, Clone)]
pub struct EtcdStore {
    client: Client,
    base_url: String,
}

impl EtcdStore {
    /// Create a client for `base_url` (e.g. `http://127.0.0.1:2379/v2/keys`).
    ///
    /// Every request is bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL requests are made against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let ttl = record_ttl_secs(ttl).to_string();
        let response = self
            .client
            .put(self.url(key))
            .form(&[("value", value), ("ttl", ttl.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RpcError::Protocol(format!(
                "Store rejected publish of {key}: status {status}: {text}"
            )));
        }
        Ok(())
    }

    async fn get(&self, dir: &str) -> Result<Option<Vec<ProviderRecord>>> {
        let url = self.url(&format!("{}/", dir.trim_end_matches('/')));
        let body = self.client.get(url).send().await?.text().await?;
        Ok(parse_listing(&body))
    }
}

impl CoordinationStore for EtcdStore {
    fn publish<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> LocalBoxFuture<'a, Result<()>> {
        Box::pin(self.put(key, value, ttl))
    }

    fn list<'a>(&'a self, dir: &'a str) -> LocalBoxFuture<'a, Result<Option<Vec<ProviderRecord>>>> {
        Box::pin(self.get(dir))
    }
}

/// Extract provider records from a listing document.
///
/// Children without both a key and a value (sub-directories) are skipped.
pub(crate) fn parse_listing(body: &str) -> Option<Vec<ProviderRecord>> {
    let response: EtcdResponse = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Unparsable store listing: {}", e);
            return None;
        }
    };

    if response.action.as_deref() != Some("get") {
        tracing::debug!(action = ?response.action, "Store answered without a listing");
        return None;
    }

    let node = response.node?;
    let records = node
        .nodes
        .into_iter()
        .filter_map(|child| match (child.key, child.value) {
            (Some(key), Some(value)) => Some(ProviderRecord::new(key, value)),
            _ => None,
        })
        .collect();
    Some(records)
}
