//! Node configuration.
//!
//! Every field has a default, so a config document only needs to name what it
//! overrides:
//!
//! ```
//! use meshwire::RpcConfig;
//!
//! let config = RpcConfig::from_json(r#"{"namespace": "shop", "machine_id": 7}"#).unwrap();
//! assert_eq!(config.namespace, "shop");
//! assert_eq!(config.machine_id, Some(7));
//! assert_eq!(config.max_frame_size, 4096);
//! ```
//!
//! Durations are written as integer milliseconds (`*_ms` keys).

use std::ops::Range;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RpcError};
use crate::id::MAX_MACHINE_ID;

/// Default coordination-store base URL (etcd v2 keys API).
pub const DEFAULT_STORE_URL: &str = "http://127.0.0.1:2379/v2/keys";

/// Default key namespace under the store base URL.
pub const DEFAULT_NAMESPACE: &str = "meshwire";

/// Default hard cap on a frame's `total_length`.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4096;

/// Default capacity for bounded queues (write queues, per-service outbound queue).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Runtime configuration shared by the provider and producer sides of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Coordination-store base URL, e.g. `http://127.0.0.1:2379/v2/keys`.
    pub store_url: String,
    /// Top-level namespace for all service keys.
    pub namespace: String,
    /// Machine id embedded in generated request ids (0-1023). `None` draws a
    /// distinct one per node.
    pub machine_id: Option<u16>,
    /// Host the provider listener binds to.
    pub bind_host: String,
    /// Host published to the store as this provider's reachable address.
    pub advertise_host: String,
    /// Ports tried (randomly) by the provider listener.
    pub port_range: Range<u16>,
    /// Sleep between failed bind attempts.
    #[serde(rename = "bind_retry_delay_ms", with = "millis")]
    pub bind_retry_delay: Duration,
    /// Give up binding after this many attempts. `None` retries forever.
    pub max_bind_attempts: Option<u32>,
    /// How often a provider refreshes its store record.
    #[serde(rename = "publish_interval_ms", with = "millis")]
    pub publish_interval: Duration,
    /// TTL attached to the provider's store record.
    #[serde(rename = "record_ttl_ms", with = "millis")]
    pub record_ttl: Duration,
    /// How often a producer lists providers.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    /// Backoff before reconnecting a dropped peer connection.
    #[serde(rename = "reconnect_delay_ms", with = "millis")]
    pub reconnect_delay: Duration,
    /// Pending calls older than this are failed with a timeout.
    #[serde(rename = "call_timeout_ms", with = "millis")]
    pub call_timeout: Duration,
    /// How often the pending-call sweeper runs.
    #[serde(rename = "sweep_interval_ms", with = "millis")]
    pub sweep_interval: Duration,
    /// Hard cap on a frame's declared `total_length`.
    pub max_frame_size: usize,
    /// Capacity of every bounded queue.
    pub channel_capacity: usize,
    /// Per-request timeout for coordination-store HTTP calls.
    #[serde(rename = "store_timeout_ms", with = "millis")]
    pub store_timeout: Duration,
    /// Size of a single socket read.
    pub read_buffer_size: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            store_url: DEFAULT_STORE_URL.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            machine_id: None,
            bind_host: "0.0.0.0".to_string(),
            advertise_host: "127.0.0.1".to_string(),
            port_range: 5000..10000,
            bind_retry_delay: Duration::from_secs(3),
            max_bind_attempts: None,
            publish_interval: Duration::from_secs(10),
            record_ttl: Duration::from_secs(15),
            poll_interval: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(10),
            call_timeout: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            store_timeout: Duration::from_secs(5),
            read_buffer_size: 1024,
        }
    }
}

impl RpcConfig {
    /// Parse a JSON config document, filling unspecified fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if let Some(machine_id) = self.machine_id.filter(|&id| id > MAX_MACHINE_ID) {
            return Err(RpcError::Config(format!(
                "machine_id {machine_id} exceeds {MAX_MACHINE_ID}"
            )));
        }

        if self.port_range.is_empty() {
            return Err(RpcError::Config("port_range is empty".to_string()));
        }

        // Stores take the TTL in whole seconds.
        if record_ttl_secs(self.record_ttl) * 1000 <= self.publish_interval.as_millis() as u64 {
            return Err(RpcError::Config(
                "record_ttl must be longer than publish_interval".to_string(),
            ));
        }

        let intervals = [
            ("publish_interval", self.publish_interval),
            ("poll_interval", self.poll_interval),
            ("sweep_interval", self.sweep_interval),
            ("call_timeout", self.call_timeout),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(RpcError::Config(format!("{name} must be non-zero")));
        }

        if self.channel_capacity == 0 || self.read_buffer_size == 0 {
            return Err(RpcError::Config(
                "channel_capacity and read_buffer_size must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// A record TTL in whole seconds, rounded up and at least one.
pub fn record_ttl_secs(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).div_ceil(1000).max(1)
}

/// Serialize a `Duration` as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RpcConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.publish_interval, Duration::from_secs(10));
        assert_eq!(config.record_ttl, Duration::from_secs(15));
        assert_eq!(config.port_range, 5000..10000);
    }

    #[test]
    fn test_from_json_partial_overrides() {
        let config = RpcConfig::from_json(
            r#"{"store_url": "http://10.0.0.1:2379/v2/keys", "call_timeout_ms": 250}"#,
        )
        .unwrap();

        assert_eq!(config.store_url, "http://10.0.0.1:2379/v2/keys");
        assert_eq!(config.call_timeout, Duration::from_millis(250));
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn test_json_roundtrip_uses_millis() {
        let config = RpcConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["sweep_interval_ms"], 10_000);
        assert_eq!(json["port_range"]["start"], 5000);

        let back: RpcConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_validate_machine_id() {
        let config = RpcConfig {
            machine_id: Some(1024),
            ..RpcConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("machine_id"));
    }

    #[test]
    fn test_validate_ttl_must_outlive_publish_interval() {
        let config = RpcConfig {
            record_ttl: Duration::from_secs(10),
            ..RpcConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_record_ttl_secs_rounds_up() {
        assert_eq!(record_ttl_secs(Duration::from_millis(300)), 1);
        assert_eq!(record_ttl_secs(Duration::from_secs(15)), 15);
        assert_eq!(record_ttl_secs(Duration::from_millis(10_500)), 11);
    }

    #[test]
    fn test_validate_ttl_in_whole_seconds() {
        let config = RpcConfig {
            publish_interval: Duration::from_millis(10_500),
            record_ttl: Duration::from_millis(10_800),
            ..RpcConfig::default()
        };
        assert!(config.validate().is_ok());

        let config = RpcConfig {
            publish_interval: Duration::from_secs(11),
            record_ttl: Duration::from_millis(10_500),
            ..RpcConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_port_range() {
        let config = RpcConfig {
            port_range: 6000..6000,
            ..RpcConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(RpcConfig::from_json(r#"{"poll_interval_ms": 0}"#).is_err());
        assert!(RpcConfig::from_json("not json").is_err());
    }
}
