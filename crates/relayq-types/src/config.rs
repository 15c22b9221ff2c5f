//! Queue manager configuration.
//!
//! A [`NodeConfig`] is usually read from a TOML file by the bootstrap and
//! then validated once with [`NodeConfig::validate`]. It is immutable for the
//! lifetime of the node.

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default capacity for both buffers.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;
/// Well-known port queue managers listen on.
pub const DEFAULT_PEER_PORT: u16 = 10_000;

/// How the delivery worker decides that a transfer has retried for too long.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffCeiling {
    /// Abandon once the time elapsed since the first attempt exceeds
    /// `maximum_backoff`.
    #[default]
    Enforced,
    /// Compare `start - now` against `maximum_backoff`. The difference is never
    /// positive, so the ceiling never trips and a transfer retries until it
    /// succeeds or the node shuts down.
    Unbounded,
}

/// Configuration for a queue manager node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's identity. Messages addressed to it are delivered locally.
    pub node_id: String,
    /// Capacity of the send buffer.
    pub send_buffer_capacity: usize,
    /// Capacity of the deliver buffer.
    pub delivery_buffer_capacity: usize,
    /// Ceiling for the retry loop of a single transfer, in milliseconds.
    pub maximum_backoff_ms: u64,
    /// Bound on establishing one connection, in milliseconds.
    pub dial_timeout_ms: u64,
    /// Bound on one remote delivery call, in milliseconds.
    pub call_timeout_ms: u64,
    /// Which ceiling semantics the retry loop uses.
    pub backoff_ceiling: BackoffCeiling,
    /// Dial peers over TLS.
    pub tls_enabled: bool,
    /// PEM file holding the certificate(s) trusted when dialing over TLS.
    pub key_file_path: Option<PathBuf>,
    /// Server name to verify instead of the endpoint host.
    pub tls_domain: Option<String>,
    /// Port peers are assumed to listen on when an identity is dialed as a host.
    pub peer_port: u16,
    /// Address the inbound listener binds to.
    pub listen_addr: SocketAddr,
    /// Explicit `identity -> host:port` routes.
    pub peers: BTreeMap<String, String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            send_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            delivery_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            maximum_backoff_ms: 10_000,
            dial_timeout_ms: 10_000,
            call_timeout_ms: 30_000,
            backoff_ceiling: BackoffCeiling::default(),
            tls_enabled: false,
            key_file_path: None,
            tls_domain: None,
            peer_port: DEFAULT_PEER_PORT,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PEER_PORT)),
            peers: BTreeMap::new(),
        }
    }
}

impl NodeConfig {
    /// Parse a configuration from TOML text. The result is not yet validated.
    pub fn from_toml_str(contents: &str) -> RelayResult<Self> {
        toml::from_str(contents).map_err(|e| RelayError::Config(e.to_string()))
    }

    /// Check that every required field is present and non-zero.
    pub fn validate(&self) -> RelayResult<()> {
        if self.tls_enabled
            && self
                .key_file_path
                .as_ref()
                .map_or(true, |p| p.as_os_str().is_empty())
        {
            return Err(RelayError::Config(
                "tls specified, but missing path to pem file".to_string(),
            ));
        }
        if self.delivery_buffer_capacity == 0 {
            return Err(RelayError::Config(
                "delivery buffer capacity must be greater than 0".to_string(),
            ));
        }
        if self.send_buffer_capacity == 0 {
            return Err(RelayError::Config(
                "send buffer capacity must be greater than 0".to_string(),
            ));
        }
        if self.node_id.trim().is_empty() {
            return Err(RelayError::Config("node_id must be specified".to_string()));
        }
        if self.maximum_backoff_ms == 0 {
            return Err(RelayError::Config(
                "maximum backoff must be specified".to_string(),
            ));
        }
        if self.dial_timeout_ms == 0 {
            return Err(RelayError::Config("dial timeout must be specified".to_string()));
        }
        if self.call_timeout_ms == 0 {
            return Err(RelayError::Config("call timeout must be specified".to_string()));
        }
        Ok(())
    }

    pub fn maximum_backoff(&self) -> Duration {
        Duration::from_millis(self.maximum_backoff_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> NodeConfig {
        NodeConfig {
            node_id: "12345".to_string(),
            ..NodeConfig::default()
        }
    }

    fn config_err(cfg: &NodeConfig) -> String {
        match cfg.validate() {
            Err(RelayError::Config(msg)) => msg,
            other => panic!("Expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_match_bootstrap_values() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.send_buffer_capacity, 100);
        assert_eq!(cfg.delivery_buffer_capacity, 100);
        assert_eq!(cfg.maximum_backoff(), Duration::from_secs(10));
        assert_eq!(cfg.dial_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.peer_port, 10_000);
        assert_eq!(cfg.backoff_ceiling, BackoffCeiling::Enforced);
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_tls_without_key_path_rejected() {
        let cfg = NodeConfig {
            tls_enabled: true,
            ..valid()
        };
        assert!(config_err(&cfg).contains("pem file"));

        let cfg = NodeConfig {
            tls_enabled: true,
            key_file_path: Some(PathBuf::new()),
            ..valid()
        };
        assert!(config_err(&cfg).contains("pem file"));
    }

    #[test]
    fn test_tls_with_key_path_accepted() {
        let cfg = NodeConfig {
            tls_enabled: true,
            key_file_path: Some(PathBuf::from("/etc/relayq/ca.pem")),
            ..valid()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_capacities_rejected() {
        let cfg = NodeConfig {
            delivery_buffer_capacity: 0,
            ..valid()
        };
        assert!(config_err(&cfg).contains("delivery buffer"));

        let cfg = NodeConfig {
            send_buffer_capacity: 0,
            ..valid()
        };
        assert!(config_err(&cfg).contains("send buffer"));
    }

    #[test]
    fn test_empty_node_id_rejected() {
        let cfg = NodeConfig {
            node_id: "  ".to_string(),
            ..valid()
        };
        assert!(config_err(&cfg).contains("node_id"));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let cfg = NodeConfig {
            maximum_backoff_ms: 0,
            ..valid()
        };
        assert!(config_err(&cfg).contains("maximum backoff"));

        let cfg = NodeConfig {
            dial_timeout_ms: 0,
            ..valid()
        };
        assert!(config_err(&cfg).contains("dial timeout"));

        let cfg = NodeConfig {
            call_timeout_ms: 0,
            ..valid()
        };
        assert!(config_err(&cfg).contains("call timeout"));
    }

    #[test]
    fn test_parse_toml() {
        let cfg = NodeConfig::from_toml_str(
            r#"
            node_id = "10.0.0.5"
            send_buffer_capacity = 8
            delivery_buffer_capacity = 4
            maximum_backoff_ms = 2500
            backoff_ceiling = "unbounded"
            listen_addr = "127.0.0.1:9000"

            [peers]
            "node-b" = "10.0.0.6:10000"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.node_id, "10.0.0.5");
        assert_eq!(cfg.send_buffer_capacity, 8);
        assert_eq!(cfg.delivery_buffer_capacity, 4);
        assert_eq!(cfg.maximum_backoff(), Duration::from_millis(2500));
        assert_eq!(cfg.backoff_ceiling, BackoffCeiling::Unbounded);
        assert_eq!(cfg.listen_addr.port(), 9000);
        assert_eq!(cfg.peers.get("node-b").unwrap(), "10.0.0.6:10000");
        // Unspecified fields fall back to defaults
        assert_eq!(cfg.dial_timeout_ms, 10_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_toml_rejects_bad_ceiling() {
        let err = NodeConfig::from_toml_str(r#"backoff_ceiling = "sometimes""#).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }
}
