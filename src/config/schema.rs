//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Every field
//! has a default so a minimal file only needs `private_key`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::{IdentityError, NodeIdentity, PublicKey};
use crate::link::{AllowList, LinkSettings};

/// Root configuration for a node.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Hex ed25519 private key: 32-byte seed, or 64-byte seed followed by public key.
    pub private_key: String,

    /// Listener URLs, e.g. `tls://[::]:0` or `tcp://0.0.0.0:9001`.
    pub listen: Vec<String>,

    /// Peers dialled on startup and re-dialled every `peer_retry_secs`.
    pub peers: Vec<String>,

    /// Peers reached through a specific source interface.
    pub interface_peers: BTreeMap<String, Vec<String>>,

    /// Keys allowed to connect inbound. Empty allows everyone.
    pub allowed_public_keys: Vec<String>,

    /// Seconds between redial attempts for configured peers.
    pub peer_retry_secs: u64,

    pub timeouts: TimeoutConfig,

    pub observability: ObservabilityConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            private_key: String::new(),
            listen: Vec::new(),
            peers: Vec::new(),
            interface_peers: BTreeMap::new(),
            allowed_public_keys: Vec::new(),
            peer_retry_secs: 60,
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn identity(&self) -> Result<NodeIdentity, IdentityError> {
        NodeIdentity::from_hex(&self.private_key)
    }

    pub fn allow_list(&self) -> Result<AllowList, IdentityError> {
        let keys = self
            .allowed_public_keys
            .iter()
            .map(|key| key.parse::<PublicKey>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AllowList::from_keys(keys))
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            connect_timeout: Duration::from_secs(self.timeouts.connect_secs),
            handshake_timeout: Duration::from_secs(self.timeouts.handshake_secs),
        }
    }

    /// All configured peers as `(uri, source interface)` pairs.
    pub fn peer_targets(&self) -> Vec<(String, String)> {
        let plain = self.peers.iter().map(|uri| (uri.clone(), String::new()));
        let scoped = self
            .interface_peers
            .iter()
            .flat_map(|(intf, uris)| uris.iter().map(move |uri| (uri.clone(), intf.clone())));
        plain.chain(scoped).collect()
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Outbound TCP connect timeout in seconds.
    pub connect_secs: u64,

    /// Bound on each half of the metadata exchange, in seconds.
    pub handshake_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            handshake_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: NodeConfig = toml::from_str(r#"private_key = "00""#).unwrap();
        assert_eq!(config.peer_retry_secs, 60);
        assert_eq!(config.timeouts.connect_secs, 5);
        assert_eq!(config.timeouts.handshake_secs, 30);
        assert!(!config.observability.metrics_enabled);
        assert!(config.listen.is_empty());
    }

    #[test]
    fn test_peer_targets_include_interface_peers() {
        let config: NodeConfig = toml::from_str(
            r#"
            peers = ["tcp://10.0.0.1:9001"]

            [interface_peers]
            eth0 = ["tcp://[fe80::1]:9001", "tls://[fe80::2]:9002"]
            "#,
        )
        .unwrap();

        let targets = config.peer_targets();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0], ("tcp://10.0.0.1:9001".to_string(), String::new()));
        assert!(targets.contains(&("tls://[fe80::2]:9002".to_string(), "eth0".to_string())));
    }

    #[test]
    fn test_allow_list_parses_keys() {
        let config = NodeConfig {
            allowed_public_keys: vec!["11".repeat(32)],
            ..NodeConfig::default()
        };
        let allowed = config.allow_list().unwrap();
        assert!(allowed.permits(&PublicKey([0x11; 32])));
        assert!(!allowed.permits(&PublicKey([0x22; 32])));

        let bad = NodeConfig {
            allowed_public_keys: vec!["zz".into()],
            ..NodeConfig::default()
        };
        assert!(bad.allow_list().is_err());
    }
}
