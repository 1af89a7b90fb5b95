//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check URL schemes and ports for listeners and peers
//! - Check key encodings and timeout ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: NodeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::NodeConfig;
use crate::identity::{NodeIdentity, PublicKey};
use crate::link::url::PeerUrl;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("private_key: {0}")]
    PrivateKey(String),

    #[error("{field}: {url}: {reason}")]
    Url { field: String, url: String, reason: String },

    #[error("allowed_public_keys[{index}]: {reason}")]
    AllowedKey { index: usize, reason: String },

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("observability.metrics_address: invalid socket address {0:?}")]
    MetricsAddress(String),
}

pub fn validate_config(config: &NodeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = NodeIdentity::from_hex(&config.private_key) {
        errors.push(ValidationError::PrivateKey(e.to_string()));
    }

    for uri in &config.listen {
        check_url("listen", uri, &mut errors);
    }
    for uri in &config.peers {
        check_url("peers", uri, &mut errors);
    }
    for (intf, uris) in &config.interface_peers {
        let field = format!("interface_peers.{intf}");
        for uri in uris {
            check_url(&field, uri, &mut errors);
        }
    }

    for (index, key) in config.allowed_public_keys.iter().enumerate() {
        if let Err(e) = key.parse::<PublicKey>() {
            errors.push(ValidationError::AllowedKey {
                index,
                reason: e.to_string(),
            });
        }
    }

    if config.peer_retry_secs == 0 {
        errors.push(ValidationError::ZeroValue("peer_retry_secs"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroValue("timeouts.connect_secs"));
    }
    if config.timeouts.handshake_secs == 0 {
        errors.push(ValidationError::ZeroValue("timeouts.handshake_secs"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(field: &str, uri: &str, errors: &mut Vec<ValidationError>) {
    if let Err(e) = PeerUrl::parse(uri) {
        errors.push(ValidationError::Url {
            field: field.to_string(),
            url: uri.to_string(),
            reason: e.to_string(),
        });
    }
}
