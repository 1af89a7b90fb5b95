//! Error taxonomy for the link layer.
//!
//! Every failure a dial, listener or handshake can hit is a `LinkError`.
//! `LinkError::class()` groups the variants the way callers react to them:
//! configuration errors surface to the caller, transient and protocol errors
//! are logged and the attempt abandoned, duplicates are dropped quietly.

use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

use crate::identity::PublicKey;
use crate::link::registry::LinkIdentity;

/// How a failure should be treated by whoever observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input from configuration or the caller. Surfaced synchronously.
    Configuration,
    /// Network trouble. Logged, attempt abandoned.
    Transient,
    /// The peer misbehaved or is not trusted. Logged, link closed.
    Protocol,
    /// Another attempt already owns the link slot. Expected, not an error.
    Duplicate,
}

/// Errors that can occur while establishing or running a link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid peering URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unknown call scheme: {0}")]
    UnknownScheme(String),

    #[error("link-local address {0} requires a zone")]
    LinkLocalRequiresZone(IpAddr),

    #[error("interface {0:?} not found")]
    InterfaceNotFound(String),

    #[error("interface {0:?} is not up")]
    InterfaceDown(String),

    #[error("no suitable source address found on interface {0:?}")]
    NoSourceAddress(String),

    #[error("failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("duplicate connection attempt to {0}")]
    DuplicateAttempt(LinkIdentity),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {0} timed out")]
    ConnectTimeout(SocketAddr),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("proxy protocol error: {0}")]
    ProxyProtocol(String),

    #[error("timeout on metadata {0}")]
    HandshakeTimeout(&'static str),

    #[error("incomplete metadata {0}")]
    IncompleteMetadata(&'static str),

    #[error("remote node is incompatible version (local {local}, remote {remote})")]
    IncompatibleVersion { local: String, remote: String },

    #[error("host sent ed25519 key {0} that does not match pinned keys")]
    PinnedKeyMismatch(PublicKey),

    #[error("forbidden connection from key {0}")]
    Forbidden(PublicKey),
}

impl LinkError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            LinkError::InvalidUrl { .. }
            | LinkError::UnknownScheme(_)
            | LinkError::LinkLocalRequiresZone(_)
            | LinkError::InterfaceNotFound(_)
            | LinkError::InterfaceDown(_)
            | LinkError::NoSourceAddress(_)
            | LinkError::Certificate(_) => ErrorClass::Configuration,
            LinkError::Resolve { .. }
            | LinkError::Bind { .. }
            | LinkError::ConnectTimeout(_)
            | LinkError::Io(_)
            | LinkError::Tls(_) => ErrorClass::Transient,
            LinkError::ProxyProtocol(_)
            | LinkError::HandshakeTimeout(_)
            | LinkError::IncompleteMetadata(_)
            | LinkError::IncompatibleVersion { .. }
            | LinkError::PinnedKeyMismatch(_)
            | LinkError::Forbidden(_) => ErrorClass::Protocol,
            LinkError::DuplicateAttempt(_) => ErrorClass::Duplicate,
        }
    }

    /// Label used for the handshake outcome metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            LinkError::DuplicateAttempt(_) => "duplicate",
            LinkError::IncompatibleVersion { .. } => "incompatible",
            LinkError::PinnedKeyMismatch(_) => "pinned_mismatch",
            LinkError::Forbidden(_) => "forbidden",
            _ => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::registry::TransportKind;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            LinkError::UnknownScheme("quic".into()).class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            LinkError::HandshakeTimeout("send").class(),
            ErrorClass::Protocol
        );
        let identity = LinkIdentity::new(TransportKind::Tcp, "", "10.0.0.1");
        assert_eq!(
            LinkError::DuplicateAttempt(identity).class(),
            ErrorClass::Duplicate
        );
    }

    #[test]
    fn test_error_display() {
        let err = LinkError::IncompatibleVersion {
            local: "0.4".into(),
            remote: "1.0".into(),
        };
        assert!(err.to_string().contains("incompatible version"));
        assert!(err.to_string().contains("1.0"));

        let err = LinkError::UnknownScheme("quic".into());
        assert_eq!(err.to_string(), "unknown call scheme: quic");
    }
}
