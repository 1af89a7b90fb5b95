//! Peering URL parsing.
//!
//! `scheme://host:port[?key=<hex>&key=<hex>&sni=<name>&proxyprotocol=true]`
//! with scheme `tcp` or `tls`. `key` may repeat; `sni` only matters for TLS
//! dials; `proxyprotocol` only for TLS listeners.

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use url::{Host, Url};

use crate::error::LinkError;
use crate::identity::PublicKey;
use crate::link::registry::{LinkOptions, TransportKind};

/// Host part of a peering URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerHost {
    Ip(IpAddr),
    Domain(String),
}

impl fmt::Display for PeerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerHost::Ip(ip) => write!(f, "{ip}"),
            PeerHost::Domain(name) => f.write_str(name),
        }
    }
}

/// A parsed peering or listen URL.
#[derive(Debug, Clone)]
pub struct PeerUrl {
    url: Url,
    transport: TransportKind,
    host: PeerHost,
    port: u16,
}

impl PeerUrl {
    pub fn parse(input: &str) -> Result<Self, LinkError> {
        let invalid = |reason: &str| LinkError::InvalidUrl {
            url: input.to_string(),
            reason: reason.to_string(),
        };
        let url = Url::parse(input).map_err(|e| invalid(&e.to_string()))?;

        let transport = match url.scheme().to_ascii_lowercase().as_str() {
            "tcp" => TransportKind::Tcp,
            "tls" => TransportKind::Tls,
            other => return Err(LinkError::UnknownScheme(other.to_string())),
        };

        let host = match url.host() {
            Some(Host::Ipv4(ip)) => PeerHost::Ip(IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => PeerHost::Ip(IpAddr::V6(ip)),
            // Non-special schemes keep IPv4 literals as opaque hosts.
            Some(Host::Domain(name)) => match name.parse::<IpAddr>() {
                Ok(ip) => PeerHost::Ip(ip),
                Err(_) => PeerHost::Domain(name.to_string()),
            },
            None => return Err(invalid("missing host")),
        };
        let port = url.port().ok_or_else(|| invalid("missing port"))?;

        Ok(Self {
            url,
            transport,
            host,
            port,
        })
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn host(&self) -> &PeerHost {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn host_port(&self) -> String {
        match self.host {
            PeerHost::Ip(IpAddr::V6(ip)) => format!("[{}]:{}", ip, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }

    fn query(&self, name: &str) -> impl Iterator<Item = String> + '_ {
        let name = name.to_string();
        self.url
            .query_pairs()
            .filter(move |(k, _)| *k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Keys the remote must present. Undecodable values are skipped.
    pub fn pinned_keys(&self) -> HashSet<PublicKey> {
        self.query("key")
            .filter_map(|hex| match hex.parse::<PublicKey>() {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::debug!(url = %self.url, error = %e, "Ignoring invalid pinned key");
                    None
                }
            })
            .collect()
    }

    /// Server name for TLS dials.
    ///
    /// An explicit `sni` parameter wins unless it is an IP literal; then the
    /// URL host if it is a name; otherwise no SNI is sent.
    pub fn tls_server_name(&self) -> Option<String> {
        if let Some(sni) = self.query("sni").next() {
            if !sni.is_empty() && sni.parse::<IpAddr>().is_err() {
                return Some(sni);
            }
        }
        match &self.host {
            PeerHost::Domain(name) => Some(name.clone()),
            PeerHost::Ip(_) => None,
        }
    }

    /// Whether a listener should expect a PROXY protocol preamble.
    pub fn proxy_protocol(&self) -> bool {
        self.query("proxyprotocol")
            .next()
            .map(|v| matches!(v.as_str(), "true" | "1"))
            .unwrap_or(false)
    }

    /// Per-attempt options for dialing this URL.
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            pinned_keys: self.pinned_keys(),
            tls_sni: match self.transport {
                TransportKind::Tls => self.tls_server_name(),
                TransportKind::Tcp => None,
            },
        }
    }

    /// URL with query and trailing slash removed, for logs.
    pub fn display_name(&self) -> String {
        let base = self.url.as_str().split('?').next().unwrap_or_default();
        base.trim_end_matches('/').to_string()
    }

    /// Resolve to a socket address, taking the first DNS answer.
    pub async fn resolve(&self) -> Result<SocketAddr, LinkError> {
        match &self.host {
            PeerHost::Ip(ip) => Ok(SocketAddr::new(*ip, self.port)),
            PeerHost::Domain(name) => {
                let resolve_err = |reason: String| LinkError::Resolve {
                    host: name.clone(),
                    reason,
                };
                tokio::net::lookup_host((name.as_str(), self.port))
                    .await
                    .map_err(|e| resolve_err(e.to_string()))?
                    .next()
                    .ok_or_else(|| resolve_err("no addresses".to_string()))
            }
        }
    }
}

impl fmt::Display for PeerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const K1: &str = "1111111111111111111111111111111111111111111111111111111111111111";
    const K2: &str = "2222222222222222222222222222222222222222222222222222222222222222";

    #[test]
    fn test_parse_schemes() {
        assert_eq!(PeerUrl::parse("tcp://10.0.0.1:1234").unwrap().transport(), TransportKind::Tcp);
        assert_eq!(PeerUrl::parse("TLS://10.0.0.1:1234").unwrap().transport(), TransportKind::Tls);
        assert!(matches!(
            PeerUrl::parse("quic://10.0.0.1:1234"),
            Err(LinkError::UnknownScheme(s)) if s == "quic"
        ));
        assert!(matches!(PeerUrl::parse("tcp://10.0.0.1"), Err(LinkError::InvalidUrl { .. })));
    }

    #[test]
    fn test_hosts() {
        let url = PeerUrl::parse("tcp://10.0.0.1:1234").unwrap();
        assert_eq!(url.host(), &PeerHost::Ip("10.0.0.1".parse().unwrap()));
        assert_eq!(url.host_port(), "10.0.0.1:1234");

        let url = PeerUrl::parse("tls://[fe80::1]:1234").unwrap();
        assert_eq!(url.host(), &PeerHost::Ip("fe80::1".parse().unwrap()));
        assert_eq!(url.host_port(), "[fe80::1]:1234");

        let url = PeerUrl::parse("tls://node.example.net:443").unwrap();
        assert_eq!(url.host(), &PeerHost::Domain("node.example.net".into()));
    }

    #[test]
    fn test_pinned_keys_repeat_and_skip_invalid() {
        let url = PeerUrl::parse(&format!("tcp://10.0.0.1:1?key={K1}&key={K2}&key=zz")).unwrap();
        let keys = url.pinned_keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&K1.parse().unwrap()));
        assert!(keys.contains(&K2.parse().unwrap()));
    }

    #[test]
    fn test_sni_policy() {
        let url = PeerUrl::parse("tls://10.0.0.1:443?sni=mesh.example.org").unwrap();
        assert_eq!(url.tls_server_name().as_deref(), Some("mesh.example.org"));

        let url = PeerUrl::parse("tls://peer.example.org:443?sni=10.1.1.1").unwrap();
        assert_eq!(url.tls_server_name().as_deref(), Some("peer.example.org"));

        let url = PeerUrl::parse("tls://10.0.0.1:443?sni=10.1.1.1").unwrap();
        assert_eq!(url.tls_server_name(), None);

        let url = PeerUrl::parse("tls://[2001:db8::1]:443").unwrap();
        assert_eq!(url.tls_server_name(), None);
    }

    #[test]
    fn test_link_options_only_carry_sni_for_tls() {
        let url = PeerUrl::parse("tcp://peer.example.org:1?sni=x.example").unwrap();
        assert_eq!(url.link_options().tls_sni, None);
        let url = PeerUrl::parse("tls://peer.example.org:1?sni=x.example").unwrap();
        assert_eq!(url.link_options().tls_sni.as_deref(), Some("x.example"));
    }

    #[test]
    fn test_display_name_strips_query() {
        let url = PeerUrl::parse(&format!("tls://10.0.0.1:443/?key={K1}")).unwrap();
        assert_eq!(url.display_name(), "tls://10.0.0.1:443");
    }

    #[test]
    fn test_proxy_protocol_flag() {
        assert!(PeerUrl::parse("tls://[::]:0?proxyprotocol=true").unwrap().proxy_protocol());
        assert!(!PeerUrl::parse("tls://[::]:0").unwrap().proxy_protocol());
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let url = PeerUrl::parse("tcp://127.0.0.1:9000").unwrap();
        assert_eq!(url.resolve().await.unwrap(), "127.0.0.1:9000".parse().unwrap());
    }
}
