//! Link subsystem.
//!
//! # Data Flow
//! ```text
//! Links::call(uri, sintf)                 Links::listen(uri, sintf)
//!     → url.rs (scheme, pinned keys, SNI)     → net::listener (bind, accept loop)
//!     → net::tcp / net::tls (dial)            → net::tcp / net::tls (accept)
//!     ↓                                       ↓
//!     registry.rs (reserve the slot; duplicates dropped here)
//!     → handler.rs (metadata exchange, trust checks)
//!     → SessionHandler (owns the stream until it returns)
//! ```
//!
//! # Design Decisions
//! - One slot per (transport, source interface, remote host), both directions share it
//! - The slot is taken before any socket work and released by `Drop`
//! - The allow-list is swapped atomically so reloads never block handshakes

pub mod handler;
pub mod handshake;
pub mod registry;
pub mod url;

use std::collections::HashSet;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::LinkError;
use crate::identity::{addr_for_key, NodeIdentity, PublicKey};
use crate::net::interface::DialPlan;
use crate::net::listener::Listener;
use crate::net::tcp::TcpTransport;
use crate::net::tls::TlsTransport;
use crate::observability::metrics;
use crate::session::SessionHandler;

pub use handler::LinkContext;
pub use registry::{Link, LinkIdentity, LinkOptions, LinkRegistry, LinkSlot, TransportKind};
pub use url::{PeerHost, PeerUrl};

/// Keys permitted to connect inbound. Empty admits everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    keys: HashSet<PublicKey>,
}

impl AllowList {
    pub fn from_keys(keys: impl IntoIterator<Item = PublicKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn permits(&self, key: &PublicKey) -> bool {
        self.keys.is_empty() || self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Timeouts applied to every link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of an established link.
#[derive(Debug, Clone, Serialize)]
pub struct LinkSummary {
    pub name: String,
    pub transport: &'static str,
    pub interface: String,
    pub remote: String,
    pub remote_key: String,
    pub remote_mesh_addr: Ipv6Addr,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub incoming: bool,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub uptime_secs: u64,
}

impl From<&Link> for LinkSummary {
    fn from(link: &Link) -> Self {
        Self {
            name: link.name.clone(),
            transport: link.identity.transport.as_str(),
            interface: link.identity.local.clone(),
            remote: link.identity.remote.clone(),
            remote_key: link.remote_key.to_hex(),
            remote_mesh_addr: addr_for_key(&link.remote_key),
            local_addr: link.local_addr,
            remote_addr: link.remote_addr,
            incoming: link.incoming,
            rx_bytes: link.counters.rx_bytes(),
            tx_bytes: link.counters.tx_bytes(),
            uptime_secs: link.counters.uptime().as_secs(),
        }
    }
}

/// A bound listener as reported by [`Links::listeners`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerSummary {
    pub transport: &'static str,
    pub address: SocketAddr,
}

/// Entry point for dialing, listening and inspecting links.
#[derive(Debug)]
pub struct Links {
    ctx: Arc<LinkContext>,
    tcp: Arc<TcpTransport>,
    tls: Arc<TlsTransport>,
}

impl Links {
    /// Build both transports. Fails only if the TLS certificate cannot be made.
    pub fn new(
        identity: NodeIdentity,
        allowed: AllowList,
        session: Arc<dyn SessionHandler>,
        settings: LinkSettings,
    ) -> Result<Self, LinkError> {
        let ctx = Arc::new(LinkContext::new(identity, allowed, session, settings));
        let tcp = Arc::new(TcpTransport::new(Arc::clone(&ctx)));
        let tls = Arc::new(TlsTransport::new(Arc::clone(&ctx), Arc::clone(&tcp))?);
        Ok(Self { ctx, tcp, tls })
    }

    /// Start an outbound link to `uri` in the background.
    ///
    /// URL and interface errors are returned; everything after that is logged.
    pub fn call(&self, uri: &str, sintf: &str) -> Result<(), LinkError> {
        let url = PeerUrl::parse(uri)?;
        if let PeerHost::Ip(ip) = url.host() {
            DialPlan::new(SocketAddr::new(*ip, url.port()), sintf)?;
        }
        let options = url.link_options();
        let sintf = sintf.to_string();
        let transport = url.transport();

        match transport {
            TransportKind::Tcp => {
                let tcp = Arc::clone(&self.tcp);
                tokio::spawn(async move {
                    let result = tcp.dial(&url, options, &sintf).await;
                    log_dial_result(transport, &url, result);
                });
            }
            TransportKind::Tls => {
                let tls = Arc::clone(&self.tls);
                tokio::spawn(async move {
                    let result = tls.dial(&url, options, &sintf).await;
                    log_dial_result(transport, &url, result);
                });
            }
        }
        Ok(())
    }

    /// Bind a listener for `uri` and start accepting.
    pub async fn listen(&self, uri: &str, sintf: &str) -> Result<Listener, LinkError> {
        let url = PeerUrl::parse(uri)?;
        match url.transport() {
            TransportKind::Tcp => self.tcp.listen(&url, sintf).await,
            TransportKind::Tls => self.tls.listen(&url, sintf).await,
        }
    }

    /// Address of some active TCP listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn listeners(&self) -> Vec<ListenerSummary> {
        let tcp = self.tcp.listeners().addrs().into_iter().map(|address| ListenerSummary {
            transport: TransportKind::Tcp.as_str(),
            address,
        });
        let tls = self.tls.listeners().addrs().into_iter().map(|address| ListenerSummary {
            transport: TransportKind::Tls.as_str(),
            address,
        });
        tcp.chain(tls).collect()
    }

    /// Cancel every listener on both transports.
    pub fn close_listeners(&self) {
        self.tcp.listeners().close_all();
        self.tls.listeners().close_all();
    }

    pub fn snapshot(&self) -> Vec<LinkSummary> {
        let mut links: Vec<LinkSummary> = self
            .ctx
            .registry()
            .established()
            .iter()
            .map(|link| LinkSummary::from(link.as_ref()))
            .collect();
        links.sort_by(|a, b| a.name.cmp(&b.name));
        links
    }

    /// Replace the inbound allow-list. Applies to handshakes that start afterwards.
    pub fn set_allowed_keys(&self, allowed: AllowList) {
        tracing::info!(keys = allowed.len(), "Allowed public keys updated");
        self.ctx.set_allowed(allowed);
    }

    pub fn registry(&self) -> &LinkRegistry {
        self.ctx.registry()
    }

    pub fn public_key(&self) -> PublicKey {
        self.ctx.identity().public()
    }
}

fn log_dial_result(transport: TransportKind, url: &PeerUrl, result: Result<(), LinkError>) {
    match result {
        Ok(()) => {}
        Err(LinkError::DuplicateAttempt(_)) => {}
        Err(e) => {
            metrics::record_dial_failure(transport.as_str());
            tracing::warn!(
                transport = %transport,
                peer = %url.display_name(),
                error = %e,
                class = ?e.class(),
                "Failed to dial peer"
            );
        }
    }
}
