//! Plain TCP transport.
//!
//! # Responsibilities
//! - Dial peers, binding to a source address on the requested interface
//! - Accept inbound connections and hand them to the link handler
//! - Provide raw connected sockets for the TLS transport

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpSocket, TcpStream};

use crate::error::LinkError;
use crate::link::registry::{LinkIdentity, LinkOptions, TransportKind};
use crate::link::url::PeerUrl;
use crate::link::LinkContext;
use crate::net::connection::LinkConn;
use crate::net::interface::{canonical_addr, DialPlan};
use crate::net::listener::{bind, Listener, ListenerRegistry};

#[derive(Debug)]
pub struct TcpTransport {
    ctx: Arc<LinkContext>,
    listeners: ListenerRegistry,
}

impl TcpTransport {
    pub fn new(ctx: Arc<LinkContext>) -> Self {
        Self {
            ctx,
            listeners: ListenerRegistry::new(TransportKind::Tcp),
        }
    }

    /// Dial `url` and hand the connection to the link handler.
    ///
    /// Returns once the handshake task is spawned.
    pub async fn dial(&self, url: &PeerUrl, options: LinkOptions, sintf: &str) -> Result<(), LinkError> {
        let remote = url.resolve().await?;
        let reservation = self
            .ctx
            .reserve(LinkIdentity::for_remote(TransportKind::Tcp, sintf, remote))?;
        let stream = self.connect(remote, sintf).await?;
        let local = stream.local_addr()?;
        let conn = LinkConn::new(stream, local, remote);
        self.ctx.create(conn, url.as_str().to_string(), reservation, false, false, options);
        Ok(())
    }

    /// Open a raw TCP connection to `remote`, optionally from interface `sintf`.
    pub async fn connect(&self, remote: SocketAddr, sintf: &str) -> Result<TcpStream, LinkError> {
        let plan = DialPlan::new(remote, sintf)?;
        let socket = match plan.remote {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_keepalive(false)?;
        if let Some(name) = &plan.interface {
            bind_device(&socket, name);
        }
        if let Some(local) = plan.local {
            socket.bind(local)?;
        }

        match tokio::time::timeout(self.ctx.settings().connect_timeout, socket.connect(plan.remote)).await {
            Ok(stream) => {
                let stream = stream?;
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Err(_) => Err(LinkError::ConnectTimeout(plan.remote)),
        }
    }

    /// Bind `url` and accept links until the listener is closed.
    pub async fn listen(&self, url: &PeerUrl, sintf: &str) -> Result<Listener, LinkError> {
        let listener = bind(url, sintf).await?;
        let ctx = Arc::clone(&self.ctx);
        let sintf = sintf.to_string();
        self.listeners
            .spawn_accept_loop(listener, move |stream, remote| accept(&ctx, &sintf, stream, remote))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listeners.any_addr()
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }
}

fn accept(ctx: &Arc<LinkContext>, sintf: &str, stream: TcpStream, remote: SocketAddr) {
    let remote = canonical_addr(remote);
    let Ok(reservation) = ctx.reserve(LinkIdentity::for_remote(TransportKind::Tcp, sintf, remote)) else {
        return;
    };
    let local = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::warn!(remote = %remote, error = %e, "Dropping inbound TCP connection");
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(remote = %remote, error = %e, "TCP_NODELAY not applied");
    }
    let conn = LinkConn::new(stream, local, remote);
    ctx.create(conn, format!("tcp://{remote}"), reservation, true, false, LinkOptions::default());
}

#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
fn bind_device(socket: &TcpSocket, name: &str) {
    // Needs CAP_NET_RAW; the source address bind still applies without it.
    if let Err(e) = socket.bind_device(Some(name.as_bytes())) {
        tracing::debug!(interface = %name, error = %e, "SO_BINDTODEVICE not applied");
    }
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
fn bind_device(_socket: &TcpSocket, _name: &str) {}
