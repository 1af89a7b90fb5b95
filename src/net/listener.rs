//! Listener lifecycle management.
//!
//! # Responsibilities
//! - Bind TCP listeners, optionally scoped to an interface
//! - Run the accept loop as its own task
//! - Track active listeners per transport with a cancel handle each
//! - Deregister on loop exit, whether from an accept error or cancellation

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;

use crate::error::LinkError;
use crate::link::registry::TransportKind;
use crate::link::url::PeerUrl;
use crate::net::interface::{is_link_local_unicast, lookup_interface, scoped};
use crate::observability::metrics;

const LISTEN_BACKLOG: u32 = 1024;

static LISTENER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        Self(LISTENER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Cancels one accept loop.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self(Arc::new(tx)), rx)
    }

    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

#[derive(Debug)]
struct ListenerEntry {
    local_addr: SocketAddr,
    cancel: CancelHandle,
}

/// Active listeners for one transport.
#[derive(Debug, Clone)]
pub struct ListenerRegistry {
    transport: TransportKind,
    entries: Arc<Mutex<HashMap<ListenerId, ListenerEntry>>>,
}

impl ListenerRegistry {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn register(&self, local_addr: SocketAddr, cancel: CancelHandle) -> ListenerId {
        let id = ListenerId::new();
        let mut entries = self.lock();
        entries.insert(id, ListenerEntry { local_addr, cancel });
        metrics::set_listeners(self.transport.as_str(), entries.len());
        id
    }

    fn deregister(&self, id: ListenerId) {
        let mut entries = self.lock();
        entries.remove(&id);
        metrics::set_listeners(self.transport.as_str(), entries.len());
    }

    /// Bound addresses of all active listeners.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.lock().values().map(|e| e.local_addr).collect()
    }

    /// One bound address, chosen arbitrarily when several listeners exist.
    pub fn any_addr(&self) -> Option<SocketAddr> {
        self.lock().values().map(|e| e.local_addr).next()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every accept loop. Entries disappear as the loops exit.
    pub fn close_all(&self) {
        for entry in self.lock().values() {
            entry.cancel.cancel();
        }
    }

    /// Run `on_accept` for every connection until cancelled or accept fails.
    pub(crate) fn spawn_accept_loop<F>(&self, listener: TcpListener, on_accept: F) -> Result<Listener, LinkError>
    where
        F: Fn(TcpStream, SocketAddr) + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let (cancel, mut cancelled) = CancelHandle::new();
        let (done_tx, done_rx) = watch::channel(false);
        let id = self.register(local_addr, cancel.clone());
        let registry = self.clone();
        let transport = self.transport;

        tracing::info!(transport = %transport, address = %local_addr, "Listener started");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => on_accept(stream, remote),
                        Err(e) => {
                            tracing::warn!(transport = %transport, address = %local_addr, error = %e, "Accept failed");
                            break;
                        }
                    },
                }
            }
            drop(listener);
            registry.deregister(id);
            done_tx.send_replace(true);
            tracing::info!(transport = %transport, address = %local_addr, "Listener stopped");
        });

        Ok(Listener {
            transport,
            local_addr,
            cancel,
            closed: done_rx,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ListenerId, ListenerEntry>> {
        self.entries.lock().expect("listener registry mutex poisoned")
    }
}

/// Handle to a running listener.
#[derive(Debug)]
pub struct Listener {
    transport: TransportKind,
    local_addr: SocketAddr,
    cancel: CancelHandle,
    closed: watch::Receiver<bool>,
}

impl Listener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Stop accepting. Established links are unaffected.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Wait until the accept loop has exited and deregistered.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|done| *done).await;
    }
}

/// Bind a TCP listener for `url`, scoping link-local hosts to `sintf`.
pub async fn bind(url: &PeerUrl, sintf: &str) -> Result<TcpListener, LinkError> {
    let mut addr = url.resolve().await?;
    if !sintf.is_empty() && is_link_local_unicast(&addr.ip()) {
        addr = scoped(addr, lookup_interface(sintf)?.index);
    }
    let bind_err = |source: std::io::Error| LinkError::Bind {
        addr: addr.to_string(),
        source,
    };

    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(bind_err)?;
    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)
}
