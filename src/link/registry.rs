//! Link registry and deduplication.
//!
//! # Responsibilities
//! - Map each logical link slot to its state (in progress or established)
//! - Make check-then-insert atomic so racing attempts cannot both proceed
//! - Release the slot on every exit path via `Reservation`'s `Drop`
//!
//! An absent entry means no attempt is running for that identity.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::error::LinkError;
use crate::identity::PublicKey;
use crate::net::connection::LinkCounters;

/// Transport a link runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Tcp,
    Tls,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Tls => "tls",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplication key for one logical link, regardless of direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkIdentity {
    pub transport: TransportKind,
    /// Source interface name, empty when unscoped.
    pub local: String,
    /// Remote host, without port.
    pub remote: String,
}

impl LinkIdentity {
    pub fn new(transport: TransportKind, local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            transport,
            local: local.into(),
            remote: remote.into(),
        }
    }

    /// Identity for a remote socket address; the port is dropped and
    /// IPv4-mapped addresses are unmapped.
    pub fn for_remote(transport: TransportKind, local: &str, remote: SocketAddr) -> Self {
        Self::new(transport, local, remote.ip().to_canonical().to_string())
    }
}

impl fmt::Display for LinkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.local.is_empty() {
            write!(f, "{}://{}", self.transport, self.remote)
        } else {
            write!(f, "{}://{} via {}", self.transport, self.remote, self.local)
        }
    }
}

/// Per-attempt options carried from the peering URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOptions {
    /// If non-empty, the peer's key must be one of these.
    pub pinned_keys: HashSet<PublicKey>,
    /// SNI to send on TLS dials.
    pub tls_sni: Option<String>,
}

/// An established link.
#[derive(Debug)]
pub struct Link {
    pub name: String,
    pub identity: LinkIdentity,
    pub options: LinkOptions,
    pub incoming: bool,
    pub forced: bool,
    pub remote_key: PublicKey,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub counters: Arc<LinkCounters>,
}

/// State of an occupied registry slot.
#[derive(Debug, Clone)]
pub enum LinkSlot {
    /// Dial or handshake still running.
    InProgress,
    /// Handshake done, session running.
    Established(Arc<Link>),
}

type SlotMap = HashMap<LinkIdentity, LinkSlot>;

/// Process-wide table of link slots.
#[derive(Debug, Clone, Default)]
pub struct LinkRegistry {
    slots: Arc<Mutex<SlotMap>>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the slot for `identity`.
    ///
    /// Fails with [`LinkError::DuplicateAttempt`] if anything already holds
    /// it. The returned reservation frees the slot when dropped.
    pub fn reserve(&self, identity: LinkIdentity) -> Result<Reservation, LinkError> {
        let mut slots = self.lock();
        match slots.entry(identity.clone()) {
            Entry::Occupied(_) => Err(LinkError::DuplicateAttempt(identity)),
            Entry::Vacant(vacant) => {
                vacant.insert(LinkSlot::InProgress);
                Ok(Reservation {
                    slots: Arc::clone(&self.slots),
                    identity,
                })
            }
        }
    }

    /// Whether a dial, handshake or session currently holds `identity`.
    pub fn is_connected_to(&self, identity: &LinkIdentity) -> bool {
        self.lock().contains_key(identity)
    }

    pub fn get(&self, identity: &LinkIdentity) -> Option<LinkSlot> {
        self.lock().get(identity).cloned()
    }

    /// Number of occupied slots, in progress or established.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All established links.
    pub fn established(&self) -> Vec<Arc<Link>> {
        self.lock()
            .values()
            .filter_map(|slot| match slot {
                LinkSlot::Established(link) => Some(Arc::clone(link)),
                LinkSlot::InProgress => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotMap> {
        self.slots.lock().expect("link registry mutex poisoned")
    }
}

/// Exclusive claim on a registry slot.
///
/// Dropping it removes the entry, whichever way the owning task exits.
#[derive(Debug)]
pub struct Reservation {
    slots: Arc<Mutex<SlotMap>>,
    identity: LinkIdentity,
}

impl Reservation {
    pub fn identity(&self) -> &LinkIdentity {
        &self.identity
    }

    /// Mark the slot established.
    pub(crate) fn promote(&self, link: Arc<Link>) {
        let mut slots = self.slots.lock().expect("link registry mutex poisoned");
        slots.insert(self.identity.clone(), LinkSlot::Established(link));
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        // Drop must not panic on a poisoned lock; recover the map instead.
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.remove(&self.identity);
        tracing::trace!(identity = %self.identity, "Link slot released");
    }
}
