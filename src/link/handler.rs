//! Per-link handshake and session task.
//!
//! # State machine
//! ```text
//! StartingDedup        (Reservation taken by the transport before create)
//!     → ExchangingMetadata   write ours, read theirs, 30s bound each
//!     → VerifyingVersion     major versions must match
//!     → VerifyingTrust       pinned keys, then allow-list for unforced inbound
//!     → Established          slot promoted, session handler owns the stream
//!     → Closed               stream closed, slot released (every path)
//! ```

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use crate::error::LinkError;
use crate::identity::{addr_for_key, NodeIdentity, PublicKey};
use crate::link::handshake::{self, Metadata};
use crate::link::registry::{Link, LinkIdentity, LinkOptions, LinkRegistry, Reservation};
use crate::link::{AllowList, LinkSettings};
use crate::net::connection::LinkConn;
use crate::observability::metrics;
use crate::session::SessionHandler;

/// Shared state every transport hands connections to.
pub struct LinkContext {
    identity: NodeIdentity,
    metadata: Metadata,
    allowed: ArcSwap<AllowList>,
    registry: LinkRegistry,
    session: Arc<dyn SessionHandler>,
    settings: LinkSettings,
}

/// Everything known about a connection before its handshake.
struct Attempt {
    name: String,
    reservation: Reservation,
    incoming: bool,
    forced: bool,
    options: LinkOptions,
}

impl Attempt {
    fn identity(&self) -> &LinkIdentity {
        self.reservation.identity()
    }

    fn direction(&self) -> &'static str {
        if self.incoming {
            "inbound"
        } else {
            "outbound"
        }
    }
}

impl LinkContext {
    pub fn new(
        identity: NodeIdentity,
        allowed: AllowList,
        session: Arc<dyn SessionHandler>,
        settings: LinkSettings,
    ) -> Self {
        let metadata = Metadata::local(identity.public());
        Self {
            identity,
            metadata,
            allowed: ArcSwap::from_pointee(allowed),
            registry: LinkRegistry::new(),
            session,
            settings,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn registry(&self) -> &LinkRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn allowed(&self) -> Arc<AllowList> {
        self.allowed.load_full()
    }

    pub fn set_allowed(&self, allowed: AllowList) {
        self.allowed.store(Arc::new(allowed));
    }

    /// Claim the registry slot for `identity`.
    pub fn reserve(&self, identity: LinkIdentity) -> Result<Reservation, LinkError> {
        self.registry.reserve(identity).inspect_err(|e| {
            if let LinkError::DuplicateAttempt(identity) = e {
                tracing::debug!(transport = %identity.transport, remote = %identity.remote, "Duplicate connection attempt dropped");
                metrics::record_handshake(identity.transport.as_str(), "duplicate");
            }
        })
    }

    /// Run the handshake and session for `conn` on its own task.
    ///
    /// Returns as soon as the task is spawned.
    pub fn create(
        self: &Arc<Self>,
        conn: LinkConn,
        name: String,
        reservation: Reservation,
        incoming: bool,
        forced: bool,
        options: LinkOptions,
    ) -> JoinHandle<()> {
        let ctx = Arc::clone(self);
        let attempt = Attempt {
            name,
            reservation,
            incoming,
            forced,
            options,
        };
        tokio::spawn(async move { ctx.run(conn, attempt).await })
    }

    async fn run(&self, mut conn: LinkConn, attempt: Attempt) {
        let transport = attempt.identity().transport.as_str();
        match self.authenticate(&mut conn, &attempt).await {
            Ok(peer) => {
                metrics::record_handshake(transport, "established");
                self.run_session(conn, peer.key, &attempt).await;
            }
            Err(e) => {
                metrics::record_handshake(transport, e.outcome());
                self.log_rejection(&attempt, &e);
                if let Err(e) = conn.shutdown().await {
                    tracing::debug!(link = %attempt.identity(), error = %e, "Close after failed handshake");
                }
            }
        }
        // `attempt.reservation` drops here and frees the slot.
    }

    async fn authenticate(&self, conn: &mut LinkConn, attempt: &Attempt) -> Result<Metadata, LinkError> {
        let peer = handshake::exchange(conn, &self.metadata, self.settings.handshake_timeout).await?;
        self.verify_trust(&peer.key, attempt)?;
        Ok(peer)
    }

    fn verify_trust(&self, key: &PublicKey, attempt: &Attempt) -> Result<(), LinkError> {
        let pinned = &attempt.options.pinned_keys;
        if !pinned.is_empty() && !pinned.contains(key) {
            return Err(LinkError::PinnedKeyMismatch(*key));
        }
        if attempt.incoming && !attempt.forced && !self.allowed.load().permits(key) {
            return Err(LinkError::Forbidden(*key));
        }
        Ok(())
    }

    async fn run_session(&self, conn: LinkConn, remote_key: PublicKey, attempt: &Attempt) {
        let identity = attempt.identity();
        let link = Arc::new(Link {
            name: attempt.name.clone(),
            identity: identity.clone(),
            options: attempt.options.clone(),
            incoming: attempt.incoming,
            forced: attempt.forced,
            remote_key,
            local_addr: conn.local_addr(),
            remote_addr: conn.remote_addr(),
            counters: conn.counters(),
        });
        attempt.reservation.promote(Arc::clone(&link));
        metrics::link_established();

        let transport = identity.transport.as_str().to_uppercase();
        let remote = format!("{}@{}", addr_for_key(&remote_key), identity.remote);
        tracing::info!(
            transport = %transport,
            direction = attempt.direction(),
            remote = %remote,
            source = %link.local_addr,
            connection_id = %conn.id(),
            "Connected"
        );

        let result = self.session.handle_conn(remote_key, conn).await;
        metrics::link_closed();
        match result {
            Ok(()) => tracing::info!(
                transport = %transport,
                remote = %remote,
                source = %link.local_addr,
                "Disconnected"
            ),
            Err(e) => tracing::info!(
                transport = %transport,
                remote = %remote,
                source = %link.local_addr,
                error = %e,
                "Disconnected"
            ),
        }
    }

    fn log_rejection(&self, attempt: &Attempt, err: &LinkError) {
        let identity = attempt.identity();
        let transport = identity.transport.as_str().to_uppercase();
        match err {
            LinkError::IncompatibleVersion { local, remote } => {
                let context = if attempt.incoming {
                    "Rejected incoming connection"
                } else {
                    "Failed to connect"
                };
                tracing::debug!(
                    name = %attempt.name,
                    local_version = %local,
                    remote_version = %remote,
                    "{context}: incompatible version"
                );
            }
            LinkError::PinnedKeyMismatch(key) => tracing::error!(
                name = %attempt.name,
                key = %key,
                "Failed to connect to node: sent ed25519 key that does not match pinned keys"
            ),
            LinkError::Forbidden(key) => tracing::warn!(
                transport = %transport,
                remote = %identity.remote,
                key = %key,
                "Connection forbidden: allowed public keys do not contain key"
            ),
            other => tracing::warn!(
                transport = %transport,
                direction = attempt.direction(),
                name = %attempt.name,
                error = %other,
                "Link handshake failed"
            ),
        }
    }
}

impl std::fmt::Debug for LinkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkContext")
            .field("identity", &self.identity)
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
