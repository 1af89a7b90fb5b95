//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the identity, allow-list and link layer from a validated config
//! - Bind every configured listener
//! - Start the peer loop that keeps configured peers dialled
//!
//! # Design Decisions
//! - Fail fast: a listener that cannot bind is fatal
//! - Listeners start before peers are dialled
//! - Redialling a connected peer is harmless; the registry drops the duplicate

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::NodeConfig;
use crate::error::LinkError;
use crate::identity::{addr_for_key, IdentityError};
use crate::lifecycle::Shutdown;
use crate::link::Links;
use crate::net::listener::Listener;
use crate::session::SessionHandler;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Link(#[from] LinkError),
}

/// A running node.
pub struct Node {
    config: NodeConfig,
    links: Arc<Links>,
    listeners: Vec<Listener>,
    shutdown: Shutdown,
}

/// Bring a node up from `config`.
pub async fn start(config: NodeConfig, session: Arc<dyn SessionHandler>) -> Result<Node, StartupError> {
    let identity = config.identity()?;
    let allowed = config.allow_list()?;
    let public = identity.public();
    let links = Arc::new(Links::new(identity, allowed, session, config.link_settings())?);

    tracing::info!(
        public_key = %public,
        address = %addr_for_key(&public),
        "Node identity loaded"
    );

    let mut listeners = Vec::with_capacity(config.listen.len());
    for uri in &config.listen {
        listeners.push(links.listen(uri, "").await?);
    }

    let shutdown = Shutdown::new();
    spawn_peer_loop(
        Arc::clone(&links),
        config.peer_targets(),
        Duration::from_secs(config.peer_retry_secs),
        shutdown.subscribe(),
    );

    Ok(Node {
        config,
        links,
        listeners,
        shutdown,
    })
}

impl Node {
    pub fn links(&self) -> &Arc<Links> {
        &self.links
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    /// Apply a reloaded config. Only the allow-list takes effect live.
    pub fn apply_config(&mut self, config: NodeConfig) {
        match config.allow_list() {
            Ok(allowed) => self.links.set_allowed_keys(allowed),
            Err(e) => tracing::error!(error = %e, "Ignoring reloaded allow-list"),
        }
        if config.listen != self.config.listen
            || config.peers != self.config.peers
            || config.interface_peers != self.config.interface_peers
            || config.private_key != self.config.private_key
        {
            tracing::warn!("Listener, peer or key changes take effect after restart");
        }
        self.config.allowed_public_keys = config.allowed_public_keys;
    }

    /// Stop the peer loop and close every listener. Established links are left alone.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        self.links.close_listeners();
        for listener in &self.listeners {
            listener.closed().await;
        }
        tracing::info!(links = self.links.snapshot().len(), "Listeners closed");
    }
}

fn spawn_peer_loop(
    links: Arc<Links>,
    targets: Vec<(String, String)>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    if targets.is_empty() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    for (uri, intf) in &targets {
                        if let Err(e) = links.call(uri, intf) {
                            tracing::warn!(peer = %uri, interface = %intf, error = %e, "Failed to add peer");
                        }
                    }
                }
            }
        }
        tracing::debug!("Peer loop stopped");
    });
}
