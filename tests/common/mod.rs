//! Shared utilities for link integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use mesh_link::link::handshake::{Metadata, METADATA_LEN};
use mesh_link::{AllowList, LinkConn, LinkSettings, Links, NodeIdentity, PublicKey, SessionError, SessionHandler};

/// Session lifecycle as seen by a test node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Up(PublicKey),
    Down(PublicKey),
}

/// Reports every session and holds it open until the peer hangs up.
pub struct RecordingSession {
    events: mpsc::UnboundedSender<SessionEvent>,
}

#[async_trait]
impl SessionHandler for RecordingSession {
    async fn handle_conn(&self, remote: PublicKey, mut conn: LinkConn) -> Result<(), SessionError> {
        let _ = self.events.send(SessionEvent::Up(remote));
        let mut buf = [0u8; 1024];
        let result = loop {
            match conn.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) => break Err(e.into()),
            }
        };
        let _ = self.events.send(SessionEvent::Down(remote));
        result
    }
}

pub struct TestNode {
    pub links: Links,
    pub key: PublicKey,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl TestNode {
    pub fn new() -> Self {
        Self::with_allowed(AllowList::default())
    }

    pub fn with_allowed(allowed: AllowList) -> Self {
        let identity = NodeIdentity::generate();
        let key = identity.public();
        let (tx, events) = mpsc::unbounded_channel();
        let settings = LinkSettings {
            connect_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(2),
        };
        let links = Links::new(identity, allowed, Arc::new(RecordingSession { events: tx }), settings)
            .expect("links");
        Self { links, key, events }
    }

    /// Next session event, or `None` after `timeout`.
    pub async fn next_event(&mut self, timeout: Duration) -> Option<SessionEvent> {
        tokio::time::timeout(timeout, self.events.recv()).await.ok().flatten()
    }

    pub async fn expect_up(&mut self) -> PublicKey {
        match self.next_event(Duration::from_secs(5)).await {
            Some(SessionEvent::Up(key)) => key,
            other => panic!("expected session up, got {other:?}"),
        }
    }

    /// Assert no session starts within a short window.
    pub async fn expect_no_up(&mut self) {
        if let Some(SessionEvent::Up(key)) = self.next_event(Duration::from_millis(500)).await {
            panic!("unexpected session with {key}");
        }
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Play a peer by hand: send `ours`, return what the node sent.
pub async fn raw_exchange<S>(stream: &mut S, ours: &Metadata) -> [u8; METADATA_LEN]
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&ours.encode()).await.expect("write metadata");
    let mut theirs = [0u8; METADATA_LEN];
    stream.read_exact(&mut theirs).await.expect("read metadata");
    theirs
}
