//! Session hand-off.
//!
//! Once a link is authenticated, the stream and the remote key go to a
//! [`SessionHandler`] that owns them for the rest of the connection.

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::identity::PublicKey;
use crate::net::connection::LinkConn;

/// Error returned by a session. Only ever logged.
pub type SessionError = Box<dyn std::error::Error + Send + Sync>;

/// Consumer of authenticated links.
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    /// Run a session over `conn`. Returning ends the link.
    async fn handle_conn(&self, remote: PublicKey, conn: LinkConn) -> Result<(), SessionError>;
}

/// Reads and discards everything until the peer hangs up.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrainSession;

#[async_trait]
impl SessionHandler for DrainSession {
    async fn handle_conn(&self, remote: PublicKey, mut conn: LinkConn) -> Result<(), SessionError> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = conn.read(&mut buf).await?;
            if n == 0 {
                break;
            }
        }
        tracing::debug!(
            remote = %remote,
            connection_id = %conn.id(),
            rx_bytes = conn.counters().rx_bytes(),
            "Session drained"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_drain_session_reads_to_eof() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let addr = "127.0.0.1:1".parse().unwrap();
        let conn = LinkConn::new(local, addr, addr);
        let counters = conn.counters();

        let session = tokio::spawn(async move { DrainSession.handle_conn(PublicKey([5; 32]), conn).await });
        remote.write_all(&[0u8; 3000]).await.unwrap();
        drop(remote);

        assert!(session.await.unwrap().is_ok());
        assert_eq!(counters.rx_bytes(), 3000);
    }
}
