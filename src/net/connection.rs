//! Traffic-counting connection wrapper.
//!
//! # Responsibilities
//! - Wrap any duplex byte stream (plain TCP or TLS over TCP)
//! - Count bytes read and written without altering stream semantics
//! - Record when the connection was opened
//! - Give each connection a unique ID for tracing

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Any stream a link can run over.
pub trait LinkStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> LinkStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Byte counters for one connection.
///
/// Shared between the connection itself and the registry entry so that
/// statistics can be read while the session layer owns the stream.
#[derive(Debug)]
pub struct LinkCounters {
    rx: AtomicU64,
    tx: AtomicU64,
    up: Instant,
}

impl LinkCounters {
    pub fn new() -> Self {
        Self {
            rx: AtomicU64::new(0),
            tx: AtomicU64::new(0),
            up: Instant::now(),
        }
    }

    /// Total bytes received.
    pub fn rx_bytes(&self) -> u64 {
        self.rx.load(Ordering::Relaxed)
    }

    /// Total bytes sent.
    pub fn tx_bytes(&self) -> u64 {
        self.tx.load(Ordering::Relaxed)
    }

    /// Time since the connection was opened.
    pub fn uptime(&self) -> Duration {
        self.up.elapsed()
    }

    fn record_rx(&self, n: usize) {
        self.rx.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn record_tx(&self, n: usize) {
        self.tx.fetch_add(n as u64, Ordering::Relaxed);
    }
}

impl Default for LinkCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A stream decorated with traffic counters.
pub struct LinkConn {
    inner: Box<dyn LinkStream>,
    counters: Arc<LinkCounters>,
    id: ConnectionId,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl LinkConn {
    pub fn new<S: LinkStream>(stream: S, local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        Self {
            inner: Box::new(stream),
            counters: Arc::new(LinkCounters::new()),
            id: ConnectionId::new(),
            local_addr,
            remote_addr,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn counters(&self) -> Arc<LinkCounters> {
        Arc::clone(&self.counters)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl std::fmt::Debug for LinkConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkConn")
            .field("id", &self.id)
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("counters", &self.counters)
            .finish()
    }
}

impl AsyncRead for LinkConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            this.counters.record_rx(buf.filled().len() - before);
        }
        poll
    }
}

impl AsyncWrite for LinkConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            this.counters.record_tx(n);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn counts_bytes_in_both_directions() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let mut conn = LinkConn::new(local, addr(), addr());
        let counters = conn.counters();

        conn.write_all(&[7u8; 100]).await.unwrap();
        let mut sink = [0u8; 100];
        remote.read_exact(&mut sink).await.unwrap();

        remote.write_all(&[9u8; 42]).await.unwrap();
        let mut buf = [0u8; 42];
        conn.read_exact(&mut buf).await.unwrap();

        assert_eq!(counters.tx_bytes(), 100);
        assert_eq!(counters.rx_bytes(), 42);
    }

    #[tokio::test]
    async fn counters_stable_under_concurrent_io() {
        let (local, remote) = tokio::io::duplex(64);
        let conn = LinkConn::new(local, addr(), addr());
        let counters = conn.counters();
        let (mut conn_rd, mut conn_wr) = tokio::io::split(conn);
        let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

        let writer = tokio::spawn(async move {
            for _ in 0..50 {
                conn_wr.write_all(&[1u8; 200]).await.unwrap();
            }
        });
        let drain = tokio::spawn(async move {
            let mut buf = vec![0u8; 50 * 200];
            remote_rd.read_exact(&mut buf).await.unwrap();
        });
        let feeder = tokio::spawn(async move {
            for _ in 0..30 {
                remote_wr.write_all(&[2u8; 100]).await.unwrap();
            }
        });
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; 30 * 100];
            conn_rd.read_exact(&mut buf).await.unwrap();
        });

        for task in [writer, drain, feeder, reader] {
            task.await.unwrap();
        }
        assert_eq!(counters.tx_bytes(), 10_000);
        assert_eq!(counters.rx_bytes(), 3_000);
    }

    #[tokio::test]
    async fn reports_uptime_and_addresses() {
        let (local, _remote) = tokio::io::duplex(8);
        let remote_addr: SocketAddr = "10.0.0.9:1234".parse().unwrap();
        let conn = LinkConn::new(local, addr(), remote_addr);
        assert_eq!(conn.remote_addr(), remote_addr);
        assert!(conn.counters().uptime() < Duration::from_secs(5));
    }
}
