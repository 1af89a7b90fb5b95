//! PROXY protocol (v1 and v2) header handling for inbound TLS.
//!
//! A listener behind a load balancer sees the balancer's address; the header
//! carries the real source. Connections without a header pass through untouched.

use std::net::SocketAddr;
use std::time::Duration;

use ppp::{v1, v2, HeaderResult};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::error::LinkError;

const V1_PREFIX: &[u8] = b"PROXY ";
const V1_MAX_LEN: usize = 107;
const V2_SIGNATURE: &[u8] = b"\r\n\r\n\0\r\nQUIT\n";
const V2_HEADER_LEN: usize = 16;

const PEEK_RETRY: Duration = Duration::from_millis(5);

enum Detected {
    V1,
    V2,
    Absent,
}

/// Consume a PROXY header from `stream` if one is present.
///
/// Returns the source address it names, or `None` if there was no header
/// or it names no address (`UNKNOWN`, `LOCAL`).
pub async fn read_header(stream: &mut TcpStream) -> Result<Option<SocketAddr>, LinkError> {
    let header = match detect(stream).await? {
        Detected::Absent => return Ok(None),
        Detected::V1 => read_v1(stream).await?,
        Detected::V2 => read_v2(stream).await?,
    };
    parse(&header)
}

async fn detect(stream: &mut TcpStream) -> Result<Detected, LinkError> {
    let mut peeked = [0u8; V2_HEADER_LEN];
    loop {
        let n = stream.peek(&mut peeked).await?;
        if n == 0 {
            return Err(LinkError::ProxyProtocol("connection closed before header".into()));
        }
        let seen = &peeked[..n];
        let v1 = could_be(seen, V1_PREFIX);
        let v2 = could_be(seen, V2_SIGNATURE);
        if v1 && n >= V1_PREFIX.len() {
            return Ok(Detected::V1);
        }
        if v2 && n >= V2_SIGNATURE.len() {
            return Ok(Detected::V2);
        }
        if !v1 && !v2 {
            return Ok(Detected::Absent);
        }
        // A partial prefix arrived; wait for the rest.
        tokio::time::sleep(PEEK_RETRY).await;
    }
}

fn could_be(seen: &[u8], prefix: &[u8]) -> bool {
    let len = seen.len().min(prefix.len());
    seen[..len] == prefix[..len]
}

async fn read_v1(stream: &mut TcpStream) -> Result<Vec<u8>, LinkError> {
    let mut header = Vec::with_capacity(V1_MAX_LEN);
    while !header.ends_with(b"\r\n") {
        if header.len() >= V1_MAX_LEN {
            return Err(LinkError::ProxyProtocol("v1 header too long".into()));
        }
        header.push(stream.read_u8().await?);
    }
    Ok(header)
}

async fn read_v2(stream: &mut TcpStream) -> Result<Vec<u8>, LinkError> {
    let mut header = vec![0u8; V2_HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let len = u16::from_be_bytes([header[14], header[15]]) as usize;
    header.resize(V2_HEADER_LEN + len, 0);
    stream.read_exact(&mut header[V2_HEADER_LEN..]).await?;
    Ok(header)
}

fn parse(header: &[u8]) -> Result<Option<SocketAddr>, LinkError> {
    match HeaderResult::parse(header) {
        HeaderResult::V1(Ok(header)) => Ok(match header.addresses {
            v1::Addresses::Tcp4(a) => Some(SocketAddr::from((a.source_address, a.source_port))),
            v1::Addresses::Tcp6(a) => Some(SocketAddr::from((a.source_address, a.source_port))),
            v1::Addresses::Unknown => None,
        }),
        HeaderResult::V2(Ok(header)) => Ok(match header.addresses {
            v2::Addresses::IPv4(a) => Some(SocketAddr::from((a.source_address, a.source_port))),
            v2::Addresses::IPv6(a) => Some(SocketAddr::from((a.source_address, a.source_port))),
            _ => None,
        }),
        HeaderResult::V1(Err(e)) => Err(LinkError::ProxyProtocol(format!("invalid v1 header: {e:?}"))),
        HeaderResult::V2(Err(e)) => Err(LinkError::ProxyProtocol(format!("invalid v2 header: {e:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    async fn remaining(stream: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_v1_header_yields_source() {
        let (mut client, mut server) = pair().await;
        client
            .write_all(b"PROXY TCP4 192.0.2.1 192.0.2.2 56324 443\r\nmeta")
            .await
            .unwrap();

        let source = read_header(&mut server).await.unwrap();
        assert_eq!(source, Some("192.0.2.1:56324".parse().unwrap()));
        assert_eq!(remaining(&mut server, 4).await, b"meta");
    }

    #[tokio::test]
    async fn test_v1_unknown_has_no_source() {
        let (mut client, mut server) = pair().await;
        client.write_all(b"PROXY UNKNOWN\r\nmeta").await.unwrap();

        assert_eq!(read_header(&mut server).await.unwrap(), None);
        assert_eq!(remaining(&mut server, 4).await, b"meta");
    }

    #[tokio::test]
    async fn test_v2_header_yields_source() {
        let (mut client, mut server) = pair().await;
        let mut header = V2_SIGNATURE.to_vec();
        header.extend_from_slice(&[0x21, 0x11, 0x00, 0x0c]);
        header.extend_from_slice(&[198, 51, 100, 7]);
        header.extend_from_slice(&[203, 0, 113, 1]);
        header.extend_from_slice(&4000u16.to_be_bytes());
        header.extend_from_slice(&443u16.to_be_bytes());
        header.extend_from_slice(b"meta");
        client.write_all(&header).await.unwrap();

        let source = read_header(&mut server).await.unwrap();
        assert_eq!(source, Some("198.51.100.7:4000".parse().unwrap()));
        assert_eq!(remaining(&mut server, 4).await, b"meta");
    }

    #[tokio::test]
    async fn test_no_header_passes_through() {
        let (mut client, mut server) = pair().await;
        client.write_all(b"\x16\x03\x01hello").await.unwrap();

        assert_eq!(read_header(&mut server).await.unwrap(), None);
        assert_eq!(remaining(&mut server, 8).await, b"\x16\x03\x01hello");
    }

    #[tokio::test]
    async fn test_overlong_v1_rejected() {
        let (mut client, mut server) = pair().await;
        let mut line = b"PROXY TCP4 ".to_vec();
        line.extend(std::iter::repeat(b'1').take(200));
        client.write_all(&line).await.unwrap();

        assert!(matches!(
            read_header(&mut server).await,
            Err(LinkError::ProxyProtocol(_))
        ));
    }
}
