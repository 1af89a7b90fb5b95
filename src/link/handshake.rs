//! Handshake metadata.
//!
//! Wire format, 38 bytes, sent by both sides before anything else:
//! ```text
//! +--------+-------+-------+----------------------+
//! | "meta" | major | minor | ed25519 public key   |
//! | 4      | 1     | 1     | 32                   |
//! +--------+-------+-------+----------------------+
//! ```

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::LinkError;
use crate::identity::{PublicKey, PUBLIC_KEY_LEN};

pub const PROTOCOL_VERSION_MAJOR: u8 = 0;
pub const PROTOCOL_VERSION_MINOR: u8 = 4;

const META_MAGIC: [u8; 4] = *b"meta";

/// Encoded size of [`Metadata`].
pub const METADATA_LEN: usize = META_MAGIC.len() + 2 + PUBLIC_KEY_LEN;

/// Version and identity exchanged at the start of every link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub major: u8,
    pub minor: u8,
    pub key: PublicKey,
}

impl Metadata {
    pub fn new(major: u8, minor: u8, key: PublicKey) -> Self {
        Self { major, minor, key }
    }

    /// Metadata for this build's protocol version.
    pub fn local(key: PublicKey) -> Self {
        Self::new(PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR, key)
    }

    pub fn encode(&self) -> [u8; METADATA_LEN] {
        let mut out = [0u8; METADATA_LEN];
        out[..4].copy_from_slice(&META_MAGIC);
        out[4] = self.major;
        out[5] = self.minor;
        out[6..].copy_from_slice(self.key.as_bytes());
        out
    }

    /// Decode, returning `None` if the magic or length is wrong.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != METADATA_LEN || bytes[..4] != META_MAGIC {
            return None;
        }
        let key = PublicKey::from_slice(&bytes[6..]).ok()?;
        Some(Self::new(bytes[4], bytes[5], key))
    }

    /// Peers interoperate when their major versions match.
    pub fn is_compatible_with(&self, other: &Metadata) -> bool {
        self.major == other.major
    }

    pub fn version(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

/// Send our metadata and read the peer's.
///
/// Each direction is bounded by `timeout`. A short write or read fails the
/// handshake outright.
pub async fn exchange<S>(stream: &mut S, local: &Metadata, timeout: Duration) -> Result<Metadata, LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let out = local.encode();
    let send = async {
        stream.write_all(&out).await?;
        stream.flush().await
    };
    match tokio::time::timeout(timeout, send).await {
        Err(_) => return Err(LinkError::HandshakeTimeout("send")),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::WriteZero => {
            return Err(LinkError::IncompleteMetadata("send"))
        }
        Ok(Err(e)) => return Err(LinkError::Io(e)),
        Ok(Ok(())) => {}
    }

    let mut incoming = [0u8; METADATA_LEN];
    match tokio::time::timeout(timeout, stream.read_exact(&mut incoming)).await {
        Err(_) => return Err(LinkError::HandshakeTimeout("recv")),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(LinkError::IncompleteMetadata("recv"))
        }
        Ok(Err(e)) => return Err(LinkError::Io(e)),
        Ok(Ok(_)) => {}
    }

    let remote = Metadata::decode(&incoming).ok_or_else(|| LinkError::IncompatibleVersion {
        local: local.version(),
        remote: "unknown".to_string(),
    })?;
    if !local.is_compatible_with(&remote) {
        return Err(LinkError::IncompatibleVersion {
            local: local.version(),
            remote: remote.version(),
        });
    }
    Ok(remote)
}
