//! Node identity and public key handling.
//!
//! The node's long-term Ed25519 key pair is supplied by configuration and
//! never rotates during the process lifetime. Everything else (handshake
//! metadata, the TLS certificate) is derived from it.

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::SigningKey;
use thiserror::Error;

/// Length of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// First byte of every mesh address.
const ADDRESS_PREFIX: u8 = 0x02;

/// Errors produced while loading an identity or parsing keys.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid hex: {0}")]
    Hex(String),

    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("public half of private key does not match its seed")]
    Mismatch,

    #[error("failed to encode private key: {0}")]
    Encoding(String),
}

/// A node's long-term Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Build a key from a slice that must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdentityError> {
        let key: [u8; PUBLIC_KEY_LEN] =
            bytes.try_into().map_err(|_| IdentityError::Length {
                expected: PUBLIC_KEY_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for PublicKey {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| IdentityError::Hex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// The local node's long-term signing identity.
#[derive(Clone)]
pub struct NodeIdentity {
    signing: SigningKey,
    public: PublicKey,
}

impl NodeIdentity {
    pub fn from_signing_key(signing: SigningKey) -> Self {
        let public = PublicKey(signing.verifying_key().to_bytes());
        Self { signing, public }
    }

    /// Load an identity from hex.
    ///
    /// Accepts either a 32-byte seed or the 64-byte `seed || public` form.
    /// In the long form the public half must match the seed.
    pub fn from_hex(secret: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(secret.trim()).map_err(|e| IdentityError::Hex(e.to_string()))?;
        let seed: [u8; 32] = match bytes.len() {
            32 | 64 => bytes[..32].try_into().map_err(|_| IdentityError::Length {
                expected: 32,
                actual: bytes.len(),
            })?,
            actual => return Err(IdentityError::Length { expected: 64, actual }),
        };
        let identity = Self::from_signing_key(SigningKey::from_bytes(&seed));
        if bytes.len() == 64 && bytes[32..] != identity.public.0[..] {
            return Err(IdentityError::Mismatch);
        }
        Ok(identity)
    }

    /// Generate a fresh identity from the OS RNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    /// The `seed || public` hex form used in config files.
    pub fn secret_hex(&self) -> String {
        let mut bytes = self.signing.to_bytes().to_vec();
        bytes.extend_from_slice(&self.public.0);
        hex::encode(bytes)
    }

    /// PKCS#8 DER encoding of the private key, for certificate signing.
    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>, IdentityError> {
        let document = self
            .signing
            .to_pkcs8_der()
            .map_err(|e| IdentityError::Encoding(e.to_string()))?;
        Ok(document.as_bytes().to_vec())
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Derive the mesh IPv6 address for a public key.
///
/// The key is bit-inverted; the number of leading one bits is stored after
/// the prefix byte, the first zero bit is dropped, and the remaining bits
/// fill the rest of the address.
pub fn addr_for_key(key: &PublicKey) -> Ipv6Addr {
    let inverted: Vec<u8> = key.0.iter().map(|b| !b).collect();

    let mut ones = 0u8;
    let mut done = false;
    let mut bits = 0u8;
    let mut n_bits = 0;
    let mut tail = Vec::with_capacity(PUBLIC_KEY_LEN);
    for idx in 0..8 * inverted.len() {
        let bit = (inverted[idx / 8] >> (7 - idx % 8)) & 1;
        if !done {
            if bit != 0 {
                ones = ones.wrapping_add(1);
            } else {
                done = true;
            }
            continue;
        }
        bits = (bits << 1) | bit;
        n_bits += 1;
        if n_bits == 8 {
            n_bits = 0;
            tail.push(bits);
        }
    }

    let mut addr = [0u8; 16];
    addr[0] = ADDRESS_PREFIX;
    addr[1] = ones;
    let n = tail.len().min(addr.len() - 2);
    addr[2..2 + n].copy_from_slice(&tail[..n]);
    Ipv6Addr::from(addr)
}
