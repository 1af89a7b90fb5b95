//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound:
//!     interface.rs (source address for the requested interface)
//!     → tcp.rs (connect with timeout)
//!     → tls.rs (optional TLS 1.3 client handshake, SNI on request)
//!     → connection.rs (byte counters)
//!     → link handler
//!
//! Inbound:
//!     listener.rs (bind, accept loop, cancellation)
//!     → proxy_protocol.rs (TLS listeners with ?proxy=true only)
//!     → tcp.rs / tls.rs (registry reservation, TLS accept)
//!     → connection.rs
//!     → link handler
//! ```
//!
//! # Design Decisions
//! - Listener shutdown never touches established links
//! - Certificates are self-signed; identity is proven by the metadata exchange

pub mod connection;
pub mod interface;
pub mod listener;
pub mod proxy_protocol;
pub mod tcp;
pub mod tls;
