//! Transport and link layer for an encrypted mesh node.
//!
//! Dials and accepts TCP and TLS links, exchanges version and key metadata,
//! enforces pinned keys and an inbound allow-list, and hands authenticated
//! streams to a [`SessionHandler`].

pub mod config;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod link;
pub mod net;
pub mod observability;
pub mod session;

pub use config::NodeConfig;
pub use error::{ErrorClass, LinkError};
pub use identity::{addr_for_key, NodeIdentity, PublicKey};
pub use lifecycle::Shutdown;
pub use link::{AllowList, LinkSettings, LinkSummary, Links};
pub use net::connection::LinkConn;
pub use session::{DrainSession, SessionError, SessionHandler};
