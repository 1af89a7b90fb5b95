//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Transports, registry, handshake:
//!     → logging.rs (structured tracing events: transport, remote, direction)
//!     → metrics.rs (handshake outcomes, established links, listeners)
//!
//! Consumers:
//!     → stdout log stream
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Duplicate attempts and version mismatches log at debug
//! - Pinned-key mismatches log at error, allow-list rejections at warn
//! - Metrics are cheap (atomic increments) and no-ops without a recorder

pub mod logging;
pub mod metrics;
