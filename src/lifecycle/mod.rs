//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Identity → Links → Bind listeners → Peer loop
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop peer loop → Close listeners → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then link layer, then listeners
//! - Closing listeners does not tear down established links

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{start, Node, StartupError};
