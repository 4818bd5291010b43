//! # Meshrouter
//!
//! A P2P message router over a multiplexed, gRPC-shaped transport: clients
//! connect over a single physical connection carrying many logical streams,
//! register themselves in a directory, and route unicast/multicast/broadcast
//! traffic and correlated request/response calls through the router.

pub mod cli;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod interaction;
pub mod lifecycle;
pub mod metadata;
pub mod router;
pub mod status;
pub mod transport;

pub use config::RouterConfig;
pub use error::RouterError;
pub use lifecycle::RouterServer;
pub use status::{Status, StatusCode};

/// The crate's own version, as reported by Cargo.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
