//! Router Engine (§4.7, component 7): the client directory, routing
//! operations, and the service contract wiring that exposes them.

pub mod client;
pub mod message;
pub mod ops;
pub mod reaper;
pub mod service;
pub mod state;

pub use client::{Client, ClientId, ClientIdGenerator};
pub use message::{PendingRequest, RouterEvent, RouterMessage, RouterMessageKind};
pub use service::router_contract;
pub use state::RouterState;
