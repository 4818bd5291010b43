//! Internal message and event shapes the router engine passes around —
//! distinct from the wire-level `Frame`/`Metadata`, the way the teacher
//! crate's `ipc::Message`/`MessageType` sit above its transport layer.

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::RouterError;

use super::client::ClientId;

/// What kind of routing a [`RouterMessage`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterMessageKind {
    Unicast,
    Multicast,
    Broadcast,
    Request,
    Response,
}

/// A message in flight between clients, after the router has resolved its
/// targets but before it's been handed off to each target's outbound queue.
#[derive(Debug, Clone)]
pub struct RouterMessage {
    pub kind: RouterMessageKind,
    pub from: ClientId,
    pub payload: Bytes,
    /// Present only for `Request`/`Response`; correlates a response back to
    /// its originating `PendingRequest`.
    pub correlation_id: Option<String>,
}

/// Lifecycle and traffic events the router fans out to subscribers (§4.7).
#[derive(Debug, Clone)]
pub enum RouterEvent {
    ClientRegistered { client_id: ClientId },
    ClientUnregistered { client_id: ClientId },
    ClientHeartbeat { client_id: ClientId },
    MessageRouted { kind: RouterMessageKind, from: ClientId },
}

/// Bookkeeping for one outstanding `request()` call, resolved either by a
/// matching `respond()` or by the pending-request reaper.
pub struct PendingRequest {
    pub correlation_id: String,
    pub requester: ClientId,
    pub target: ClientId,
    pub deadline: Instant,
    pub responder: oneshot::Sender<Result<RouterMessage, RouterError>>,
}
