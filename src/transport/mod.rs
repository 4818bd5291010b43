//! Stream Multiplexer (§4.3, component 3).
//!
//! A [`Transport`] carries many logical [`Stream`]s over one physical
//! connection. This module defines the trait and the stream state machine;
//! [`mux`] implements the generic engine against any `AsyncRead + AsyncWrite`,
//! [`memory`] wires it over an in-process `tokio::io::duplex` pair, and
//! [`tcp`] wires it over a real socket.

pub mod memory;
pub mod mux;
pub mod tcp;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use crate::error::RouterError;
use crate::metadata::Metadata;
use crate::status::Status;

/// Identifies one logical stream within a physical connection. Client-
/// originated ids are odd, server-originated ids are even — mirroring
/// HTTP/2's convention even though nothing here speaks HTTP/2 on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Generates the odd/even-alternating stream id sequence for one side of a
/// connection (client side starts at 1, server side at 2).
#[derive(Debug)]
pub struct StreamIdGenerator {
    next: AtomicU32,
}

impl StreamIdGenerator {
    pub fn client_side() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    pub fn server_side() -> Self {
        Self {
            next: AtomicU32::new(2),
        }
    }

    pub fn next_id(&self) -> StreamId {
        StreamId(self.next.fetch_add(2, Ordering::Relaxed))
    }
}

/// A stream's lifecycle state, per §4.3's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// Apply the effect of this side finishing its send direction.
    pub fn on_local_finish(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        }
    }

    /// Apply the effect of the peer finishing its send direction.
    pub fn on_remote_finish(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        }
    }

    pub fn can_send(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    pub fn can_receive(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }
}

/// One event delivered on a stream's inbound side.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Metadata(Metadata),
    Message(Bytes),
    /// The peer (or the transport itself) ended the stream with this status.
    Closed(Status),
}

/// A handle to one logical stream. Cheaply cloneable; the underlying queues
/// and state are shared.
#[derive(Clone)]
pub struct Stream {
    pub id: StreamId,
    inner: Arc<StreamInner>,
}

struct StreamInner {
    state: Mutex<StreamState>,
    inbound_rx: Mutex<mpsc::Receiver<StreamEvent>>,
}

impl Stream {
    pub(crate) fn new(id: StreamId, inbound_rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self {
            id,
            inner: Arc::new(StreamInner {
                state: Mutex::new(StreamState::Open),
                inbound_rx: Mutex::new(inbound_rx),
            }),
        }
    }

    pub async fn state(&self) -> StreamState {
        *self.inner.state.lock().await
    }

    pub(crate) async fn set_state(&self, state: StreamState) {
        *self.inner.state.lock().await = state;
    }

    /// Pull the next inbound event for this stream, if any remain.
    pub async fn next_event(&self) -> Option<StreamEvent> {
        self.inner.inbound_rx.lock().await.recv().await
    }
}

/// The multiplexed-connection contract (§4.3). Implementations own exactly
/// one physical connection and fan its bytes out to many logical streams.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new client-originated stream.
    async fn create_stream(&self) -> Result<Stream, RouterError>;

    /// Accept the next stream opened by the peer (server side).
    async fn accept_stream(&self) -> Result<Stream, RouterError>;

    /// Send header-like metadata on `stream`.
    async fn send_metadata(
        &self,
        stream: &Stream,
        metadata: Metadata,
        end_stream: bool,
    ) -> Result<(), RouterError>;

    /// Send one opaque message payload on `stream`.
    async fn send_message(&self, stream: &Stream, payload: Bytes) -> Result<(), RouterError>;

    /// Close this side's send direction without sending a final message.
    async fn finish_sending(&self, stream: &Stream) -> Result<(), RouterError>;

    /// Close the whole connection, attempting a clean shutdown first.
    async fn close(&self) -> Result<(), RouterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_ids_alternate_parity_by_side() {
        let client = StreamIdGenerator::client_side();
        assert_eq!(client.next_id(), StreamId(1));
        assert_eq!(client.next_id(), StreamId(3));

        let server = StreamIdGenerator::server_side();
        assert_eq!(server.next_id(), StreamId(2));
        assert_eq!(server.next_id(), StreamId(4));
    }

    #[test]
    fn state_machine_closes_after_both_sides_finish() {
        let state = StreamState::Open;
        let state = state.on_local_finish();
        assert_eq!(state, StreamState::HalfClosedLocal);
        assert!(state.can_receive());
        assert!(!state.can_send());
        let state = state.on_remote_finish();
        assert_eq!(state, StreamState::Closed);
    }

    #[test]
    fn remote_finish_then_local_finish_also_closes() {
        let state = StreamState::Open.on_remote_finish();
        assert_eq!(state, StreamState::HalfClosedRemote);
        assert!(state.can_send());
        assert!(!state.can_receive());
        assert_eq!(state.on_local_finish(), StreamState::Closed);
    }
}
