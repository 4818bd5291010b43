//! Client directory entities (§4.7, data model "Client").

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;

use super::message::RouterMessage;

/// Opaque client identifier. Generated, never chosen by the client (§4.7).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub String);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generates ids that are monotonic (so ordering-by-join-time is free) while
/// still carrying enough randomness that ids aren't guessable from one
/// another, per the §4.7 "monotonic and random" requirement. See
/// `DESIGN.md` for why this crate doesn't reach for `uuid` here.
#[derive(Debug, Default)]
pub struct ClientIdGenerator {
    counter: AtomicU64,
}

impl ClientIdGenerator {
    pub fn next_id(&self) -> ClientId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let salt: u16 = rand::thread_rng().gen();
        ClientId(format!("{seq:x}-{salt:04x}"))
    }
}

/// A registered client's directory entry.
pub struct Client {
    pub id: ClientId,
    pub display_name: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: Mutex<Instant>,
    pub groups: Mutex<HashSet<String>>,
    /// Arbitrary application metadata supplied at `register` time (§3 Client
    /// data model). Opaque to the router itself.
    pub metadata: HashMap<String, String>,
    /// Bounded P2P outbound queue (§5): messages routed to this client wait
    /// here until its connection-handling task drains them onto the wire.
    pub outbound_tx: mpsc::Sender<RouterMessage>,
    /// Fired by the idle-heartbeat reaper to ask the owning connection task
    /// to tear itself down. `None` once consumed or if nobody is listening.
    disconnect_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Client {
    pub fn new(
        id: ClientId,
        display_name: Option<String>,
        metadata: HashMap<String, String>,
        outbound_tx: mpsc::Sender<RouterMessage>,
        disconnect_tx: oneshot::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            display_name,
            connected_at: Utc::now(),
            last_heartbeat: Mutex::new(Instant::now()),
            groups: Mutex::new(HashSet::new()),
            metadata,
            outbound_tx,
            disconnect_tx: Mutex::new(Some(disconnect_tx)),
        })
    }

    /// Ask the owning connection task to shut down. A no-op if already fired.
    pub async fn request_disconnect(&self) {
        if let Some(tx) = self.disconnect_tx.lock().await.take() {
            let _ = tx.send(());
        }
    }

    pub async fn touch_heartbeat(&self) {
        *self.last_heartbeat.lock().await = Instant::now();
    }

    pub async fn idle_for(&self) -> std::time::Duration {
        self.last_heartbeat.lock().await.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_monotonically_increasing_in_sequence() {
        let gen = ClientIdGenerator::default();
        let a = gen.next_id();
        let b = gen.next_id();
        let a_seq = a.0.split('-').next().unwrap();
        let b_seq = b.0.split('-').next().unwrap();
        assert!(u64::from_str_radix(a_seq, 16).unwrap() < u64::from_str_radix(b_seq, 16).unwrap());
    }
}
