//! Router Engine core state (§4.7, component 7): client directory, group
//! membership, pending-request table, and the event fan-out.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, oneshot, RwLock};

use crate::config::RouterConfig;
use crate::diagnostics::{EventTap, NullTap};

use super::client::{Client, ClientId, ClientIdGenerator};
use super::message::{PendingRequest, RouterEvent};

use std::sync::Arc;

/// All shared, mutable router state. Held behind an `Arc` and handed to
/// every connection task and the background reapers.
pub struct RouterState {
    pub config: RouterConfig,
    id_gen: ClientIdGenerator,
    clients: RwLock<HashMap<ClientId, Arc<Client>>>,
    by_name: RwLock<HashMap<String, ClientId>>,
    groups: RwLock<HashMap<String, HashSet<ClientId>>>,
    pending: RwLock<HashMap<String, PendingRequest>>,
    event_subscribers: RwLock<Vec<mpsc::Sender<RouterEvent>>>,
    /// Outbound-queue receivers awaiting their owner's `connectP2P` stream to
    /// attach and start draining them (§4.7: the P2P channel is what turns
    /// the bounded per-client queue into wire traffic).
    pending_outbound: RwLock<HashMap<ClientId, mpsc::Receiver<super::message::RouterMessage>>>,
    /// Disconnect receivers awaiting their owner's `connectP2P` stream to
    /// attach and race them against its own event loop, so
    /// `Client::request_disconnect` actually tears down a connection instead
    /// of signalling into the void (§4.8).
    pending_disconnect: RwLock<HashMap<ClientId, oneshot::Receiver<()>>>,
    event_tap: Arc<dyn EventTap>,
}

impl RouterState {
    pub fn new(config: RouterConfig) -> Arc<Self> {
        Self::with_event_tap(config, Arc::new(NullTap))
    }

    /// As [`RouterState::new`], but every emitted [`RouterEvent`] is also
    /// handed to `tap` (§4.8a's diagnostics hook) before fan-out to
    /// subscribers.
    pub fn with_event_tap(config: RouterConfig, tap: Arc<dyn EventTap>) -> Arc<Self> {
        Arc::new(Self {
            config,
            id_gen: ClientIdGenerator::default(),
            clients: RwLock::new(HashMap::new()),
            by_name: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            event_subscribers: RwLock::new(Vec::new()),
            pending_outbound: RwLock::new(HashMap::new()),
            pending_disconnect: RwLock::new(HashMap::new()),
            event_tap: tap,
        })
    }

    /// Stash a freshly-registered client's outbound receiver until its
    /// `connectP2P` stream attaches and claims it.
    pub async fn stash_outbound_rx(
        &self,
        id: ClientId,
        rx: mpsc::Receiver<super::message::RouterMessage>,
    ) {
        self.pending_outbound.write().await.insert(id, rx);
    }

    /// Claim the outbound receiver stashed for `id`, if it hasn't already
    /// been claimed by an earlier `connectP2P` attach.
    pub async fn take_outbound_rx(
        &self,
        id: &ClientId,
    ) -> Option<mpsc::Receiver<super::message::RouterMessage>> {
        self.pending_outbound.write().await.remove(id)
    }

    /// Stash a freshly-registered client's disconnect receiver until its
    /// `connectP2P` stream attaches and races it.
    pub async fn stash_disconnect_rx(&self, id: ClientId, rx: oneshot::Receiver<()>) {
        self.pending_disconnect.write().await.insert(id, rx);
    }

    /// Claim the disconnect receiver stashed for `id`, if any. Absent when
    /// the client registered before this field existed in a test, or was
    /// already claimed by an earlier `connectP2P` attach.
    pub async fn take_disconnect_rx(&self, id: &ClientId) -> Option<oneshot::Receiver<()>> {
        self.pending_disconnect.write().await.remove(id)
    }

    pub fn generate_client_id(&self) -> ClientId {
        self.id_gen.next_id()
    }

    pub async fn insert_client(&self, client: Arc<Client>) {
        if let Some(name) = &client.display_name {
            self.by_name.write().await.insert(name.clone(), client.id.clone());
        }
        self.clients.write().await.insert(client.id.clone(), client);
    }

    pub async fn remove_client(&self, id: &ClientId) -> Option<Arc<Client>> {
        let client = self.clients.write().await.remove(id);
        if let Some(client) = &client {
            if let Some(name) = &client.display_name {
                self.by_name.write().await.remove(name);
            }
            let mut groups = self.groups.write().await;
            for members in groups.values_mut() {
                members.remove(id);
            }
        }
        client
    }

    pub async fn get_client(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.clients.read().await.get(id).cloned()
    }

    pub async fn resolve_by_name(&self, name: &str) -> Option<ClientId> {
        self.by_name.read().await.get(name).cloned()
    }

    pub async fn online_clients(&self) -> Vec<ClientId> {
        self.clients.read().await.keys().cloned().collect()
    }

    pub async fn join_group(&self, group: &str, client_id: ClientId) {
        self.groups
            .write()
            .await
            .entry(group.to_string())
            .or_default()
            .insert(client_id.clone());
        if let Some(client) = self.get_client(&client_id).await {
            client.groups.lock().await.insert(group.to_string());
        }
    }

    pub async fn group_members(&self, group: &str) -> Vec<ClientId> {
        self.groups
            .read()
            .await
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn register_pending(&self, pending: PendingRequest) {
        self.pending.write().await.insert(pending.correlation_id.clone(), pending);
    }

    pub async fn take_pending(&self, correlation_id: &str) -> Option<PendingRequest> {
        self.pending.write().await.remove(correlation_id)
    }

    /// Drain every pending entry whose deadline has elapsed; returns them so
    /// the reaper can resolve each with `DEADLINE_EXCEEDED`.
    pub async fn drain_expired_pending(&self) -> Vec<PendingRequest> {
        let mut pending = self.pending.write().await;
        let now = tokio::time::Instant::now();
        let expired_keys: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();
        expired_keys
            .into_iter()
            .filter_map(|k| pending.remove(&k))
            .collect()
    }

    /// Drain every pending request, regardless of deadline — used during
    /// shutdown and when a requester's own connection disconnects.
    pub async fn drain_all_pending_for(&self, requester: &ClientId) -> Vec<PendingRequest> {
        let mut pending = self.pending.write().await;
        let keys: Vec<String> = pending
            .iter()
            .filter(|(_, p)| &p.requester == requester)
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter().filter_map(|k| pending.remove(&k)).collect()
    }

    /// As [`RouterState::drain_all_pending_for`], but for requests *targeted
    /// at* `target` rather than made by it — these can never be answered now
    /// that the target is gone.
    pub async fn drain_all_pending_targeting(&self, target: &ClientId) -> Vec<PendingRequest> {
        let mut pending = self.pending.write().await;
        let keys: Vec<String> = pending
            .iter()
            .filter(|(_, p)| &p.target == target)
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter().filter_map(|k| pending.remove(&k)).collect()
    }

    pub async fn subscribe_events(&self) -> mpsc::Receiver<RouterEvent> {
        let (tx, rx) = mpsc::channel(self.config.event_subscriber_queue_depth);
        self.event_subscribers.write().await.push(tx);
        rx
    }

    /// Fan an event out to every subscriber. Subscribers whose queue is
    /// disconnected are pruned lazily on the next emission.
    pub async fn emit_event(&self, event: RouterEvent) {
        self.event_tap.record(&event);
        let mut subscribers = self.event_subscribers.write().await;
        subscribers.retain(|tx| !tx.is_closed());
        for tx in subscribers.iter() {
            let _ = tx.try_send(event.clone());
        }
    }

    /// Idle clients (no heartbeat within `client_idle_timeout`), per the
    /// heartbeat reaper's sweep.
    pub async fn idle_clients(&self) -> Vec<Arc<Client>> {
        let mut idle = Vec::new();
        for client in self.clients.read().await.values() {
            if client.idle_for().await >= self.config.client_idle_timeout {
                idle.push(Arc::clone(client));
            }
        }
        idle
    }
}
