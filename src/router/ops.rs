//! The ten router operations (§4.7), as plain async functions over shared
//! [`RouterState`]. `service.rs` wires these onto the gRPC-shaped endpoint;
//! keeping them free functions here makes each one independently testable
//! without a transport in the loop.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::RouterError;

use super::client::{Client, ClientId};
use super::message::{PendingRequest, RouterEvent, RouterMessage, RouterMessageKind};
use super::state::RouterState;

/// Register a new client, returning its generated id and a receiver the
/// connection task should race against its read loop: when it fires, the
/// idle-heartbeat reaper wants this connection torn down.
///
/// This allocates the client's bounded P2P outbound queue itself and stashes
/// the receiving half on `state` for the matching `connectP2P` stream to
/// claim (§4.7) — callers never see the channel's two halves split across
/// an RPC boundary.
pub async fn register(
    state: &Arc<RouterState>,
    display_name: Option<String>,
    groups: Vec<String>,
) -> (ClientId, oneshot::Receiver<()>) {
    register_with_metadata(state, display_name, groups, std::collections::HashMap::new()).await
}

/// As [`register`], but also attaches an opaque metadata map to the new
/// client entry (§3 Client data model).
pub async fn register_with_metadata(
    state: &Arc<RouterState>,
    display_name: Option<String>,
    groups: Vec<String>,
    metadata: std::collections::HashMap<String, String>,
) -> (ClientId, oneshot::Receiver<()>) {
    let id = state.generate_client_id();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.client_outbound_queue_depth);
    let (disconnect_tx, disconnect_rx) = oneshot::channel();
    let client = Client::new(id.clone(), display_name, metadata, outbound_tx, disconnect_tx);
    state.insert_client(client).await;
    state.stash_outbound_rx(id.clone(), outbound_rx).await;
    for group in groups {
        state.join_group(&group, id.clone()).await;
    }
    state.emit_event(RouterEvent::ClientRegistered { client_id: id.clone() }).await;
    (id, disconnect_rx)
}

/// Remove a client from the directory. Requests it made are resolved with
/// `UNAVAILABLE`; requests other clients made *to* it are resolved with
/// `NOT_FOUND`, since it can never answer them now (§4.8). The caller is
/// responsible for closing its transport-level streams (lifecycle.rs does
/// this on disconnect).
pub async fn unregister(state: &Arc<RouterState>, client_id: &ClientId) {
    if state.remove_client(client_id).await.is_none() {
        return;
    }
    for pending in state.drain_all_pending_for(client_id).await {
        let _ = pending.responder.send(Err(RouterError::Unavailable(
            "requester disconnected".into(),
        )));
    }
    for pending in state.drain_all_pending_targeting(client_id).await {
        let _ = pending.responder.send(Err(RouterError::NotFound(format!(
            "{client_id} disconnected before responding"
        ))));
    }
    state
        .emit_event(RouterEvent::ClientUnregistered { client_id: client_id.clone() })
        .await;
}

/// Record that a client is alive. Heartbeats count as activity for idle
/// reaping purposes (§9 Open Questions, decided in DESIGN.md).
pub async fn heartbeat(state: &Arc<RouterState>, client_id: &ClientId) -> Result<(), RouterError> {
    let client = state
        .get_client(client_id)
        .await
        .ok_or_else(|| RouterError::NotFound(format!("unknown client {client_id}")))?;
    client.touch_heartbeat().await;
    state.emit_event(RouterEvent::ClientHeartbeat { client_id: client_id.clone() }).await;
    Ok(())
}

pub async fn get_online_clients(state: &Arc<RouterState>) -> Vec<ClientId> {
    state.online_clients().await
}

/// As [`get_online_clients`], filtered to one group's membership.
pub async fn get_group_members(state: &Arc<RouterState>, group: &str) -> Vec<ClientId> {
    state.group_members(group).await
}

async fn enqueue_to(
    client: &Client,
    message: RouterMessage,
) -> Result<(), RouterError> {
    client
        .outbound_tx
        .try_send(message)
        .map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RouterError::ResourceExhausted(format!(
                "outbound queue for {} is full",
                client.id
            )),
            mpsc::error::TrySendError::Closed(_) => {
                RouterError::Unavailable(format!("{} is no longer connected", client.id))
            }
        })
}

/// Deliver `payload` to exactly one client by id.
pub async fn send_unicast(
    state: &Arc<RouterState>,
    from: ClientId,
    target: &ClientId,
    payload: Bytes,
) -> Result<(), RouterError> {
    let client = state
        .get_client(target)
        .await
        .ok_or_else(|| RouterError::NotFound(format!("unknown client {target}")))?;
    enqueue_to(
        &client,
        RouterMessage {
            kind: RouterMessageKind::Unicast,
            from: from.clone(),
            payload,
            correlation_id: None,
        },
    )
    .await?;
    state.emit_event(RouterEvent::MessageRouted { kind: RouterMessageKind::Unicast, from }).await;
    Ok(())
}

/// Deliver `payload` to every member of `group`. Best-effort: a full queue
/// on one member does not prevent delivery to the others, but its failure
/// is reported back in the returned list.
pub async fn send_multicast(
    state: &Arc<RouterState>,
    from: ClientId,
    group: &str,
    payload: Bytes,
) -> Vec<(ClientId, Result<(), RouterError>)> {
    let mut results = Vec::new();
    for member in state.group_members(group).await {
        let outcome = match state.get_client(&member).await {
            Some(client) => {
                enqueue_to(
                    &client,
                    RouterMessage {
                        kind: RouterMessageKind::Multicast,
                        from: from.clone(),
                        payload: payload.clone(),
                        correlation_id: None,
                    },
                )
                .await
            }
            None => Err(RouterError::NotFound(format!("unknown client {member}"))),
        };
        results.push((member, outcome));
    }
    state
        .emit_event(RouterEvent::MessageRouted { kind: RouterMessageKind::Multicast, from })
        .await;
    results
}

/// Deliver `payload` to every currently registered client except `from`.
pub async fn send_broadcast(
    state: &Arc<RouterState>,
    from: ClientId,
    payload: Bytes,
) -> Vec<(ClientId, Result<(), RouterError>)> {
    let mut results = Vec::new();
    for id in state.online_clients().await {
        if id == from {
            continue;
        }
        let outcome = match state.get_client(&id).await {
            Some(client) => {
                enqueue_to(
                    &client,
                    RouterMessage {
                        kind: RouterMessageKind::Broadcast,
                        from: from.clone(),
                        payload: payload.clone(),
                        correlation_id: None,
                    },
                )
                .await
            }
            None => Err(RouterError::NotFound(format!("unknown client {id}"))),
        };
        results.push((id, outcome));
    }
    state
        .emit_event(RouterEvent::MessageRouted { kind: RouterMessageKind::Broadcast, from })
        .await;
    results
}

/// Send a correlated request to `target` and wait (up to `timeout`) for a
/// matching `respond()`. A late response that arrives after the deadline
/// reaper has already resolved the pending entry is silently dropped by
/// `respond()` finding no matching correlation id (§9 Open Questions).
pub async fn request(
    state: &Arc<RouterState>,
    from: ClientId,
    target: &ClientId,
    payload: Bytes,
    correlation_id: String,
    timeout: Duration,
) -> Result<RouterMessage, RouterError> {
    let client = state
        .get_client(target)
        .await
        .ok_or_else(|| RouterError::NotFound(format!("unknown client {target}")))?;

    let (responder, receiver) = oneshot::channel();
    state
        .register_pending(PendingRequest {
            correlation_id: correlation_id.clone(),
            requester: from.clone(),
            target: target.clone(),
            deadline: tokio::time::Instant::now() + timeout,
            responder,
        })
        .await;

    enqueue_to(
        &client,
        RouterMessage {
            kind: RouterMessageKind::Request,
            from,
            payload,
            correlation_id: Some(correlation_id.clone()),
        },
    )
    .await?;

    match tokio::time::timeout(timeout, receiver).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(RouterError::Internal("pending request responder dropped".into())),
        Err(_) => {
            state.take_pending(&correlation_id).await;
            Err(RouterError::DeadlineExceeded(format!(
                "request {correlation_id} timed out"
            )))
        }
    }
}

/// Resolve an outstanding `request()` by correlation id. No matching pending
/// entry (already timed out, already answered, or never existed) is not an
/// error — the responder simply has nothing left to do.
pub async fn respond(
    state: &Arc<RouterState>,
    from: ClientId,
    correlation_id: &str,
    payload: Bytes,
) -> Result<(), RouterError> {
    match state.take_pending(correlation_id).await {
        Some(pending) => {
            let _ = pending.responder.send(Ok(RouterMessage {
                kind: RouterMessageKind::Response,
                from,
                payload,
                correlation_id: Some(correlation_id.to_string()),
            }));
            Ok(())
        }
        None => Ok(()),
    }
}

pub async fn subscribe_to_events(state: &Arc<RouterState>) -> mpsc::Receiver<RouterEvent> {
    state.subscribe_events().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;

    #[tokio::test]
    async fn register_then_unicast_delivers_to_the_outbound_queue() {
        let state = RouterState::new(RouterConfig::default());
        let (a, _disc_a) = register(&state, Some("alice".into()), vec![]).await;
        let (b, _disc_b) = register(&state, Some("bob".into()), vec![]).await;
        let mut rx_b = state.take_outbound_rx(&b).await.unwrap();

        send_unicast(&state, a.clone(), &b, Bytes::from_static(b"hi")).await.unwrap();
        let msg = rx_b.recv().await.unwrap();
        assert_eq!(msg.from, a);
        assert_eq!(&msg.payload[..], b"hi");
    }

    #[tokio::test]
    async fn unicast_to_unknown_client_is_not_found() {
        let state = RouterState::new(RouterConfig::default());
        let missing = ClientId("nope".into());
        let err = send_unicast(&state, ClientId("x".into()), &missing, Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), crate::status::StatusCode::NotFound);
    }

    #[tokio::test]
    async fn register_joins_the_requested_groups_immediately() {
        let state = RouterState::new(RouterConfig::default());
        let (a, _disc_a) = register(&state, None, vec!["room-1".into()]).await;
        assert_eq!(state.group_members("room-1").await, vec![a]);
    }

    #[tokio::test]
    async fn request_times_out_when_nobody_responds() {
        let state = RouterState::new(RouterConfig::default());
        let (a, _disc_a) = register(&state, None, vec![]).await;
        let (b, _disc_b) = register(&state, None, vec![]).await;

        let err = request(
            &state,
            a,
            &b,
            Bytes::new(),
            "corr-1".into(),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), crate::status::StatusCode::DeadlineExceeded);
    }

    #[tokio::test]
    async fn respond_resolves_a_matching_pending_request() {
        let state = RouterState::new(RouterConfig::default());
        let (a, _disc_a) = register(&state, None, vec![]).await;
        let (b, _disc_b) = register(&state, None, vec![]).await;
        let mut rx_b = state.take_outbound_rx(&b).await.unwrap();

        let state_clone = state.clone();
        let b_clone = b.clone();
        let responder_task = tokio::spawn(async move {
            let msg = rx_b.recv().await.unwrap();
            respond(&state_clone, b_clone, msg.correlation_id.as_ref().unwrap(), Bytes::from_static(b"pong"))
                .await
                .unwrap();
        });

        let response = request(&state, a, &b, Bytes::from_static(b"ping"), "corr-2".into(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&response.payload[..], b"pong");
        responder_task.await.unwrap();
    }

    #[tokio::test]
    async fn unregister_resolves_its_pending_requests_as_unavailable() {
        let state = RouterState::new(RouterConfig::default());
        let (a, _disc_a) = register(&state, None, vec![]).await;
        let (b, _disc_b) = register(&state, None, vec![]).await;

        let state_clone = state.clone();
        let a_clone = a.clone();
        let request_task = tokio::spawn(async move {
            request(&state_clone, a_clone, &b, Bytes::new(), "corr-3".into(), Duration::from_secs(5)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        unregister(&state, &a).await;

        let err = request_task.await.unwrap().unwrap_err();
        assert_eq!(err.status_code(), crate::status::StatusCode::Unavailable);
    }
}
