//! End-to-end router scenarios (§8), driven over the real frame codec and
//! stream multiplexer via the in-memory loopback transport — every call
//! below travels through `FrameCodec`/`MuxTransport` exactly as it would
//! over TCP, only the physical pipe differs.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use meshrouter::config::RouterConfig;
use meshrouter::endpoint::Endpoint;
use meshrouter::interaction::{bidi, server_stream, unary};
use meshrouter::metadata::Metadata;
use meshrouter::router::reaper::run_heartbeat_reaper;
use meshrouter::router::{router_contract, RouterEvent, RouterState};
use meshrouter::status::StatusCode;
use meshrouter::transport::memory::connected_pair;
use meshrouter::transport::Transport;

/// Accept connections on `server` forever, dispatching every inbound stream
/// through `endpoint` the way `lifecycle::handle_connection` does for a real
/// listener.
fn spawn_acceptor(endpoint: Arc<Endpoint>, server: impl Transport + 'static) {
    let server = Arc::new(server);
    tokio::spawn(async move {
        loop {
            match server.accept_stream().await {
                Ok(stream) => {
                    let endpoint = Arc::clone(&endpoint);
                    let server = Arc::clone(&server);
                    tokio::spawn(async move {
                        let _ = endpoint.dispatch(server.as_ref(), stream).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

fn new_router(config: RouterConfig) -> (Arc<RouterState>, Arc<Endpoint>) {
    let state = RouterState::new(config.clone());
    let mut endpoint = Endpoint::new(config);
    endpoint.add_service(router_contract(state.clone()));
    (state, Arc::new(endpoint))
}

/// Open a stream, send `method`'s single JSON request, and return the
/// decoded JSON response plus the trailer's status code.
async fn call_unary(client: &dyn Transport, method: &str, body: Value) -> (Value, StatusCode) {
    let stream = client.create_stream().await.unwrap();
    client
        .send_metadata(&stream, Metadata::client_initial("Router", method, "json"), false)
        .await
        .unwrap();
    let request = Bytes::from(serde_json::to_vec(&body).unwrap());
    let (response, status) = unary::call(client, &stream, request).await.unwrap();
    let decoded: Value = if response.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&response).unwrap()
    };
    (decoded, status.code)
}

async fn register(client: &dyn Transport, name: &str, groups: &[&str]) -> String {
    let (resp, code) = call_unary(
        client,
        "Register",
        json!({ "display_name": name, "groups": groups }),
    )
    .await;
    assert_eq!(code, StatusCode::Ok);
    resp["client_id"].as_str().unwrap().to_string()
}

/// Attach a client's `connectP2P` channel and return a sender for further
/// `P2PClientFrame`s and a receiver for routed `PushEnvelope`s, having
/// already sent the required init frame.
fn attach_p2p(client: Arc<dyn Transport>, client_id: String) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    let (req_tx, req_rx) = mpsc::channel::<Bytes>(32);
    let (resp_tx, resp_rx) = mpsc::channel::<Bytes>(32);

    let init = Bytes::from(serde_json::to_vec(&json!({ "client_id": client_id })).unwrap());
    let _ = req_tx.try_send(init);

    tokio::spawn(async move {
        let stream = client.create_stream().await.unwrap();
        client
            .send_metadata(&stream, Metadata::client_initial("Router", "ConnectP2P", "json"), false)
            .await
            .unwrap();
        let _ = bidi::call(client.as_ref(), &stream, req_rx, resp_tx).await;
    });

    (req_tx, resp_rx)
}

#[tokio::test]
async fn s1_unary_register_then_unicast_round_trip() {
    let (_state, endpoint) = new_router(RouterConfig::default());
    let (client_a, server_a) = connected_pair(RouterConfig::default());
    let (client_b, server_b) = connected_pair(RouterConfig::default());
    spawn_acceptor(endpoint.clone(), server_a);
    spawn_acceptor(endpoint.clone(), server_b);

    let a = register(&client_a, "alice", &[]).await;
    let client_b: Arc<dyn Transport> = Arc::new(client_b);
    let b = register(client_b.as_ref(), "bob", &[]).await;

    let (_req_tx, mut resp_rx) = attach_p2p(client_b.clone(), b.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (_resp, code) = call_unary(
        &client_a,
        "SendUnicast",
        json!({ "from": a, "target": b, "payload": [1, 2, 3] }),
    )
    .await;
    assert_eq!(code, StatusCode::Ok);

    let pushed = tokio::time::timeout(Duration::from_secs(2), resp_rx.recv())
        .await
        .expect("push delivered in time")
        .expect("channel open");
    let envelope: Value = serde_json::from_slice(&pushed).unwrap();
    assert_eq!(envelope["kind"], "unicast");
    assert_eq!(envelope["from"], a);
    assert_eq!(envelope["payload"], json!([1, 2, 3]));
}

#[tokio::test]
async fn s5_multicast_reaches_every_group_member_except_sender() {
    let (_state, endpoint) = new_router(RouterConfig::default());
    let (client_1, server_1) = connected_pair(RouterConfig::default());
    let (client_2, server_2) = connected_pair(RouterConfig::default());
    let (client_3, server_3) = connected_pair(RouterConfig::default());
    spawn_acceptor(endpoint.clone(), server_1);
    spawn_acceptor(endpoint.clone(), server_2);
    spawn_acceptor(endpoint.clone(), server_3);

    let c1 = register(&client_1, "c1", &["g"]).await;
    let client_2: Arc<dyn Transport> = Arc::new(client_2);
    let client_3: Arc<dyn Transport> = Arc::new(client_3);
    let c2 = register(client_2.as_ref(), "c2", &["g"]).await;
    let c3 = register(client_3.as_ref(), "c3", &["g"]).await;

    let (_t2, mut rx2) = attach_p2p(client_2.clone(), c2.clone());
    let (_t3, mut rx3) = attach_p2p(client_3.clone(), c3.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (resp, code) = call_unary(
        &client_1,
        "SendMulticast",
        json!({ "from": c1, "group": "g", "payload": [9] }),
    )
    .await;
    assert_eq!(code, StatusCode::Ok);
    let results = resp["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);

    let m2 = tokio::time::timeout(Duration::from_secs(2), rx2.recv()).await.unwrap().unwrap();
    let m3 = tokio::time::timeout(Duration::from_secs(2), rx3.recv()).await.unwrap().unwrap();
    for raw in [m2, m3] {
        let envelope: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(envelope["kind"], "multicast");
        assert_eq!(envelope["from"], c1);
    }
}

#[tokio::test]
async fn s6_request_response_round_trip_over_the_p2p_channel() {
    let (_state, endpoint) = new_router(RouterConfig::default());
    let (client_a, server_a) = connected_pair(RouterConfig::default());
    let (client_b, server_b) = connected_pair(RouterConfig::default());
    spawn_acceptor(endpoint.clone(), server_a);
    spawn_acceptor(endpoint.clone(), server_b);

    let a = register(&client_a, "a", &[]).await;
    let client_b: Arc<dyn Transport> = Arc::new(client_b);
    let b = register(client_b.as_ref(), "b", &[]).await;

    let (req_tx_b, mut resp_rx_b) = attach_p2p(client_b.clone(), b.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let request_task = tokio::spawn({
        let a = a.clone();
        let b = b.clone();
        async move {
            call_unary(
                &client_a,
                "Request",
                json!({
                    "from": a,
                    "target": b,
                    "payload": [7, 7],
                    "correlation_id": "corr-xyz",
                    "timeout_ms": 2000,
                }),
            )
            .await
        }
    });

    let pushed = tokio::time::timeout(Duration::from_secs(2), resp_rx_b.recv())
        .await
        .unwrap()
        .unwrap();
    let envelope: Value = serde_json::from_slice(&pushed).unwrap();
    assert_eq!(envelope["kind"], "request");
    let correlation_id = envelope["correlation_id"].as_str().unwrap().to_string();

    let reply = Bytes::from(
        serde_json::to_vec(&json!({
            "kind": "response",
            "correlation_id": correlation_id,
            "payload": [8, 8],
        }))
        .unwrap(),
    );
    req_tx_b.send(reply).await.unwrap();

    let (resp, code) = request_task.await.unwrap();
    assert_eq!(code, StatusCode::Ok);
    assert_eq!(resp["payload"], json!([8, 8]));
}

#[tokio::test]
async fn s7_idle_client_is_reaped_and_disconnect_event_fires() {
    let config = RouterConfig {
        client_idle_timeout: Duration::from_millis(50),
        heartbeat_reaper_interval: Duration::from_millis(10),
        ..RouterConfig::default()
    };
    let (state, endpoint) = new_router(config);
    tokio::spawn(run_heartbeat_reaper(state.clone()));

    let (client, server) = connected_pair(RouterConfig::default());
    spawn_acceptor(endpoint, server);

    let mut events = state.subscribe_events().await;
    let id = register(&client, "idle-client", &[]).await;

    let registered = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(registered, RouterEvent::ClientRegistered { .. }));

    let disconnected = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("idle client reaped in time")
        .unwrap();
    match disconnected {
        RouterEvent::ClientUnregistered { client_id } => {
            assert_eq!(client_id.0, id);
        }
        other => panic!("expected ClientUnregistered, got {other:?}"),
    }
    assert!(state.online_clients().await.is_empty());
}

#[tokio::test]
async fn s2_server_stream_subscribe_to_events_sees_a_registration() {
    let (_state, endpoint) = new_router(RouterConfig::default());
    let (sub_client, sub_server) = connected_pair(RouterConfig::default());
    let (reg_client, reg_server) = connected_pair(RouterConfig::default());
    spawn_acceptor(endpoint.clone(), sub_server);
    spawn_acceptor(endpoint, reg_server);

    let stream = sub_client.create_stream().await.unwrap();
    sub_client
        .send_metadata(&stream, Metadata::client_initial("Router", "SubscribeToEvents", "json"), false)
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    let call_fut = server_stream::call(&sub_client, &stream, Bytes::new(), tx);
    tokio::pin!(call_fut);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let _ = register(&reg_client, "someone", &[]).await;

    let event_bytes = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let event: Value = serde_json::from_slice(&event_bytes).unwrap();
    assert_eq!(event["kind"], "client_registered");

    drop(rx);
    let _ = tokio::time::timeout(Duration::from_millis(200), call_fut).await;
}
