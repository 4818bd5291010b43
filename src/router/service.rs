//! Wires the ten router operations onto a [`ServiceContract`] named
//! `"Router"`, the way an application would register its own domain
//! services on an [`Endpoint`](crate::endpoint::Endpoint). Request/response
//! bodies are JSON DTOs; the wire format tag itself is negotiated by the
//! connection (§4.4), not hardcoded here — these handlers only care about
//! the logical shape.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::codec::{codec_for, WireFormat};
use crate::endpoint::ServiceContract;
use crate::error::RouterError;
use crate::interaction::{BidiHandler, ServerStreamHandler, UnaryHandler};
use crate::metadata::Metadata;

use super::client::ClientId;
use super::message::{RouterEvent, RouterMessage, RouterMessageKind};
use super::ops;
use super::state::RouterState;

#[derive(Serialize, Deserialize)]
struct PushEnvelope {
    kind: &'static str,
    from: String,
    payload: Vec<u8>,
    correlation_id: Option<String>,
}

impl From<RouterMessage> for PushEnvelope {
    fn from(msg: RouterMessage) -> Self {
        Self {
            kind: message_kind_tag(msg.kind),
            from: msg.from.0,
            payload: msg.payload.to_vec(),
            correlation_id: msg.correlation_id,
        }
    }
}

// DTO bodies are always JSON on the wire; the codec dispatch itself is
// driven off the connection's negotiated format (§4.4), not hardcoded here.
fn encode<T: Serialize>(value: &T) -> Result<Bytes, RouterError> {
    codec_for(WireFormat::Json)
        .serialize(value)
        .map(Bytes::from)
        .map_err(|e| RouterError::Internal(format!("response encode failed: {e}")))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &Bytes) -> Result<T, RouterError> {
    codec_for(WireFormat::Json)
        .deserialize(bytes)
        .map_err(|e| RouterError::InvalidArgument(format!("malformed request body: {e}")))
}

/// Awaits `rx` if present, otherwise never resolves — lets a `connectP2P`
/// loop `select!` on an optional disconnect signal without special-casing
/// the "nobody stashed one" case at every call site.
async fn wait_disconnect(rx: &mut Option<oneshot::Receiver<()>>) {
    match rx {
        Some(r) => {
            let _ = r.await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[derive(Serialize, Deserialize, Default)]
struct RegisterRequest {
    display_name: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
}

#[derive(Serialize, Deserialize)]
struct RegisterResponse {
    client_id: String,
}

struct RegisterHandler {
    state: Arc<RouterState>,
}

#[async_trait]
impl UnaryHandler for RegisterHandler {
    async fn call(&self, request: Bytes, _metadata: &Metadata) -> Result<(Bytes, Metadata), RouterError> {
        let req: RegisterRequest = decode(&request)?;
        let (client_id, disconnect_rx) =
            ops::register_with_metadata(&self.state, req.display_name, req.groups, req.metadata).await;
        self.state
            .stash_disconnect_rx(client_id.clone(), disconnect_rx)
            .await;
        Ok((
            encode(&RegisterResponse { client_id: client_id.0 })?,
            Metadata::new(),
        ))
    }
}

#[derive(Serialize, Deserialize)]
struct UnregisterRequest {
    client_id: String,
}

struct UnregisterHandler {
    state: Arc<RouterState>,
}

#[async_trait]
impl UnaryHandler for UnregisterHandler {
    async fn call(&self, request: Bytes, _metadata: &Metadata) -> Result<(Bytes, Metadata), RouterError> {
        let req: UnregisterRequest = decode(&request)?;
        ops::unregister(&self.state, &ClientId(req.client_id)).await;
        Ok((Bytes::new(), Metadata::new()))
    }
}

#[derive(Serialize, Deserialize)]
struct HeartbeatRequest {
    client_id: String,
}

struct HeartbeatHandler {
    state: Arc<RouterState>,
}

#[async_trait]
impl UnaryHandler for HeartbeatHandler {
    async fn call(&self, request: Bytes, _metadata: &Metadata) -> Result<(Bytes, Metadata), RouterError> {
        let req: HeartbeatRequest = decode(&request)?;
        ops::heartbeat(&self.state, &ClientId(req.client_id)).await?;
        Ok((Bytes::new(), Metadata::new()))
    }
}

#[derive(Serialize, Deserialize)]
struct GetOnlineClientsResponse {
    client_ids: Vec<String>,
}

#[derive(Serialize, Deserialize, Default)]
struct GetOnlineClientsRequest {
    group: Option<String>,
}

struct GetOnlineClientsHandler {
    state: Arc<RouterState>,
}

#[async_trait]
impl UnaryHandler for GetOnlineClientsHandler {
    async fn call(&self, request: Bytes, _metadata: &Metadata) -> Result<(Bytes, Metadata), RouterError> {
        let req: GetOnlineClientsRequest = if request.is_empty() {
            GetOnlineClientsRequest::default()
        } else {
            decode(&request)?
        };
        let ids = match &req.group {
            Some(group) => ops::get_group_members(&self.state, group).await,
            None => ops::get_online_clients(&self.state).await,
        };
        Ok((
            encode(&GetOnlineClientsResponse {
                client_ids: ids.into_iter().map(|id| id.0).collect(),
            })?,
            Metadata::new(),
        ))
    }
}

#[derive(Serialize, Deserialize)]
struct SendUnicastRequest {
    from: String,
    target: String,
    payload: Vec<u8>,
}

struct SendUnicastHandler {
    state: Arc<RouterState>,
}

#[async_trait]
impl UnaryHandler for SendUnicastHandler {
    async fn call(&self, request: Bytes, _metadata: &Metadata) -> Result<(Bytes, Metadata), RouterError> {
        let req: SendUnicastRequest = decode(&request)?;
        ops::send_unicast(
            &self.state,
            ClientId(req.from),
            &ClientId(req.target),
            Bytes::from(req.payload),
        )
        .await?;
        Ok((Bytes::new(), Metadata::new()))
    }
}

#[derive(Serialize, Deserialize)]
struct FanoutResult {
    client_id: String,
    ok: bool,
    error: Option<String>,
}

fn encode_fanout_results(results: Vec<(ClientId, Result<(), RouterError>)>) -> Vec<FanoutResult> {
    results
        .into_iter()
        .map(|(id, outcome)| match outcome {
            Ok(()) => FanoutResult { client_id: id.0, ok: true, error: None },
            Err(e) => FanoutResult { client_id: id.0, ok: false, error: Some(e.to_string()) },
        })
        .collect()
}

#[derive(Serialize, Deserialize)]
struct SendMulticastRequest {
    from: String,
    group: String,
    payload: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct FanoutResponse {
    results: Vec<FanoutResult>,
}

struct SendMulticastHandler {
    state: Arc<RouterState>,
}

#[async_trait]
impl UnaryHandler for SendMulticastHandler {
    async fn call(&self, request: Bytes, _metadata: &Metadata) -> Result<(Bytes, Metadata), RouterError> {
        let req: SendMulticastRequest = decode(&request)?;
        let results = ops::send_multicast(&self.state, ClientId(req.from), &req.group, Bytes::from(req.payload)).await;
        Ok((
            encode(&FanoutResponse { results: encode_fanout_results(results) })?,
            Metadata::new(),
        ))
    }
}

#[derive(Serialize, Deserialize)]
struct SendBroadcastRequest {
    from: String,
    payload: Vec<u8>,
}

struct SendBroadcastHandler {
    state: Arc<RouterState>,
}

#[async_trait]
impl UnaryHandler for SendBroadcastHandler {
    async fn call(&self, request: Bytes, _metadata: &Metadata) -> Result<(Bytes, Metadata), RouterError> {
        let req: SendBroadcastRequest = decode(&request)?;
        let results = ops::send_broadcast(&self.state, ClientId(req.from), Bytes::from(req.payload)).await;
        Ok((
            encode(&FanoutResponse { results: encode_fanout_results(results) })?,
            Metadata::new(),
        ))
    }
}

#[derive(Serialize, Deserialize)]
struct RequestRequest {
    from: String,
    target: String,
    payload: Vec<u8>,
    correlation_id: String,
    timeout_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct RequestResponse {
    from: String,
    payload: Vec<u8>,
}

struct RequestHandler {
    state: Arc<RouterState>,
}

#[async_trait]
impl UnaryHandler for RequestHandler {
    async fn call(&self, request: Bytes, _metadata: &Metadata) -> Result<(Bytes, Metadata), RouterError> {
        let req: RequestRequest = decode(&request)?;
        let response = ops::request(
            &self.state,
            ClientId(req.from),
            &ClientId(req.target),
            Bytes::from(req.payload),
            req.correlation_id,
            Duration::from_millis(req.timeout_ms),
        )
        .await?;
        Ok((
            encode(&RequestResponse {
                from: response.from.0,
                payload: response.payload.to_vec(),
            })?,
            Metadata::new(),
        ))
    }
}

#[derive(Serialize, Deserialize)]
struct RespondRequest {
    from: String,
    correlation_id: String,
    payload: Vec<u8>,
}

struct RespondHandler {
    state: Arc<RouterState>,
}

#[async_trait]
impl UnaryHandler for RespondHandler {
    async fn call(&self, request: Bytes, _metadata: &Metadata) -> Result<(Bytes, Metadata), RouterError> {
        let req: RespondRequest = decode(&request)?;
        ops::respond(&self.state, ClientId(req.from), &req.correlation_id, Bytes::from(req.payload)).await?;
        Ok((Bytes::new(), Metadata::new()))
    }
}

#[derive(Serialize, Deserialize)]
struct EventDto {
    kind: String,
    client_id: Option<String>,
}

impl From<RouterEvent> for EventDto {
    fn from(event: RouterEvent) -> Self {
        match event {
            RouterEvent::ClientRegistered { client_id } => EventDto {
                kind: "client_registered".into(),
                client_id: Some(client_id.0),
            },
            RouterEvent::ClientUnregistered { client_id } => EventDto {
                kind: "client_unregistered".into(),
                client_id: Some(client_id.0),
            },
            RouterEvent::ClientHeartbeat { client_id } => EventDto {
                kind: "client_heartbeat".into(),
                client_id: Some(client_id.0),
            },
            RouterEvent::MessageRouted { kind, from } => EventDto {
                kind: format!("message_routed:{}", message_kind_tag(kind)),
                client_id: Some(from.0),
            },
        }
    }
}

fn message_kind_tag(kind: RouterMessageKind) -> &'static str {
    match kind {
        RouterMessageKind::Unicast => "unicast",
        RouterMessageKind::Multicast => "multicast",
        RouterMessageKind::Broadcast => "broadcast",
        RouterMessageKind::Request => "request",
        RouterMessageKind::Response => "response",
    }
}

struct SubscribeToEventsHandler {
    state: Arc<RouterState>,
}

#[async_trait]
impl ServerStreamHandler for SubscribeToEventsHandler {
    async fn call(
        &self,
        _request: Bytes,
        _metadata: &Metadata,
        responses: mpsc::Sender<Bytes>,
    ) -> Result<Metadata, RouterError> {
        let mut events = ops::subscribe_to_events(&self.state).await;
        while let Some(event) = events.recv().await {
            let dto: EventDto = event.into();
            let bytes = encode(&dto)?;
            if responses.send(bytes).await.is_err() {
                break;
            }
        }
        Ok(Metadata::new())
    }
}

/// First frame a client must send on its `connectP2P` stream: identifies
/// which registered client this channel belongs to, so the router can hand
/// over the outbound queue stashed for it at `register` time.
#[derive(Serialize, Deserialize)]
struct ConnectP2PInit {
    client_id: String,
}

/// Every subsequent frame a client may send on the channel: a routed
/// message to forward, expressed the same way the unary send operations are
/// (§4.7's "persistent channel carrying routed RouterMessages to/from this
/// client" — these are an alternative to calling `SendUnicast` etc. for a
/// client that's already holding the channel open).
#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum P2PClientFrame {
    Unicast { target: String, payload: Vec<u8> },
    Multicast { group: String, payload: Vec<u8> },
    Broadcast { payload: Vec<u8> },
    Response { correlation_id: String, payload: Vec<u8> },
}

struct ConnectP2PHandler {
    state: Arc<RouterState>,
}

#[async_trait]
impl BidiHandler for ConnectP2PHandler {
    async fn call(
        &self,
        mut requests: mpsc::Receiver<Bytes>,
        _metadata: &Metadata,
        responses: mpsc::Sender<Bytes>,
    ) -> Result<Metadata, RouterError> {
        let first = requests.recv().await.ok_or_else(|| {
            RouterError::InvalidArgument("connectP2P stream closed before its init frame".into())
        })?;
        let init: ConnectP2PInit = decode(&first)?;
        let client_id = ClientId(init.client_id);

        let outbound_rx = self.state.take_outbound_rx(&client_id).await;
        let result = match outbound_rx {
            Some(outbound_rx) => {
                self.run_p2p_loop(&client_id, requests, responses, outbound_rx).await
            }
            None => Err(RouterError::FailedPrecondition(format!(
                "{client_id} has no outbound queue awaiting a connectP2P attach \
                 (already attached, or never registered)"
            ))),
        };

        // This channel is the client's sole persistent connection to the
        // router; once it ends, for any reason, the client is gone (§4.8).
        ops::unregister(&self.state, &client_id).await;
        result.map(|()| Metadata::new())
    }
}

impl ConnectP2PHandler {
    async fn run_p2p_loop(
        &self,
        client_id: &ClientId,
        mut requests: mpsc::Receiver<Bytes>,
        responses: mpsc::Sender<Bytes>,
        mut outbound_rx: mpsc::Receiver<RouterMessage>,
    ) -> Result<(), RouterError> {
        let mut disconnect_rx = self.state.take_disconnect_rx(client_id).await;
        loop {
            tokio::select! {
                biased;
                _ = wait_disconnect(&mut disconnect_rx) => {
                    return Err(RouterError::Unavailable(format!(
                        "{client_id} was disconnected (idle timeout)"
                    )));
                }
                incoming = requests.recv() => {
                    match incoming {
                        Some(bytes) => self.handle_client_frame(client_id, &bytes).await?,
                        None => return Ok(()),
                    }
                }
                routed = outbound_rx.recv() => {
                    match routed {
                        Some(message) => {
                            let envelope: PushEnvelope = message.into();
                            let bytes = encode(&envelope)?;
                            if responses.send(bytes).await.is_err() {
                                return Ok(());
                            }
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn handle_client_frame(&self, from: &ClientId, bytes: &Bytes) -> Result<(), RouterError> {
        let frame: P2PClientFrame = decode(bytes)?;
        match frame {
            P2PClientFrame::Unicast { target, payload } => {
                ops::send_unicast(&self.state, from.clone(), &ClientId(target), Bytes::from(payload)).await
            }
            P2PClientFrame::Multicast { group, payload } => {
                ops::send_multicast(&self.state, from.clone(), &group, Bytes::from(payload)).await;
                Ok(())
            }
            P2PClientFrame::Broadcast { payload } => {
                ops::send_broadcast(&self.state, from.clone(), Bytes::from(payload)).await;
                Ok(())
            }
            P2PClientFrame::Response { correlation_id, payload } => {
                ops::respond(&self.state, from.clone(), &correlation_id, Bytes::from(payload)).await
            }
        }
    }
}

/// Build the `"Router"` service contract, wiring every operation named in
/// §4.7 onto the endpoint dispatcher.
pub fn router_contract(state: Arc<RouterState>) -> ServiceContract {
    let mut contract = ServiceContract::new("Router");
    contract.unary("Register", Arc::new(RegisterHandler { state: state.clone() }));
    contract.unary("Unregister", Arc::new(UnregisterHandler { state: state.clone() }));
    contract.unary("Heartbeat", Arc::new(HeartbeatHandler { state: state.clone() }));
    contract.unary(
        "GetOnlineClients",
        Arc::new(GetOnlineClientsHandler { state: state.clone() }),
    );
    contract.unary("SendUnicast", Arc::new(SendUnicastHandler { state: state.clone() }));
    contract.unary("SendMulticast", Arc::new(SendMulticastHandler { state: state.clone() }));
    contract.unary("SendBroadcast", Arc::new(SendBroadcastHandler { state: state.clone() }));
    contract.unary("Request", Arc::new(RequestHandler { state: state.clone() }));
    contract.unary("Respond", Arc::new(RespondHandler { state: state.clone() }));
    contract.server_streaming(
        "SubscribeToEvents",
        Arc::new(SubscribeToEventsHandler { state: state.clone() }),
    );
    contract.bidi("ConnectP2P", Arc::new(ConnectP2PHandler { state }));
    contract
}
