//! Generic multiplexing engine, usable over any `AsyncRead + AsyncWrite`
//! physical connection. [`memory`](super::memory) and [`tcp`](super::tcp)
//! are thin constructors over this engine, the same way the teacher crate's
//! `TcpSocketTransport` and friends are thin bindings over one shared
//! `IpcTransport` contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::frame::{Frame, FrameCodec, FrameError};
use crate::metadata::{Metadata, MetadataEnvelope};
use crate::status::Status;

use super::{Stream, StreamEvent, StreamId, StreamIdGenerator, StreamState, Transport};

const PREFIX_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Message = 0,
    Metadata = 1,
}

impl FrameKind {
    fn from_byte(byte: u8) -> Result<Self, RouterError> {
        match byte {
            0 => Ok(FrameKind::Message),
            1 => Ok(FrameKind::Metadata),
            other => Err(RouterError::DataLoss(format!(
                "unknown mux frame kind byte {other}"
            ))),
        }
    }
}

fn encode_mux_payload(stream_id: StreamId, kind: FrameKind, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(PREFIX_LEN + body.len());
    out.extend_from_slice(&stream_id.0.to_be_bytes());
    out.extend_from_slice(&[kind as u8]);
    out.extend_from_slice(body);
    out.freeze()
}

fn decode_mux_payload(payload: &Bytes) -> Result<(StreamId, FrameKind, Bytes), RouterError> {
    if payload.len() < PREFIX_LEN {
        return Err(RouterError::DataLoss(
            "mux frame shorter than its 5-byte prefix".into(),
        ));
    }
    let stream_id = StreamId(u32::from_be_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]));
    let kind = FrameKind::from_byte(payload[4])?;
    let body = payload.slice(PREFIX_LEN..);
    Ok((stream_id, kind, body))
}

struct StreamSlot {
    inbound_tx: mpsc::Sender<StreamEvent>,
    state: Arc<Mutex<StreamState>>,
    /// Message frames received after the stream could no longer accept them
    /// (§4.3 late-frame tolerance); reset once this exceeds
    /// `config.late_frame_tolerance`.
    late_frames: Arc<AtomicU32>,
}

/// Shared engine state, split out so both the reader and writer tasks (and
/// the public `Transport` impl) can reach it without cloning the whole
/// transport.
struct Shared {
    write_tx: mpsc::Sender<Bytes>,
    streams: Mutex<HashMap<StreamId, StreamSlot>>,
    incoming_tx: mpsc::Sender<Stream>,
    incoming_rx: Mutex<mpsc::Receiver<Stream>>,
    id_gen: StreamIdGenerator,
    config: RouterConfig,
    closed: AtomicBool,
}

/// A [`Transport`] implementation multiplexing many streams over one
/// physical connection, driven by a background reader and writer task.
pub struct MuxTransport {
    shared: Arc<Shared>,
}

impl MuxTransport {
    /// Spawn the reader/writer pump tasks over `io` and return the handle.
    /// `client_side` picks which stream-id parity this side generates.
    pub fn spawn<IO>(io: IO, config: RouterConfig, client_side: bool) -> Self
    where
        IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let (write_tx, write_rx) = mpsc::channel::<Bytes>(256);
        let (incoming_tx, incoming_rx) = mpsc::channel(64);

        let shared = Arc::new(Shared {
            write_tx,
            streams: Mutex::new(HashMap::new()),
            incoming_tx,
            incoming_rx: Mutex::new(incoming_rx),
            id_gen: if client_side {
                StreamIdGenerator::client_side()
            } else {
                StreamIdGenerator::server_side()
            },
            config,
            closed: AtomicBool::new(false),
        });

        tokio::spawn(writer_loop(write_half, write_rx));
        tokio::spawn(reader_loop(read_half, Arc::clone(&shared)));

        Self { shared }
    }

    async fn register_stream(&self, id: StreamId) -> Stream {
        let (inbound_tx, inbound_rx) = mpsc::channel(self.shared.config.stream_inbound_queue_depth);
        let stream = Stream::new(id, inbound_rx);
        let mut streams = self.shared.streams.lock().await;
        streams.insert(
            id,
            StreamSlot {
                inbound_tx,
                state: Arc::new(Mutex::new(StreamState::Open)),
                late_frames: Arc::new(AtomicU32::new(0)),
            },
        );
        stream
    }

    async fn send_mux_frame(
        &self,
        stream_id: StreamId,
        kind: FrameKind,
        body: &[u8],
    ) -> Result<(), RouterError> {
        let payload = encode_mux_payload(stream_id, kind, body);
        if payload.len() > self.shared.config.max_frame_size {
            return Err(RouterError::ResourceExhausted(format!(
                "encoded frame for {stream_id} exceeds max_frame_size"
            )));
        }
        let wire = FrameCodec::encode(&Frame::uncompressed(payload));
        self.shared
            .write_tx
            .send(wire)
            .await
            .map_err(|_| RouterError::Unavailable("connection writer has shut down".into()))
    }
}

#[async_trait]
impl Transport for MuxTransport {
    async fn create_stream(&self) -> Result<Stream, RouterError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(RouterError::Unavailable("connection is closed".into()));
        }
        let id = self.shared.id_gen.next_id();
        Ok(self.register_stream(id).await)
    }

    async fn accept_stream(&self) -> Result<Stream, RouterError> {
        self.shared
            .incoming_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| RouterError::Unavailable("connection is closed".into()))
    }

    async fn send_metadata(
        &self,
        stream: &Stream,
        metadata: Metadata,
        end_stream: bool,
    ) -> Result<(), RouterError> {
        let envelope = MetadataEnvelope::new(&metadata, end_stream);
        let body = envelope
            .to_json_bytes()
            .map_err(|e| RouterError::Internal(format!("metadata envelope encode: {e}")))?;
        self.send_mux_frame(stream.id, FrameKind::Metadata, &body)
            .await?;
        if end_stream {
            let new_state = stream.state().await.on_local_finish();
            stream.set_state(new_state).await;
        }
        Ok(())
    }

    async fn send_message(&self, stream: &Stream, payload: Bytes) -> Result<(), RouterError> {
        if !stream.state().await.can_send() {
            return Err(RouterError::FailedPrecondition(format!(
                "{} is not open for sending",
                stream.id
            )));
        }
        self.send_mux_frame(stream.id, FrameKind::Message, &payload)
            .await
    }

    async fn finish_sending(&self, stream: &Stream) -> Result<(), RouterError> {
        self.send_metadata(stream, Metadata::new(), true).await
    }

    async fn close(&self) -> Result<(), RouterError> {
        self.shared.closed.store(true, Ordering::Release);
        let streams = self.shared.streams.lock().await;
        for slot in streams.values() {
            let _ = slot
                .inbound_tx
                .send(StreamEvent::Closed(Status::unavailable(
                    "connection closed",
                )))
                .await;
        }
        Ok(())
    }
}

async fn writer_loop<W>(mut write_half: W, mut write_rx: mpsc::Receiver<Bytes>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = write_rx.recv().await {
        if write_half.write_all(&chunk).await.is_err() {
            warn!("mux writer: connection write failed, stopping pump");
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

async fn reader_loop<R>(mut read_half: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut codec = FrameCodec::new(shared.config.max_frame_size);
    let mut buf = [0u8; 8192];

    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!("mux reader: peer closed the connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "mux reader: read failed");
                break;
            }
        };

        let frames = match codec.push_chunk(&buf[..n]) {
            Ok(frames) => frames,
            Err(FrameError::FrameTooLarge { declared, cap }) => {
                warn!(declared, cap, "mux reader: frame exceeded the size cap");
                break;
            }
        };

        for frame in frames {
            if let Err(e) = dispatch_frame(&shared, frame.payload).await {
                warn!(error = %e, "mux reader: dropping malformed frame");
            }
        }
    }

    shared.closed.store(true, Ordering::Release);
}

async fn dispatch_frame(shared: &Arc<Shared>, payload: Bytes) -> Result<(), RouterError> {
    let (stream_id, kind, body) = decode_mux_payload(&payload)?;

    let mut streams = shared.streams.lock().await;
    let is_new = !streams.contains_key(&stream_id);
    if is_new {
        let (inbound_tx, inbound_rx) = mpsc::channel(shared.config.stream_inbound_queue_depth);
        streams.insert(
            stream_id,
            StreamSlot {
                inbound_tx: inbound_tx.clone(),
                state: Arc::new(Mutex::new(StreamState::Open)),
                late_frames: Arc::new(AtomicU32::new(0)),
            },
        );
        let stream = Stream::new(stream_id, inbound_rx);
        if shared.incoming_tx.send(stream).await.is_err() {
            debug!("mux reader: no one is accepting new streams, dropping");
        }
    }

    let slot = streams.get(&stream_id).map(|slot| {
        (
            slot.inbound_tx.clone(),
            Arc::clone(&slot.state),
            Arc::clone(&slot.late_frames),
        )
    });
    drop(streams);

    let Some((inbound_tx, stream_state, late_frames)) = slot else {
        return Ok(());
    };

    if matches!(kind, FrameKind::Message) && !stream_state.lock().await.can_receive() {
        let count = late_frames.fetch_add(1, Ordering::Relaxed) + 1;
        if count > shared.config.late_frame_tolerance {
            warn!(%stream_id, count, "mux reader: late-frame tolerance exceeded, resetting stream");
            let _ = inbound_tx
                .send(StreamEvent::Closed(Status::failed_precondition(
                    "stream reset: message frame received after the stream could no longer accept it",
                )))
                .await;
            shared.streams.lock().await.remove(&stream_id);
        } else {
            debug!(%stream_id, count, "mux reader: discarding late frame on a half-closed stream");
        }
        return Ok(());
    }

    let event = match kind {
        FrameKind::Message => StreamEvent::Message(body),
        FrameKind::Metadata => {
            let envelope = MetadataEnvelope::from_json_bytes(&body).map_err(|e| {
                RouterError::DataLoss(format!("malformed metadata envelope: {e}"))
            })?;
            let (metadata, end_stream) = envelope.into_metadata();
            if end_stream {
                let streams = shared.streams.lock().await;
                if let Some(slot) = streams.get(&stream_id) {
                    let mut state = slot.state.lock().await;
                    *state = state.on_remote_finish();
                }
            }
            StreamEvent::Metadata(metadata)
        }
    };

    let _ = inbound_tx.send(event).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mux_payload_round_trips() {
        let body = b"hello";
        let payload = encode_mux_payload(StreamId(7), FrameKind::Message, body);
        let (id, kind, decoded_body) = decode_mux_payload(&payload).unwrap();
        assert_eq!(id, StreamId(7));
        assert_eq!(kind, FrameKind::Message);
        assert_eq!(&decoded_body[..], body);
    }

    #[test]
    fn short_payload_is_rejected() {
        let payload = Bytes::from_static(b"ab");
        assert!(decode_mux_payload(&payload).is_err());
    }

    #[test]
    fn unknown_frame_kind_is_rejected() {
        let mut payload = BytesMut::new();
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.extend_from_slice(&[9]);
        assert!(decode_mux_payload(&payload.freeze()).is_err());
    }
}
