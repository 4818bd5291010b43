//! Frame Codec (§4.1).
//!
//! Encodes and decodes the 5-byte length-prefixed frame used for every unit
//! on the wire: one compression flag byte, four bytes of big-endian payload
//! length, then exactly that many payload bytes. Decoding is stateful across
//! calls so a transport can hand it whatever-sized chunks its reads happen
//! to produce.

use bytes::{Bytes, BytesMut};

/// Default soft cap on a single frame's declared payload length (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const PREFIX_LEN: usize = 5;

/// A single decoded (or to-be-encoded) frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub compressed: bool,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(compressed: bool, payload: impl Into<Bytes>) -> Self {
        Self {
            compressed,
            payload: payload.into(),
        }
    }

    pub fn uncompressed(payload: impl Into<Bytes>) -> Self {
        Self::new(false, payload)
    }
}

/// Error conditions the codec can raise. A declared length over the cap, or
/// bytes that otherwise cannot represent a valid frame, are fatal for the
/// stream carrying them (§4.1: "fatal for the stream: close with
/// RESOURCE_EXHAUSTED").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The declared payload length exceeded the configured soft cap.
    FrameTooLarge { declared: u32, cap: usize },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::FrameTooLarge { declared, cap } => {
                write!(f, "declared frame length {declared} exceeds cap {cap}")
            }
        }
    }
}

impl std::error::Error for FrameError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingHeader {
    compressed: bool,
    expected_len: u32,
}

/// Stateful decoder. One instance per physical connection; push chunks into
/// it as they arrive and drain whatever complete frames are ready.
#[derive(Debug)]
pub struct FrameCodec {
    buffer: BytesMut,
    pending: Option<PendingHeader>,
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            pending: None,
            max_frame_size,
        }
    }

    /// Append a chunk of transport bytes and emit every frame now complete.
    /// Surplus bytes that don't yet form a full frame are retained for the
    /// next call.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            if self.pending.is_none() {
                if self.buffer.len() < PREFIX_LEN {
                    break;
                }
                let compressed = match self.buffer[0] {
                    0 => false,
                    1 => true,
                    // Unknown compression flags are treated as uncompressed;
                    // only the length field decides framing validity.
                    _ => false,
                };
                let len_bytes = [
                    self.buffer[1],
                    self.buffer[2],
                    self.buffer[3],
                    self.buffer[4],
                ];
                let expected_len = u32::from_be_bytes(len_bytes);
                if expected_len as usize > self.max_frame_size {
                    return Err(FrameError::FrameTooLarge {
                        declared: expected_len,
                        cap: self.max_frame_size,
                    });
                }
                self.buffer.advance_front(PREFIX_LEN);
                self.pending = Some(PendingHeader {
                    compressed,
                    expected_len,
                });
            }

            let header = self.pending.expect("checked above");
            if self.buffer.len() < header.expected_len as usize {
                break;
            }

            let payload = self.buffer.split_to(header.expected_len as usize).freeze();
            frames.push(Frame::new(header.compressed, payload));
            self.pending = None;
        }

        Ok(frames)
    }

    /// Encode a single frame for transmission.
    pub fn encode(frame: &Frame) -> Bytes {
        let mut out = BytesMut::with_capacity(PREFIX_LEN + frame.payload.len());
        out.extend_from_slice(&[if frame.compressed { 1 } else { 0 }]);
        out.extend_from_slice(&(frame.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&frame.payload);
        out.freeze()
    }

    /// Bytes currently buffered but not yet forming a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// `BytesMut` doesn't expose a "drop the first N bytes" primitive directly
/// under that name; this is the idiomatic way (`split_to` + discard), kept
/// as an extension so the decode loop above reads cleanly.
trait AdvanceFront {
    fn advance_front(&mut self, n: usize);
}

impl AdvanceFront for BytesMut {
    fn advance_front(&mut self, n: usize) {
        let _ = self.split_to(n);
    }
}
