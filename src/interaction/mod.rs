//! Interaction Primitives (§4.5, component 5): the four RPC call shapes
//! built on top of one multiplexed [`Stream`](crate::transport::Stream).
//!
//! Each shape module exposes a client-side driver (`call`) and a server-side
//! driver (`serve`) that pump stream events in the pattern that shape
//! requires, delegating the actual business logic to a handler trait so the
//! endpoint dispatcher (`crate::endpoint`) only has to pick the right
//! driver for a method's registered shape.

pub mod bidi;
pub mod client_stream;
pub mod server_stream;
pub mod unary;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::RouterError;
use crate::metadata::Metadata;

/// Which of the four interaction shapes a method is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    Unary,
    ServerStreaming,
    ClientStreaming,
    Bidi,
}

/// Single request in, single response out.
#[async_trait]
pub trait UnaryHandler: Send + Sync {
    async fn call(&self, request: Bytes, metadata: &Metadata) -> Result<(Bytes, Metadata), RouterError>;
}

/// Single request in, a stream of responses out.
#[async_trait]
pub trait ServerStreamHandler: Send + Sync {
    async fn call(
        &self,
        request: Bytes,
        metadata: &Metadata,
        responses: mpsc::Sender<Bytes>,
    ) -> Result<Metadata, RouterError>;
}

/// A stream of requests in, single response out.
#[async_trait]
pub trait ClientStreamHandler: Send + Sync {
    async fn call(
        &self,
        requests: mpsc::Receiver<Bytes>,
        metadata: &Metadata,
    ) -> Result<(Bytes, Metadata), RouterError>;
}

/// A stream of requests in, a stream of responses out, both open at once.
#[async_trait]
pub trait BidiHandler: Send + Sync {
    async fn call(
        &self,
        requests: mpsc::Receiver<Bytes>,
        metadata: &Metadata,
        responses: mpsc::Sender<Bytes>,
    ) -> Result<Metadata, RouterError>;
}
