//! Metadata model (§3, component 2): ordered header/trailer key-value pairs,
//! plus the well-known names the router itself interprets.

use serde::{Deserialize, Serialize};

use crate::status::{Status, StatusCode};

/// Method-path header; value is `/<Service>/<Method>`.
pub const HEADER_METHOD: &str = ":path";
/// Content-type header; this crate always sends `application/grpc+<format>`.
pub const HEADER_CONTENT_TYPE: &str = "content-type";
/// Trailer carrying the numeric `StatusCode`.
pub const TRAILER_GRPC_STATUS: &str = "grpc-status";
/// Trailer carrying the human-readable status message, when non-empty.
pub const TRAILER_GRPC_MESSAGE: &str = "grpc-message";

/// Ordered key-value metadata, matching gRPC's header/trailer model: multiple
/// entries may share a name, and lookups return the first match in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(Vec<(String, String)>);

impl Metadata {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// First value for `name`, case-sensitive, in insertion order.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Initial metadata a client sends when opening a call.
    pub fn client_initial(service: &str, method: &str, format: &str) -> Self {
        Self::new()
            .with(HEADER_METHOD, format!("/{service}/{method}"))
            .with(HEADER_CONTENT_TYPE, format!("application/grpc+{format}"))
    }

    /// Initial metadata a server sends back once it accepts the call.
    pub fn server_initial(format: &str) -> Self {
        Self::new().with(HEADER_CONTENT_TYPE, format!("application/grpc+{format}"))
    }

    /// Trailing metadata carrying a terminal [`Status`].
    pub fn trailer(status: &Status) -> Self {
        let mut md = Self::new().with(TRAILER_GRPC_STATUS, (status.code as i32).to_string());
        if !status.message.is_empty() {
            md.insert(TRAILER_GRPC_MESSAGE, status.message.clone());
        }
        md
    }

    /// Extract a terminal [`Status`] from trailing metadata, if present.
    pub fn as_status(&self) -> Option<Status> {
        let code = self
            .get(TRAILER_GRPC_STATUS)
            .and_then(|v| v.parse::<i32>().ok())
            .and_then(StatusCode::from_i32)?;
        let message = self.get(TRAILER_GRPC_MESSAGE).unwrap_or_default();
        Some(Status::new(code, message))
    }
}

/// On-wire envelope for the "reserved form" metadata-only emulation used by
/// bindings that have no native header-frame concept (§4.3a).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataEnvelope {
    pub headers: Vec<(String, String)>,
    pub end_stream: bool,
}

impl MetadataEnvelope {
    pub fn new(metadata: &Metadata, end_stream: bool) -> Self {
        Self {
            headers: metadata.0.clone(),
            end_stream,
        }
    }

    pub fn into_metadata(self) -> (Metadata, bool) {
        (Metadata(self.headers), self.end_stream)
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_the_first_match_in_insertion_order() {
        let md = Metadata::new().with("x", "1").with("x", "2");
        assert_eq!(md.get("x"), Some("1"));
    }

    #[test]
    fn client_initial_carries_the_method_path() {
        let md = Metadata::client_initial("Router", "SendUnicast", "json");
        assert_eq!(md.get(HEADER_METHOD), Some("/Router/SendUnicast"));
        assert_eq!(md.get(HEADER_CONTENT_TYPE), Some("application/grpc+json"));
    }

    #[test]
    fn trailer_round_trips_through_as_status() {
        let status = Status::not_found("client-7");
        let md = Metadata::trailer(&status);
        assert_eq!(md.as_status(), Some(status));
    }

    #[test]
    fn ok_trailer_omits_the_message_field() {
        let md = Metadata::trailer(&Status::ok());
        assert_eq!(md.get(TRAILER_GRPC_MESSAGE), None);
        assert_eq!(md.as_status(), Some(Status::ok()));
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let md = Metadata::new().with("a", "b");
        let envelope = MetadataEnvelope::new(&md, true);
        let bytes = envelope.to_json_bytes().unwrap();
        let decoded = MetadataEnvelope::from_json_bytes(&bytes).unwrap();
        let (decoded_md, end_stream) = decoded.into_metadata();
        assert_eq!(decoded_md, md);
        assert!(end_stream);
    }
}
