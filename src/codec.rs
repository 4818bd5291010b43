//! Pluggable payload serialization (§4.4, component 4).
//!
//! The wire format tag is informational only — negotiation happens out of
//! band (content-type metadata, or application convention), so this module
//! just needs to round-trip whatever shape a handler asks for, under
//! whichever of the three formats the connection was configured with.

use serde::{de::DeserializeOwned, Serialize};

/// Identifies which codec produced a payload. Carried in
/// `content-type: application/grpc+<tag>` but never inspected by the router
/// itself — purely informational, per §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Json,
    Cbor,
    OpaqueBinary,
}

impl WireFormat {
    pub fn tag(self) -> &'static str {
        match self {
            WireFormat::Json => "json",
            WireFormat::Cbor => "cbor",
            WireFormat::OpaqueBinary => "bin",
        }
    }
}

/// Errors raised while encoding or decoding a payload.
#[derive(Debug)]
pub enum CodecError {
    Json(serde_json::Error),
    Cbor(String),
    Bincode(bincode::Error),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Json(e) => write!(f, "json codec: {e}"),
            CodecError::Cbor(e) => write!(f, "cbor codec: {e}"),
            CodecError::Bincode(e) => write!(f, "bincode codec: {e}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// A payload serializer/deserializer for one of the supported wire formats.
pub trait PayloadCodec {
    fn format(&self) -> WireFormat;
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Json
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(CodecError::Json)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Json)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CborCodec;

impl PayloadCodec for CborCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Cbor
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::Cbor(e.to_string()))?;
        Ok(buf)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        ciborium::from_reader(bytes).map_err(|e| CodecError::Cbor(e.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueBinaryCodec;

impl PayloadCodec for OpaqueBinaryCodec {
    fn format(&self) -> WireFormat {
        WireFormat::OpaqueBinary
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(CodecError::Bincode)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(CodecError::Bincode)
    }
}

/// A codec chosen at runtime by [`WireFormat`]. `PayloadCodec`'s methods are
/// generic over the payload type, so picking an implementation dynamically
/// needs enum dispatch rather than a `dyn PayloadCodec` trait object (a
/// generic method isn't object-safe).
pub enum Codec {
    Json(JsonCodec),
    Cbor(CborCodec),
    OpaqueBinary(OpaqueBinaryCodec),
}

impl Codec {
    pub fn format(&self) -> WireFormat {
        match self {
            Codec::Json(c) => c.format(),
            Codec::Cbor(c) => c.format(),
            Codec::OpaqueBinary(c) => c.format(),
        }
    }

    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Json(c) => c.serialize(value),
            Codec::Cbor(c) => c.serialize(value),
            Codec::OpaqueBinary(c) => c.serialize(value),
        }
    }

    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            Codec::Json(c) => c.deserialize(bytes),
            Codec::Cbor(c) => c.deserialize(bytes),
            Codec::OpaqueBinary(c) => c.deserialize(bytes),
        }
    }
}

/// Picks a codec implementation by its [`WireFormat`] tag.
pub fn codec_for(format: WireFormat) -> Codec {
    match format {
        WireFormat::Json => Codec::Json(JsonCodec),
        WireFormat::Cbor => Codec::Cbor(CborCodec),
        WireFormat::OpaqueBinary => Codec::OpaqueBinary(OpaqueBinaryCodec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        id: u32,
        name: String,
        tags: Vec<String>,
    }

    fn sample() -> Sample {
        Sample {
            id: 42,
            name: "widget".into(),
            tags: vec!["a".into(), "b".into()],
        }
    }

    #[test]
    fn json_round_trips() {
        let codec = JsonCodec;
        let bytes = codec.serialize(&sample()).unwrap();
        let back: Sample = codec.deserialize(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn cbor_round_trips() {
        let codec = CborCodec;
        let bytes = codec.serialize(&sample()).unwrap();
        let back: Sample = codec.deserialize(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn opaque_binary_round_trips() {
        let codec = OpaqueBinaryCodec;
        let bytes = codec.serialize(&sample()).unwrap();
        let back: Sample = codec.deserialize(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn codec_for_selects_the_matching_format() {
        assert_eq!(codec_for(WireFormat::Json).format(), WireFormat::Json);
        assert_eq!(codec_for(WireFormat::Cbor).format(), WireFormat::Cbor);
        assert_eq!(
            codec_for(WireFormat::OpaqueBinary).format(),
            WireFormat::OpaqueBinary
        );
    }

    #[test]
    fn codec_for_round_trips_through_the_dynamic_dispatch() {
        let codec = codec_for(WireFormat::Cbor);
        let bytes = codec.serialize(&sample()).unwrap();
        let back: Sample = codec.deserialize(&bytes).unwrap();
        assert_eq!(back, sample());
    }
}
