//! The wire-encoding boundary named in SPEC_FULL.md §6.
//!
//! Events and snapshots are, in production, length-prefixed protocol-buffer blobs tagged with a
//! per-namespace encoding type. This crate models that boundary as a trait so a real deployment
//! can supply a protobuf codec without touching the store implementations; [`JsonHistoryCodec`]
//! is the reference implementation used by tests and by [`super::InMemoryHistoryStore`].

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Errors raised while encoding or decoding a persisted blob.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    /// The blob's `type` tag did not match any [`crate::history::HistoryEventType`] variant.
    /// Distinguished from a generic [`CodecError::Decode`] so callers can surface it as an
    /// invalid-argument error naming the offending type, per the closed-enum decode boundary.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
}

/// Recognizes serde's internally-tagged-enum "unknown variant" message
/// (`unknown variant \`foo\`, expected one of ...`) and extracts the offending tag.
fn unknown_variant_tag(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("unknown variant `")?;
    let end = rest.find('`')?;
    Some(&rest[..end])
}

/// Encodes/decodes the blobs a [`super::HistoryStore`] persists.
///
/// Implementations are expected to be stateless and cheap to clone/share behind an `Arc`.
pub trait HistoryCodec: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// `serde_json`-backed codec. The reference implementation for tests and in-memory embedding;
/// a production deployment swaps this for a protobuf codec at the same seam.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonHistoryCodec;

impl HistoryCodec for JsonHistoryCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| {
            let message = e.to_string();
            match unknown_variant_tag(&message) {
                Some(tag) => CodecError::UnknownEventType(tag.to_string()),
                None => CodecError::Decode(message),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: i32,
        b: String,
    }

    #[test]
    fn json_codec_round_trips() {
        let codec = JsonHistoryCodec;
        let sample = Sample { a: 1, b: "x".into() };
        let bytes = codec.encode(&sample).unwrap();
        let decoded: Sample = codec.decode(&bytes).unwrap();
        assert_eq!(sample, decoded);
    }

    #[test]
    fn decode_failure_is_reported() {
        let codec = JsonHistoryCodec;
        let err = codec.decode::<Sample>(b"not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn unknown_event_type_tag_is_distinguished_from_a_generic_decode_failure() {
        let codec = JsonHistoryCodec;
        let blob = br#"{"type":"this_type_does_not_exist"}"#;
        let err = codec.decode::<crate::history::HistoryEventType>(blob).unwrap_err();
        match err {
            CodecError::UnknownEventType(tag) => assert_eq!(tag, "this_type_does_not_exist"),
            other => panic!("expected UnknownEventType, got {other:?}"),
        }
    }
}
