//! Binary job payload codec.
//!
//! Payloads are nested map/array/scalar documents encoded with
//! `bincode`. The concrete encoding only has to round-trip exactly and
//! be agreed on by broker and client; everything outside this module
//! treats payloads as opaque bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from payload encoding/decoding.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to encode payload: {0}")]
    Encode(String),

    #[error("failed to decode payload: {0}")]
    Decode(String),
}

/// A self-contained payload document.
///
/// Maps use `BTreeMap` so that encoding is deterministic for equal
/// documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PayloadValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<PayloadValue>),
    Map(BTreeMap<String, PayloadValue>),
}

impl PayloadValue {
    /// Convenience constructor for a single-entry map.
    pub fn map_of(entries: impl IntoIterator<Item = (String, PayloadValue)>) -> Self {
        PayloadValue::Map(entries.into_iter().collect())
    }
}

/// Encode a payload document to bytes.
pub fn encode_payload(value: &PayloadValue) -> Result<Vec<u8>, PayloadError> {
    bincode::serialize(value).map_err(|e| PayloadError::Encode(e.to_string()))
}

/// Decode a payload document from bytes.
pub fn decode_payload(bytes: &[u8]) -> Result<PayloadValue, PayloadError> {
    bincode::deserialize(bytes).map_err(|e| PayloadError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_doc() -> PayloadValue {
        PayloadValue::map_of([
            ("a".to_string(), PayloadValue::Int(1)),
            (
                "nested".to_string(),
                PayloadValue::map_of([(
                    "list".to_string(),
                    PayloadValue::Array(vec![
                        PayloadValue::Bool(true),
                        PayloadValue::Str("x".to_string()),
                        PayloadValue::Nil,
                    ]),
                )]),
            ),
        ])
    }

    #[test]
    fn payload_round_trips() {
        let doc = nested_doc();
        let bytes = encode_payload(&doc).unwrap();
        let back = decode_payload(&bytes).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn equal_documents_encode_identically() {
        let a = encode_payload(&nested_doc()).unwrap();
        let b = encode_payload(&nested_doc()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn truncated_bytes_fail_to_decode() {
        let bytes = encode_payload(&nested_doc()).unwrap();
        let result = decode_payload(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(PayloadError::Decode(_))));
    }

    #[test]
    fn empty_map_is_distinct_from_absent_payload() {
        // An explicitly empty payload still encodes to non-empty bytes;
        // "no payload" is represented by Option::None upstream.
        let bytes = encode_payload(&PayloadValue::Map(BTreeMap::new())).unwrap();
        assert!(!bytes.is_empty());
    }
}
