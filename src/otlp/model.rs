//! Internal AST: resources/scopes/spans and the canonical
//! `TelemetryEvent` record emitted by the converter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::Id;

/// A language-neutral, JSON-round-trippable dynamic attribute value.
///
/// Mirrors the six-variant sum type the OTLP `AnyValue` wire message models
/// rather than any language-native dynamic type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    Int(i64),
    Double(f64),
    Bytes(#[serde(with = "bytes_as_base64")] Vec<u8>),
    Array(Vec<AttributeValue>),
    KvList(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Converts to the canonical JSON-safe form. `NaN`/`±Inf` floats cannot
    /// survive JSON encoding and are coerced to `null`.
    pub fn to_json(&self) -> JsonValue {
        match self {
            AttributeValue::String(s) => JsonValue::String(s.clone()),
            AttributeValue::Bool(b) => JsonValue::Bool(*b),
            AttributeValue::Int(i) => JsonValue::Number((*i).into()),
            AttributeValue::Double(d) => {
                if d.is_finite() {
                    serde_json::Number::from_f64(*d)
                        .map(JsonValue::Number)
                        .unwrap_or(JsonValue::Null)
                } else {
                    JsonValue::Null
                }
            }
            AttributeValue::Bytes(b) => {
                JsonValue::String(data_encoding_base64(b))
            }
            AttributeValue::Array(items) => {
                JsonValue::Array(items.iter().map(AttributeValue::to_json).collect())
            }
            AttributeValue::KvList(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn data_encoding_base64(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

mod bytes_as_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

pub type AttributeMap = BTreeMap<String, AttributeValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanStatus {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub time_unix_nano: u64,
    pub attributes: AttributeMap,
}

/// Internal span representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// 32 lowercase hex chars.
    pub trace_id: String,
    /// 16 lowercase hex chars.
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: i32,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    pub attributes: AttributeMap,
    pub status: Option<SpanStatus>,
    pub events: Vec<SpanEvent>,
}

impl Span {
    /// `<trace_id>:<span_id>` — the dedup composite key.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.trace_id, self.span_id)
    }

    /// A span is only claimable if both ids decoded to non-empty hex of the
    /// expected length.
    pub fn has_valid_ids(&self) -> bool {
        self.trace_id.len() == 32 && self.span_id.len() == 16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Trace,
    Span,
    Metric,
    Log,
    GenaiEvent,
}

/// The canonical internal record every downstream consumer sees; the only
/// shape that survives past the converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_id: Id,
    pub trace_id: String,
    pub span_id: String,
    pub event_type: EventType,
    pub payload: JsonValue,
}

impl TelemetryEvent {
    pub fn new(event_type: EventType, trace_id: String, span_id: String, payload: JsonValue) -> Self {
        Self {
            event_id: Id::generate(),
            trace_id,
            span_id,
            event_type,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_and_inf_floats_coerce_to_null() {
        assert_eq!(AttributeValue::Double(f64::NAN).to_json(), JsonValue::Null);
        assert_eq!(
            AttributeValue::Double(f64::INFINITY).to_json(),
            JsonValue::Null
        );
        assert_eq!(
            AttributeValue::Double(f64::NEG_INFINITY).to_json(),
            JsonValue::Null
        );
        assert_eq!(
            AttributeValue::Double(1.5).to_json(),
            JsonValue::from(1.5)
        );
    }

    #[test]
    fn dedup_key_is_trace_colon_span() {
        let span = Span {
            trace_id: "0102030405060708090a0b0c0d0e0f10".into(),
            span_id: "aabbccddeeff0011".into(),
            parent_span_id: None,
            name: "x".into(),
            kind: 0,
            start_time_unix_nano: 0,
            end_time_unix_nano: 0,
            attributes: AttributeMap::new(),
            status: None,
            events: Vec::new(),
        };
        assert_eq!(
            span.dedup_key(),
            "0102030405060708090a0b0c0d0e0f10:aabbccddeeff0011"
        );
        assert!(span.has_valid_ids());
    }

    #[test]
    fn array_and_kvlist_round_trip_to_json() {
        let mut map = AttributeMap::new();
        map.insert("a".into(), AttributeValue::Int(1));
        let value = AttributeValue::Array(vec![
            AttributeValue::String("x".into()),
            AttributeValue::KvList(map),
        ]);
        let json = value.to_json();
        assert_eq!(json[0], JsonValue::String("x".into()));
        assert_eq!(json[1]["a"], JsonValue::from(1));
    }
}
