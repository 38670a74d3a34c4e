//! OTLP wire decoder.
//!
//! Converts `opentelemetry-proto` wire types into the internal AST
//! (`super::model`). Unknown/future proto fields are implicitly ignored —
//! we only read the fields we model. A span with a malformed trace/span id
//! is dropped and logged rather than failing the whole request; the outer
//! envelope itself can still fail the request via `IngestError::MalformedRequest`
//! when it has zero resource-items.

use std::collections::BTreeMap;

use opentelemetry_proto::tonic::common::v1::{any_value::Value as AnyValueProto, AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{span::Event as SpanEventProto, Span as SpanProto};

use super::model::{AttributeMap, AttributeValue, Span, SpanEvent, SpanStatus};

/// Resource + scope context threaded through a batch of spans/metrics/logs.
#[derive(Debug, Clone, Default)]
pub struct ResourceScopeContext {
    pub resource_attributes: AttributeMap,
    pub scope_name: String,
    pub scope_version: String,
    pub scope_attributes: AttributeMap,
}

pub fn decode_resource(resource: Option<&Resource>) -> AttributeMap {
    resource
        .map(|r| decode_attributes(&r.attributes))
        .unwrap_or_default()
}

pub fn decode_scope(scope: Option<&InstrumentationScope>) -> (String, String, AttributeMap) {
    match scope {
        Some(s) => (
            s.name.clone(),
            s.version.clone(),
            decode_attributes(&s.attributes),
        ),
        None => (String::new(), String::new(), AttributeMap::new()),
    }
}

pub fn decode_attributes(attrs: &[KeyValue]) -> AttributeMap {
    let mut map = AttributeMap::new();
    for kv in attrs {
        if let Some(value) = &kv.value {
            map.insert(kv.key.clone(), decode_any_value(value));
        }
    }
    map
}

pub fn decode_any_value(value: &AnyValue) -> AttributeValue {
    match &value.value {
        Some(AnyValueProto::StringValue(s)) => AttributeValue::String(s.clone()),
        Some(AnyValueProto::BoolValue(b)) => AttributeValue::Bool(*b),
        Some(AnyValueProto::IntValue(i)) => AttributeValue::Int(*i),
        Some(AnyValueProto::DoubleValue(d)) => AttributeValue::Double(*d),
        Some(AnyValueProto::BytesValue(b)) => AttributeValue::Bytes(b.clone()),
        Some(AnyValueProto::ArrayValue(arr)) => AttributeValue::Array(
            arr.values.iter().map(decode_any_value).collect(),
        ),
        Some(AnyValueProto::KvlistValue(kvlist)) => {
            let mut map = BTreeMap::new();
            for kv in &kvlist.values {
                if let Some(v) = &kv.value {
                    map.insert(kv.key.clone(), decode_any_value(v));
                }
            }
            AttributeValue::KvList(map)
        }
        None => AttributeValue::String(String::new()),
    }
}

/// 16-byte trace ids and 8-byte span ids, lowercase hex. Returns `None`
/// (dropping the span) on the wrong length.
pub fn decode_trace_id(raw: &[u8]) -> Option<String> {
    if raw.len() != 16 || raw.iter().all(|b| *b == 0) {
        return None;
    }
    Some(hex::encode(raw))
}

pub fn decode_span_id(raw: &[u8]) -> Option<String> {
    if raw.len() != 8 || raw.iter().all(|b| *b == 0) {
        return None;
    }
    Some(hex::encode(raw))
}

fn decode_parent_span_id(raw: &[u8]) -> Option<String> {
    if raw.is_empty() {
        None
    } else if raw.len() == 8 {
        Some(hex::encode(raw))
    } else {
        None
    }
}

/// Decodes a single OTLP span, dropping it (returning `None`) if its trace
/// or span id is absent/malformed.
pub fn decode_span(span: &SpanProto) -> Option<Span> {
    let trace_id = decode_trace_id(&span.trace_id)?;
    let span_id = decode_span_id(&span.span_id)?;

    let status = span.status.as_ref().map(|s| SpanStatus {
        code: s.code,
        message: s.message.clone(),
    });

    let events = span
        .events
        .iter()
        .map(decode_span_event)
        .collect::<Vec<_>>();

    Some(Span {
        trace_id,
        span_id,
        parent_span_id: decode_parent_span_id(&span.parent_span_id),
        name: span.name.clone(),
        kind: span.kind,
        start_time_unix_nano: span.start_time_unix_nano,
        end_time_unix_nano: span.end_time_unix_nano,
        attributes: decode_attributes(&span.attributes),
        status,
        events,
    })
}

fn decode_span_event(event: &SpanEventProto) -> SpanEvent {
    SpanEvent {
        name: event.name.clone(),
        time_unix_nano: event.time_unix_nano,
        attributes: decode_attributes(&event.attributes),
    }
}
