//! OTLP→event converter.
//!
//! Projects decoded resource/scope/item trees into a flat `TelemetryEvent`
//! sequence. Shared by both the gRPC and HTTP transports — neither transport
//! does its own flattening.

use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::logs::v1::LogRecord as LogRecordProto;
use opentelemetry_proto::tonic::metrics::v1::{
    metric::Data as MetricData, number_data_point::Value as NumberValue, Metric, NumberDataPoint,
};
use serde_json::json;
use tracing::warn;

use super::decode;
use super::model::{AttributeMap, EventType, TelemetryEvent};

/// GenAI semantic-convention log event names; logs whose
/// `event.name` attribute (or OTLP 1.3+ `LogRecord.event_name`) matches one
/// of these become `genai_event` instead of plain `log`.
const GENAI_EVENT_NAMES: &[&str] = &[
    "gen_ai.user.message",
    "gen_ai.assistant.message",
    "gen_ai.system.message",
    "gen_ai.tool.message",
    "gen_ai.choice",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct Converter;

impl Converter {
    pub fn new() -> Self {
        Self
    }

    /// Flattens a traces export request.
    pub fn convert_traces(&self, req: &ExportTraceServiceRequest) -> Vec<TelemetryEvent> {
        let mut events = Vec::new();
        for resource_spans in &req.resource_spans {
            let resource_attrs = decode::decode_resource(resource_spans.resource.as_ref());
            for scope_spans in &resource_spans.scope_spans {
                let (scope_name, scope_version, scope_attrs) =
                    decode::decode_scope(scope_spans.scope.as_ref());

                let decoded_spans: Vec<_> = scope_spans
                    .spans
                    .iter()
                    .filter_map(|s| {
                        let span = decode::decode_span(s);
                        if span.is_none() {
                            warn!("dropping span with malformed trace/span id");
                        }
                        span
                    })
                    .collect();

                if decoded_spans.is_empty() {
                    continue;
                }

                let trace_payload = json!({
                    "resource": to_json_map(&resource_attrs),
                    "scope": { "name": scope_name, "version": scope_version, "attributes": to_json_map(&scope_attrs) },
                });
                events.push(TelemetryEvent::new(
                    EventType::Trace,
                    String::new(),
                    String::new(),
                    trace_payload,
                ));

                for span in decoded_spans {
                    let payload = json!({
                        "name": span.name,
                        "kind": span.kind,
                        "parent_span_id": span.parent_span_id,
                        "start_time_unix_nano": span.start_time_unix_nano,
                        "end_time_unix_nano": span.end_time_unix_nano,
                        "attributes": to_json_map(&span.attributes),
                        "status": span.status.as_ref().map(|s| json!({"code": s.code, "message": s.message})),
                        "events": span.events.iter().map(|e| json!({
                            "name": e.name,
                            "time_unix_nano": e.time_unix_nano,
                            "attributes": to_json_map(&e.attributes),
                        })).collect::<Vec<_>>(),
                    });
                    events.push(TelemetryEvent::new(
                        EventType::Span,
                        span.trace_id.clone(),
                        span.span_id.clone(),
                        payload,
                    ));
                }
            }
        }
        events
    }

    /// Flattens a metrics export request to one event per data-point
    /// Emits one event per data-point rather than per metric definition.
    pub fn convert_metrics(&self, req: &ExportMetricsServiceRequest) -> Vec<TelemetryEvent> {
        let mut events = Vec::new();
        for resource_metrics in &req.resource_metrics {
            let resource_attrs = decode::decode_resource(resource_metrics.resource.as_ref());
            for scope_metrics in &resource_metrics.scope_metrics {
                let (scope_name, scope_version, scope_attrs) =
                    decode::decode_scope(scope_metrics.scope.as_ref());
                for metric in &scope_metrics.metrics {
                    for payload in metric_datapoint_payloads(metric) {
                        let merged = json!({
                            "metric_name": metric.name,
                            "description": metric.description,
                            "unit": metric.unit,
                            "resource": to_json_map(&resource_attrs),
                            "scope": { "name": scope_name, "version": scope_version, "attributes": to_json_map(&scope_attrs) },
                            "datapoint": payload,
                        });
                        events.push(TelemetryEvent::new(
                            EventType::Metric,
                            String::new(),
                            String::new(),
                            merged,
                        ));
                    }
                }
            }
        }
        events
    }

    /// Flattens a logs export request, splitting GenAI events from plain
    /// logs by event-name vocabulary.
    pub fn convert_logs(&self, req: &ExportLogsServiceRequest) -> Vec<TelemetryEvent> {
        let mut events = Vec::new();
        for resource_logs in &req.resource_logs {
            let resource_attrs = decode::decode_resource(resource_logs.resource.as_ref());
            for scope_logs in &resource_logs.scope_logs {
                let (scope_name, scope_version, scope_attrs) =
                    decode::decode_scope(scope_logs.scope.as_ref());
                for record in &scope_logs.log_records {
                    let attrs = decode::decode_attributes(&record.attributes);
                    let event_name = log_event_name(record, &attrs);
                    let event_type = if is_genai_event(&event_name) {
                        EventType::GenaiEvent
                    } else {
                        EventType::Log
                    };

                    let trace_id = decode::decode_trace_id(&record.trace_id).unwrap_or_default();
                    let span_id = decode::decode_span_id(&record.span_id).unwrap_or_default();

                    let body = record
                        .body
                        .as_ref()
                        .map(|v| decode::decode_any_value(v).to_json())
                        .unwrap_or(serde_json::Value::Null);

                    let payload = json!({
                        "event_name": event_name,
                        "severity_number": record.severity_number,
                        "severity_text": record.severity_text,
                        "time_unix_nano": record.time_unix_nano,
                        "observed_time_unix_nano": record.observed_time_unix_nano,
                        "body": body,
                        "attributes": to_json_map(&attrs),
                        "resource": to_json_map(&resource_attrs),
                        "scope": { "name": scope_name, "version": scope_version, "attributes": to_json_map(&scope_attrs) },
                    });

                    events.push(TelemetryEvent::new(event_type, trace_id, span_id, payload));
                }
            }
        }
        events
    }
}

fn log_event_name(record: &LogRecordProto, attrs: &AttributeMap) -> String {
    if !record.event_name.is_empty() {
        return record.event_name.clone();
    }
    match attrs.get("event.name") {
        Some(super::model::AttributeValue::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn is_genai_event(event_name: &str) -> bool {
    GENAI_EVENT_NAMES.contains(&event_name)
}

fn to_json_map(attrs: &AttributeMap) -> serde_json::Map<String, serde_json::Value> {
    attrs
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect()
}

fn number_value(point: &NumberDataPoint) -> serde_json::Value {
    match point.value {
        Some(NumberValue::AsDouble(d)) => {
            if d.is_finite() {
                serde_json::Number::from_f64(d)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            } else {
                serde_json::Value::Null
            }
        }
        Some(NumberValue::AsInt(i)) => json!(i),
        None => serde_json::Value::Null,
    }
}

/// One JSON payload per data-point, tagged with its aggregation kind. Covers
/// sum/gauge/histogram/summary; exponential histograms fold into histogram
/// shape since downstream consumers don't distinguish them.
fn metric_datapoint_payloads(metric: &Metric) -> Vec<serde_json::Value> {
    let Some(data) = metric.data.as_ref() else {
        return Vec::new();
    };
    match data {
        MetricData::Sum(sum) => sum
            .data_points
            .iter()
            .map(|dp| {
                json!({
                    "kind": "sum",
                    "time_unix_nano": dp.time_unix_nano,
                    "value": number_value(dp),
                    "attributes": to_json_map(&decode::decode_attributes(&dp.attributes)),
                    "is_monotonic": sum.is_monotonic,
                })
            })
            .collect(),
        MetricData::Gauge(gauge) => gauge
            .data_points
            .iter()
            .map(|dp| {
                json!({
                    "kind": "gauge",
                    "time_unix_nano": dp.time_unix_nano,
                    "value": number_value(dp),
                    "attributes": to_json_map(&decode::decode_attributes(&dp.attributes)),
                })
            })
            .collect(),
        MetricData::Histogram(hist) => hist
            .data_points
            .iter()
            .map(|dp| {
                json!({
                    "kind": "histogram",
                    "time_unix_nano": dp.time_unix_nano,
                    "count": dp.count,
                    "sum": dp.sum,
                    "bucket_counts": dp.bucket_counts,
                    "explicit_bounds": dp.explicit_bounds,
                    "attributes": to_json_map(&decode::decode_attributes(&dp.attributes)),
                })
            })
            .collect(),
        MetricData::ExponentialHistogram(hist) => hist
            .data_points
            .iter()
            .map(|dp| {
                json!({
                    "kind": "exponential_histogram",
                    "time_unix_nano": dp.time_unix_nano,
                    "count": dp.count,
                    "sum": dp.sum,
                    "scale": dp.scale,
                    "zero_count": dp.zero_count,
                    "attributes": to_json_map(&decode::decode_attributes(&dp.attributes)),
                })
            })
            .collect(),
        MetricData::Summary(summary) => summary
            .data_points
            .iter()
            .map(|dp| {
                json!({
                    "kind": "summary",
                    "time_unix_nano": dp.time_unix_nano,
                    "count": dp.count,
                    "sum": dp.sum,
                    "attributes": to_json_map(&decode::decode_attributes(&dp.attributes)),
                })
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::common::v1::{InstrumentationScope, KeyValue};
    use opentelemetry_proto::tonic::logs::v1::{ResourceLogs, ScopeLogs};
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span as SpanProto};

    fn sample_span() -> SpanProto {
        SpanProto {
            trace_id: vec![1; 16],
            span_id: vec![2; 8],
            name: "handler".into(),
            ..Default::default()
        }
    }

    #[test]
    fn traces_emit_one_trace_event_per_populated_resource_scope_pair() {
        let req = ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![],
                    dropped_attributes_count: 0,
                }),
                scope_spans: vec![ScopeSpans {
                    scope: Some(InstrumentationScope {
                        name: "svc".into(),
                        ..Default::default()
                    }),
                    spans: vec![sample_span()],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        };
        let events = Converter::new().convert_traces(&req);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::Trace);
        assert_eq!(events[1].event_type, EventType::Span);
        assert_eq!(events[1].trace_id.len(), 32);
    }

    #[test]
    fn scope_with_no_valid_spans_emits_no_trace_event() {
        let req = ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: None,
                scope_spans: vec![ScopeSpans {
                    scope: None,
                    spans: vec![SpanProto {
                        trace_id: vec![0; 16],
                        span_id: vec![0; 8],
                        ..Default::default()
                    }],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        };
        let events = Converter::new().convert_traces(&req);
        assert!(events.is_empty());
    }

    #[test]
    fn genai_event_name_attribute_is_detected() {
        let record = LogRecordProto {
            attributes: vec![KeyValue {
                key: "event.name".into(),
                value: Some(opentelemetry_proto::tonic::common::v1::AnyValue {
                    value: Some(
                        opentelemetry_proto::tonic::common::v1::any_value::Value::StringValue(
                            "gen_ai.tool.message".into(),
                        ),
                    ),
                }),
            }],
            ..Default::default()
        };
        let attrs = decode::decode_attributes(&record.attributes);
        let name = log_event_name(&record, &attrs);
        assert!(is_genai_event(&name));
    }

    #[test]
    fn plain_log_is_not_genai() {
        let req = ExportLogsServiceRequest {
            resource_logs: vec![ResourceLogs {
                resource: None,
                scope_logs: vec![ScopeLogs {
                    scope: None,
                    log_records: vec![LogRecordProto {
                        body: None,
                        ..Default::default()
                    }],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        };
        let events = Converter::new().convert_logs(&req);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Log);
    }
}
