//! Ingestion pipeline.
//!
//! Orchestrates decode → convert → claim → filter → publish for the traces
//! path, and decode → convert → publish (no dedup) for metrics/logs. Neither
//! transport (gRPC or HTTP) re-implements any of this — they only decode the
//! wire envelope and call in here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use tracing::{info, warn};

use crate::dedup::DeduplicationStore;
use crate::error::IngestError;
use crate::id::Id;
use crate::otlp::model::{EventType, TelemetryEvent};
use crate::otlp::Converter;
use crate::stream::{StreamMessage, StreamMessageMetadata, StreamPublisher};

const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(24 * 3600);

pub struct IngestionPipeline {
    converter: Converter,
    dedup: Arc<dyn DeduplicationStore>,
    stream: Arc<dyn StreamPublisher>,
}

/// Outcome handed back to the transport layer; `stream_offset` is `None`
/// when the batch was a legitimate duplicate-only skip.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestResult {
    pub stream_offset: Option<i64>,
}

impl IngestionPipeline {
    pub fn new(dedup: Arc<dyn DeduplicationStore>, stream: Arc<dyn StreamPublisher>) -> Self {
        Self {
            converter: Converter::new(),
            dedup,
            stream,
        }
    }

    pub async fn ingest_traces(
        &self,
        project_id: &str,
        source: &str,
        req: &ExportTraceServiceRequest,
    ) -> Result<IngestResult, IngestError> {
        if req.resource_spans.is_empty() {
            return Err(IngestError::MalformedRequest(
                "request has zero resource-items".into(),
            ));
        }

        let events = self.converter.convert_traces(req);
        self.claim_filter_publish(project_id, source, events).await
    }

    pub async fn ingest_metrics(
        &self,
        project_id: &str,
        source: &str,
        req: &ExportMetricsServiceRequest,
    ) -> Result<IngestResult, IngestError> {
        if req.resource_metrics.is_empty() {
            return Err(IngestError::MalformedRequest(
                "request has zero resource-items".into(),
            ));
        }
        let events = self.converter.convert_metrics(req);
        self.publish_no_dedup(project_id, source, events).await
    }

    pub async fn ingest_logs(
        &self,
        project_id: &str,
        source: &str,
        req: &ExportLogsServiceRequest,
    ) -> Result<IngestResult, IngestError> {
        if req.resource_logs.is_empty() {
            return Err(IngestError::MalformedRequest(
                "request has zero resource-items".into(),
            ));
        }
        let events = self.converter.convert_logs(req);
        self.publish_no_dedup(project_id, source, events).await
    }

    /// Traces path: claim, filter, publish, and roll back on failure.
    async fn claim_filter_publish(
        &self,
        project_id: &str,
        source: &str,
        events: Vec<TelemetryEvent>,
    ) -> Result<IngestResult, IngestError> {
        // Step 4: collect span keys and first-occurrence index.
        let mut keys = Vec::new();
        let mut first_index: HashMap<String, usize> = HashMap::new();
        for (i, event) in events.iter().enumerate() {
            if event.event_type != EventType::Span {
                continue;
            }
            if event.trace_id.is_empty() || event.span_id.is_empty() {
                warn!("dropping span from claim set: missing trace/span id");
                continue;
            }
            let key = format!("{}:{}", event.trace_id, event.span_id);
            first_index.entry(key.clone()).or_insert(i);
            keys.push(key);
        }
        let keys: Vec<String> = keys.into_iter().collect::<HashSet<_>>().into_iter().collect();

        // Step 5.
        let batch_id = Id::generate().to_string();
        let claim = if keys.is_empty() {
            crate::dedup::ClaimResult::default()
        } else {
            self.dedup
                .claim_events(project_id, &batch_id, &keys, DEFAULT_CLAIM_TTL)
                .await?
        };

        // Step 6: filter.
        let filtered: Vec<TelemetryEvent> = events
            .into_iter()
            .enumerate()
            .filter(|(i, event)| match event.event_type {
                EventType::Trace => true,
                EventType::Span => {
                    let key = format!("{}:{}", event.trace_id, event.span_id);
                    claim.claimed.contains(&key) && first_index.get(&key) == Some(i)
                }
                _ => true,
            })
            .map(|(_, event)| event)
            .collect();

        let has_trace_event = filtered.iter().any(|e| e.event_type == EventType::Trace);

        // Step 7: duplicate-only skip.
        if filtered.is_empty() && !has_trace_event {
            info!(project_id, batch_id, "duplicate-only batch, skipping publish");
            return Ok(IngestResult { stream_offset: None });
        }

        self.publish(project_id, source, batch_id, filtered, claim.claimed, claim.duplicate)
            .await
    }

    /// Metrics/logs path: decode, convert, publish — no dedup coordinator involved.
    async fn publish_no_dedup(
        &self,
        project_id: &str,
        source: &str,
        events: Vec<TelemetryEvent>,
    ) -> Result<IngestResult, IngestError> {
        if events.is_empty() {
            info!(project_id, "empty batch after conversion, skipping publish");
            return Ok(IngestResult { stream_offset: None });
        }
        let batch_id = Id::generate().to_string();
        self.publish(project_id, source, batch_id, events, HashSet::new(), HashSet::new())
            .await
    }

    async fn publish(
        &self,
        project_id: &str,
        source: &str,
        batch_id: String,
        events: Vec<TelemetryEvent>,
        claimed: HashSet<String>,
        duplicate: HashSet<String>,
    ) -> Result<IngestResult, IngestError> {
        let message = StreamMessage {
            batch_id,
            project_id: project_id.to_string(),
            metadata: StreamMessageMetadata {
                source: source.to_string(),
                event_count: events.len(),
                claimed_count: claimed.len(),
                duplicate_count: duplicate.len(),
                timestamp_unix_nano: StreamMessage::now_timestamp(),
            },
            claimed_keys: claimed.iter().cloned().collect(),
            duplicate_keys: duplicate.iter().cloned().collect(),
            events,
        };

        match self.stream.publish(&message).await {
            Ok(offset) => Ok(IngestResult {
                stream_offset: Some(offset),
            }),
            Err(publish_err) => {
                if !claimed.is_empty() {
                    let keys: Vec<String> = claimed.into_iter().collect();
                    self.dedup.release_events(project_id, &keys).await;
                }
                Err(publish_err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::InMemoryDeduplicationStore;
    use crate::stream::{FailingStreamPublisher, InMemoryStreamPublisher};
    use opentelemetry_proto::tonic::common::v1::InstrumentationScope;
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span as SpanProto};

    fn span_with_ids(trace_byte: u8, span_byte: u8) -> SpanProto {
        SpanProto {
            trace_id: vec![trace_byte; 16],
            span_id: vec![span_byte; 8],
            name: "op".into(),
            ..Default::default()
        }
    }

    fn trace_request(spans: Vec<SpanProto>) -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource::default()),
                scope_spans: vec![ScopeSpans {
                    scope: Some(InstrumentationScope::default()),
                    spans,
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        }
    }

    fn pipeline() -> IngestionPipeline {
        IngestionPipeline::new(
            Arc::new(InMemoryDeduplicationStore::new()),
            Arc::new(InMemoryStreamPublisher::new()),
        )
    }

    #[tokio::test]
    async fn happy_path_publishes_and_returns_offset() {
        let pipeline = pipeline();
        let req = trace_request(vec![span_with_ids(1, 1)]);
        let result = pipeline.ingest_traces("proj", "otlp-grpc", &req).await.unwrap();
        assert!(result.stream_offset.is_some());
    }

    #[tokio::test]
    async fn empty_envelope_is_malformed() {
        let pipeline = pipeline();
        let req = ExportTraceServiceRequest { resource_spans: vec![] };
        let err = pipeline.ingest_traces("proj", "otlp-grpc", &req).await.unwrap_err();
        assert!(matches!(err, IngestError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn retried_span_still_publishes_its_trace_event() {
        let pipeline = pipeline();
        let req = trace_request(vec![span_with_ids(2, 2)]);
        pipeline.ingest_traces("proj", "otlp-grpc", &req).await.unwrap();

        // Same span again: trace-event is emitted every time (it carries no
        // dedup identity), but the span itself is now a pure duplicate.
        let retry = pipeline.ingest_traces("proj", "otlp-grpc", &req).await.unwrap();
        assert!(retry.stream_offset.is_some(), "trace event still publishes");
    }

    #[tokio::test]
    async fn batch_with_only_malformed_spans_skips_publish_silently() {
        let pipeline = pipeline();
        // Zero-length ids decode to `None` and get dropped,
        // leaving no span and therefore no trace event either.
        let req = trace_request(vec![SpanProto {
            trace_id: vec![],
            span_id: vec![],
            ..Default::default()
        }]);
        let result = pipeline.ingest_traces("proj", "otlp-grpc", &req).await.unwrap();
        assert_eq!(result.stream_offset, None);
    }

    #[tokio::test]
    async fn batch_internal_duplicate_keeps_only_first_occurrence() {
        let pipeline = pipeline();
        let req = trace_request(vec![span_with_ids(3, 3), span_with_ids(3, 3)]);
        let result = pipeline.ingest_traces("proj", "otlp-grpc", &req).await.unwrap();
        assert!(result.stream_offset.is_some());
    }

    #[tokio::test]
    async fn publish_failure_releases_claims() {
        let dedup = Arc::new(InMemoryDeduplicationStore::new());
        let pipeline = IngestionPipeline::new(dedup.clone(), Arc::new(FailingStreamPublisher));
        let req = trace_request(vec![span_with_ids(4, 4)]);
        let err = pipeline.ingest_traces("proj", "otlp-grpc", &req).await.unwrap_err();
        assert!(err.is_retryable());

        // Claim must have been released: a retry through a healthy publisher
        // can claim the same key again.
        let healthy = IngestionPipeline::new(dedup, Arc::new(InMemoryStreamPublisher::new()));
        let retry = healthy.ingest_traces("proj", "otlp-grpc", &req).await.unwrap();
        assert!(retry.stream_offset.is_some());
    }

    #[tokio::test]
    async fn metrics_path_skips_dedup_entirely() {
        let pipeline = pipeline();
        let req = ExportMetricsServiceRequest {
            resource_metrics: vec![opentelemetry_proto::tonic::metrics::v1::ResourceMetrics {
                resource: Some(Resource::default()),
                scope_metrics: vec![opentelemetry_proto::tonic::metrics::v1::ScopeMetrics {
                    scope: Some(InstrumentationScope::default()),
                    metrics: vec![],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        };
        let result = pipeline.ingest_metrics("proj", "otlp-grpc-metrics", &req).await.unwrap();
        assert_eq!(result.stream_offset, None);
    }
}
