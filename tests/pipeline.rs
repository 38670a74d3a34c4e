//! Black-box scenarios for the ingestion pipeline, auth gate, and memory
//! limiter working together (the literal scenarios A-F and the universal
//! properties).

use std::sync::Arc;

use opentelemetry_proto::tonic::common::v1::InstrumentationScope;
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span as SpanProto};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;

use otlp_ingest_core::auth::{extract_api_key, ApiKeyService, StaticApiKeyService};
use otlp_ingest_core::config::MemoryConfig;
use otlp_ingest_core::dedup::{DeduplicationStore, InMemoryDeduplicationStore};
use otlp_ingest_core::error::IngestError;
use otlp_ingest_core::memlimit::{FixedSampler, MemoryLimiter};
use otlp_ingest_core::pipeline::IngestionPipeline;
use otlp_ingest_core::stream::{FailingStreamPublisher, InMemoryStreamPublisher};

fn span(trace_byte: u8, span_byte: u8) -> SpanProto {
    SpanProto {
        trace_id: vec![trace_byte; 16],
        span_id: vec![span_byte; 8],
        name: "op".into(),
        ..Default::default()
    }
}

fn request(spans: Vec<SpanProto>) -> ExportTraceServiceRequest {
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

fn pipeline_with(
    dedup: Arc<InMemoryDeduplicationStore>,
    stream: Arc<InMemoryStreamPublisher>,
) -> IngestionPipeline {
    IngestionPipeline::new(dedup, stream)
}

#[tokio::test]
async fn scenario_a_happy_path_claims_both_spans_and_publishes_once() {
    let dedup = Arc::new(InMemoryDeduplicationStore::new());
    let stream = Arc::new(InMemoryStreamPublisher::new());
    let pipeline = pipeline_with(dedup, stream.clone());

    let req = request(vec![span(0x01, 0xaa), span(0x01, 0x11)]);
    let result = pipeline.ingest_traces("proj-a", "otlp-grpc", &req).await.unwrap();
    assert!(result.stream_offset.is_some());

    let messages = stream.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].claimed_keys.len(), 2);
    assert!(messages[0].duplicate_keys.is_empty());
    // 1 trace event + 2 span events.
    assert_eq!(messages[0].events.len(), 3);
}

#[tokio::test]
async fn scenario_b_duplicate_retry_does_not_republish_spans() {
    let dedup = Arc::new(InMemoryDeduplicationStore::new());
    let stream = Arc::new(InMemoryStreamPublisher::new());
    let pipeline = pipeline_with(dedup, stream.clone());

    let req = request(vec![span(0x02, 0xaa), span(0x02, 0x11)]);
    pipeline.ingest_traces("proj-b", "otlp-grpc", &req).await.unwrap();
    pipeline.ingest_traces("proj-b", "otlp-grpc", &req).await.unwrap();

    let messages = stream.messages().await;
    assert_eq!(messages.len(), 2, "both the original and the retry publish (trace event still flows)");
    let retry = &messages[1];
    assert!(retry.claimed_keys.is_empty());
    assert_eq!(retry.duplicate_keys.len(), 2);
    // Only the trace-header event survived the filter on retry.
    assert_eq!(retry.events.len(), 1);
}

#[tokio::test]
async fn scenario_c_mixed_batch_keeps_first_two_drops_middle_duplicate() {
    let dedup = Arc::new(InMemoryDeduplicationStore::new());
    let stream = Arc::new(InMemoryStreamPublisher::new());

    // Pre-claim the middle span's key via a prior batch.
    dedup
        .claim_events(
            "proj-c",
            "prior-batch",
            &["03030303030303030303030303030303:2222222222222222".to_string()],
            std::time::Duration::from_secs(3600),
        )
        .await
        .unwrap();

    let pipeline = pipeline_with(dedup, stream.clone());
    let req = request(vec![span(0x03, 0x11), span(0x03, 0x22), span(0x03, 0x33)]);
    pipeline.ingest_traces("proj-c", "otlp-grpc", &req).await.unwrap();

    let messages = stream.messages().await;
    let msg = &messages[0];
    assert_eq!(msg.claimed_keys.len(), 2);
    assert_eq!(msg.duplicate_keys.len(), 1);
    // 1 trace event + 2 surviving span events, original order preserved.
    assert_eq!(msg.events.len(), 3);
}

#[tokio::test]
async fn scenario_d_publish_failure_releases_claims_and_retry_succeeds() {
    let dedup = Arc::new(InMemoryDeduplicationStore::new());
    let failing_pipeline =
        IngestionPipeline::new(dedup.clone(), Arc::new(FailingStreamPublisher));

    let spans: Vec<SpanProto> = (0..5).map(|i| span(0x04, i)).collect();
    let req = request(spans);

    let err = failing_pipeline
        .ingest_traces("proj-d", "otlp-grpc", &req)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let healthy_stream = Arc::new(InMemoryStreamPublisher::new());
    let healthy_pipeline = IngestionPipeline::new(dedup, healthy_stream.clone());
    let retry = healthy_pipeline
        .ingest_traces("proj-d", "otlp-grpc", &req)
        .await
        .unwrap();
    assert!(retry.stream_offset.is_some());

    let messages = healthy_stream.messages().await;
    assert_eq!(messages[0].claimed_keys.len(), 5, "all 5 keys reclaimable after release");
}

#[tokio::test]
async fn scenario_e_memory_pressure_rejects_regardless_of_payload() {
    let cfg = MemoryConfig {
        soft_limit_mib: 1500,
        spike_limit_mib: 512,
    };

    let soft_pressure = MemoryLimiter::new(FixedSampler(1800 * 1024 * 1024), cfg.clone());
    let err = soft_pressure.admit().unwrap_err();
    assert!(matches!(err, IngestError::OverCapacity("soft limit")));

    let hard_pressure = MemoryLimiter::new(FixedSampler(2100 * 1024 * 1024), cfg);
    let err = hard_pressure.admit().unwrap_err();
    assert!(matches!(err, IngestError::OverCapacity("hard limit")));
}

#[tokio::test]
async fn scenario_f_bad_credential_never_reaches_pipeline() {
    let err = extract_api_key(Some("Bearer abc123"), None).unwrap_err();
    assert!(matches!(err, IngestError::MissingCredential));

    // A credential service is never even consulted for a malformed key.
    let service = StaticApiKeyService::new().with_key("bk_good", "proj", "key-1");
    assert!(service.validate_api_key("abc123").await.is_err());
}

#[tokio::test]
async fn universal_property_batch_internal_duplicate_keeps_first_occurrence_only() {
    let dedup = Arc::new(InMemoryDeduplicationStore::new());
    let stream = Arc::new(InMemoryStreamPublisher::new());
    let pipeline = pipeline_with(dedup, stream.clone());

    let req = request(vec![span(0x05, 0x99), span(0x05, 0x99)]);
    pipeline.ingest_traces("proj-g", "otlp-grpc", &req).await.unwrap();

    let messages = stream.messages().await;
    // 1 trace event + exactly 1 span event, even though the span appeared twice.
    assert_eq!(messages[0].events.len(), 2);
    assert_eq!(messages[0].claimed_keys.len(), 1);
}

#[tokio::test]
async fn universal_property_span_ordering_matches_input_order() {
    let dedup = Arc::new(InMemoryDeduplicationStore::new());
    let stream = Arc::new(InMemoryStreamPublisher::new());
    let pipeline = pipeline_with(dedup, stream.clone());

    let req = request(vec![span(0x06, 0x01), span(0x06, 0x02), span(0x06, 0x03)]);
    pipeline.ingest_traces("proj-h", "otlp-grpc", &req).await.unwrap();

    let messages = stream.messages().await;
    let span_ids: Vec<_> = messages[0]
        .events
        .iter()
        .filter(|e| e.event_type == otlp_ingest_core::otlp::EventType::Span)
        .map(|e| e.span_id.clone())
        .collect();
    assert_eq!(
        span_ids,
        vec![
            "0101010101010101".to_string(),
            "0202020202020202".to_string(),
            "0303030303030303".to_string(),
        ]
    );
}
