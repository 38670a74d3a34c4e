//! Stream publisher.
//!
//! Kafka in production — a producer's `(partition, offset)` return is
//! already the monotonically-ordered offset this publisher needs to return, so the
//! publisher just serializes the message and forwards the broker's answer.
//! An in-memory ordered log backs tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use crate::error::IngestError;
use crate::otlp::TelemetryEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessageMetadata {
    pub source: String,
    pub event_count: usize,
    pub claimed_count: usize,
    pub duplicate_count: usize,
    pub timestamp_unix_nano: u128,
}

/// The durable-stream envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessage {
    pub batch_id: String,
    pub project_id: String,
    pub events: Vec<TelemetryEvent>,
    pub claimed_keys: Vec<String>,
    pub duplicate_keys: Vec<String>,
    pub metadata: StreamMessageMetadata,
}

impl StreamMessage {
    pub fn now_timestamp() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait StreamPublisher: Send + Sync {
    /// Returns the stream offset the message landed at.
    async fn publish(&self, msg: &StreamMessage) -> Result<i64, IngestError>;
}

pub struct KafkaStreamPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaStreamPublisher {
    pub fn new(brokers: &str, topic: &str) -> Result<Self, IngestError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| IngestError::StreamUnavailable(e.to_string()))?;
        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl StreamPublisher for KafkaStreamPublisher {
    async fn publish(&self, msg: &StreamMessage) -> Result<i64, IngestError> {
        let payload = serde_json::to_vec(msg)
            .map_err(|e| IngestError::StreamUnavailable(format!("serialize: {e}")))?;

        let record = FutureRecord::to(&self.topic)
            .key(&msg.project_id)
            .payload(&payload);

        match self.producer.send(record, std::time::Duration::from_secs(10)).await {
            Ok((_partition, offset)) => Ok(offset),
            Err((e, _)) => Err(IngestError::StreamUnavailable(e.to_string())),
        }
    }
}

/// Ordered, append-only in-memory log for tests: offsets are a single
/// monotonically increasing counter across the whole store, which subsumes
/// the per-project ordering guarantee callers need.
#[derive(Clone)]
pub struct InMemoryStreamPublisher {
    log: Arc<Mutex<Vec<StreamMessage>>>,
    next_offset: Arc<AtomicI64>,
}

impl Default for InMemoryStreamPublisher {
    fn default() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            next_offset: Arc::new(AtomicI64::new(0)),
        }
    }
}

impl InMemoryStreamPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<StreamMessage> {
        self.log.lock().await.clone()
    }
}

#[async_trait]
impl StreamPublisher for InMemoryStreamPublisher {
    async fn publish(&self, msg: &StreamMessage) -> Result<i64, IngestError> {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        self.log.lock().await.push(msg.clone());
        Ok(offset)
    }
}

/// A publisher that always fails, for exercising the rollback path in tests.
#[derive(Default, Clone, Copy)]
pub struct FailingStreamPublisher;

#[async_trait]
impl StreamPublisher for FailingStreamPublisher {
    async fn publish(&self, _msg: &StreamMessage) -> Result<i64, IngestError> {
        Err(IngestError::StreamUnavailable("forced failure".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otlp::model::EventType;

    fn sample_message() -> StreamMessage {
        StreamMessage {
            batch_id: "b1".into(),
            project_id: "proj".into(),
            events: vec![TelemetryEvent::new(
                EventType::Log,
                String::new(),
                String::new(),
                JsonValue::Null,
            )],
            claimed_keys: vec![],
            duplicate_keys: vec![],
            metadata: StreamMessageMetadata {
                source: "otlp-grpc".into(),
                event_count: 1,
                claimed_count: 0,
                duplicate_count: 0,
                timestamp_unix_nano: StreamMessage::now_timestamp(),
            },
        }
    }

    #[tokio::test]
    async fn offsets_increase_monotonically() {
        let publisher = InMemoryStreamPublisher::new();
        let first = publisher.publish(&sample_message()).await.unwrap();
        let second = publisher.publish(&sample_message()).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn published_messages_preserve_input_order() {
        let publisher = InMemoryStreamPublisher::new();
        let mut a = sample_message();
        a.batch_id = "a".into();
        let mut b = sample_message();
        b.batch_id = "b".into();
        publisher.publish(&a).await.unwrap();
        publisher.publish(&b).await.unwrap();
        let messages = publisher.messages().await;
        assert_eq!(messages[0].batch_id, "a");
        assert_eq!(messages[1].batch_id, "b");
    }

    #[tokio::test]
    async fn failing_publisher_surfaces_stream_unavailable() {
        let publisher = FailingStreamPublisher;
        let err = publisher.publish(&sample_message()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
