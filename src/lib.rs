//! OTLP telemetry ingestion core.
//!
//! Receives OTLP traces/metrics/logs over gRPC and HTTP, authenticates the
//! submitter by project-scoped API key, applies memory-based admission
//! control, deduplicates span persistence across retries, and hands
//! accepted batches off to a durable stream.

pub mod auth;
pub mod config;
pub mod dedup;
pub mod error;
pub mod grpc_services;
pub mod id;
pub mod memlimit;
pub mod otlp;
pub mod pipeline;
pub mod server;
pub mod stream;

pub use config::Config;
pub use error::IngestError;
pub use id::Id;
pub use pipeline::IngestionPipeline;
