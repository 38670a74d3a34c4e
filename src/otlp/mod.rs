//! OTLP wire decoding and OTLP→event conversion.
//!
//! `model` holds the internal AST and the canonical `TelemetryEvent` record;
//! `decode` turns OTLP protobuf messages into the internal AST; `convert`
//! projects the AST into the flat `TelemetryEvent` sequence the pipeline
//! deduplicates and publishes. The HTTP and gRPC transports both call
//! straight into `decode`/`convert` so the conversion logic never forks
//! between transports.

pub mod convert;
pub mod decode;
pub mod model;

pub use convert::Converter;
pub use model::{AttributeValue, EventType, Span, SpanStatus, TelemetryEvent};
