//! Crate-wide error taxonomy.
//!
//! Internal code always returns `Result<T, IngestError>`; the conversion to
//! `tonic::Status` happens exactly once, at the gRPC/HTTP handler boundary,
//! so no internal error type ever leaks onto the wire.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no credential presented")]
    MissingCredential,

    #[error("credential rejected by API key validator: {0}")]
    InvalidCredential(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("admission rejected: {0}")]
    OverCapacity(&'static str),

    #[error("deduplication store unavailable: {0}")]
    DedupUnavailable(String),

    #[error("stream publisher unavailable: {0}")]
    StreamUnavailable(String),

    /// A server-side fault unrelated to any particular request's content —
    /// e.g. the heap sampler backing the memory limiter failing to read.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl IngestError {
    /// Whether a client should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::OverCapacity(_)
                | IngestError::DedupUnavailable(_)
                | IngestError::StreamUnavailable(_)
        )
    }
}

impl From<IngestError> for tonic::Status {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::MissingCredential => {
                tonic::Status::unauthenticated("missing or malformed credential")
            }
            IngestError::InvalidCredential(msg) => tonic::Status::unauthenticated(msg),
            IngestError::MalformedRequest(msg) => tonic::Status::invalid_argument(msg),
            IngestError::OverCapacity(which) => tonic::Status::resource_exhausted(which),
            IngestError::DedupUnavailable(msg) => {
                tonic::Status::internal(format!("deduplication store unavailable: {msg}"))
            }
            IngestError::StreamUnavailable(msg) => {
                tonic::Status::internal(format!("stream publisher unavailable: {msg}"))
            }
            IngestError::Internal(msg) => tonic::Status::internal(msg),
            IngestError::Config(e) => tonic::Status::internal(format!("configuration error: {e}")),
            IngestError::Transport(e) => tonic::Status::internal(format!("transport error: {e}")),
        }
    }
}
