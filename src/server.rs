//! Server host: gRPC collector services plus the HTTP
//! OTLP transport, sharing one `IngestionPipeline`.
//!
//! Interceptor chain order is memory-limiter → auth → logging: the memory
//! gate runs in a synchronous
//! `tonic::service::Interceptor` so a request over the hard limit is
//! rejected before any async work (including auth) begins; auth then runs
//! inline in each service handler (`grpc_services::authenticate`), since
//! validating a key is an async call the `Interceptor` trait cannot make;
//! logging wraps the whole stack via `tower_http::trace::TraceLayer`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use opentelemetry_proto::tonic::collector::logs::v1::logs_service_server::LogsServiceServer;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_server::MetricsServiceServer;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::TraceServiceServer;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use prost::Message;
use tokio::sync::watch;
use tonic::service::Interceptor;
use tonic::transport::Server as TonicServer;
use tonic::{Request, Status};
use tracing::{info, warn};

use crate::auth::{extract_api_key, ApiKeyService};
use crate::config::Config;
use crate::error::IngestError;
use crate::grpc_services::{OtlpLogsService, OtlpMetricsService, OtlpTraceService};
use crate::memlimit::MemoryLimiter;
use crate::pipeline::IngestionPipeline;

/// The memory-limiter stage of the interceptor chain: admission is checked
/// before the request is decoded or authenticated.
#[derive(Clone)]
pub struct MemoryLimiterInterceptor {
    check: Arc<dyn Fn() -> Result<(), IngestError> + Send + Sync>,
}

impl MemoryLimiterInterceptor {
    pub fn new<S: crate::memlimit::MemorySampler + 'static>(
        limiter: Arc<MemoryLimiter<S>>,
    ) -> Self {
        Self {
            check: Arc::new(move || limiter.admit()),
        }
    }
}

impl MemoryLimiterInterceptor {
    /// Checked directly by the HTTP transport, which has no `Interceptor`
    /// trait to hook into — handlers call this themselves as their first
    /// statement, before auth or decoding.
    pub fn admit(&self) -> Result<(), IngestError> {
        (self.check)()
    }
}

impl Interceptor for MemoryLimiterInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        self.admit().map_err(Status::from)?;
        Ok(request)
    }
}

pub struct AppState {
    pub pipeline: Arc<IngestionPipeline>,
    pub api_keys: Arc<dyn ApiKeyService>,
    pub memory_limiter: MemoryLimiterInterceptor,
}

async fn authenticate_http(
    headers: &HeaderMap,
    api_keys: &dyn ApiKeyService,
) -> Result<String, (StatusCode, String)> {
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
    let x_api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    let key = extract_api_key(auth, x_api_key).map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))?;
    let ctx = api_keys
        .validate_api_key(&key)
        .await
        .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))?;
    Ok(ctx.project_id)
}

async fn http_traces(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<StatusCode, (StatusCode, String)> {
    state.memory_limiter.admit().map_err(http_error)?;
    let project_id = authenticate_http(&headers, state.api_keys.as_ref()).await?;
    let req = ExportTraceServiceRequest::decode(body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid OTLP protobuf: {e}")))?;
    state
        .pipeline
        .ingest_traces(&project_id, "otlp-http", &req)
        .await
        .map_err(http_error)?;
    Ok(StatusCode::OK)
}

async fn http_metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<StatusCode, (StatusCode, String)> {
    state.memory_limiter.admit().map_err(http_error)?;
    let project_id = authenticate_http(&headers, state.api_keys.as_ref()).await?;
    let req = ExportMetricsServiceRequest::decode(body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid OTLP protobuf: {e}")))?;
    state
        .pipeline
        .ingest_metrics(&project_id, "otlp-http", &req)
        .await
        .map_err(http_error)?;
    Ok(StatusCode::OK)
}

async fn http_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<StatusCode, (StatusCode, String)> {
    state.memory_limiter.admit().map_err(http_error)?;
    let project_id = authenticate_http(&headers, state.api_keys.as_ref()).await?;
    let req = ExportLogsServiceRequest::decode(body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid OTLP protobuf: {e}")))?;
    state
        .pipeline
        .ingest_logs(&project_id, "otlp-http", &req)
        .await
        .map_err(http_error)?;
    Ok(StatusCode::OK)
}

fn http_error(err: IngestError) -> (StatusCode, String) {
    let status = tonic::Status::from(err);
    let code = match status.code() {
        tonic::Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        tonic::Code::InvalidArgument => StatusCode::BAD_REQUEST,
        tonic::Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, status.message().to_string())
}

async fn health() -> &'static str {
    "ok"
}

pub fn http_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/traces", post(http_traces))
        .route("/v1/metrics", post(http_metrics))
        .route("/v1/logs", post(http_logs))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_grpc(
    addr: SocketAddr,
    config: &Config,
    pipeline: Arc<IngestionPipeline>,
    interceptor: MemoryLimiterInterceptor,
    api_keys: Arc<dyn ApiKeyService>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), IngestError> {
    let max_bytes = config.grpc.max_message_bytes;

    info!(%addr, "starting OTLP gRPC server");

    // `client_min_ping_interval` has no corresponding tonic/h2 builder knob
    // (unlike grpc-go/grpc-core, this stack doesn't enforce a client ping
    // floor server-side) — it stays informational, documenting what clients
    // are permitted to do, and is not wired into the server here.
    TonicServer::builder()
        .http2_keepalive_interval(Some(config.grpc.keepalive.server_ping_interval))
        .http2_keepalive_timeout(Some(config.grpc.keepalive.server_ping_timeout))
        .layer(tower_http::trace::TraceLayer::new_for_grpc())
        .add_service(
            TraceServiceServer::with_interceptor(
                OtlpTraceService::new(pipeline.clone(), api_keys.clone()),
                interceptor.clone(),
            )
            .max_decoding_message_size(max_bytes)
            .max_encoding_message_size(max_bytes),
        )
        .add_service(
            MetricsServiceServer::with_interceptor(
                OtlpMetricsService::new(pipeline.clone(), api_keys.clone()),
                interceptor.clone(),
            )
            .max_decoding_message_size(max_bytes)
            .max_encoding_message_size(max_bytes),
        )
        .add_service(
            LogsServiceServer::with_interceptor(
                OtlpLogsService::new(pipeline, api_keys),
                interceptor,
            )
            .max_decoding_message_size(max_bytes)
            .max_encoding_message_size(max_bytes),
        )
        .serve_with_shutdown(addr, async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            info!("gRPC server shutting down");
        })
        .await
        .map_err(IngestError::from)
}

pub async fn run_http(
    addr: SocketAddr,
    state: Arc<AppState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), IngestError> {
    let router = http_router(state);
    info!(%addr, "starting OTLP HTTP server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| IngestError::MalformedRequest(format!("bind {addr}: {e}")))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            info!("HTTP server shutting down");
        })
        .await
        .map_err(|e| IngestError::MalformedRequest(format!("http server: {e}")))
}

/// Watches SIGTERM/SIGINT and flips the shared shutdown signal once.
pub async fn shutdown_signal(tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    let _ = tx.send(true);
}
