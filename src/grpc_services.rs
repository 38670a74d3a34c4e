//! gRPC service implementations.
//!
//! Each of the three OTLP collector services performs auth itself (the
//! memory-limiter gate already ran in the `Interceptor` before the request
//! reached here), then hands the inner request to `IngestionPipeline` and
//! translates `IngestError` to `tonic::Status`. OTLP responses are empty on
//! success.

use std::sync::Arc;

use opentelemetry_proto::tonic::collector::logs::v1::logs_service_server::LogsService;
use opentelemetry_proto::tonic::collector::logs::v1::{
    ExportLogsPartialSuccess, ExportLogsServiceRequest, ExportLogsServiceResponse,
};
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_server::MetricsService;
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsPartialSuccess, ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::TraceService;
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTracePartialSuccess, ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use tonic::{Request, Response, Status};

use crate::auth::{extract_api_key, ApiKeyService};
use crate::pipeline::IngestionPipeline;

async fn authenticate<T>(
    request: &Request<T>,
    api_keys: &dyn ApiKeyService,
) -> Result<String, Status> {
    let authorization = request
        .metadata()
        .get("authorization")
        .and_then(|v| v.to_str().ok());
    let x_api_key = request
        .metadata()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    let key = extract_api_key(authorization, x_api_key)?;
    let ctx = api_keys.validate_api_key(&key).await?;
    Ok(ctx.project_id)
}

pub struct OtlpTraceService {
    pipeline: Arc<IngestionPipeline>,
    api_keys: Arc<dyn ApiKeyService>,
}

impl OtlpTraceService {
    pub fn new(pipeline: Arc<IngestionPipeline>, api_keys: Arc<dyn ApiKeyService>) -> Self {
        Self { pipeline, api_keys }
    }
}

#[tonic::async_trait]
impl TraceService for OtlpTraceService {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let project_id = authenticate(&request, self.api_keys.as_ref()).await?;
        let req = request.into_inner();
        self.pipeline
            .ingest_traces(&project_id, "otlp-grpc", &req)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: Some(ExportTracePartialSuccess {
                rejected_spans: 0,
                error_message: String::new(),
            }),
        }))
    }
}

pub struct OtlpMetricsService {
    pipeline: Arc<IngestionPipeline>,
    api_keys: Arc<dyn ApiKeyService>,
}

impl OtlpMetricsService {
    pub fn new(pipeline: Arc<IngestionPipeline>, api_keys: Arc<dyn ApiKeyService>) -> Self {
        Self { pipeline, api_keys }
    }
}

#[tonic::async_trait]
impl MetricsService for OtlpMetricsService {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        let project_id = authenticate(&request, self.api_keys.as_ref()).await?;
        let req = request.into_inner();
        self.pipeline
            .ingest_metrics(&project_id, "otlp-grpc-metrics", &req)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(ExportMetricsServiceResponse {
            partial_success: Some(ExportMetricsPartialSuccess {
                rejected_data_points: 0,
                error_message: String::new(),
            }),
        }))
    }
}

pub struct OtlpLogsService {
    pipeline: Arc<IngestionPipeline>,
    api_keys: Arc<dyn ApiKeyService>,
}

impl OtlpLogsService {
    pub fn new(pipeline: Arc<IngestionPipeline>, api_keys: Arc<dyn ApiKeyService>) -> Self {
        Self { pipeline, api_keys }
    }
}

#[tonic::async_trait]
impl LogsService for OtlpLogsService {
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> Result<Response<ExportLogsServiceResponse>, Status> {
        let project_id = authenticate(&request, self.api_keys.as_ref()).await?;
        let req = request.into_inner();
        self.pipeline
            .ingest_logs(&project_id, "otlp-grpc-logs", &req)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(ExportLogsServiceResponse {
            partial_success: Some(ExportLogsPartialSuccess {
                rejected_log_records: 0,
                error_message: String::new(),
            }),
        }))
    }
}
