use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use otlp_ingest_core::auth::HttpApiKeyService;
use otlp_ingest_core::dedup::RedisDeduplicationStore;
use otlp_ingest_core::memlimit::MemoryLimiter;
use otlp_ingest_core::pipeline::IngestionPipeline;
use otlp_ingest_core::server::{self, AppState, MemoryLimiterInterceptor};
use otlp_ingest_core::stream::KafkaStreamPublisher;
use otlp_ingest_core::Config;

#[cfg(all(not(windows), feature = "jemalloc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn init_tracing() -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let file_appender = RollingFileAppender::new("logs", Rotation::DAILY, "otlp-ingest.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(not(windows))]
fn build_memory_sampler() -> anyhow::Result<otlp_ingest_core::memlimit::JemallocSampler> {
    otlp_ingest_core::memlimit::JemallocSampler::new()
        .map_err(|e| anyhow::anyhow!("failed to initialize jemalloc sampler: {e}"))
}

#[cfg(windows)]
fn build_memory_sampler() -> anyhow::Result<otlp_ingest_core::memlimit::SysinfoSampler> {
    Ok(otlp_ingest_core::memlimit::SysinfoSampler::new())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing()?;

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(?config, "loaded configuration");

    let dedup = Arc::new(
        RedisDeduplicationStore::new(&config.dedup.redis_url)
            .context("failed to construct dedup store")?,
    );
    let stream = Arc::new(
        KafkaStreamPublisher::new(&config.stream.kafka_brokers, &config.stream.topic)
            .context("failed to construct stream publisher")?,
    );
    let api_keys = Arc::new(HttpApiKeyService::new(&config.auth.api_key_service_url));
    let pipeline = Arc::new(IngestionPipeline::new(dedup, stream));

    let sampler = build_memory_sampler()?;
    let limiter = Arc::new(MemoryLimiter::new(sampler, config.memory.clone()));
    let interceptor = MemoryLimiterInterceptor::new(limiter);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let grpc_addr = config.grpc_addr();
    let http_addr = config.http_addr();
    let http_state = Arc::new(AppState {
        pipeline: pipeline.clone(),
        api_keys: api_keys.clone(),
        memory_limiter: interceptor.clone(),
    });

    let grpc_handle = tokio::spawn({
        let config = config.clone();
        let pipeline = pipeline.clone();
        let api_keys = api_keys.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move {
            server::run_grpc(grpc_addr, &config, pipeline, interceptor, api_keys, shutdown_rx).await
        }
    });

    let http_handle = tokio::spawn(server::run_http(http_addr, http_state, shutdown_rx.clone()));

    tokio::spawn(server::shutdown_signal(shutdown_tx));

    let (grpc_result, http_result) = tokio::join!(grpc_handle, http_handle);
    grpc_result.context("gRPC server task panicked")??;
    http_result.context("HTTP server task panicked")??;

    Ok(())
}
