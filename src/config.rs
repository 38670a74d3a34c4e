//! Layered configuration: defaults → optional file → `INGEST_*` env vars.
//!
//! Mirrors the `config` crate's standard layering; durations are parsed with
//! `humantime_serde` so values in config files/env read as human-readable
//! durations (`"24h"`, `"60s"`).

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::IngestError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub soft_limit_mib: u64,
    pub spike_limit_mib: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            soft_limit_mib: 1_500,
            spike_limit_mib: 512,
        }
    }
}

impl MemoryConfig {
    pub fn soft_limit_bytes(&self) -> u64 {
        self.soft_limit_mib * 1024 * 1024
    }

    pub fn hard_limit_bytes(&self) -> u64 {
        (self.soft_limit_mib + self.spike_limit_mib) * 1024 * 1024
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    #[serde(with = "humantime_serde")]
    pub server_ping_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub server_ping_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub client_min_ping_interval: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            server_ping_interval: Duration::from_secs(60),
            server_ping_timeout: Duration::from_secs(20),
            client_min_ping_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    pub redis_url: String,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub kafka_brokers: String,
    pub topic: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            kafka_brokers: "127.0.0.1:9092".to_string(),
            topic: "telemetry-events".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrpcConfig {
    pub port: u16,
    pub max_message_bytes: usize,
    pub keepalive: KeepaliveConfig,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            port: 4317,
            max_message_bytes: 10 * 1024 * 1024,
            keepalive: KeepaliveConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: 4318 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Base URL of the external API-key validator service.
    pub api_key_service_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key_service_url: "http://127.0.0.1:8090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub grpc: GrpcConfig,
    pub http: HttpConfig,
    pub memory: MemoryConfig,
    pub dedup: DedupConfig,
    pub stream: StreamConfig,
    pub auth: AuthConfig,
}

impl Config {
    /// Loads configuration from (in increasing priority): built-in defaults,
    /// an optional `config/ingest.toml` / path given by `INGEST_CONFIG_FILE`,
    /// then `INGEST_*` environment variables (double-underscore nested,
    /// e.g. `INGEST_MEMORY__SOFT_LIMIT_MIB=2000`).
    pub fn load() -> Result<Self, IngestError> {
        let mut builder = config::Config::builder();

        let config_path =
            std::env::var("INGEST_CONFIG_FILE").unwrap_or_else(|_| "config/ingest.toml".into());
        builder = builder.add_source(config::File::with_name(&config_path).required(false));

        builder = builder.add_source(
            config::Environment::with_prefix("INGEST")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn grpc_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.grpc.port))
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.http.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.grpc.port, 4317);
        assert_eq!(cfg.memory.soft_limit_mib, 1_500);
        assert_eq!(cfg.memory.spike_limit_mib, 512);
        assert_eq!(cfg.dedup.ttl, Duration::from_secs(24 * 3600));
        assert_eq!(cfg.grpc.keepalive.server_ping_interval, Duration::from_secs(60));
        assert_eq!(cfg.grpc.keepalive.server_ping_timeout, Duration::from_secs(20));
        assert_eq!(
            cfg.grpc.keepalive.client_min_ping_interval,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn memory_limit_math() {
        let mem = MemoryConfig {
            soft_limit_mib: 1_500,
            spike_limit_mib: 512,
        };
        assert_eq!(mem.soft_limit_bytes(), 1_500 * 1024 * 1024);
        assert_eq!(mem.hard_limit_bytes(), 2_012 * 1024 * 1024);
    }
}
