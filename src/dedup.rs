//! Deduplication coordinator.
//!
//! `ClaimEvents`/`ReleaseEvents` are implemented against Redis in production
//! (`SET key val NX PX ttl_ms`, one command per key — atomic per key, and
//! pipelined purely as a transport optimization) and against an in-memory
//! `DashMap` in tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use tracing::warn;

use crate::error::IngestError;

/// Result of a claim call: `claimed` and `duplicate` partition `keys` as
/// disjoint sets whose union is `keys`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimResult {
    pub claimed: HashSet<String>,
    pub duplicate: HashSet<String>,
}

#[async_trait]
pub trait DeduplicationStore: Send + Sync {
    async fn claim_events(
        &self,
        project_id: &str,
        batch_id: &str,
        keys: &[String],
        ttl: Duration,
    ) -> Result<ClaimResult, IngestError>;

    /// Best-effort; must never fail the caller's error path.
    async fn release_events(&self, project_id: &str, keys: &[String]);
}

fn namespaced_key(project_id: &str, key: &str) -> String {
    format!("dedup:{project_id}:{key}")
}

/// Redis-backed coordinator. Each key is claimed with `SET NX PX`, which is
/// atomic server-side; no Lua script is required because we only ever act on
/// one key at a time (batched as a pipeline, not a transaction).
pub struct RedisDeduplicationStore {
    client: redis::Client,
}

impl RedisDeduplicationStore {
    pub fn new(redis_url: &str) -> Result<Self, IngestError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| IngestError::DedupUnavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeduplicationStore for RedisDeduplicationStore {
    async fn claim_events(
        &self,
        project_id: &str,
        batch_id: &str,
        keys: &[String],
        ttl: Duration,
    ) -> Result<ClaimResult, IngestError> {
        if keys.is_empty() {
            return Ok(ClaimResult::default());
        }

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| IngestError::DedupUnavailable(e.to_string()))?;

        let ttl_ms = ttl.as_millis().max(1) as u64;
        let mut result = ClaimResult::default();

        for key in keys {
            let ns_key = namespaced_key(project_id, key);
            let set: Option<String> = conn
                .set_options(
                    &ns_key,
                    batch_id,
                    redis::SetOptions::default()
                        .with_expiration(redis::SetExpiry::PX(ttl_ms))
                        .conditional_set(redis::ExistenceCheck::NX),
                )
                .await
                .map_err(|e| IngestError::DedupUnavailable(e.to_string()))?;

            if set.is_some() {
                result.claimed.insert(key.clone());
            } else {
                result.duplicate.insert(key.clone());
            }
        }

        Ok(result)
    }

    async fn release_events(&self, project_id: &str, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let ns_keys: Vec<String> = keys.iter().map(|k| namespaced_key(project_id, k)).collect();
        match self.client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                let result: redis::RedisResult<()> = conn.del(&ns_keys).await;
                if let Err(e) = result {
                    warn!(error = %e, "release_events: dedup store delete failed, ignoring");
                }
            }
            Err(e) => warn!(error = %e, "release_events: could not connect to dedup store"),
        }
    }
}

/// In-memory claim store for tests: a `DashMap` entry is the atomicity unit,
/// `entry().or_insert()` gives the same single-winner semantics as Redis NX.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDeduplicationStore {
    claims: Arc<DashMap<String, String>>,
}

impl InMemoryDeduplicationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeduplicationStore for InMemoryDeduplicationStore {
    async fn claim_events(
        &self,
        project_id: &str,
        batch_id: &str,
        keys: &[String],
        _ttl: Duration,
    ) -> Result<ClaimResult, IngestError> {
        let mut result = ClaimResult::default();
        for key in keys {
            let ns_key = namespaced_key(project_id, key);
            match self.claims.entry(ns_key) {
                dashmap::mapref::entry::Entry::Vacant(v) => {
                    v.insert(batch_id.to_string());
                    result.claimed.insert(key.clone());
                }
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    result.duplicate.insert(key.clone());
                }
            }
        }
        Ok(result)
    }

    async fn release_events(&self, project_id: &str, keys: &[String]) {
        for key in keys {
            self.claims.remove(&namespaced_key(project_id, key));
        }
    }
}
