//! Thin helpers over the Redis pool: consistent key naming and JSON (de)serialization.
//!
//! Key discipline mirrors the `{namespace}:{id}` convention used throughout the
//! rate limiter and sync coordinator so a operator can `SCAN` by prefix.

use std::fmt::Display;
use std::time::Duration;

use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ApiRequestMetadata, SyncState};

#[derive(Clone)]
pub struct Cache {
    pool: Pool,
}

/// Fluent key composer generalizing the ad hoc `format!("rate_limit:{}", id)`
/// style keys into one typed builder, so every call site gets the same
/// `{namespace}:{segment}:{segment}` shape and an explicit TTL.
pub struct CacheKey {
    namespace: &'static str,
    segments: Vec<String>,
    ttl: Duration,
}

impl CacheKey {
    pub fn new(namespace: &'static str) -> Self {
        Self {
            namespace,
            segments: Vec::new(),
            ttl: Duration::from_secs(0),
        }
    }

    pub fn segment(mut self, value: impl Display) -> Self {
        self.segments.push(value.to_string());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl.as_secs()
    }

    pub fn build(&self) -> String {
        let mut key = self.namespace.to_string();
        for segment in &self.segments {
            key.push(':');
            key.push_str(segment);
        }
        key
    }
}

/// A single row of a `ZRANGE ... WITHSCORES` reply: the sorted-set member and
/// its score, used by the rate limiter to read back request timestamps.
pub type ScoredMember = (String, f64);

/// The `{releaseIDs, queued_at}` shape published at `release_queue:{userId}` (§6).
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
struct ReleaseQueueRecord {
    release_ids: Vec<i64>,
    queued_at: chrono::DateTime<chrono::Utc>,
}

impl Cache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn rate_limit_key(user_id: Uuid) -> String {
        format!("rate:{user_id}")
    }

    pub fn sync_state_key(user_id: Uuid) -> String {
        format!("sync:state:{user_id}")
    }

    pub fn sync_lock_key(user_id: Uuid) -> String {
        format!("sync:lock:{user_id}")
    }

    pub fn api_request_key(request_id: Uuid) -> String {
        format!("api_request:{request_id}")
    }

    pub fn release_queue_key(user_id: Uuid) -> String {
        format!("release_queue:{user_id}")
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        let mut conn = self.pool.get().await.map_err(redis_pool_err)?;
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s).map_err(|e| {
                AppError::Internal(format!("corrupt cache entry at {key}: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<(), AppError> {
        let mut conn = self.pool.get().await.map_err(redis_pool_err)?;
        let raw = serde_json::to_string(value)
            .map_err(|e| AppError::Internal(format!("failed to serialize cache entry: {e}")))?;
        let _: () = conn.set_ex(key, raw, ttl_seconds).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.pool.get().await.map_err(redis_pool_err)?;
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Convenience wrapper for reading a user's in-flight `SyncState`.
    pub async fn get_sync_state(&self, user_id: Uuid) -> Result<Option<SyncState>, AppError> {
        self.get_json(&Self::sync_state_key(user_id)).await
    }

    /// Persists a user's `SyncState`, refreshing its TTL on every write so the
    /// cache entry outlives the whole multi-page sync (§8).
    pub async fn set_sync_state(
        &self,
        user_id: Uuid,
        state: &SyncState,
        ttl_seconds: u64,
    ) -> Result<(), AppError> {
        self.set_json(&Self::sync_state_key(user_id), state, ttl_seconds)
            .await
    }

    pub async fn clear_sync_state(&self, user_id: Uuid) -> Result<(), AppError> {
        self.delete(&Self::sync_state_key(user_id)).await
    }

    /// Records metadata for one outstanding proxied request, so an inbound
    /// response can be correlated back to the user/folder/page it answers.
    pub async fn set_api_request(
        &self,
        metadata: &ApiRequestMetadata,
        ttl_seconds: u64,
    ) -> Result<(), AppError> {
        self.set_json(&Self::api_request_key(metadata.request_id), metadata, ttl_seconds)
            .await
    }

    pub async fn get_api_request(&self, request_id: Uuid) -> Result<Option<ApiRequestMetadata>, AppError> {
        self.get_json(&Self::api_request_key(request_id)).await
    }

    pub async fn clear_api_request(&self, request_id: Uuid) -> Result<(), AppError> {
        self.delete(&Self::api_request_key(request_id)).await
    }

    /// Best-effort observability record of which releases a sync is waiting
    /// on (§6); not load-bearing for correctness, which lives in
    /// `SyncState.pending_release_requests`.
    pub async fn set_release_queue(
        &self,
        user_id: Uuid,
        release_ids: &[i64],
        ttl_seconds: u64,
    ) -> Result<(), AppError> {
        let record = ReleaseQueueRecord {
            release_ids: release_ids.to_vec(),
            queued_at: chrono::Utc::now(),
        };
        self.set_json(&Self::release_queue_key(user_id), &record, ttl_seconds)
            .await
    }

    pub async fn clear_release_queue(&self, user_id: Uuid) -> Result<(), AppError> {
        self.delete(&Self::release_queue_key(user_id)).await
    }

    /// `ZADD key score member`. The rate limiter scores each admitted request
    /// by its own unix-millis timestamp so the member doubles as a tiebreaker.
    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), AppError> {
        let mut conn = self.pool.get().await.map_err(redis_pool_err)?;
        let _: i64 = conn.zadd(key, member, score).await?;
        Ok(())
    }

    /// `ZREMRANGEBYSCORE key -inf max_score`: evicts every entry older than
    /// the sliding window's lower bound.
    pub async fn zremrangebyscore_upto(&self, key: &str, max_score: f64) -> Result<i64, AppError> {
        let mut conn = self.pool.get().await.map_err(redis_pool_err)?;
        let removed: i64 = conn.zrembyscore(key, f64::NEG_INFINITY, max_score).await?;
        Ok(removed)
    }

    /// `ZCARD key`: the number of requests currently inside the window.
    pub async fn zcard(&self, key: &str) -> Result<i64, AppError> {
        let mut conn = self.pool.get().await.map_err(redis_pool_err)?;
        let count: i64 = conn.zcard(key).await?;
        Ok(count)
    }

    /// `ZRANGE key 0 -1 WITHSCORES`: every surviving entry and its timestamp,
    /// used to compute the next admission deadline.
    pub async fn zrange_withscores(&self, key: &str) -> Result<Vec<ScoredMember>, AppError> {
        let mut conn = self.pool.get().await.map_err(redis_pool_err)?;
        let rows: Vec<ScoredMember> = conn.zrange_withscores(key, 0, -1).await?;
        Ok(rows)
    }

    /// Applies a TTL to a key that has no built-in expiry (sorted sets are
    /// never written with `SET EX`, so the window key needs this separately).
    pub async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<(), AppError> {
        let mut conn = self.pool.get().await.map_err(redis_pool_err)?;
        let _: bool = conn.expire(key, ttl_seconds).await?;
        Ok(())
    }

    pub async fn get_by_key<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>, AppError> {
        self.get_json(&key.build()).await
    }

    pub async fn set_by_key<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<(), AppError> {
        self.set_json(&key.build(), value, key.ttl_seconds()).await
    }
}

fn redis_pool_err(e: deadpool_redis::PoolError) -> AppError {
    AppError::Internal(format!("redis pool error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_builds_colon_separated_segments() {
        let key = CacheKey::new("collection_sync")
            .segment(Uuid::nil())
            .ttl(Duration::from_secs(7200));
        assert_eq!(key.build(), format!("collection_sync:{}", Uuid::nil()));
        assert_eq!(key.ttl_seconds(), 7200);
    }
}
