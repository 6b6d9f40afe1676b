//! Health, readiness, and liveness probes for Postgres and Redis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::database::redis_health_check;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub memory_usage_mb: u64,
    pub cpu_usage_percent: f32,
    pub disk_usage_percent: f32,
    pub active_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCheck {
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub services: HashMap<String, ServiceCheck>,
    pub system_info: SystemInfo,
}

#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub timeout: Duration,
    pub include_system_info: bool,
    pub detailed_checks: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            include_system_info: true,
            detailed_checks: true,
        }
    }
}

/// Checks the database and cache the service depends on and folds the
/// results into a single status, using a "worst service wins" aggregation.
pub struct HealthChecker {
    config: HealthCheckConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    pub async fn check_health(
        &self,
        db_pool: &sqlx::PgPool,
        redis_pool: &deadpool_redis::Pool,
    ) -> HealthCheckResponse {
        let mut services = HashMap::new();

        let db_start = Instant::now();
        let db_ok = tokio::time::timeout(self.config.timeout, async {
            sqlx::query("SELECT 1").execute(db_pool).await.is_ok()
        })
        .await
        .unwrap_or(false);
        services.insert(
            "postgres".to_string(),
            ServiceCheck {
                status: if db_ok {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Unhealthy
                },
                response_time_ms: db_start.elapsed().as_millis() as u64,
                message: if db_ok {
                    None
                } else {
                    Some("database ping failed".to_string())
                },
            },
        );

        let redis_start = Instant::now();
        let redis_ok =
            tokio::time::timeout(self.config.timeout, redis_health_check(redis_pool))
                .await
                .unwrap_or(false);
        services.insert(
            "redis".to_string(),
            ServiceCheck {
                status: if redis_ok {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Unhealthy
                },
                response_time_ms: redis_start.elapsed().as_millis() as u64,
                message: if redis_ok {
                    None
                } else {
                    Some("redis ping failed".to_string())
                },
            },
        );

        let overall = if services.values().all(|c| c.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else if services.values().any(|c| c.status == HealthStatus::Healthy) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        HealthCheckResponse {
            status: overall,
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            services,
            system_info: SystemInfo {
                memory_usage_mb: 0,
                cpu_usage_percent: 0.0,
                disk_usage_percent: 0.0,
                active_connections: (db_pool.size() as usize).saturating_sub(db_pool.num_idle()) as u32,
            },
        }
    }
}

/// Lightweight readiness probe: both dependencies must answer, no detailed breakdown.
pub async fn readiness_check(db_pool: &sqlx::PgPool, redis_pool: &deadpool_redis::Pool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(db_pool)
        .await
        .map_err(AppError::from)?;

    if !redis_health_check(redis_pool).await {
        return Err(AppError::RedisOperationFailed(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "redis not ready",
        ))));
    }

    Ok(())
}

/// Liveness probe: the process is running and can schedule async work. No
/// external dependency is consulted, matching Kubernetes liveness semantics.
pub async fn liveness_check() -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_timeout() {
        let config = HealthCheckConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        assert!(liveness_check().await.is_ok());
    }
}
