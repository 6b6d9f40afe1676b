//! Comprehensive monitoring and observability system
//!
//! This module provides a unified monitoring system that combines health checks,
//! metrics collection, and performance monitoring for the application.

use crate::error::{AppError, Result};
use crate::health::{HealthCheckConfig, HealthCheckResponse, HealthChecker, HealthStatus};
use crate::metrics::{DatabaseMetrics, MetricsCollector, RedisMetrics};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::System;
use tokio::time::interval;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Correlation id threaded through a single request or pipeline run, attached
/// to every structured log line and span emitted while handling it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

/// A single structured log line, correlation-id tagged, logged through
/// `tracing` and optionally mirrored to any future log-shipping sink.
#[derive(Debug, Serialize)]
pub struct StructuredLogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub correlation_id: String,
    pub level: String,
    pub service: String,
    pub operation: String,
    pub duration_ms: Option<u64>,
    pub status: String,
    pub message: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Comprehensive monitoring system
#[derive(Clone)]
pub struct MonitoringSystem {
    metrics: Arc<MetricsCollector>,
    health_checker: Arc<HealthChecker>,
    db_metrics: Arc<DatabaseMetrics>,
    redis_metrics: Arc<RedisMetrics>,
    start_time: Instant,
}

/// Monitoring configuration
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub health_check_interval: Duration,
    pub metrics_update_interval: Duration,
    pub system_metrics_enabled: bool,
    pub detailed_health_checks: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            metrics_update_interval: Duration::from_secs(10),
            system_metrics_enabled: true,
            detailed_health_checks: true,
        }
    }
}

/// System performance metrics
#[derive(Debug, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub memory_usage_bytes: u64,
    pub memory_usage_percent: f32,
    pub cpu_usage_percent: f32,
    pub uptime_seconds: u64,
    pub active_connections: u32,
    pub thread_count: u32,
}

/// Service performance metrics
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub database: DatabaseServiceMetrics,
    pub redis: RedisServiceMetrics,
    pub http: HttpServiceMetrics,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseServiceMetrics {
    pub active_connections: u32,
    pub idle_connections: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedisServiceMetrics {
    pub active_connections: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HttpServiceMetrics {
    pub total_requests: u64,
}

/// Combined monitoring response
#[derive(Debug, Serialize, Deserialize)]
pub struct MonitoringResponse {
    pub health: HealthCheckResponse,
    pub system_metrics: SystemMetrics,
    pub service_metrics: ServiceMetrics,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl MonitoringSystem {
    /// Create a new monitoring system
    pub fn new(config: MonitoringConfig) -> Result<Self> {
        let metrics = Arc::new(
            MetricsCollector::new()
                .map_err(|e| AppError::Internal(format!("failed to create metrics collector: {e}")))?,
        );

        let health_config = HealthCheckConfig {
            timeout: Duration::from_secs(5),
            include_system_info: config.system_metrics_enabled,
            detailed_checks: config.detailed_health_checks,
        };

        let health_checker = Arc::new(HealthChecker::new(health_config));
        let db_metrics = Arc::new(DatabaseMetrics::new(metrics.clone()));
        let redis_metrics = Arc::new(RedisMetrics::new(metrics.clone()));

        Ok(Self {
            metrics,
            health_checker,
            db_metrics,
            redis_metrics,
            start_time: Instant::now(),
        })
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn db_metrics(&self) -> Arc<DatabaseMetrics> {
        self.db_metrics.clone()
    }

    pub fn redis_metrics(&self) -> Arc<RedisMetrics> {
        self.redis_metrics.clone()
    }

    /// Record one completed HTTP request against the Prometheus histogram/counter pair.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        self.metrics.record_request_latency(method, path, status, duration);
    }

    /// Emit a structured log line tagged with its correlation id, at a level
    /// derived from the caller (see `middleware::tracing_middleware`).
    pub fn log_structured(&self, entry: StructuredLogEntry) {
        match entry.level.as_str() {
            "ERROR" => error!(
                correlation_id = %entry.correlation_id,
                operation = %entry.operation,
                duration_ms = entry.duration_ms,
                "{}",
                entry.message
            ),
            "WARN" => warn!(
                correlation_id = %entry.correlation_id,
                operation = %entry.operation,
                duration_ms = entry.duration_ms,
                "{}",
                entry.message
            ),
            _ => info!(
                correlation_id = %entry.correlation_id,
                operation = %entry.operation,
                duration_ms = entry.duration_ms,
                "{}",
                entry.message
            ),
        }
    }

    /// Perform comprehensive monitoring check
    pub async fn comprehensive_check(
        &self,
        db_pool: &sqlx::PgPool,
        redis_pool: &deadpool_redis::Pool,
    ) -> MonitoringResponse {
        let health = self.health_checker.check_health(db_pool, redis_pool).await;
        let system_metrics = self.get_system_metrics().await;
        let service_metrics = self.get_service_metrics(db_pool, redis_pool).await;

        MonitoringResponse {
            health,
            system_metrics,
            service_metrics,
            timestamp: chrono::Utc::now(),
        }
    }

    async fn get_system_metrics(&self) -> SystemMetrics {
        let mut sys = System::new_all();
        sys.refresh_all();

        let memory_usage_bytes = sys.used_memory();
        let total_memory = sys.total_memory();
        let memory_usage_percent = if total_memory > 0 {
            (memory_usage_bytes as f32 / total_memory as f32) * 100.0
        } else {
            0.0
        };

        let cpu_usage_percent = sys.global_cpu_info().cpu_usage();
        let uptime_seconds = self.start_time.elapsed().as_secs();

        self.metrics
            .update_system_metrics(memory_usage_bytes, cpu_usage_percent as f64, uptime_seconds);

        SystemMetrics {
            memory_usage_bytes,
            memory_usage_percent,
            cpu_usage_percent,
            uptime_seconds,
            active_connections: 0,
            thread_count: sys.processes().len() as u32,
        }
    }

    async fn get_service_metrics(
        &self,
        db_pool: &sqlx::PgPool,
        redis_pool: &deadpool_redis::Pool,
    ) -> ServiceMetrics {
        self.db_metrics.update_pool_metrics(db_pool);
        self.redis_metrics.update_pool_metrics(redis_pool);

        let db_active = (db_pool.size() as usize).saturating_sub(db_pool.num_idle()) as u32;
        let db_idle = db_pool.num_idle() as u32;

        let redis_status = redis_pool.status();
        let redis_active = (redis_status.size.saturating_sub(redis_status.available)) as u32;

        ServiceMetrics {
            database: DatabaseServiceMetrics {
                active_connections: db_active,
                idle_connections: db_idle,
            },
            redis: RedisServiceMetrics {
                active_connections: redis_active,
            },
            http: HttpServiceMetrics { total_requests: 0 },
        }
    }

    /// Start background monitoring tasks: periodic health logging and pool metric refresh.
    pub async fn start_background_monitoring(
        &self,
        config: MonitoringConfig,
        db_pool: sqlx::PgPool,
        redis_pool: deadpool_redis::Pool,
    ) {
        let monitoring = self.clone();

        tokio::spawn(async move {
            let mut health_interval = interval(config.health_check_interval);
            let mut metrics_interval = interval(config.metrics_update_interval);

            loop {
                tokio::select! {
                    _ = health_interval.tick() => {
                        let health = monitoring.health_checker.check_health(&db_pool, &redis_pool).await;

                        match health.status {
                            HealthStatus::Healthy => info!("health check passed: all services healthy"),
                            HealthStatus::Degraded => warn!("health check warning: some services degraded"),
                            HealthStatus::Unhealthy => error!("health check failed: services unhealthy"),
                        }
                    }

                    _ = metrics_interval.tick() => {
                        if config.system_metrics_enabled {
                            let _ = monitoring.get_system_metrics().await;
                        }

                        monitoring.db_metrics.update_pool_metrics(&db_pool);
                        monitoring.redis_metrics.update_pool_metrics(&redis_pool);
                    }
                }
            }
        });
    }
}

/// Alert thresholds for monitoring
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub max_memory_usage_percent: f32,
    pub max_cpu_usage_percent: f32,
    pub min_available_connections: u32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_memory_usage_percent: 80.0,
            max_cpu_usage_percent: 80.0,
            min_available_connections: 5,
        }
    }
}

/// Alert manager for monitoring thresholds
pub struct AlertManager {
    thresholds: AlertThresholds,
}

impl AlertManager {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    pub fn check_alerts(&self, monitoring_response: &MonitoringResponse) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if monitoring_response.system_metrics.memory_usage_percent
            > self.thresholds.max_memory_usage_percent
        {
            alerts.push(Alert {
                severity: AlertSeverity::Warning,
                message: format!(
                    "high memory usage: {:.1}% (threshold: {:.1}%)",
                    monitoring_response.system_metrics.memory_usage_percent,
                    self.thresholds.max_memory_usage_percent
                ),
                metric: "memory_usage_percent".to_string(),
            });
        }

        if monitoring_response.system_metrics.cpu_usage_percent > self.thresholds.max_cpu_usage_percent
        {
            alerts.push(Alert {
                severity: AlertSeverity::Warning,
                message: format!(
                    "high CPU usage: {:.1}% (threshold: {:.1}%)",
                    monitoring_response.system_metrics.cpu_usage_percent,
                    self.thresholds.max_cpu_usage_percent
                ),
                metric: "cpu_usage_percent".to_string(),
            });
        }

        let db_available = monitoring_response.service_metrics.database.idle_connections;
        if db_available < self.thresholds.min_available_connections {
            alerts.push(Alert {
                severity: AlertSeverity::Critical,
                message: format!(
                    "low database connections available: {} (threshold: {})",
                    db_available, self.thresholds.min_available_connections
                ),
                metric: "db_available_connections".to_string(),
            });
        }

        alerts
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub message: String,
    pub metric: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_monitoring_system_creation() {
        let config = MonitoringConfig::default();
        let monitoring = MonitoringSystem::new(config).expect("failed to create monitoring system");

        let metrics_text = monitoring.metrics().get_metrics().expect("failed to get metrics");
        assert!(!metrics_text.is_empty());
    }

    #[test]
    fn correlation_id_roundtrips() {
        let id = CorrelationId::from_string("abc-123".to_string());
        assert_eq!(id.as_str(), "abc-123");
    }

    #[test]
    fn test_alert_manager_flags_high_memory() {
        let alert_manager = AlertManager::new(AlertThresholds::default());

        let monitoring_response = MonitoringResponse {
            health: HealthCheckResponse {
                status: HealthStatus::Healthy,
                timestamp: chrono::Utc::now(),
                correlation_id: "test".to_string(),
                version: "test".to_string(),
                uptime_seconds: 100,
                services: std::collections::HashMap::new(),
                system_info: crate::health::SystemInfo {
                    memory_usage_mb: 1000,
                    cpu_usage_percent: 50.0,
                    disk_usage_percent: 30.0,
                    active_connections: 10,
                },
            },
            system_metrics: SystemMetrics {
                memory_usage_bytes: 1_000_000_000,
                memory_usage_percent: 85.0,
                cpu_usage_percent: 50.0,
                uptime_seconds: 100,
                active_connections: 10,
                thread_count: 5,
            },
            service_metrics: ServiceMetrics {
                database: DatabaseServiceMetrics {
                    active_connections: 5,
                    idle_connections: 10,
                },
                redis: RedisServiceMetrics { active_connections: 2 },
                http: HttpServiceMetrics { total_requests: 1000 },
            },
            timestamp: chrono::Utc::now(),
        };

        let alerts = alert_manager.check_alerts(&monitoring_response);
        assert!(alerts.iter().any(|a| a.metric == "memory_usage_percent"));
    }
}
