//! Prometheus metrics collection and monitoring
//!
//! Comprehensive metrics for the HTTP surface, database/Redis pools, system
//! resource usage, and the ingestion/rate-limiter business metrics CORE-A and
//! CORE-B are required to expose.

use axum::{
    body::Body,
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use sysinfo::{Disks, System};

/// Metrics collector with Prometheus integration
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,

    // HTTP metrics
    http_requests_total: CounterVec,
    http_request_duration: HistogramVec,
    http_requests_in_flight: Gauge,
    http_request_latency: HistogramVec,

    // Database metrics
    db_connections_active: Gauge,
    db_connections_idle: Gauge,
    db_query_duration: HistogramVec,
    db_operations_total: CounterVec,

    // Redis metrics
    redis_connections_active: Gauge,
    redis_operations_total: CounterVec,
    redis_operation_duration: HistogramVec,

    // System metrics
    memory_usage_bytes: Gauge,
    memory_rss_bytes: Gauge,
    memory_heap_bytes: Gauge,
    cpu_usage_percent: Gauge,
    uptime_seconds: Gauge,

    // Disk metrics
    disk_usage_bytes: Gauge,
    disk_available_bytes: Gauge,
    disk_total_bytes: Gauge,

    // Rate limiter metrics (§4.1.1)
    rate_limit_admissions_total: CounterVec,
    rate_limit_retry_after_seconds: HistogramVec,

    // Ingestion pipeline metrics (§4.6)
    ingest_entities_processed_total: CounterVec,
    ingest_parse_errors_total: CounterVec,
    ingest_batch_flush_duration: HistogramVec,

    // Collection sync metrics (§4.7)
    sync_folder_pages_total: CounterVec,
    sync_commits_total: CounterVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with all metrics registered
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests")
                .namespace("cratesync")
                .subsystem("http"),
            &["method", "endpoint", "status_code"],
        )?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .namespace("cratesync")
            .subsystem("http")
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["method", "endpoint"],
        )?;

        let http_requests_in_flight = Gauge::new(
            "cratesync_http_requests_in_flight",
            "Number of HTTP requests currently being processed",
        )?;

        let http_request_latency = HistogramVec::new(
            HistogramOpts::new(
                "http_request_latency_seconds",
                "HTTP request latency in seconds for percentile calculations",
            )
            .namespace("cratesync")
            .subsystem("http")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
            &["method", "path", "status_code"],
        )?;

        let db_connections_active = Gauge::new(
            "cratesync_db_connections_active",
            "Number of active database connections",
        )?;

        let db_connections_idle = Gauge::new(
            "cratesync_db_connections_idle",
            "Number of idle database connections",
        )?;

        let db_query_duration = HistogramVec::new(
            HistogramOpts::new(
                "db_query_duration_seconds",
                "Database query duration in seconds",
            )
            .namespace("cratesync")
            .subsystem("db")
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["operation", "table"],
        )?;

        let db_operations_total = CounterVec::new(
            Opts::new("db_operations_total", "Total number of database operations")
                .namespace("cratesync")
                .subsystem("db"),
            &["operation", "table", "status"],
        )?;

        let redis_connections_active = Gauge::new(
            "cratesync_redis_connections_active",
            "Number of active Redis connections",
        )?;

        let redis_operations_total = CounterVec::new(
            Opts::new("redis_operations_total", "Total number of Redis operations")
                .namespace("cratesync")
                .subsystem("redis"),
            &["operation", "status"],
        )?;

        let redis_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "redis_operation_duration_seconds",
                "Redis operation duration in seconds",
            )
            .namespace("cratesync")
            .subsystem("redis")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            &["operation"],
        )?;

        let memory_usage_bytes = Gauge::new(
            "cratesync_memory_usage_bytes",
            "Current total memory usage in bytes",
        )?;

        let memory_rss_bytes = Gauge::new(
            "cratesync_memory_rss_bytes",
            "Process resident set size (RSS) in bytes",
        )?;

        let memory_heap_bytes = Gauge::new(
            "cratesync_memory_heap_bytes",
            "Process heap memory usage estimate in bytes",
        )?;

        let cpu_usage_percent =
            Gauge::new("cratesync_cpu_usage_percent", "Current CPU usage percentage")?;

        let uptime_seconds = Gauge::new("cratesync_uptime_seconds", "Application uptime in seconds")?;

        let disk_usage_bytes = Gauge::new(
            "cratesync_disk_usage_bytes",
            "Disk space used by the dump directory in bytes",
        )?;

        let disk_available_bytes = Gauge::new(
            "cratesync_disk_available_bytes",
            "Available disk space for the dump directory in bytes",
        )?;

        let disk_total_bytes = Gauge::new(
            "cratesync_disk_total_bytes",
            "Total disk space for the dump directory in bytes",
        )?;

        let rate_limit_admissions_total = CounterVec::new(
            Opts::new(
                "rate_limit_admissions_total",
                "Rate limiter admission outcomes",
            )
            .namespace("cratesync")
            .subsystem("ratelimit"),
            &["outcome"],
        )?;

        let rate_limit_retry_after_seconds = HistogramVec::new(
            HistogramOpts::new(
                "rate_limit_retry_after_seconds",
                "Computed retry-after delay when a bucket is saturated",
            )
            .namespace("cratesync")
            .subsystem("ratelimit")
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
            &["user_bucket"],
        )?;

        let ingest_entities_processed_total = CounterVec::new(
            Opts::new(
                "ingest_entities_processed_total",
                "Entities flushed to the store during bulk ingestion",
            )
            .namespace("cratesync")
            .subsystem("ingest"),
            &["kind"],
        )?;

        let ingest_parse_errors_total = CounterVec::new(
            Opts::new(
                "ingest_parse_errors_total",
                "Per-element decode errors encountered while streaming a dump",
            )
            .namespace("cratesync")
            .subsystem("ingest"),
            &["kind"],
        )?;

        let ingest_batch_flush_duration = HistogramVec::new(
            HistogramOpts::new(
                "ingest_batch_flush_duration_seconds",
                "Duration of a buffer worker's batch upsert",
            )
            .namespace("cratesync")
            .subsystem("ingest")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0]),
            &["kind"],
        )?;

        let sync_folder_pages_total = CounterVec::new(
            Opts::new(
                "sync_folder_pages_total",
                "Folder pages processed by the collection sync coordinator",
            )
            .namespace("cratesync")
            .subsystem("sync"),
            &["outcome"],
        )?;

        let sync_commits_total = CounterVec::new(
            Opts::new(
                "sync_commits_total",
                "Collection sync differential commits",
            )
            .namespace("cratesync")
            .subsystem("sync"),
            &["outcome"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(http_requests_in_flight.clone()))?;
        registry.register(Box::new(http_request_latency.clone()))?;
        registry.register(Box::new(db_connections_active.clone()))?;
        registry.register(Box::new(db_connections_idle.clone()))?;
        registry.register(Box::new(db_query_duration.clone()))?;
        registry.register(Box::new(db_operations_total.clone()))?;
        registry.register(Box::new(redis_connections_active.clone()))?;
        registry.register(Box::new(redis_operations_total.clone()))?;
        registry.register(Box::new(redis_operation_duration.clone()))?;
        registry.register(Box::new(memory_usage_bytes.clone()))?;
        registry.register(Box::new(memory_rss_bytes.clone()))?;
        registry.register(Box::new(memory_heap_bytes.clone()))?;
        registry.register(Box::new(cpu_usage_percent.clone()))?;
        registry.register(Box::new(uptime_seconds.clone()))?;
        registry.register(Box::new(disk_usage_bytes.clone()))?;
        registry.register(Box::new(disk_available_bytes.clone()))?;
        registry.register(Box::new(disk_total_bytes.clone()))?;
        registry.register(Box::new(rate_limit_admissions_total.clone()))?;
        registry.register(Box::new(rate_limit_retry_after_seconds.clone()))?;
        registry.register(Box::new(ingest_entities_processed_total.clone()))?;
        registry.register(Box::new(ingest_parse_errors_total.clone()))?;
        registry.register(Box::new(ingest_batch_flush_duration.clone()))?;
        registry.register(Box::new(sync_folder_pages_total.clone()))?;
        registry.register(Box::new(sync_commits_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            http_requests_in_flight,
            http_request_latency,
            db_connections_active,
            db_connections_idle,
            db_query_duration,
            db_operations_total,
            redis_connections_active,
            redis_operations_total,
            redis_operation_duration,
            memory_usage_bytes,
            memory_rss_bytes,
            memory_heap_bytes,
            cpu_usage_percent,
            uptime_seconds,
            disk_usage_bytes,
            disk_available_bytes,
            disk_total_bytes,
            rate_limit_admissions_total,
            rate_limit_retry_after_seconds,
            ingest_entities_processed_total,
            ingest_parse_errors_total,
            ingest_batch_flush_duration,
            sync_folder_pages_total,
            sync_commits_total,
        })
    }

    pub fn record_http_request(
        &self,
        method: &Method,
        endpoint: &str,
        status_code: StatusCode,
        duration: std::time::Duration,
    ) {
        let status_str = status_code.as_u16().to_string();

        self.http_requests_total
            .with_label_values(&[method.as_str(), endpoint, &status_str])
            .inc();

        self.http_request_duration
            .with_label_values(&[method.as_str(), endpoint])
            .observe(duration.as_secs_f64());
    }

    /// Labels: method, path, status_code. Buckets: 10ms..5000ms.
    pub fn record_request_latency(
        &self,
        method: &str,
        path: &str,
        status_code: u16,
        duration: std::time::Duration,
    ) {
        self.http_request_latency
            .with_label_values(&[method, path, &status_code.to_string()])
            .observe(duration.as_secs_f64());
    }

    pub fn increment_in_flight_requests(&self) {
        self.http_requests_in_flight.inc();
    }

    pub fn decrement_in_flight_requests(&self) {
        self.http_requests_in_flight.dec();
    }

    pub fn update_db_connections(&self, active: u32, idle: u32) {
        self.db_connections_active.set(active as f64);
        self.db_connections_idle.set(idle as f64);
    }

    pub fn record_db_operation(
        &self,
        operation: &str,
        table: &str,
        duration: std::time::Duration,
        success: bool,
    ) {
        let status = if success { "success" } else { "error" };

        self.db_operations_total
            .with_label_values(&[operation, table, status])
            .inc();

        self.db_query_duration
            .with_label_values(&[operation, table])
            .observe(duration.as_secs_f64());
    }

    pub fn update_redis_connections(&self, active: u32) {
        self.redis_connections_active.set(active as f64);
    }

    pub fn record_redis_operation(&self, operation: &str, duration: std::time::Duration, success: bool) {
        let status = if success { "success" } else { "error" };

        self.redis_operations_total
            .with_label_values(&[operation, status])
            .inc();

        self.redis_operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    pub fn update_system_metrics(&self, memory_bytes: u64, cpu_percent: f64, uptime_seconds: u64) {
        self.memory_usage_bytes.set(memory_bytes as f64);
        self.cpu_usage_percent.set(cpu_percent);
        self.uptime_seconds.set(uptime_seconds as f64);
    }

    /// Collect real process/system metrics (CPU, memory, disk) using `sysinfo`.
    pub fn collect_real_system_metrics(&self, data_dir: &Path, uptime_secs: u64) {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu_percent = if sys.cpus().is_empty() {
            0.0
        } else {
            sys.cpus().iter().map(|cpu| cpu.cpu_usage()).sum::<f32>() / sys.cpus().len() as f32
        };
        self.cpu_usage_percent.set(cpu_percent as f64);

        let total_memory_used = sys.used_memory();
        self.memory_usage_bytes.set(total_memory_used as f64);

        if let Ok(pid) = sysinfo::get_current_pid() {
            sys.refresh_process(pid);
            if let Some(process) = sys.process(pid) {
                let rss = process.memory();
                self.memory_rss_bytes.set(rss as f64);
                let heap_estimate = (rss as f64 * 0.85) as u64;
                self.memory_heap_bytes.set(heap_estimate as f64);
            }
        }

        self.uptime_seconds.set(uptime_secs as f64);
        self.collect_disk_metrics(data_dir);
    }

    fn collect_disk_metrics(&self, data_dir: &Path) {
        let disks = Disks::new_with_refreshed_list();

        let abs_path = if data_dir.is_absolute() {
            data_dir.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(data_dir))
                .unwrap_or_else(|_| data_dir.to_path_buf())
        };

        let mut best_match: Option<&sysinfo::Disk> = None;
        let mut best_match_len = 0;

        for disk in disks.list() {
            let mount_point = disk.mount_point();
            if abs_path.starts_with(mount_point) {
                let mount_len = mount_point.as_os_str().len();
                if mount_len > best_match_len {
                    best_match = Some(disk);
                    best_match_len = mount_len;
                }
            }
        }

        if let Some(disk) = best_match {
            let total = disk.total_space();
            let available = disk.available_space();
            let used = total.saturating_sub(available);

            self.disk_total_bytes.set(total as f64);
            self.disk_available_bytes.set(available as f64);
            self.disk_usage_bytes.set(used as f64);
        } else {
            self.disk_total_bytes.set(0.0);
            self.disk_available_bytes.set(0.0);
            self.disk_usage_bytes.set(0.0);
        }
    }

    /// Record a rate limiter admission outcome: `ok`, `cancelled`, `failure`, or `preflight_rejected`.
    pub fn record_rate_limit_admission(&self, outcome: &str) {
        self.rate_limit_admissions_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_rate_limit_retry_after(&self, user_bucket: &str, retry_after: std::time::Duration) {
        self.rate_limit_retry_after_seconds
            .with_label_values(&[user_bucket])
            .observe(retry_after.as_secs_f64());
    }

    pub fn record_ingest_entity(&self, kind: &str, count: u64) {
        self.ingest_entities_processed_total
            .with_label_values(&[kind])
            .inc_by(count as f64);
    }

    pub fn record_ingest_parse_error(&self, kind: &str) {
        self.ingest_parse_errors_total.with_label_values(&[kind]).inc();
    }

    pub fn record_ingest_batch_flush(&self, kind: &str, duration: std::time::Duration) {
        self.ingest_batch_flush_duration
            .with_label_values(&[kind])
            .observe(duration.as_secs_f64());
    }

    pub fn record_sync_folder_page(&self, outcome: &str) {
        self.sync_folder_pages_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_sync_commit(&self, outcome: &str) {
        self.sync_commits_total.with_label_values(&[outcome]).inc();
    }

    pub fn get_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }
}

/// HTTP request timer for measuring request duration
pub struct RequestTimer {
    start: Instant,
    metrics: Arc<MetricsCollector>,
    method: Method,
    endpoint: String,
}

impl RequestTimer {
    pub fn new(metrics: Arc<MetricsCollector>, method: Method, endpoint: String) -> Self {
        metrics.increment_in_flight_requests();
        Self {
            start: Instant::now(),
            metrics,
            method,
            endpoint,
        }
    }

    pub fn finish(self, status_code: StatusCode) {
        let duration = self.start.elapsed();
        self.metrics.decrement_in_flight_requests();
        self.metrics
            .record_http_request(&self.method, &self.endpoint, status_code, duration);
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(metrics): State<Arc<MetricsCollector>>) -> impl IntoResponse {
    match metrics.get_metrics() {
        Ok(metrics_text) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Body::from(metrics_text))
            .unwrap(),
        Err(err) => {
            tracing::error!("failed to generate metrics: {}", err);
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "error": "failed to generate metrics",
                        "details": err.to_string()
                    })
                    .to_string(),
                ))
                .unwrap()
        }
    }
}

/// Performance monitoring for database operations
pub struct DatabaseMetrics {
    metrics: Arc<MetricsCollector>,
}

impl DatabaseMetrics {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }

    pub async fn time_operation<F, T, E>(&self, operation: &str, table: &str, future: F) -> Result<T, E>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let result = future.await;
        let duration = start.elapsed();
        let success = result.is_ok();

        self.metrics.record_db_operation(operation, table, duration, success);
        result
    }

    pub fn update_pool_metrics(&self, pool: &sqlx::PgPool) {
        let active = (pool.size() as usize).saturating_sub(pool.num_idle()) as u32;
        let idle = pool.num_idle() as u32;
        self.metrics.update_db_connections(active, idle);
    }
}

/// Performance monitoring for Redis operations
pub struct RedisMetrics {
    metrics: Arc<MetricsCollector>,
}

impl RedisMetrics {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }

    pub async fn time_operation<F, T, E>(&self, operation: &str, future: F) -> Result<T, E>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let result = future.await;
        let duration = start.elapsed();
        let success = result.is_ok();

        self.metrics.record_redis_operation(operation, duration, success);
        result
    }

    pub fn update_pool_metrics(&self, pool: &deadpool_redis::Pool) {
        let status = pool.status();
        self.metrics
            .update_redis_connections((status.size.saturating_sub(status.available)) as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    #[test]
    fn test_metrics_collector_creation() {
        let metrics = MetricsCollector::new().expect("failed to create metrics collector");
        let metrics_text = metrics.get_metrics().expect("failed to get metrics");
        assert!(!metrics_text.is_empty());
    }

    #[test]
    fn test_http_metrics_recording() {
        let metrics = MetricsCollector::new().expect("failed to create metrics collector");

        metrics.record_http_request(
            &Method::GET,
            "/health",
            StatusCode::OK,
            std::time::Duration::from_millis(100),
        );

        let metrics_text = metrics.get_metrics().expect("failed to get metrics");
        assert!(metrics_text.contains("cratesync_http_requests_total"));
        assert!(metrics_text.contains("cratesync_http_request_duration_seconds"));
    }

    #[test]
    fn test_rate_limit_metrics_recording() {
        let metrics = MetricsCollector::new().expect("failed to create metrics collector");

        metrics.record_rate_limit_admission("ok");
        metrics.record_rate_limit_admission("cancelled");
        metrics.record_rate_limit_retry_after("default", std::time::Duration::from_millis(1500));

        let metrics_text = metrics.get_metrics().expect("failed to get metrics");
        assert!(metrics_text.contains("cratesync_ratelimit_rate_limit_admissions_total"));
        assert!(metrics_text.contains("outcome=\"ok\""));
        assert!(metrics_text.contains("outcome=\"cancelled\""));
    }

    #[test]
    fn test_ingest_metrics_recording() {
        let metrics = MetricsCollector::new().expect("failed to create metrics collector");

        metrics.record_ingest_entity("release", 2000);
        metrics.record_ingest_parse_error("release");
        metrics.record_ingest_batch_flush("release", std::time::Duration::from_millis(250));

        let metrics_text = metrics.get_metrics().expect("failed to get metrics");
        assert!(metrics_text.contains("cratesync_ingest_entities_processed_total"));
        assert!(metrics_text.contains("cratesync_ingest_parse_errors_total"));
    }

    #[test]
    fn test_request_latency_recording() {
        let metrics = MetricsCollector::new().expect("failed to create metrics collector");

        metrics.record_request_latency("GET", "/api/v1/ingest/2024-01/status", 200, std::time::Duration::from_millis(5));
        metrics.record_request_latency("POST", "/api/v1/sync/trigger", 202, std::time::Duration::from_millis(75));

        let metrics_text = metrics.get_metrics().expect("failed to get metrics");
        assert!(metrics_text.contains("cratesync_http_request_latency_seconds"));
        assert!(metrics_text.contains("method=\"GET\""));
        assert!(metrics_text.contains("status_code=\"200\""));
    }
}
