//! Discogs-backed collection sync and catalog ingestion backend.
//!
//! Three cores wired through a thin axum surface: a bulk XML catalog
//! ingestion pipeline ([`ingest`]), a per-user sliding-window rate limiter
//! ([`ratelimit`]) and a multi-folder collection differential-sync state
//! machine ([`sync`]).

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod monitoring;
pub mod ratelimit;
pub mod recovery;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod tx;

pub use config::{AppConfig, Environment};
pub use error::{AppError, ErrorResponse, Result};
pub use health::{HealthCheckConfig, HealthCheckResponse, HealthChecker, HealthStatus};
pub use ingest::IngestionOrchestrator;
pub use metrics::MetricsCollector;
pub use middleware::create_cors_layer;
pub use monitoring::{AlertManager, AlertThresholds, MonitoringConfig, MonitoringResponse, MonitoringSystem};
pub use ratelimit::RateLimiter;
pub use sync::{SyncCoordinator, SyncStatusSnapshot};

/// Shared handles every handler and background task is built against.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub redis_pool: deadpool_redis::Pool,
    pub cache: Arc<cache::Cache>,
    pub config: Arc<AppConfig>,
    pub metrics: Arc<MetricsCollector>,
    pub monitoring: Arc<MonitoringSystem>,
    pub rate_limiter: Arc<RateLimiter>,
    pub ingestion: Arc<IngestionOrchestrator>,
    pub sync_coordinator: Arc<SyncCoordinator>,
}

/// Builds the full axum router: health/readiness/liveness probes, Prometheus
/// metrics, comprehensive monitoring, and the ingest/sync control surface.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check_endpoint))
        .route("/health/live", get(liveness_check_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/monitoring", get(comprehensive_monitoring_endpoint))
        .nest("/api/v1/ingest", handlers::ingest::router())
        .nest("/api/v1/sync", handlers::sync::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer()),
        )
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    let checker = HealthChecker::new(HealthCheckConfig::default());
    let response = checker.check_health(&state.db_pool, &state.redis_pool).await;
    tracing::info!(status = ?response.status, correlation_id = %response.correlation_id, "health check completed");
    Json(response)
}

async fn readiness_check_endpoint(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    health::readiness_check(&state.db_pool, &state.redis_pool).await?;
    Ok(Json(serde_json::json!({
        "status": "ready",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

async fn liveness_check_endpoint() -> Result<Json<serde_json::Value>> {
    health::liveness_check().await?;
    Ok(Json(serde_json::json!({
        "status": "alive",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    metrics::metrics_handler(State(state.metrics)).await
}

async fn comprehensive_monitoring_endpoint(State(state): State<AppState>) -> Json<MonitoringResponse> {
    let response = state.monitoring.comprehensive_check(&state.db_pool, &state.redis_pool).await;
    tracing::info!(
        status = ?response.health.status,
        memory_usage_percent = response.system_metrics.memory_usage_percent,
        cpu_usage_percent = response.system_metrics.cpu_usage_percent,
        "comprehensive monitoring check completed"
    );
    Json(response)
}
