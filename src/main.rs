use std::sync::Arc;
use std::time::Duration;

use cratesync_backend::cache::Cache;
use cratesync_backend::config::AppConfig;
use cratesync_backend::database::{create_redis_pool, Database};
use cratesync_backend::ingest::IngestionOrchestrator;
use cratesync_backend::monitoring::{MonitoringConfig, MonitoringSystem};
use cratesync_backend::ratelimit::RateLimiter;
use cratesync_backend::scheduler::{IngestScheduler, SyncScheduler};
use cratesync_backend::sync::bus::{EventBus, RedisEventBus};
use cratesync_backend::sync::SyncCoordinator;
use cratesync_backend::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(environment = ?config.environment, "starting cratesync-backend");

    let database = Database::connect(&config.database).await?;
    database.migrate().await?;

    let redis_pool = create_redis_pool(config.redis.url.as_str(), config.redis.pool_size).await?;
    let cache = Arc::new(Cache::new(redis_pool.clone()));

    let monitoring = Arc::new(MonitoringSystem::new(MonitoringConfig::default())?);
    let metrics = monitoring.metrics();

    let rate_limiter = Arc::new(RateLimiter::new(
        cache.clone(),
        config.rate_limit.clone(),
        metrics.clone(),
    ));

    let ingestion = Arc::new(IngestionOrchestrator::new(
        database.pool().clone(),
        config.ingest.clone(),
        metrics.clone(),
    ));

    let bus: Arc<dyn EventBus> = Arc::new(RedisEventBus::new(redis_pool.clone(), "websocket"));
    let sync_coordinator = Arc::new(SyncCoordinator::new(
        database.pool().clone(),
        cache.clone(),
        bus,
        rate_limiter.clone(),
        config.sync.clone(),
        metrics.clone(),
    ));

    let scheduler = IngestScheduler::new(ingestion.clone(), database.pool().clone(), Duration::from_secs(300));
    let scheduler_handle = scheduler.start();

    let sync_scheduler = SyncScheduler::new(
        sync_coordinator.clone(),
        database.pool().clone(),
        config.sync.sweep_interval,
        config.sync.sweep_staleness,
    );
    let sync_scheduler_handle = sync_scheduler.start();

    let host = config.server.host.clone();
    let port = config.server.port;

    let state = AppState {
        db_pool: database.pool().clone(),
        redis_pool,
        cache,
        config: Arc::new(config),
        metrics,
        monitoring,
        rate_limiter,
        ingestion,
        sync_coordinator,
    };

    let app = create_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler_handle.stop().await;
    sync_scheduler_handle.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
