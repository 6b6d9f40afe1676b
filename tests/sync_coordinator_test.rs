//! End-to-end exercise of the collection sync state machine (T0 -> T1 -> T4)
//! against real Postgres and Redis, with a recording fake standing in for the
//! websocket relay. Requires the `legacy-integration-tests` feature, which
//! also gates [`cratesync_backend::sync::bus::testing::RecordingBus`] into
//! the build.
#![cfg(feature = "legacy-integration-tests")]

mod common;

use std::sync::Arc;

use chrono::Utc;
use cratesync_backend::config::SyncSettings;
use cratesync_backend::metrics::MetricsCollector;
use cratesync_backend::models::Release;
use cratesync_backend::ratelimit::RateLimiter;
use cratesync_backend::store;
use cratesync_backend::sync::bus::testing::RecordingBus;
use cratesync_backend::sync::bus::{ApiRequestType, EventBus, LifecycleEvent};
use cratesync_backend::sync::SyncCoordinator;
use serial_test::serial;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn settings() -> SyncSettings {
    SyncSettings {
        page_size: 50,
        state_ttl: std::time::Duration::from_secs(3600),
        max_pages_in_flight: 4,
        max_releases_per_sync: 50_000,
        api_request_ttl: std::time::Duration::from_secs(600),
        sweep_staleness: std::time::Duration::from_secs(86_400),
        sweep_interval: std::time::Duration::from_secs(900),
    }
}

#[tokio::test]
#[serial]
async fn trigger_enqueues_one_request_per_syncable_folder() {
    let docker = common::docker();
    let db = common::TestDatabase::new(docker).await;
    let redis = common::TestRedis::new(docker).await;

    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO folders (user_id, folder_id, name, count) VALUES ($1, $2, $3, 0), ($1, $4, $5, 0)")
        .bind(user_id)
        .bind(1_i64)
        .bind("Vinyl")
        .bind(2_i64)
        .bind("CDs")
        .execute(&db.pool)
        .await
        .unwrap();

    let cache = Arc::new(redis.cache());
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let rate_limiter = Arc::new(RateLimiter::new(cache.clone(), Default::default(), metrics.clone()));
    let bus: Arc<RecordingBus> = Arc::new(RecordingBus::default());
    let coordinator = SyncCoordinator::new(
        db.pool.clone(),
        cache,
        bus.clone() as Arc<dyn EventBus>,
        rate_limiter,
        settings(),
        metrics,
    );

    let cancellation = CancellationToken::new();
    coordinator.trigger(user_id, "test-token", &cancellation).await.unwrap();

    let requests = bus.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|r| r.payload.request_type == ApiRequestType::FolderReleases));

    let status = coordinator.status(user_id).await.unwrap().unwrap();
    assert_eq!(status.total_folders, 2);
    assert_eq!(status.processed_folders, 0);
}

#[tokio::test]
#[serial]
async fn full_sync_with_no_new_releases_commits_and_publishes_sync_complete() {
    let docker = common::docker();
    let db = common::TestDatabase::new(docker).await;
    let redis = common::TestRedis::new(docker).await;

    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO folders (user_id, folder_id, name, count) VALUES ($1, $2, $3, 0)")
        .bind(user_id)
        .bind(1_i64)
        .bind("Vinyl")
        .execute(&db.pool)
        .await
        .unwrap();

    // The release this folder page references already exists in the
    // catalog, so T2 needs no backfill and the sync can commit immediately.
    let release = Release {
        id: Uuid::new_v4(),
        natural_key: 555,
        title: "Test Pressing".to_string(),
        master_key: None,
        country: None,
        released: None,
        status: None,
        notes: None,
        updated_at: Utc::now(),
    };
    store::catalog::upsert_releases(&db.pool, std::slice::from_ref(&release)).await.unwrap();

    let cache = Arc::new(redis.cache());
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let rate_limiter = Arc::new(RateLimiter::new(cache.clone(), Default::default(), metrics.clone()));
    let bus: Arc<RecordingBus> = Arc::new(RecordingBus::default());
    let coordinator = SyncCoordinator::new(
        db.pool.clone(),
        cache,
        bus.clone() as Arc<dyn EventBus>,
        rate_limiter,
        settings(),
        metrics,
    );

    let cancellation = CancellationToken::new();
    coordinator.trigger(user_id, "test-token", &cancellation).await.unwrap();

    let request_id = {
        let requests = bus.requests.lock().unwrap();
        requests[0].payload.request_id
    };

    let response_json = serde_json::json!({
        "releases": [{
            "instance_id": 9001,
            "id": 555,
            "date_added": "2024-01-01T00:00:00Z",
            "rating": 4,
        }]
    });
    let response = serde_json::from_value::<cratesync_backend::sync::bus::ApiResponseEvent>(serde_json::json!({
        "request_id": request_id,
        "status": 200,
        "data": response_json,
    }))
    .unwrap();

    coordinator.handle_response(response, &cancellation).await.unwrap();

    let lifecycle = bus.lifecycle.lock().unwrap();
    assert_eq!(lifecycle.len(), 1);
    assert!(matches!(lifecycle[0].1, LifecycleEvent::SyncComplete { total_releases: 1 }));

    let row: (i64,) = sqlx::query_as("SELECT release_id FROM user_releases WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(row.0, 555);

    assert!(coordinator.status(user_id).await.unwrap().is_none());
}
