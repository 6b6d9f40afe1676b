//! Exercises the sliding-window rate limiter against a real Redis instance.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cratesync_backend::config::RateLimitSettings;
use cratesync_backend::metrics::MetricsCollector;
use cratesync_backend::ratelimit::{Admission, RateLimiter};
use serial_test::serial;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn limiter(redis: &common::TestRedis, settings: RateLimitSettings) -> RateLimiter {
    let cache = Arc::new(redis.cache());
    let metrics = Arc::new(MetricsCollector::new().expect("metrics collector"));
    RateLimiter::new(cache, settings, metrics)
}

#[tokio::test]
#[serial]
async fn admits_up_to_the_configured_limit_then_blocks() {
    let docker = common::docker();
    let redis = common::TestRedis::new(docker).await;

    let settings = RateLimitSettings {
        limit: 3,
        window: Duration::from_secs(60),
        ..RateLimitSettings::default()
    };
    let limiter = limiter(&redis, settings);
    let user_id = Uuid::new_v4();
    let token = CancellationToken::new();

    for _ in 0..3 {
        assert_eq!(limiter.admit(user_id, &token).await.unwrap(), Admission::Ok);
    }

    // The fourth admission would have to wait out the window; cancel it
    // immediately instead of blocking the test for a minute.
    let cutoff = CancellationToken::new();
    let waiter = cutoff.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waiter.cancel();
    });
    assert_eq!(limiter.admit(user_id, &cutoff).await.unwrap(), Admission::Cancelled);
}

#[tokio::test]
#[serial]
async fn different_users_have_independent_windows() {
    let docker = common::docker();
    let redis = common::TestRedis::new(docker).await;

    let settings = RateLimitSettings {
        limit: 1,
        window: Duration::from_secs(60),
        ..RateLimitSettings::default()
    };
    let limiter = limiter(&redis, settings);
    let token = CancellationToken::new();

    let user_a = Uuid::new_v4();
    let user_b = Uuid::new_v4();

    assert_eq!(limiter.admit(user_a, &token).await.unwrap(), Admission::Ok);
    assert_eq!(limiter.admit(user_b, &token).await.unwrap(), Admission::Ok);
}

#[tokio::test]
#[serial]
async fn deadline_preflight_rejects_when_too_short() {
    let docker = common::docker();
    let redis = common::TestRedis::new(docker).await;

    let limiter = limiter(&redis, RateLimitSettings::default());
    let err = limiter.check_deadline(Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, cratesync_backend::error::AppError::DeadlineTooShort { .. }));
}
