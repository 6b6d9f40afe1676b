//! Per-user sliding-window admission control (§4.1).
//!
//! Stateless within a process; every decision is made against the shared
//! Redis sorted set `rate:{userId}` rather than process memory, so every
//! instance of the service agrees.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::Cache;
use crate::config::RateLimitSettings;
use crate::error::AppError;
use crate::metrics::MetricsCollector;

/// Outcome of a single `admit` call, reported back to callers and to metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Ok,
    Cancelled,
}

const MIN_RETRY_AFTER: Duration = Duration::from_millis(0);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);
const RETRY_JITTER: Duration = Duration::from_millis(100);

pub struct RateLimiter {
    cache: Arc<Cache>,
    settings: RateLimitSettings,
    metrics: Arc<MetricsCollector>,
}

impl RateLimiter {
    pub fn new(cache: Arc<Cache>, settings: RateLimitSettings, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            cache,
            settings,
            metrics,
        }
    }

    /// Blocks until `user_id` has a free slot in the current window, `token`
    /// is cancelled, or a cache error occurs.
    pub async fn admit(&self, user_id: Uuid, token: &CancellationToken) -> Result<Admission, AppError> {
        self.admit_inner(user_id, token, false).await
    }

    /// Same contract as [`RateLimiter::admit`], but proactively sleeps before
    /// each retry once the bucket is getting full, smoothing bursts instead
    /// of letting every caller wake up at exactly the same instant.
    pub async fn admit_with_throttle(
        &self,
        user_id: Uuid,
        token: &CancellationToken,
    ) -> Result<Admission, AppError> {
        self.admit_inner(user_id, token, true).await
    }

    /// Deadline must be at least this far in the future or admission fails
    /// fast rather than being queued behind a sleep it can never survive.
    pub fn check_deadline(&self, remaining: Duration) -> Result<(), AppError> {
        if remaining < self.settings.min_deadline {
            self.metrics.record_rate_limit_admission("preflight_rejected");
            return Err(AppError::DeadlineTooShort {
                deadline_ms: remaining.as_millis() as u64,
            });
        }
        Ok(())
    }

    async fn admit_inner(
        &self,
        user_id: Uuid,
        token: &CancellationToken,
        throttle: bool,
    ) -> Result<Admission, AppError> {
        let key = Cache::rate_limit_key(user_id);
        let window_secs = self.settings.window.as_secs() as f64;
        let limit = self.settings.limit as i64;

        loop {
            if token.is_cancelled() {
                self.metrics.record_rate_limit_admission("cancelled");
                return Ok(Admission::Cancelled);
            }

            let now = now_secs();
            let window_start = now - window_secs;

            let count = self
                .evict_and_count(&key, window_start)
                .await
                .map_err(|e| {
                    self.metrics.record_rate_limit_admission("failure");
                    e
                })?;

            if count < limit {
                self.cache
                    .zadd(&key, &Uuid::new_v4().to_string(), now)
                    .await
                    .map_err(|e| {
                        self.metrics.record_rate_limit_admission("failure");
                        e
                    })?;
                self.cache
                    .expire(&key, (2.0 * window_secs) as i64)
                    .await
                    .map_err(|e| {
                        self.metrics.record_rate_limit_admission("failure");
                        e
                    })?;
                self.metrics.record_rate_limit_admission("ok");
                return Ok(Admission::Ok);
            }

            if throttle {
                let throttle_delay = throttle_delay_for(&self.settings, count, limit);
                if !throttle_delay.is_zero() && self.sleep_or_cancel(throttle_delay, token).await? {
                    self.metrics.record_rate_limit_admission("cancelled");
                    return Ok(Admission::Cancelled);
                }
            }

            let oldest = self.oldest_score(&key).await.map_err(|e| {
                self.metrics.record_rate_limit_admission("failure");
                e
            })?;
            let retry_after = match oldest {
                Some(oldest) => {
                    let raw = Duration::from_secs_f64((oldest + window_secs - now).max(0.0)) + RETRY_JITTER;
                    raw.clamp(MIN_RETRY_AFTER, MAX_RETRY_AFTER)
                }
                None => RETRY_JITTER,
            };

            tracing::debug!(
                user_id = %user_id,
                count,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit bucket saturated"
            );
            self.metrics
                .record_rate_limit_retry_after(&user_id.to_string(), retry_after);

            if self.sleep_or_cancel(retry_after, token).await? {
                self.metrics.record_rate_limit_admission("cancelled");
                return Ok(Admission::Cancelled);
            }
        }
    }

    async fn evict_and_count(&self, key: &str, window_start: f64) -> Result<i64, AppError> {
        self.cache.zremrangebyscore_upto(key, window_start).await?;
        self.cache.zcard(key).await
    }

    async fn oldest_score(&self, key: &str) -> Result<Option<f64>, AppError> {
        let rows = self.cache.zrange_withscores(key).await?;
        Ok(rows.into_iter().map(|(_, score)| score).reduce(f64::min))
    }

    /// Sleeps for `duration` unless `token` fires first. Returns `true` if
    /// the sleep was cut short by cancellation.
    async fn sleep_or_cancel(&self, duration: Duration, token: &CancellationToken) -> Result<bool, AppError> {
        tokio::select! {
            _ = sleep(duration) => Ok(false),
            _ = token.cancelled() => Ok(true),
        }
    }
}

fn throttle_delay_for(settings: &RateLimitSettings, count: i64, limit: i64) -> Duration {
    let ratio = count as f64 / limit as f64;
    if ratio >= settings.throttle_high_ratio {
        settings.throttle_high_delay
    } else if ratio >= settings.throttle_medium_ratio {
        settings.throttle_medium_delay
    } else {
        Duration::ZERO
    }
}

fn now_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RateLimitSettings {
        RateLimitSettings::default()
    }

    #[test]
    fn throttle_delay_escalates_with_ratio() {
        let settings = settings();
        assert_eq!(throttle_delay_for(&settings, 1, 5), Duration::ZERO);
        assert_eq!(throttle_delay_for(&settings, 3, 5), Duration::from_secs(1));
        assert_eq!(throttle_delay_for(&settings, 4, 5), Duration::from_secs(2));
    }

    #[test]
    fn retry_after_is_clamped_to_thirty_seconds() {
        let raw = Duration::from_secs_f64((10_000.0f64).max(0.0)) + RETRY_JITTER;
        assert_eq!(raw.clamp(MIN_RETRY_AFTER, MAX_RETRY_AFTER), MAX_RETRY_AFTER);
    }
}
