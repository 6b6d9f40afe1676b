//! Release Fetch Helper (§4.7 T2): for every merged release id missing from
//! the catalog, rate-limits then enqueues a `release` proxy request and
//! records the outstanding request ids so T3 knows when to stop waiting.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::Cache;
use crate::config::SyncSettings;
use crate::error::AppError;
use crate::models::{ApiRequestMetadata, ApiRequestType};
use crate::ratelimit::RateLimiter;

use super::bus::{ApiRequestEvent, ApiRequestHeaders, ApiRequestPayload, EventBus};

pub struct ReleaseFetchHelper {
    cache: Arc<Cache>,
    bus: Arc<dyn EventBus>,
    rate_limiter: Arc<RateLimiter>,
    settings: SyncSettings,
}

impl ReleaseFetchHelper {
    pub fn new(
        cache: Arc<Cache>,
        bus: Arc<dyn EventBus>,
        rate_limiter: Arc<RateLimiter>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            cache,
            bus,
            rate_limiter,
            settings,
        }
    }

    /// Rate-limits and enqueues one `release` request per id in
    /// `missing_release_ids`, returning the set of request ids the caller
    /// should merge into `SyncState.pending_release_requests`. A failure to
    /// admit or publish for one release id is logged and that id is simply
    /// skipped (it will be retried on the next sync run).
    ///
    /// If every id failed to enqueue while `missing_release_ids` was
    /// non-empty, returns [`AppError::SyncReleaseBackfillUnavailable`] instead
    /// of an empty set: an empty `pending` with a non-empty `missing` would
    /// otherwise leave the caller's `all_releases_ready` flag permanently
    /// `false` with no outstanding T3 response ever able to flip it.
    pub async fn enqueue_missing(
        &self,
        user_id: Uuid,
        token_value: &str,
        missing_release_ids: &[i64],
        cancellation: &CancellationToken,
    ) -> Result<HashSet<Uuid>, AppError> {
        let mut pending = HashSet::new();

        for &release_id in missing_release_ids {
            match self.rate_limiter.admit(user_id, cancellation).await {
                Ok(crate::ratelimit::Admission::Ok) => {}
                Ok(crate::ratelimit::Admission::Cancelled) => break,
                Err(e) => {
                    tracing::warn!(user_id = %user_id, release_id, error = %e, "rate limiter rejected release fetch");
                    continue;
                }
            }

            let request_id = Uuid::new_v4();
            let payload = ApiRequestPayload {
                request_id,
                request_type: ApiRequestType::Release,
                folder_id: None,
                page: None,
                url: format!("https://api.discogs.com/releases/{release_id}"),
                method: "GET",
                headers: ApiRequestHeaders {
                    authorization: format!("Discogs token={token_value}"),
                },
                callback_service: "orchestration",
                callback_event: "api_response",
            };
            let event = ApiRequestEvent::new(user_id, token_value, payload);

            if let Err(e) = self.bus.publish_request(event).await {
                tracing::warn!(user_id = %user_id, release_id, error = %e, "failed to publish release fetch request");
                continue;
            }

            let metadata = ApiRequestMetadata {
                user_id,
                request_id,
                request_type: ApiRequestType::Release,
                issued_at: chrono::Utc::now(),
                token: token_value.to_string(),
                folder_id: None,
            };
            if let Err(e) = self
                .cache
                .set_api_request(&metadata, self.settings.api_request_ttl.as_secs())
                .await
            {
                tracing::warn!(user_id = %user_id, release_id, error = %e, "failed to persist api request metadata");
                continue;
            }

            pending.insert(request_id);
        }

        if !pending.is_empty() {
            let ids: Vec<i64> = missing_release_ids.to_vec();
            if let Err(e) = self
                .cache
                .set_release_queue(user_id, &ids, 24 * 3600)
                .await
            {
                tracing::warn!(user_id = %user_id, error = %e, "failed to persist release queue observability record");
            }
            return Ok(pending);
        }

        if !missing_release_ids.is_empty() {
            tracing::warn!(
                user_id = %user_id,
                missing_count = missing_release_ids.len(),
                "every release backfill request failed to enqueue, cannot wait on a T3 that will never arrive"
            );
            return Err(AppError::SyncReleaseBackfillUnavailable);
        }

        Ok(pending)
    }
}
