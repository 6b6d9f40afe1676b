//! Collection Sync Coordinator (§4.7, CORE-C): the state machine that drives
//! a user's multi-folder Discogs collection sync from trigger (T0) through
//! paginated collection fetch (T1), release backfill (T2/T3) to commit (T4).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::Cache;
use crate::config::SyncSettings;
use crate::error::AppError;
use crate::metrics::MetricsCollector;
use crate::models::{ApiRequestMetadata, ApiRequestType, Folder, SyncState, UserRelease};
use crate::ratelimit::{Admission, RateLimiter};
use crate::store;
use crate::tx::run_in_transaction;

use super::bus::{ApiRequestEvent, ApiRequestHeaders, ApiRequestPayload, ApiResponseEvent, EventBus, LifecycleEvent};
use super::diff::compute_diff;
use super::locks::UserLocks;
use super::release_fetch::ReleaseFetchHelper;

pub struct SyncCoordinator {
    pool: PgPool,
    cache: Arc<Cache>,
    bus: Arc<dyn EventBus>,
    rate_limiter: Arc<RateLimiter>,
    release_fetch: ReleaseFetchHelper,
    locks: UserLocks,
    settings: SyncSettings,
    metrics: Arc<MetricsCollector>,
}

impl SyncCoordinator {
    pub fn new(
        pool: PgPool,
        cache: Arc<Cache>,
        bus: Arc<dyn EventBus>,
        rate_limiter: Arc<RateLimiter>,
        settings: SyncSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let release_fetch = ReleaseFetchHelper::new(cache.clone(), bus.clone(), rate_limiter.clone(), settings.clone());
        Self {
            pool,
            cache,
            bus,
            rate_limiter,
            release_fetch,
            locks: UserLocks::new(),
            settings,
            metrics,
        }
    }

    /// T0: starts a new sync for `user_id`, or returns immediately if one is
    /// already in flight and not stale.
    pub async fn trigger(
        &self,
        user_id: Uuid,
        token_value: &str,
        cancellation: &CancellationToken,
    ) -> Result<(), AppError> {
        let _guard = self.locks.acquire(user_id).await;

        if let Some(existing) = self.cache.get_sync_state(user_id).await? {
            if !existing.is_stale(chrono::Duration::seconds(self.settings.state_ttl.as_secs() as i64)) {
                tracing::info!(user_id = %user_id, "sync already in progress, ignoring trigger");
                return Ok(());
            }
            tracing::warn!(user_id = %user_id, "discarding stale sync state");
            self.cache.clear_sync_state(user_id).await?;
        }

        let folders = store::collection::list_syncable_folders(&self.pool, user_id).await?;
        let valid_folders: Vec<Folder> = folders.into_iter().filter(|f| !f.is_virtual_all()).collect();
        if valid_folders.is_empty() {
            return Err(AppError::SyncNoFolders);
        }

        let state = SyncState::new(user_id, valid_folders.len());
        self.cache
            .set_sync_state(user_id, &state, self.settings.state_ttl.as_secs())
            .await?;

        for folder in &valid_folders {
            if cancellation.is_cancelled() {
                break;
            }
            if let Err(e) = self
                .request_folder_page(user_id, token_value, folder.folder_id, 1, cancellation)
                .await
            {
                tracing::warn!(user_id = %user_id, folder_id = folder.folder_id, error = %e, "failed to enqueue initial folder page request");
            }
        }

        Ok(())
    }

    async fn request_folder_page(
        &self,
        user_id: Uuid,
        token_value: &str,
        folder_id: i64,
        page: u32,
        cancellation: &CancellationToken,
    ) -> Result<(), AppError> {
        match self.rate_limiter.admit(user_id, cancellation).await? {
            Admission::Cancelled => return Err(AppError::Cancelled),
            Admission::Ok => {}
        }

        let request_id = Uuid::new_v4();
        let payload = ApiRequestPayload {
            request_id,
            request_type: ApiRequestType::FolderReleases,
            folder_id: Some(folder_id),
            page: Some(page),
            url: format!(
                "https://api.discogs.com/users/me/collection/folders/{folder_id}/releases?page={page}&per_page={}",
                self.settings.page_size
            ),
            method: "GET",
            headers: ApiRequestHeaders {
                authorization: format!("Discogs token={token_value}"),
            },
            callback_service: "orchestration",
            callback_event: "api_response",
        };
        let event = ApiRequestEvent::new(user_id, token_value, payload);
        self.bus.publish_request(event).await?;

        let metadata = ApiRequestMetadata {
            user_id,
            request_id,
            request_type: ApiRequestType::FolderReleases,
            issued_at: Utc::now(),
            token: token_value.to_string(),
            folder_id: Some(folder_id),
        };
        self.cache
            .set_api_request(&metadata, self.settings.api_request_ttl.as_secs())
            .await
    }

    /// Dispatches one inbound proxied response to the matching T1/T3 handler.
    pub async fn handle_response(
        &self,
        response: ApiResponseEvent,
        cancellation: &CancellationToken,
    ) -> Result<(), AppError> {
        let metadata = self.cache.get_api_request(response.request_id).await?;

        let Some(metadata) = metadata else {
            tracing::warn!(request_id = %response.request_id, "no metadata for inbound response, treating as legacy one-off");
            return Ok(());
        };
        self.cache.clear_api_request(response.request_id).await?;

        match metadata.request_type {
            ApiRequestType::Folders => self.handle_folders_response(metadata.user_id, &response).await,
            ApiRequestType::FolderReleases => {
                self.handle_folder_releases_response(metadata, response, cancellation).await
            }
            ApiRequestType::Release => self.handle_release_response(metadata.user_id, response).await,
        }
    }

    async fn handle_folders_response(&self, user_id: Uuid, response: &ApiResponseEvent) -> Result<(), AppError> {
        if !response.is_success() {
            tracing::warn!(user_id = %user_id, "folders response carried an error, ignoring");
            return Ok(());
        }
        let Some(data) = &response.data else { return Ok(()) };
        let folders: Vec<Folder> = data
            .get("folders")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let folder_id = item.get("id")?.as_i64()?;
                        let name = item.get("name")?.as_str()?.to_string();
                        let count = item.get("count").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
                        Some(Folder {
                            user_id,
                            folder_id,
                            name,
                            count,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        store::collection::replace_folders(&self.pool, user_id, &folders).await
    }

    /// T1.
    async fn handle_folder_releases_response(
        &self,
        metadata: ApiRequestMetadata,
        response: ApiResponseEvent,
        cancellation: &CancellationToken,
    ) -> Result<(), AppError> {
        let user_id = metadata.user_id;
        let _guard = self.locks.acquire(user_id).await;

        let Some(mut state) = self.cache.get_sync_state(user_id).await? else {
            // Legacy single-folder fetch with no tracked SyncState: there is
            // nothing to merge into, so this path is a no-op besides logging.
            tracing::info!(user_id = %user_id, "folder_releases response with no active SyncState, ignoring");
            return Ok(());
        };

        let Some(folder_id) = metadata.folder_id else {
            return Ok(());
        };

        if !response.is_success() {
            self.metrics.record_sync_folder_page("error");
            tracing::warn!(user_id = %user_id, folder_id, error = ?response.error, "folder page response failed");
            state.completed_folders.insert(folder_id);
            self.cache
                .set_sync_state(user_id, &state, self.settings.state_ttl.as_secs())
                .await?;
            return self.advance(state, &metadata.token, cancellation).await;
        }

        let items = response
            .data
            .as_ref()
            .and_then(|d| d.get("releases"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for item in &items {
            if state.merged_release_count() >= self.settings.max_releases_per_sync {
                tracing::warn!(user_id = %user_id, "mergedReleases reached max_releases_per_sync, dropping remainder");
                break;
            }
            let Some(instance_id) = item.get("instance_id").and_then(|v| v.as_i64()) else {
                continue;
            };
            let release_id = item
                .get("id")
                .and_then(|v| v.as_i64())
                .or_else(|| item.get("basic_information").and_then(|b| b.get("id")).and_then(|v| v.as_i64()));
            let Some(release_id) = release_id else { continue };

            let date_added = item
                .get("date_added")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| {
                    tracing::warn!(user_id = %user_id, instance_id, "unparseable date_added, defaulting to now");
                    Utc::now()
                });

            let rating = item.get("rating").and_then(|v| v.as_i64()).map(|r| r as i16);
            let notes = item.get("notes").cloned();

            let candidate = UserRelease {
                id: Uuid::new_v4(),
                user_id,
                instance_id,
                release_id,
                folder_id,
                rating,
                notes,
                date_added,
                active: true,
                basic_information: None,
                updated_at: Utc::now(),
            };

            state.merged_releases.insert(instance_id, candidate);
            state.original_releases.insert(instance_id, item.clone());
        }

        let pagination = response.pagination.as_ref();
        let has_more = pagination.map(|p| p.page < p.pages).unwrap_or(false);

        match pagination.filter(|_| has_more) {
            Some(p) if p.urls.next.is_some() => {
                if let Err(e) = self
                    .request_folder_page(user_id, &metadata.token, folder_id, p.page + 1, cancellation)
                    .await
                {
                    tracing::warn!(user_id = %user_id, folder_id, error = %e, "failed to enqueue next folder page, best effort");
                }
            }
            Some(_) => {
                tracing::warn!(user_id = %user_id, folder_id, "pagination claims more pages but no next url, treating folder complete");
                state.completed_folders.insert(folder_id);
            }
            None => {
                state.completed_folders.insert(folder_id);
            }
        }

        self.metrics.record_sync_folder_page("ok");
        self.cache
            .set_sync_state(user_id, &state, self.settings.state_ttl.as_secs())
            .await?;
        self.advance(state, &metadata.token, cancellation).await
    }

    /// T3: a catalog-release response arrives during release backfill.
    async fn handle_release_response(&self, user_id: Uuid, response: ApiResponseEvent) -> Result<(), AppError> {
        let _guard = self.locks.acquire(user_id).await;

        let Some(mut state) = self.cache.get_sync_state(user_id).await? else {
            return Ok(());
        };

        if response.is_success() {
            if let Some(data) = &response.data {
                if let Err(e) = self.upsert_release_from_payload(data).await {
                    tracing::warn!(user_id = %user_id, error = %e, "failed to upsert release from backfill response");
                }
            }
        } else {
            tracing::warn!(user_id = %user_id, error = ?response.error, "release backfill response failed");
        }

        state.pending_release_requests.remove(&response.request_id);
        if state.pending_release_requests.is_empty() {
            state.all_releases_ready = true;
        }
        self.cache
            .set_sync_state(user_id, &state, self.settings.state_ttl.as_secs())
            .await?;

        if state.ready_to_commit() {
            self.commit(user_id, state).await?;
        }
        Ok(())
    }

    async fn upsert_release_from_payload(&self, data: &serde_json::Value) -> Result<(), AppError> {
        let Some(natural_key) = data.get("id").and_then(|v| v.as_i64()) else {
            return Ok(());
        };
        let title = data
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let release = crate::models::Release {
            id: Uuid::new_v4(),
            natural_key,
            title,
            master_key: data.get("master_id").and_then(|v| v.as_i64()),
            country: data.get("country").and_then(|v| v.as_str()).map(str::to_string),
            released: data.get("released").and_then(|v| v.as_str()).map(str::to_string),
            status: data.get("status").and_then(|v| v.as_str()).map(str::to_string),
            notes: data.get("notes").and_then(|v| v.as_str()).map(str::to_string),
            updated_at: Utc::now(),
        };
        store::catalog::upsert_releases(&self.pool, std::slice::from_ref(&release)).await?;
        Ok(())
    }

    /// Checks whether `state` is ready to move to T2/T4, advancing it if so.
    /// `token_value` is the caller's Discogs token, needed if release backfill
    /// requests must be enqueued.
    async fn advance(
        &self,
        mut state: SyncState,
        token_value: &str,
        cancellation: &CancellationToken,
    ) -> Result<(), AppError> {
        let user_id = state.user_id;

        if !state.all_folders_complete() {
            return Ok(());
        }
        state.sync_complete = true;

        if !state.release_validation_done {
            let release_ids: HashSet<i64> = state.merged_releases.values().map(|r| r.release_id).collect();
            let release_ids: Vec<i64> = release_ids.into_iter().collect();
            let existing = store::collection::existing_release_ids(&self.pool, &release_ids).await?;

            self.update_images_on_existing(&state, &existing).await;

            let missing: Vec<i64> = release_ids.into_iter().filter(|id| !existing.contains(id)).collect();
            state.existing_release_ids = existing.into_iter().collect();
            state.release_validation_done = true;
            state.missing_release_ids = missing.clone();

            if missing.is_empty() {
                state.all_releases_ready = true;
            } else {
                match self
                    .release_fetch
                    .enqueue_missing(user_id, token_value, &missing, cancellation)
                    .await
                {
                    Ok(pending) => {
                        state.pending_release_requests = pending;
                        state.all_releases_ready = false;
                    }
                    Err(AppError::SyncReleaseBackfillUnavailable) => {
                        // No request we can wait on will ever answer, so
                        // waiting for T3 here would stall until state_ttl
                        // expiry. Commit with whatever is already in the
                        // catalog instead; the still-missing releases stay
                        // missing and get another backfill attempt on the
                        // next sync trigger.
                        tracing::warn!(
                            user_id = %user_id,
                            missing_count = missing.len(),
                            "proceeding to commit without backfilling missing releases this cycle"
                        );
                        state.pending_release_requests = HashSet::new();
                        state.all_releases_ready = true;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.cache
            .set_sync_state(user_id, &state, self.settings.state_ttl.as_secs())
            .await?;

        if state.ready_to_commit() {
            self.commit(user_id, state).await?;
        }
        Ok(())
    }

    /// Best-effort cover/thumb refresh for releases already known to the
    /// catalog, using the raw page payload instead of a second fetch.
    async fn update_images_on_existing(&self, state: &SyncState, existing: &HashSet<i64>) {
        for release in state.merged_releases.values() {
            if !existing.contains(&release.release_id) {
                continue;
            }
            let Some(raw) = state.original_releases.get(&release.instance_id) else {
                continue;
            };
            let thumb = raw.get("basic_information").and_then(|b| b.get("thumb")).and_then(|v| v.as_str());
            let cover = raw
                .get("basic_information")
                .and_then(|b| b.get("cover_image"))
                .and_then(|v| v.as_str());
            if thumb.is_none() && cover.is_none() {
                continue;
            }
            for (kind, url) in [(crate::models::ImageableKind::Release, thumb), (crate::models::ImageableKind::Release, cover)] {
                if let Some(url) = url {
                    let image = crate::models::Image {
                        id: Uuid::new_v4(),
                        imageable_external_id: release.release_id,
                        imageable_kind: kind,
                        url: url.to_string(),
                        width: None,
                        height: None,
                    };
                    if let Err(e) = store::catalog::upsert_images(&self.pool, std::slice::from_ref(&image)).await {
                        tracing::warn!(release_id = release.release_id, error = %e, "failed to refresh release image");
                    }
                }
            }
        }
    }

    /// T4: differential commit, then best-effort post-commit enrichment and
    /// SyncState teardown.
    async fn commit(&self, user_id: Uuid, state: SyncState) -> Result<(), AppError> {
        let current = store::collection::current_user_releases(&self.pool, user_id).await?;
        let revalidated_ids: Vec<i64> = state.merged_releases.values().map(|r| r.release_id).collect();
        let existing = store::collection::existing_release_ids(&self.pool, &revalidated_ids).await?;

        let diff = compute_diff(&state.merged_releases, current, &existing);
        let total_releases = state.merged_release_count();

        let commit_result = run_in_transaction(&self.pool, move |tx| {
            async move { store::collection::apply_collection_diff(tx, user_id, &diff).await }
        })
        .await;

        if let Err(e) = commit_result {
            self.metrics.record_sync_commit("error");
            self.cache.clear_sync_state(user_id).await?;
            self.bus
                .publish_lifecycle(
                    user_id,
                    LifecycleEvent::SyncError {
                        error: e.error_code().to_string(),
                        message: e.to_string(),
                    },
                )
                .await?;
            return Err(e);
        }

        for (instance_id, raw) in &state.original_releases {
            if let Some(basic_information) = raw.get("basic_information").cloned() {
                if let Err(e) = store::collection::update_basic_information(&self.pool, user_id, *instance_id, &basic_information).await {
                    tracing::warn!(user_id = %user_id, instance_id, error = %e, "post-commit basic information update failed");
                }
            }
        }
        super::basic_info::extract_and_upsert(&self.pool, &state.original_releases).await;

        self.metrics.record_sync_commit("ok");
        self.cache.clear_sync_state(user_id).await?;
        self.cache.clear_release_queue(user_id).await?;
        self.bus
            .publish_lifecycle(user_id, LifecycleEvent::SyncComplete { total_releases })
            .await?;
        Ok(())
    }

    /// Returns a lightweight status snapshot for `GET /api/v1/sync/status`.
    pub async fn status(&self, user_id: Uuid) -> Result<Option<SyncStatusSnapshot>, AppError> {
        let state = self.cache.get_sync_state(user_id).await?;
        Ok(state.map(|s| SyncStatusSnapshot {
            sync_operation_id: s.sync_operation_id,
            total_folders: s.total_folders,
            processed_folders: s.processed_folders(),
            merged_releases: s.merged_release_count(),
            sync_complete: s.sync_complete,
            all_releases_ready: s.all_releases_ready,
        }))
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncStatusSnapshot {
    pub sync_operation_id: Uuid,
    pub total_folders: usize,
    pub processed_folders: usize,
    pub merged_releases: usize,
    pub sync_complete: bool,
    pub all_releases_ready: bool,
}

#[cfg(test)]
mod tests {
    use super::super::bus::testing::RecordingBus;
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn sample_state(user_id: Uuid) -> SyncState {
        let mut state = SyncState::new(user_id, 1);
        state.completed_folders.insert(1);
        state
    }

    #[test]
    fn status_snapshot_mirrors_sync_state_flags() {
        let user_id = Uuid::new_v4();
        let mut state = sample_state(user_id);
        state.sync_complete = true;
        state.all_releases_ready = true;
        let snapshot = SyncStatusSnapshot {
            sync_operation_id: state.sync_operation_id,
            total_folders: state.total_folders,
            processed_folders: state.processed_folders(),
            merged_releases: state.merged_release_count(),
            sync_complete: state.sync_complete,
            all_releases_ready: state.all_releases_ready,
        };
        assert!(snapshot.sync_complete);
        assert!(snapshot.all_releases_ready);
        assert_eq!(snapshot.processed_folders, 1);
    }

    #[tokio::test]
    async fn recording_bus_captures_published_events() {
        let bus = RecordingBus::default();
        let user_id = Uuid::new_v4();
        bus.publish_lifecycle(user_id, LifecycleEvent::SyncComplete { total_releases: 3 })
            .await
            .unwrap();
        assert_eq!(bus.lifecycle.lock().unwrap().len(), 1);
        let _ = StdHashMap::<i64, i64>::new();
    }
}
