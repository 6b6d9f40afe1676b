//! Cache-resident state machine backing the collection sync coordinator (§3, §4.7).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::collection::UserRelease;

/// Metadata about a single outstanding request proxied through the event bus,
/// used to correlate an inbound response and to detect stale/duplicate ones.
/// `(userId, requestId, requestType, issuedAt, token, folderId?)` per §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequestMetadata {
    pub user_id: Uuid,
    pub request_id: Uuid,
    pub request_type: ApiRequestType,
    pub issued_at: DateTime<Utc>,
    pub token: String,
    pub folder_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiRequestType {
    Folders,
    FolderReleases,
    Release,
}

/// The raw item payload exactly as it arrived in a folder-releases page, kept
/// around in `original_releases` so the post-commit basic-info extraction
/// step (§4.7 T4.3) can re-read genres/images/track-lists without a second
/// network round trip.
pub type RawItem = serde_json::Value;

/// The full state for one user's in-flight sync, round-tripped through the
/// cache between pagination callbacks. Mirrors §3's `SyncState` shape
/// exactly so the coordinator never has to reshape it on read or write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub user_id: Uuid,
    pub sync_operation_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub total_folders: usize,
    pub completed_folders: HashSet<i64>,
    pub merged_releases: HashMap<i64, UserRelease>,
    pub original_releases: HashMap<i64, RawItem>,
    pub missing_release_ids: Vec<i64>,
    pub existing_release_ids: Vec<i64>,
    pub pending_release_requests: HashSet<Uuid>,
    pub release_validation_done: bool,
    pub all_releases_ready: bool,
    pub sync_complete: bool,
}

impl SyncState {
    pub fn new(user_id: Uuid, total_folders: usize) -> Self {
        Self {
            user_id,
            sync_operation_id: Uuid::new_v4(),
            started_at: Utc::now(),
            total_folders,
            completed_folders: HashSet::new(),
            merged_releases: HashMap::new(),
            original_releases: HashMap::new(),
            missing_release_ids: Vec::new(),
            existing_release_ids: Vec::new(),
            pending_release_requests: HashSet::new(),
            release_validation_done: false,
            all_releases_ready: false,
            sync_complete: false,
        }
    }

    /// §8: a SyncState older than `ttl` is discarded as stale on the next trigger.
    pub fn is_stale(&self, ttl: chrono::Duration) -> bool {
        Utc::now().signed_duration_since(self.started_at) > ttl
    }

    pub fn processed_folders(&self) -> usize {
        self.completed_folders.len()
    }

    pub fn all_folders_complete(&self) -> bool {
        self.processed_folders() >= self.total_folders
    }

    /// §4.7 T2: ready to commit once every folder's pages are in and every
    /// referenced release either already existed or has since been fetched.
    pub fn ready_to_commit(&self) -> bool {
        self.sync_complete && self.all_releases_ready
    }

    pub fn merged_release_count(&self) -> usize {
        self.merged_releases.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_not_stale() {
        let state = SyncState::new(Uuid::new_v4(), 3);
        assert!(!state.is_stale(chrono::Duration::hours(2)));
    }

    #[test]
    fn stale_after_ttl_elapsed() {
        let mut state = SyncState::new(Uuid::new_v4(), 3);
        state.started_at = Utc::now() - chrono::Duration::seconds(2 * 3600 + 1);
        assert!(state.is_stale(chrono::Duration::hours(2)));
    }

    #[test]
    fn not_complete_until_every_folder_reports() {
        let mut state = SyncState::new(Uuid::new_v4(), 2);
        assert!(!state.all_folders_complete());
        state.completed_folders.insert(10);
        assert!(!state.all_folders_complete());
        state.completed_folders.insert(20);
        assert!(state.all_folders_complete());
    }

    #[test]
    fn ready_to_commit_requires_both_flags() {
        let mut state = SyncState::new(Uuid::new_v4(), 1);
        assert!(!state.ready_to_commit());
        state.sync_complete = true;
        assert!(!state.ready_to_commit());
        state.all_releases_ready = true;
        assert!(state.ready_to_commit());
    }
}
