//! Per-user collection state mirrored from the catalog during a folder sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// `(userId, folderId)` is unique; folder 0 is the virtual "All" folder and
/// is never synced directly (§3, §8).
pub const ALL_FOLDER_ID: i64 = 0;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Folder {
    pub user_id: Uuid,
    pub folder_id: i64,
    pub name: String,
    pub count: i32,
}

impl Folder {
    pub fn is_virtual_all(&self) -> bool {
        self.folder_id == ALL_FOLDER_ID
    }
}

/// A release the user holds in a given folder, as last observed from the
/// paginated collection listing. `basic_information` is populated best-effort
/// after the commit step (§4.7 T4 step 3) and may lag the rest of the row.
///
/// Keyed by `instance_id` (catalog-assigned, unique within a user's
/// collection) per §3's `UserRelease` invariant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRelease {
    pub id: Uuid,
    pub user_id: Uuid,
    pub instance_id: i64,
    pub release_id: i64,
    pub folder_id: i64,
    pub rating: Option<i16>,
    pub notes: Option<serde_json::Value>,
    pub date_added: DateTime<Utc>,
    pub active: bool,
    pub basic_information: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl UserRelease {
    /// The four mutable fields the §4.7 T4 differential compares; everything
    /// else about a `UserRelease` is identity (`instance_id`) or derived.
    pub fn mutable_fields_differ(&self, other: &UserRelease) -> bool {
        self.folder_id != other.folder_id
            || self.rating != other.rating
            || self.notes != other.notes
            || self.date_added != other.date_added
    }
}

/// A user's linked Discogs account, as registered out-of-band by whatever
/// flow first obtains their personal access token. The periodic sync sweep
/// (§4.6.1) reads `last_synced_at` to decide who is due for a refresh; the
/// Sync Coordinator itself never reads or writes this table directly.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserCatalogLink {
    pub user_id: Uuid,
    pub discogs_token: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Computed diff between the previously-committed collection rows and the
/// freshly fetched pages, applied by the sync coordinator's commit step.
#[derive(Debug, Clone, Default)]
pub struct CollectionDiff {
    pub to_create: Vec<UserRelease>,
    pub to_update: Vec<UserRelease>,
    pub to_delete: Vec<Uuid>,
    /// Instances skipped because their `release_id` did not exist in the
    /// store at commit time (§4.7 T4.1).
    pub skipped_for_missing_fk: usize,
}

impl CollectionDiff {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(instance_id: i64) -> UserRelease {
        UserRelease {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            instance_id,
            release_id: 100,
            folder_id: 1,
            rating: None,
            notes: None,
            date_added: Utc::now(),
            active: true,
            basic_information: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn mutable_field_diff_ignores_identity_fields() {
        let a = release(1);
        let mut b = a.clone();
        b.id = Uuid::new_v4();
        assert!(!a.mutable_fields_differ(&b));

        b.folder_id = 2;
        assert!(a.mutable_fields_differ(&b));
    }

    #[test]
    fn folder_zero_is_virtual_all() {
        let f = Folder {
            user_id: Uuid::new_v4(),
            folder_id: 0,
            name: "All".to_string(),
            count: 10,
        };
        assert!(f.is_virtual_all());
    }
}
