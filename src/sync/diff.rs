//! Differential analysis (§4.7 T4 step 1): compares a user's freshly merged
//! collection pages against the rows already committed in the store. Pure
//! and side-effect free so it can be unit tested without a database.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use uuid::Uuid;

use crate::models::{CollectionDiff, UserRelease};

/// Computes creates/updates/deletes for one user's sync, given:
/// - `merged`: this sync's freshly paginated rows, keyed by `instance_id`;
/// - `mut current`: the rows already committed for this user, keyed by
///   `instance_id` (consumed; anything left over at the end is a delete);
/// - `existing_release_ids`: release ids that still exist in the catalog at
///   commit time, used to drop rows whose release has since disappeared.
pub fn compute_diff(
    merged: &HashMap<i64, UserRelease>,
    mut current: HashMap<i64, UserRelease>,
    existing_release_ids: &HashSet<i64>,
) -> CollectionDiff {
    let mut diff = CollectionDiff::default();

    for (instance_id, candidate) in merged {
        if !existing_release_ids.contains(&candidate.release_id) {
            diff.skipped_for_missing_fk += 1;
            continue;
        }

        match current.remove(instance_id) {
            Some(existing) => {
                if existing.mutable_fields_differ(candidate) {
                    let mut updated = existing;
                    updated.folder_id = candidate.folder_id;
                    updated.rating = candidate.rating;
                    updated.notes = candidate.notes.clone();
                    updated.date_added = candidate.date_added;
                    updated.updated_at = Utc::now();
                    diff.to_update.push(updated);
                }
            }
            None => {
                let mut created = candidate.clone();
                if created.id.is_nil() {
                    created.id = Uuid::new_v4();
                }
                diff.to_create.push(created);
            }
        }
    }

    diff.to_delete.extend(current.into_values().map(|row| row.id));
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn release(id: Uuid, instance_id: i64, release_id: i64, folder_id: i64) -> UserRelease {
        UserRelease {
            id,
            user_id: Uuid::new_v4(),
            instance_id,
            release_id,
            folder_id,
            rating: None,
            notes: None,
            date_added: Utc::now(),
            active: true,
            basic_information: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn unchanged_rows_produce_no_update() {
        let existing = release(Uuid::new_v4(), 1, 10, 1);
        let mut current = HashMap::new();
        current.insert(1, existing.clone());
        let mut merged = HashMap::new();
        merged.insert(1, existing);

        let diff = compute_diff(&merged, current, &HashSet::from([10]));
        assert!(diff.is_empty());
    }

    #[test]
    fn changed_folder_produces_update_preserving_identity() {
        let id = Uuid::new_v4();
        let existing = release(id, 1, 10, 1);
        let mut candidate = existing.clone();
        candidate.folder_id = 2;

        let mut current = HashMap::new();
        current.insert(1, existing);
        let mut merged = HashMap::new();
        merged.insert(1, candidate);

        let diff = compute_diff(&merged, current, &HashSet::from([10]));
        assert_eq!(diff.to_update.len(), 1);
        assert_eq!(diff.to_update[0].id, id);
        assert_eq!(diff.to_update[0].folder_id, 2);
    }

    #[test]
    fn new_instance_is_a_create() {
        let candidate = release(Uuid::new_v4(), 1, 10, 1);
        let mut merged = HashMap::new();
        merged.insert(1, candidate);

        let diff = compute_diff(&merged, HashMap::new(), &HashSet::from([10]));
        assert_eq!(diff.to_create.len(), 1);
    }

    #[test]
    fn missing_from_merged_is_a_delete() {
        let id = Uuid::new_v4();
        let existing = release(id, 1, 10, 1);
        let mut current = HashMap::new();
        current.insert(1, existing);

        let diff = compute_diff(&HashMap::new(), current, &HashSet::from([10]));
        assert_eq!(diff.to_delete, vec![id]);
    }

    #[test]
    fn missing_release_fk_is_skipped_not_created() {
        let candidate = release(Uuid::new_v4(), 1, 999, 1);
        let mut merged = HashMap::new();
        merged.insert(1, candidate);

        let diff = compute_diff(&merged, HashMap::new(), &HashSet::new());
        assert!(diff.to_create.is_empty());
        assert_eq!(diff.skipped_for_missing_fk, 1);
    }

    proptest! {
        /// Every merged instance with a valid release fk lands in exactly one
        /// of create/update (never both, never dropped silently), and every
        /// current row absent from merged is accounted for as a delete.
        #[test]
        fn every_merged_instance_is_classified_exactly_once(
            instance_ids in prop::collection::hash_set(1i64..1000, 1..20),
            stale_instance_ids in prop::collection::hash_set(1000i64..2000, 0..10),
        ) {
            let release_id = 10i64;
            let existing_release_ids = HashSet::from([release_id]);

            let merged: HashMap<i64, UserRelease> = instance_ids
                .iter()
                .map(|&iid| (iid, release(Uuid::new_v4(), iid, release_id, 1)))
                .collect();
            let current: HashMap<i64, UserRelease> = stale_instance_ids
                .iter()
                .map(|&iid| (iid, release(Uuid::new_v4(), iid, release_id, 1)))
                .collect();

            let diff = compute_diff(&merged, current.clone(), &existing_release_ids);

            prop_assert_eq!(diff.to_create.len() + diff.to_update.len(), instance_ids.len());
            prop_assert_eq!(diff.to_delete.len(), stale_instance_ids.len());
            prop_assert_eq!(diff.skipped_for_missing_fk, 0);
        }

        /// A release whose fk has disappeared from the catalog is always
        /// skipped, regardless of whether it was already present or brand new.
        #[test]
        fn rows_with_missing_release_fk_are_never_created_or_updated(
            instance_ids in prop::collection::hash_set(1i64..1000, 1..20),
        ) {
            let merged: HashMap<i64, UserRelease> = instance_ids
                .iter()
                .map(|&iid| (iid, release(Uuid::new_v4(), iid, 999, 1)))
                .collect();

            let diff = compute_diff(&merged, HashMap::new(), &HashSet::new());

            prop_assert!(diff.to_create.is_empty());
            prop_assert!(diff.to_update.is_empty());
            prop_assert_eq!(diff.skipped_for_missing_fk, instance_ids.len());
        }
    }
}
