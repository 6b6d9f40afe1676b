//! Store operations backing the Collection Sync Coordinator's diff/commit
//! step (§4.7 T4) and the pre-commit release-existence checks (§4.7 T2).

use std::collections::{HashMap, HashSet};

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{CollectionDiff, Folder, UserCatalogLink, UserRelease, ALL_FOLDER_ID};

/// Folders known locally for `user_id`, refreshed by the most recent
/// `folders` proxy response (§4.7 T0). Folder 0 (the virtual "All" folder) is
/// never synced directly and so is excluded here.
pub async fn list_syncable_folders(pool: &PgPool, user_id: Uuid) -> Result<Vec<Folder>, AppError> {
    let rows: Vec<Folder> = sqlx::query_as(
        "SELECT user_id, folder_id, name, count FROM folders WHERE user_id = $1 AND folder_id != $2",
    )
    .bind(user_id)
    .bind(ALL_FOLDER_ID)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Replaces the locally cached folder list for `user_id` with a fresh batch
/// from the `folders` proxy response.
pub async fn replace_folders(pool: &PgPool, user_id: Uuid, folders: &[Folder]) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM folders WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    for folder in folders {
        sqlx::query(
            "INSERT INTO folders (user_id, folder_id, name, count) VALUES ($1, $2, $3, $4)",
        )
        .bind(folder.user_id)
        .bind(folder.folder_id)
        .bind(&folder.name)
        .bind(folder.count)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// All active `UserRelease` rows for `user_id`, keyed by `instance_id` — the
/// same key `SyncState.merged_releases` uses, so the diff step can compare
/// directly without reshaping either side.
pub async fn current_user_releases(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<HashMap<i64, UserRelease>, AppError> {
    let rows: Vec<UserRelease> = sqlx::query_as(
        r#"
        SELECT id, user_id, instance_id, release_id, folder_id, rating, notes,
               date_added, active, basic_information, updated_at
        FROM user_releases
        WHERE user_id = $1 AND active = true
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| (r.instance_id, r)).collect())
}

/// Partitions `release_ids` into the subset that exists in the `releases`
/// table, used by §4.7 T2 to decide which merged releases still need a
/// catalog-release fetch.
pub async fn existing_release_ids(pool: &PgPool, release_ids: &[i64]) -> Result<HashSet<i64>, AppError> {
    if release_ids.is_empty() {
        return Ok(HashSet::new());
    }
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT natural_key FROM releases WHERE natural_key = ANY($1)",
    )
    .bind(release_ids)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Applies a computed [`CollectionDiff`] inside an already-open transaction
/// (the Transaction Wrapper in `crate::tx` owns begin/commit/rollback), in
/// the create/update/delete order §4.7 T4.2 specifies.
pub async fn apply_collection_diff(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    diff: &CollectionDiff,
) -> Result<(), AppError> {
    for row in &diff.to_create {
        sqlx::query(
            r#"
            INSERT INTO user_releases
                (id, user_id, instance_id, release_id, folder_id, rating, notes, date_added, active, basic_information, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, true, $9, now())
            "#,
        )
        .bind(row.id)
        .bind(user_id)
        .bind(row.instance_id)
        .bind(row.release_id)
        .bind(row.folder_id)
        .bind(row.rating)
        .bind(&row.notes)
        .bind(row.date_added)
        .bind(&row.basic_information)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::store_batch("user_releases_create", e))?;
    }

    for row in &diff.to_update {
        sqlx::query(
            r#"
            UPDATE user_releases
            SET folder_id = $1, rating = $2, notes = $3, date_added = $4, updated_at = now()
            WHERE id = $5 AND user_id = $6
            "#,
        )
        .bind(row.folder_id)
        .bind(row.rating)
        .bind(&row.notes)
        .bind(row.date_added)
        .bind(row.id)
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::store_batch("user_releases_update", e))?;
    }

    if !diff.to_delete.is_empty() {
        sqlx::query("DELETE FROM user_releases WHERE id = ANY($1) AND user_id = $2")
            .bind(&diff.to_delete)
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::store_batch("user_releases_delete", e))?;
    }

    Ok(())
}

/// Best-effort post-commit step (§4.7 T4.3): stores the `basic_information`
/// blob for each committed instance so later reads don't need to re-derive
/// it from `original_releases`.
pub async fn update_basic_information(
    pool: &PgPool,
    user_id: Uuid,
    instance_id: i64,
    basic_information: &serde_json::Value,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE user_releases SET basic_information = $1 WHERE user_id = $2 AND instance_id = $3",
    )
    .bind(basic_information)
    .bind(user_id)
    .bind(instance_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Users linked to Discogs whose last sync (if any) is older than
/// `staleness`, used by the scheduler's periodic per-user sync sweep
/// (§4.6.1). Never-synced users (`last_synced_at IS NULL`) are always due.
pub async fn users_due_for_sync(
    pool: &PgPool,
    staleness: chrono::Duration,
) -> Result<Vec<UserCatalogLink>, AppError> {
    let cutoff: DateTime<Utc> = Utc::now() - staleness;
    let rows: Vec<UserCatalogLink> = sqlx::query_as(
        r#"
        SELECT user_id, discogs_token, last_synced_at, created_at
        FROM user_catalog_links
        WHERE last_synced_at IS NULL OR last_synced_at < $1
        ORDER BY last_synced_at ASC NULLS FIRST
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Marks `user_id` as just having had a sync triggered, so the next sweep
/// does not immediately re-queue it while that sync is still in flight.
pub async fn mark_sync_triggered(pool: &PgPool, user_id: Uuid) -> Result<(), AppError> {
    sqlx::query("UPDATE user_catalog_links SET last_synced_at = now() WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_helpers_compile_against_collection_diff_shape() {
        let diff = CollectionDiff::default();
        assert!(diff.is_empty());
    }
}
