//! Persistence for [`ProcessingRecord`], owned exclusively by the Ingestion
//! Orchestrator (§3 Ownership).

use sqlx::PgPool;

use crate::error::AppError;
use crate::models::{ProcessingRecord, ProcessingStatus};

pub async fn find_by_month(pool: &PgPool, dump_month: &str) -> Result<Option<ProcessingRecord>, AppError> {
    let record = sqlx::query_as(
        r#"
        SELECT id, dump_month, status, checksums, steps_completed,
               artists_processed, labels_processed, masters_processed, releases_processed,
               started_at, finished_at, error_message
        FROM processing_records
        WHERE dump_month = $1
        "#,
    )
    .bind(dump_month)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

pub async fn upsert(pool: &PgPool, record: &ProcessingRecord) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO processing_records
            (id, dump_month, status, checksums, steps_completed,
             artists_processed, labels_processed, masters_processed, releases_processed,
             started_at, finished_at, error_message)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (dump_month) DO UPDATE SET
            status = EXCLUDED.status,
            checksums = EXCLUDED.checksums,
            steps_completed = EXCLUDED.steps_completed,
            artists_processed = EXCLUDED.artists_processed,
            labels_processed = EXCLUDED.labels_processed,
            masters_processed = EXCLUDED.masters_processed,
            releases_processed = EXCLUDED.releases_processed,
            started_at = EXCLUDED.started_at,
            finished_at = EXCLUDED.finished_at,
            error_message = EXCLUDED.error_message
        "#,
    )
    .bind(record.id)
    .bind(&record.dump_month)
    .bind(record.status)
    .bind(&record.checksums)
    .bind(&record.steps_completed)
    .bind(record.artists_processed)
    .bind(record.labels_processed)
    .bind(record.masters_processed)
    .bind(record.releases_processed)
    .bind(record.started_at)
    .bind(record.finished_at)
    .bind(&record.error_message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Months currently sitting in `readyForProcessing`, the set the scheduler's
/// monthly sweep drives through the ingestion pipeline.
pub async fn months_ready_for_processing(pool: &PgPool) -> Result<Vec<String>, AppError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT dump_month FROM processing_records WHERE status = $1 ORDER BY dump_month",
    )
    .bind(ProcessingStatus::ReadyForProcessing)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(m,)| m).collect())
}
