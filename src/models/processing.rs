//! Bookkeeping rows tracking a single bulk-ingestion run (§3 `ProcessingRecord`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One `ProcessingRecord` per calendar month. The full lifecycle per §3:
/// `notStarted → downloading → readyForProcessing → processing → completed|failed`.
/// This crate only drives the last three transitions; download is a
/// separate, out-of-scope step that leaves a file on disk and flips the
/// record to `ReadyForProcessing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ProcessingStatus {
    NotStarted,
    Downloading,
    ReadyForProcessing,
    Processing,
    Completed,
    Failed,
}

/// The four dump kinds published per month, in the order the orchestrator
/// processes them (primaries before the files that reference them is not
/// required across files, only within one file's channels -- see §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpKind {
    Artists,
    Labels,
    Masters,
    Releases,
}

impl DumpKind {
    pub const ALL: [DumpKind; 4] = [
        DumpKind::Artists,
        DumpKind::Labels,
        DumpKind::Masters,
        DumpKind::Releases,
    ];

    pub fn file_stem(&self) -> &'static str {
        match self {
            DumpKind::Artists => "artists",
            DumpKind::Labels => "labels",
            DumpKind::Masters => "masters",
            DumpKind::Releases => "releases",
        }
    }

    pub fn element_name(&self) -> &'static str {
        match self {
            DumpKind::Artists => "artist",
            DumpKind::Labels => "label",
            DumpKind::Masters => "master",
            DumpKind::Releases => "release",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProcessingRecord {
    pub id: Uuid,
    /// `YYYY-MM`.
    pub dump_month: String,
    pub status: ProcessingStatus,
    /// Per-file checksum, keyed by `DumpKind::file_stem()`, populated by the
    /// download step this crate does not own.
    pub checksums: serde_json::Value,
    /// Per-step completion flags, keyed by `DumpKind::file_stem()`.
    pub steps_completed: serde_json::Value,
    pub artists_processed: i64,
    pub labels_processed: i64,
    pub masters_processed: i64,
    pub releases_processed: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl ProcessingRecord {
    pub fn new(dump_month: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dump_month: dump_month.into(),
            status: ProcessingStatus::NotStarted,
            checksums: serde_json::json!({}),
            steps_completed: serde_json::json!({}),
            artists_processed: 0,
            labels_processed: 0,
            masters_processed: 0,
            releases_processed: 0,
            started_at: None,
            finished_at: None,
            error_message: None,
        }
    }

    pub fn mark_step_complete(&mut self, kind: DumpKind) {
        self.steps_completed[kind.file_stem()] = serde_json::Value::Bool(true);
    }

    pub fn all_steps_complete(&self) -> bool {
        DumpKind::ALL.iter().all(|kind| {
            self.steps_completed
                .get(kind.file_stem())
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        })
    }
}

/// Point-in-time counters reported back to callers polling ingest status;
/// mirrors `ProcessingRecord` but without committing to the database on
/// every update.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub artists_processed: u64,
    pub labels_processed: u64,
    pub masters_processed: u64,
    pub releases_processed: u64,
    pub genres_processed: u64,
    pub images_processed: u64,
    pub master_artist_links: u64,
    pub master_genre_links: u64,
    pub parse_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_has_no_steps_complete() {
        let record = ProcessingRecord::new("2026-07");
        assert!(!record.all_steps_complete());
    }

    #[test]
    fn all_steps_complete_once_every_kind_marked() {
        let mut record = ProcessingRecord::new("2026-07");
        for kind in DumpKind::ALL {
            record.mark_step_complete(kind);
        }
        assert!(record.all_steps_complete());
    }
}
