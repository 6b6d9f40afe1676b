//! Background sweep that drives calendar months sitting in
//! `ReadyForProcessing` through the Ingestion Orchestrator without anyone
//! having to call `/api/v1/ingest/:month/trigger` by hand.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::ingest::IngestionOrchestrator;
use crate::store;
use crate::sync::SyncCoordinator;

/// Polls for months ready to ingest and runs each one through the orchestrator.
pub struct IngestScheduler {
    orchestrator: Arc<IngestionOrchestrator>,
    pool: PgPool,
    poll_interval: Duration,
}

impl IngestScheduler {
    pub fn new(orchestrator: Arc<IngestionOrchestrator>, pool: PgPool, poll_interval: Duration) -> Self {
        Self {
            orchestrator,
            pool,
            poll_interval,
        }
    }

    /// Spawns the sweep loop and returns a handle that can stop it.
    pub fn start(self) -> IngestSchedulerHandle {
        let running = Arc::new(RwLock::new(true));
        let stop_flag = running.clone();
        let cancellation = CancellationToken::new();
        let worker_cancellation = cancellation.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.poll_interval);
            loop {
                interval.tick().await;
                if !*stop_flag.read().await {
                    break;
                }
                self.run_sweep(&worker_cancellation).await;
            }
        });

        IngestSchedulerHandle { running, cancellation }
    }

    async fn run_sweep(&self, token: &CancellationToken) {
        let months = match store::processing::months_ready_for_processing(&self.pool).await {
            Ok(months) => months,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list months ready for processing");
                return;
            }
        };

        for month in months {
            if token.is_cancelled() {
                break;
            }
            tracing::info!(dump_month = %month, "scheduler starting ingestion run");
            if let Err(e) = self.orchestrator.run_month(&month, token.clone()).await {
                tracing::error!(dump_month = %month, error = %e, "scheduled ingestion run failed");
            }
        }
    }
}

/// Handle returned by [`IngestScheduler::start`]; stopping it lets the current
/// sweep (if any) finish and prevents the next tick from starting another.
pub struct IngestSchedulerHandle {
    running: Arc<RwLock<bool>>,
    cancellation: CancellationToken,
}

impl IngestSchedulerHandle {
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.cancellation.cancel();
    }
}

/// Periodic per-user collection sync sweep (§4.6.1 (b)): finds every user
/// whose `user_catalog_links.last_synced_at` is older than `staleness` and
/// fires T0 for them. Trigger is idempotent (the Coordinator itself no-ops
/// if a non-stale sync is already in flight for that user), so a slow sweep
/// overlapping a long sync is harmless.
pub struct SyncScheduler {
    coordinator: Arc<SyncCoordinator>,
    pool: PgPool,
    poll_interval: Duration,
    staleness: chrono::Duration,
}

impl SyncScheduler {
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        pool: PgPool,
        poll_interval: Duration,
        staleness: Duration,
    ) -> Self {
        Self {
            coordinator,
            pool,
            poll_interval,
            staleness: chrono::Duration::from_std(staleness).unwrap_or(chrono::Duration::days(1)),
        }
    }

    pub fn start(self) -> IngestSchedulerHandle {
        let running = Arc::new(RwLock::new(true));
        let stop_flag = running.clone();
        let cancellation = CancellationToken::new();
        let worker_cancellation = cancellation.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.poll_interval);
            loop {
                interval.tick().await;
                if !*stop_flag.read().await {
                    break;
                }
                self.run_sweep(&worker_cancellation).await;
            }
        });

        IngestSchedulerHandle { running, cancellation }
    }

    async fn run_sweep(&self, token: &CancellationToken) {
        let due = match store::collection::users_due_for_sync(&self.pool, self.staleness).await {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list users due for sync");
                return;
            }
        };

        for link in due {
            if token.is_cancelled() {
                break;
            }
            if let Err(e) = self.coordinator.trigger(link.user_id, &link.discogs_token, token).await {
                tracing::warn!(user_id = %link.user_id, error = %e, "scheduled sync trigger failed");
                continue;
            }
            if let Err(e) = store::collection::mark_sync_triggered(&self.pool, link.user_id).await {
                tracing::warn!(user_id = %link.user_id, error = %e, "failed to record sync sweep bookkeeping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handle_stop_flips_running_flag_and_cancels_token() {
        let running = Arc::new(RwLock::new(true));
        let cancellation = CancellationToken::new();
        let handle = IngestSchedulerHandle {
            running: running.clone(),
            cancellation: cancellation.clone(),
        };

        handle.stop().await;

        assert!(!*running.read().await);
        assert!(cancellation.is_cancelled());
    }
}
