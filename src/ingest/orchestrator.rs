//! Ingestion Orchestrator (§4.6): drives one calendar month's worth of
//! catalog dump files through the decode → process → buffer-and-upsert
//! pipeline, and owns the [`ProcessingRecord`] lifecycle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::IngestSettings;
use crate::error::AppError;
use crate::metrics::MetricsCollector;
use crate::models::{DumpKind, ProcessingRecord, ProcessingStatus};
use crate::store;

use super::association_worker::{run_master_artist_worker, run_master_genre_worker};
use super::buffer_worker::run_buffer_worker;
use super::decoder::decode_dump_file;
use super::processor::{process_node, EntityChannels};

pub struct IngestionOrchestrator {
    pool: PgPool,
    settings: IngestSettings,
    metrics: Arc<MetricsCollector>,
}

impl IngestionOrchestrator {
    pub fn new(pool: PgPool, settings: IngestSettings, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            pool,
            settings,
            metrics,
        }
    }

    /// Runs the full pipeline for `dump_month` (`YYYY-MM`), updating its
    /// `ProcessingRecord` at every lifecycle transition in §4.6.
    pub async fn run_month(
        &self,
        dump_month: &str,
        token: CancellationToken,
    ) -> Result<ProcessingRecord, AppError> {
        let mut record = store::processing::find_by_month(&self.pool, dump_month)
            .await?
            .unwrap_or_else(|| ProcessingRecord::new(dump_month));

        record.status = ProcessingStatus::Processing;
        record.started_at = Some(Utc::now());
        store::processing::upsert(&self.pool, &record).await?;

        let result = self.run_pipeline(dump_month, &token).await;

        match result {
            Ok(counts) => {
                record.artists_processed = counts.artists as i64;
                record.labels_processed = counts.labels as i64;
                record.masters_processed = counts.masters as i64;
                record.releases_processed = counts.releases as i64;
                for kind in DumpKind::ALL {
                    record.mark_step_complete(kind);
                }
                record.status = ProcessingStatus::Completed;
                record.finished_at = Some(Utc::now());
            }
            Err(ref e) => {
                record.status = ProcessingStatus::Failed;
                record.error_message = Some(e.to_string());
                record.finished_at = Some(Utc::now());
            }
        }

        store::processing::upsert(&self.pool, &record).await?;
        result.map(|_| record)
    }

    async fn run_pipeline(&self, dump_month: &str, token: &CancellationToken) -> Result<PipelineCounts, AppError> {
        let capacity = self.settings.channel_capacity;
        let (artist_tx, artist_rx) = mpsc::channel(capacity);
        let (label_tx, label_rx) = mpsc::channel(capacity);
        let (master_tx, master_rx) = mpsc::channel(capacity);
        let (release_tx, release_rx) = mpsc::channel(capacity);
        let (image_tx, image_rx) = mpsc::channel(capacity);
        let (genre_tx, genre_rx) = mpsc::channel(capacity);
        let (master_artist_tx, master_artist_rx) = mpsc::channel(capacity);
        let (master_genre_tx, master_genre_rx) = mpsc::channel(capacity);

        let channels = EntityChannels {
            artist: artist_tx,
            label: label_tx,
            master: master_tx,
            release: release_tx,
            image: image_tx,
            genre: genre_tx,
            master_artist: master_artist_tx,
            master_genre: master_genre_tx,
        };

        let counts = Arc::new(PipelineCountsAtomic::default());
        let mut workers: JoinSet<Result<u64, AppError>> = JoinSet::new();

        self.spawn_primary_workers(&mut workers, artist_rx, label_rx, master_rx, release_rx, &counts, token);
        self.spawn_secondary_workers(&mut workers, image_rx, genre_rx, token);
        self.spawn_association_workers(&mut workers, master_artist_rx, master_genre_rx, token);

        for kind in DumpKind::ALL {
            if token.is_cancelled() {
                break;
            }
            self.decode_and_process_file(dump_month, kind, &channels, token)
                .await?;
        }

        // Close primary channels first, then image/genre, then associations,
        // so association workers observe every primary row's forward
        // reference before they see the channel close (§4.6 step 5).
        let EntityChannels {
            artist,
            label,
            master,
            release,
            image,
            genre,
            master_artist,
            master_genre,
        } = channels;
        drop(artist);
        drop(label);
        drop(master);
        drop(release);
        drop(image);
        drop(genre);
        drop(master_artist);
        drop(master_genre);

        while let Some(result) = workers.join_next().await {
            result.map_err(|e| AppError::Internal(format!("ingest worker task panicked: {e}")))??;
        }

        Ok(PipelineCounts {
            artists: counts.artists.load(Ordering::SeqCst),
            labels: counts.labels.load(Ordering::SeqCst),
            masters: counts.masters.load(Ordering::SeqCst),
            releases: counts.releases.load(Ordering::SeqCst),
        })
    }

    async fn decode_and_process_file(
        &self,
        dump_month: &str,
        kind: DumpKind,
        channels: &EntityChannels,
        token: &CancellationToken,
    ) -> Result<(), AppError> {
        let path = self.dump_path(dump_month, kind);
        let (node_tx, mut node_rx) = mpsc::channel(self.settings.channel_capacity);

        let decoder_handle = tokio::spawn(decode_dump_file(path, kind, node_tx, token.clone()));

        while let Some(node) = node_rx.recv().await {
            if token.is_cancelled() {
                break;
            }
            process_node(kind, &node, channels, &self.metrics).await;
        }

        decoder_handle
            .await
            .map_err(|e| AppError::DecodeFatal(format!("decoder task panicked: {e}")))??;
        Ok(())
    }

    fn dump_path(&self, dump_month: &str, kind: DumpKind) -> PathBuf {
        PathBuf::from(&self.settings.dump_directory)
            .join(dump_month)
            .join(format!("{}.xml.gz", kind.file_stem()))
    }

    fn spawn_primary_workers(
        &self,
        workers: &mut JoinSet<Result<u64, AppError>>,
        artist_rx: mpsc::Receiver<crate::models::Artist>,
        label_rx: mpsc::Receiver<crate::models::Label>,
        master_rx: mpsc::Receiver<crate::models::Master>,
        release_rx: mpsc::Receiver<crate::models::Release>,
        counts: &Arc<PipelineCountsAtomic>,
        token: &CancellationToken,
    ) {
        let threshold = self.settings.primary_flush_threshold;
        let release_threshold = self.settings.release_flush_threshold;

        let pool = self.pool.clone();
        let counts_clone = counts.clone();
        let token_clone = token.clone();
        workers.spawn(async move {
            run_buffer_worker(
                artist_rx,
                threshold,
                move |batch| {
                    let pool = pool.clone();
                    let counts = counts_clone.clone();
                    async move {
                        let n = batch.len() as u64;
                        store::catalog::upsert_artists(&pool, &batch).await?;
                        counts.artists.fetch_add(n, Ordering::SeqCst);
                        Ok(())
                    }
                },
                token_clone,
            )
            .await
        });

        let pool = self.pool.clone();
        let counts_clone = counts.clone();
        let token_clone = token.clone();
        workers.spawn(async move {
            run_buffer_worker(
                label_rx,
                threshold,
                move |batch| {
                    let pool = pool.clone();
                    let counts = counts_clone.clone();
                    async move {
                        let n = batch.len() as u64;
                        store::catalog::upsert_labels(&pool, &batch).await?;
                        counts.labels.fetch_add(n, Ordering::SeqCst);
                        Ok(())
                    }
                },
                token_clone,
            )
            .await
        });

        let pool = self.pool.clone();
        let counts_clone = counts.clone();
        let token_clone = token.clone();
        workers.spawn(async move {
            run_buffer_worker(
                master_rx,
                threshold,
                move |batch| {
                    let pool = pool.clone();
                    let counts = counts_clone.clone();
                    async move {
                        let n = batch.len() as u64;
                        store::catalog::upsert_masters(&pool, &batch).await?;
                        counts.masters.fetch_add(n, Ordering::SeqCst);
                        Ok(())
                    }
                },
                token_clone,
            )
            .await
        });

        let pool = self.pool.clone();
        let counts_clone = counts.clone();
        let token_clone = token.clone();
        workers.spawn(async move {
            run_buffer_worker(
                release_rx,
                release_threshold,
                move |batch| {
                    let pool = pool.clone();
                    let counts = counts_clone.clone();
                    async move {
                        let n = batch.len() as u64;
                        store::catalog::upsert_releases(&pool, &batch).await?;
                        counts.releases.fetch_add(n, Ordering::SeqCst);
                        Ok(())
                    }
                },
                token_clone,
            )
            .await
        });
    }

    fn spawn_secondary_workers(
        &self,
        workers: &mut JoinSet<Result<u64, AppError>>,
        image_rx: mpsc::Receiver<crate::models::Image>,
        genre_rx: mpsc::Receiver<crate::models::Genre>,
        token: &CancellationToken,
    ) {
        let threshold = self.settings.primary_flush_threshold;

        let pool = self.pool.clone();
        let token_clone = token.clone();
        workers.spawn(async move {
            run_buffer_worker(
                image_rx,
                threshold,
                move |batch| {
                    let pool = pool.clone();
                    async move { store::catalog::upsert_images(&pool, &batch).await.map(|_| ()) }
                },
                token_clone,
            )
            .await
        });

        let pool = self.pool.clone();
        let token_clone = token.clone();
        workers.spawn(async move {
            run_buffer_worker(
                genre_rx,
                threshold,
                move |batch| {
                    let pool = pool.clone();
                    async move { store::catalog::upsert_genres(&pool, &batch).await.map(|_| ()) }
                },
                token_clone,
            )
            .await
        });
    }

    fn spawn_association_workers(
        &self,
        workers: &mut JoinSet<Result<u64, AppError>>,
        master_artist_rx: mpsc::Receiver<crate::models::MasterArtist>,
        master_genre_rx: mpsc::Receiver<(i64, String)>,
        token: &CancellationToken,
    ) {
        let threshold = self.settings.association_flush_threshold;

        let pool = self.pool.clone();
        let token_clone = token.clone();
        workers.spawn(async move {
            run_master_artist_worker(
                master_artist_rx,
                threshold,
                move |batch| {
                    let pool = pool.clone();
                    async move { store::catalog::insert_master_artists(&pool, &batch).await.map(|_| ()) }
                },
                token_clone,
            )
            .await
        });

        let pool = self.pool.clone();
        let token_clone = token.clone();
        workers.spawn(async move {
            run_master_genre_worker(
                master_genre_rx,
                threshold,
                move |batch| {
                    let pool = pool.clone();
                    async move { store::catalog::reconcile_master_genres(&pool, &batch).await.map(|_| ()) }
                },
                token_clone,
            )
            .await
        });
    }
}

#[derive(Debug, Default)]
struct PipelineCountsAtomic {
    artists: AtomicU64,
    labels: AtomicU64,
    masters: AtomicU64,
    releases: AtomicU64,
}

struct PipelineCounts {
    artists: u64,
    labels: u64,
    masters: u64,
    releases: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_path_joins_month_and_file_stem() {
        let orchestrator = IngestionOrchestrator {
            pool: sqlx::PgPool::connect_lazy("postgres://localhost/test").expect("lazy pool"),
            settings: IngestSettings {
                channel_capacity: 10,
                primary_flush_threshold: 5,
                release_flush_threshold: 5,
                association_flush_threshold: 5,
                dump_directory: "./dumps".to_string(),
            },
            metrics: Arc::new(MetricsCollector::new().expect("metrics registry")),
        };
        let path = orchestrator.dump_path("2026-07", DumpKind::Releases);
        assert_eq!(path, PathBuf::from("./dumps/2026-07/releases.xml.gz"));
    }
}
