//! End-to-end exercise of the ingestion orchestrator (§4.6): writes small
//! gzipped dump fixtures for all four entity kinds to a temp directory and
//! drives a full month through decode -> process -> buffer-and-upsert
//! against a real Postgres instance.

mod common;

use std::io::Write;
use std::sync::Arc;

use cratesync_backend::config::IngestSettings;
use cratesync_backend::ingest::IngestionOrchestrator;
use cratesync_backend::metrics::MetricsCollector;
use cratesync_backend::models::ProcessingStatus;
use flate2::write::GzEncoder;
use flate2::Compression;
use serial_test::serial;
use tokio_util::sync::CancellationToken;

fn write_gz(path: &std::path::Path, xml: &str) {
    let file = std::fs::File::create(path).expect("create fixture file");
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(xml.as_bytes()).expect("write fixture xml");
    encoder.finish().expect("finish gzip stream");
}

fn write_month_fixtures(dump_dir: &std::path::Path, month: &str) {
    let month_dir = dump_dir.join(month);
    std::fs::create_dir_all(&month_dir).expect("create month dir");

    write_gz(
        &month_dir.join("artists.xml.gz"),
        r#"<artists>
            <artist><id>1</id><name>Aphex Twin</name><realname>Richard D. James</realname></artist>
            <artist><id>2</id><name>Boards of Canada</name></artist>
        </artists>"#,
    );
    write_gz(
        &month_dir.join("labels.xml.gz"),
        r#"<labels>
            <label><id>10</id><name>Warp Records</name></label>
        </labels>"#,
    );
    write_gz(
        &month_dir.join("masters.xml.gz"),
        r#"<masters>
            <master>
                <id>100</id>
                <title>Selected Ambient Works 85-92</title>
                <year>1992</year>
                <genres><genre>Electronic</genre></genres>
                <artists><artist><id>1</id><name>Aphex Twin</name></artist></artists>
            </master>
        </masters>"#,
    );
    write_gz(
        &month_dir.join("releases.xml.gz"),
        r#"<releases>
            <release id="1000">
                <title>Selected Ambient Works 85-92</title>
                <master_id>100</master_id>
                <country>UK</country>
                <released>1992-02-01</released>
            </release>
            <release id="1001">
                <title>Music Has the Right to Children</title>
                <country>UK</country>
            </release>
        </releases>"#,
    );
}

fn ingest_settings(dump_directory: String) -> IngestSettings {
    IngestSettings {
        channel_capacity: 64,
        primary_flush_threshold: 10,
        release_flush_threshold: 10,
        association_flush_threshold: 10,
        dump_directory,
    }
}

#[tokio::test]
#[serial]
async fn run_month_ingests_all_four_dump_kinds_and_marks_processing_complete() {
    let docker = common::docker();
    let db = common::TestDatabase::new(docker).await;

    let dump_dir = tempfile::tempdir().expect("tempdir for dump fixtures");
    let month = "2026-06";
    write_month_fixtures(dump_dir.path(), month);

    let metrics = Arc::new(MetricsCollector::new().expect("metrics registry"));
    let orchestrator = IngestionOrchestrator::new(
        db.pool.clone(),
        ingest_settings(dump_dir.path().to_string_lossy().into_owned()),
        metrics,
    );

    let record = orchestrator
        .run_month(month, CancellationToken::new())
        .await
        .expect("pipeline run should succeed");

    assert_eq!(record.status, ProcessingStatus::Completed);
    assert_eq!(record.artists_processed, 2);
    assert_eq!(record.labels_processed, 1);
    assert_eq!(record.masters_processed, 1);
    assert_eq!(record.releases_processed, 2);
    assert!(record.finished_at.is_some());

    let (artist_count,): (i64,) = sqlx::query_as("SELECT count(*) FROM artists")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(artist_count, 2);

    let (release_count,): (i64,) = sqlx::query_as("SELECT count(*) FROM releases")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(release_count, 2);

    let (master_genre_count,): (i64,) = sqlx::query_as("SELECT count(*) FROM master_genres")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(master_genre_count, 1);

    let persisted = cratesync_backend::store::processing::find_by_month(&db.pool, month)
        .await
        .unwrap()
        .expect("processing record should be persisted");
    assert_eq!(persisted.status, ProcessingStatus::Completed);
}

#[tokio::test]
#[serial]
async fn run_month_marks_failed_when_a_dump_file_is_missing() {
    let docker = common::docker();
    let db = common::TestDatabase::new(docker).await;

    // An empty dump directory: the artists fixture the orchestrator expects
    // for this month is absent, so the decoder should fail fast.
    let dump_dir = tempfile::tempdir().expect("tempdir for dump fixtures");

    let metrics = Arc::new(MetricsCollector::new().expect("metrics registry"));
    let orchestrator = IngestionOrchestrator::new(
        db.pool.clone(),
        ingest_settings(dump_dir.path().to_string_lossy().into_owned()),
        metrics,
    );

    let result = orchestrator.run_month("2026-07", CancellationToken::new()).await;
    assert!(result.is_err());

    let persisted = cratesync_backend::store::processing::find_by_month(&db.pool, "2026-07")
        .await
        .unwrap()
        .expect("processing record should still be persisted on failure");
    assert_eq!(persisted.status, ProcessingStatus::Failed);
    assert!(persisted.error_message.is_some());
}
