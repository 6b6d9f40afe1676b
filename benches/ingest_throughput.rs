use std::io::Write;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cratesync_backend::ingest::buffer_worker::run_buffer_worker;
use cratesync_backend::ingest::decoder::decode_dump_file;
use cratesync_backend::ingest::raw::parse_artist;
use cratesync_backend::models::Artist;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn synthetic_artists_dump(count: u32) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".xml")
        .tempfile()
        .expect("failed to create temp dump file");
    writeln!(file, "<artists>").unwrap();
    for id in 1..=count {
        writeln!(
            file,
            "<artist><id>{id}</id><name>Artist {id}</name><realname>Real Name {id}</realname></artist>"
        )
        .unwrap();
    }
    writeln!(file, "</artists>").unwrap();
    file.flush().unwrap();
    file
}

fn decode_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("decode_dump_file");

    for entity_count in [100u32, 1_000, 10_000].iter() {
        let dump = synthetic_artists_dump(*entity_count);
        let path = dump.path().to_path_buf();

        group.bench_with_input(
            BenchmarkId::new("artists", entity_count),
            entity_count,
            |b, _| {
                b.to_async(&rt).iter(|| {
                    let path = path.clone();
                    async move {
                        let (tx, mut rx) = mpsc::channel(1024);
                        let token = CancellationToken::new();
                        let handle = tokio::spawn(decode_dump_file(
                            path,
                            cratesync_backend::models::DumpKind::Artists,
                            tx,
                            token,
                        ));

                        let mut seen = 0usize;
                        while let Some(node) = rx.recv().await {
                            black_box(parse_artist(&node));
                            seen += 1;
                        }
                        handle.await.unwrap().unwrap();
                        black_box(seen)
                    }
                })
            },
        );
    }

    group.finish();
}

fn buffer_worker_dedup_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("buffer_worker_dedup");

    for entity_count in [1_000u32, 10_000, 50_000].iter() {
        group.bench_with_input(
            BenchmarkId::new("artists", entity_count),
            entity_count,
            |b, &entity_count| {
                b.to_async(&rt).iter(|| async move {
                    let (tx, rx) = mpsc::channel(entity_count as usize + 1);
                    let token = CancellationToken::new();

                    for id in 0..entity_count {
                        // Every other id is a repeat, exercising the dedup map's
                        // last-write-wins overwrite path under load.
                        let natural_key = (id % (entity_count / 2).max(1)) as i64;
                        let artist = Artist {
                            id: uuid::Uuid::new_v4(),
                            natural_key,
                            name: format!("Artist {natural_key}"),
                            real_name: None,
                            profile: None,
                            data_quality: None,
                            updated_at: chrono::Utc::now(),
                        };
                        tx.send(artist).await.unwrap();
                    }
                    drop(tx);

                    let flushed = run_buffer_worker(
                        rx,
                        5_000,
                        |batch| async move {
                            black_box(batch.len());
                            Ok(())
                        },
                        token,
                    )
                    .await
                    .unwrap();
                    black_box(flushed)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, decode_benchmark, buffer_worker_dedup_benchmark);
criterion_main!(benches);
