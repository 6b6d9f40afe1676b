//! Association Workers (§4.5): MasterArtist buffers exact pairs and flushes
//! insert-ignore; MasterGenre accumulates a union of genre names per master
//! and reconciles the join table on flush.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::{MasterArtist, MasterGenre};

use super::buffer_worker::{run_buffer_worker, BufferedEntity};

impl BufferedEntity for MasterArtist {
    type Key = (i64, i64);
    fn buffer_key(&self) -> (i64, i64) {
        (self.master_key, self.artist_key)
    }
}

pub async fn run_master_artist_worker<Flush, Fut>(
    rx: mpsc::Receiver<MasterArtist>,
    threshold: usize,
    flush: Flush,
    token: CancellationToken,
) -> Result<u64, AppError>
where
    Flush: FnMut(Vec<MasterArtist>) -> Fut,
    Fut: std::future::Future<Output = Result<(), AppError>>,
{
    run_buffer_worker(rx, threshold, flush, token).await
}

/// One inbound `(masterKey, genreName)` pair at a time; the worker unions
/// genre names per master and flushes once it has buffered `threshold`
/// distinct masters.
pub async fn run_master_genre_worker<Flush, Fut>(
    mut rx: mpsc::Receiver<(i64, String)>,
    threshold: usize,
    mut flush: Flush,
    token: CancellationToken,
) -> Result<u64, AppError>
where
    Flush: FnMut(Vec<MasterGenre>) -> Fut,
    Fut: std::future::Future<Output = Result<(), AppError>>,
{
    let mut buffer: HashMap<i64, HashSet<String>> = HashMap::new();
    let mut total = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            received = rx.recv() => {
                match received {
                    Some((master_key, genre_name)) => {
                        buffer.entry(master_key).or_default().insert(genre_name);
                        if buffer.len() >= threshold {
                            total += flush_master_genres(&mut buffer, &mut flush).await?;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    total += flush_master_genres(&mut buffer, &mut flush).await?;
    Ok(total)
}

async fn flush_master_genres<Flush, Fut>(
    buffer: &mut HashMap<i64, HashSet<String>>,
    flush: &mut Flush,
) -> Result<u64, AppError>
where
    Flush: FnMut(Vec<MasterGenre>) -> Fut,
    Fut: std::future::Future<Output = Result<(), AppError>>,
{
    if buffer.is_empty() {
        return Ok(0);
    }
    let rows: Vec<MasterGenre> = buffer
        .drain()
        .flat_map(|(master_key, genre_names)| {
            genre_names
                .into_iter()
                .map(move |genre_name| MasterGenre { master_key, genre_name })
        })
        .collect();
    let count = rows.len() as u64;
    flush(rows).await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn master_genre_worker_unions_names_per_master() {
        let (tx, rx) = mpsc::channel(16);
        let flushed = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let flushed_clone = flushed.clone();

        let worker = tokio::spawn(run_master_genre_worker(
            rx,
            10,
            move |rows: Vec<MasterGenre>| {
                flushed_clone.lock().unwrap().extend(rows);
                async move { Ok(()) }
            },
            CancellationToken::new(),
        ));

        tx.send((1, "Electronic".to_string())).await.unwrap();
        tx.send((1, "IDM".to_string())).await.unwrap();
        tx.send((2, "Rock".to_string())).await.unwrap();
        drop(tx);

        let total = worker.await.unwrap().unwrap();
        assert_eq!(total, 3);
        let flushed = flushed.lock().unwrap();
        let master_one_count = flushed.iter().filter(|r| r.master_key == 1).count();
        assert_eq!(master_one_count, 2);
    }
}
