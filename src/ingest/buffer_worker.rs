//! Generic Buffer Worker (§4.4): one per entity kind, each deduplicating on
//! its own natural key and flushing through the store's batch upsert once
//! the map reaches that kind's threshold, on channel close, or on
//! cancellation (best effort).

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::{Genre, GenreKind, Image, ImageableKind};

/// An entity with a stable natural key the worker dedups on (last write
/// wins, per §4.4: "it overwrites the map slot").
pub trait BufferedEntity: Send + 'static {
    type Key: Eq + Hash + Send;

    fn buffer_key(&self) -> Self::Key;
}

impl BufferedEntity for crate::models::Artist {
    type Key = i64;
    fn buffer_key(&self) -> i64 {
        self.natural_key
    }
}

impl BufferedEntity for crate::models::Label {
    type Key = i64;
    fn buffer_key(&self) -> i64 {
        self.natural_key
    }
}

impl BufferedEntity for crate::models::Master {
    type Key = i64;
    fn buffer_key(&self) -> i64 {
        self.natural_key
    }
}

impl BufferedEntity for crate::models::Release {
    type Key = i64;
    fn buffer_key(&self) -> i64 {
        self.natural_key
    }
}

impl BufferedEntity for Genre {
    type Key = (String, GenreKind);
    fn buffer_key(&self) -> (String, GenreKind) {
        self.natural_key()
    }
}

impl BufferedEntity for Image {
    type Key = (i64, ImageableKind, String);
    fn buffer_key(&self) -> (i64, ImageableKind, String) {
        let (id, kind, url) = self.natural_key();
        (id, kind, url.to_string())
    }
}

/// Drains `rx` into a dedup map, invoking `flush` whenever the map reaches
/// `threshold` unique entries, and once more for any remainder once the
/// channel closes or `token` fires. Returns the total number of entities
/// handed to `flush` across all calls.
pub async fn run_buffer_worker<T, Flush, Fut>(
    mut rx: mpsc::Receiver<T>,
    threshold: usize,
    mut flush: Flush,
    token: CancellationToken,
) -> Result<u64, AppError>
where
    T: BufferedEntity,
    Flush: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<(), AppError>>,
{
    let mut buffer: HashMap<T::Key, T> = HashMap::new();
    let mut total = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            received = rx.recv() => {
                match received {
                    Some(item) => {
                        buffer.insert(item.buffer_key(), item);
                        if buffer.len() >= threshold {
                            total += flush_remaining(&mut buffer, &mut flush).await?;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    total += flush_remaining(&mut buffer, &mut flush).await?;
    Ok(total)
}

async fn flush_remaining<T, Flush, Fut>(
    buffer: &mut HashMap<T::Key, T>,
    flush: &mut Flush,
) -> Result<u64, AppError>
where
    T: BufferedEntity,
    Flush: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<(), AppError>>,
{
    if buffer.is_empty() {
        return Ok(0);
    }
    let items: Vec<T> = buffer.drain().map(|(_, v)| v).collect();
    let count = items.len() as u64;
    flush(items).await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    fn artist(natural_key: i64) -> crate::models::Artist {
        crate::models::Artist {
            id: Uuid::new_v4(),
            natural_key,
            name: format!("artist-{natural_key}"),
            real_name: None,
            profile: None,
            data_quality: None,
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn flushes_at_threshold_and_on_close() {
        let (tx, rx) = mpsc::channel(16);
        let flush_calls = Arc::new(AtomicU64::new(0));
        let flush_calls_clone = flush_calls.clone();

        let worker = tokio::spawn(run_buffer_worker(
            rx,
            2,
            move |batch: Vec<crate::models::Artist>| {
                flush_calls_clone.fetch_add(1, Ordering::SeqCst);
                let len = batch.len() as u64;
                async move {
                    assert!(len <= 2);
                    Ok(())
                }
            },
            CancellationToken::new(),
        ));

        tx.send(artist(1)).await.unwrap();
        tx.send(artist(2)).await.unwrap();
        tx.send(artist(3)).await.unwrap();
        drop(tx);

        let total = worker.await.unwrap().unwrap();
        assert_eq!(total, 3);
        assert_eq!(flush_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dedups_on_natural_key_last_write_wins() {
        let (tx, rx) = mpsc::channel(16);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let worker = tokio::spawn(run_buffer_worker(
            rx,
            10,
            move |batch: Vec<crate::models::Artist>| {
                seen_clone.lock().unwrap().extend(batch);
                async move { Ok(()) }
            },
            CancellationToken::new(),
        ));

        let mut dup = artist(1);
        dup.name = "first".to_string();
        tx.send(dup).await.unwrap();
        let mut dup2 = artist(1);
        dup2.name = "second".to_string();
        tx.send(dup2).await.unwrap();
        drop(tx);

        worker.await.unwrap().unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].name, "second");
    }
}
