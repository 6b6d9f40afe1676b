//! Per-user serialization for the sync coordinator: concurrent proxied
//! responses for the same user must not race on that user's `SyncState`,
//! while responses for different users must not block each other. An
//! `Arc<DashMap<Uuid, Arc<Mutex<()>>>>` holding a lock handle per user rather
//! than a cached value.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the per-user lock, creating it on first use. Holding the
    /// returned guard for the duration of a SyncState read-modify-write keeps
    /// concurrent responses for `user_id` causally consistent.
    pub async fn acquire(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn different_users_do_not_share_a_lock() {
        let locks = UserLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let guard_a = locks.acquire(a).await;
        // Must not deadlock: b's lock is independent of a's.
        let guard_b = locks.acquire(b).await;
        drop(guard_a);
        drop(guard_b);
    }

    #[tokio::test]
    async fn same_user_serializes() {
        let locks = Arc::new(UserLocks::new());
        let user = Uuid::new_v4();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let locks_a = locks.clone();
        let order_a = order.clone();
        let a = tokio::spawn(async move {
            let _guard = locks_a.acquire(user).await;
            order_a.lock().unwrap().push('a');
        });

        let locks_b = locks.clone();
        let order_b = order.clone();
        let b = tokio::spawn(async move {
            let _guard = locks_b.acquire(user).await;
            order_b.lock().unwrap().push('b');
        });

        let _ = tokio::join!(a, b);
        assert_eq!(order.lock().unwrap().len(), 2);
    }
}
