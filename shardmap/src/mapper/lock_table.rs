//! Per-shard in-process lock table.
//!
//! Serializes cache revalidation per shard so a burst of requesters for a
//! dead shard shares one GSM round trip. Entries purge themselves once
//! nobody contends them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
pub(crate) struct ShardLockTable {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ShardLockTable {
    pub async fn lock(self: &Arc<Self>, shard_id: Uuid) -> ShardLockGuard {
        let handle = self
            .locks
            .entry(shard_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = handle.lock_owned().await;

        ShardLockGuard {
            table: self.clone(),
            shard_id,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

pub(crate) struct ShardLockGuard {
    table: Arc<ShardLockTable>,
    shard_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ShardLockGuard {
    fn drop(&mut self) {
        // Release first, then purge the slot if nobody else holds it.
        self.guard.take();
        self.table
            .locks
            .remove_if(&self.shard_id, |_, handle| Arc::strong_count(handle) == 1);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_serializes_per_shard() {
        let table = Arc::new(ShardLockTable::default());
        let shard = Uuid::new_v4();

        let guard = table.lock(shard).await;

        let table2 = table.clone();
        let waiter = tokio::spawn(async move {
            let _guard = table2.lock(shard).await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_uncontended_entries_purge() {
        let table = Arc::new(ShardLockTable::default());

        let a = table.lock(Uuid::new_v4()).await;
        let b = table.lock(Uuid::new_v4()).await;
        assert_eq!(table.len(), 2);

        drop(a);
        drop(b);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_distinct_shards_do_not_block() {
        let table = Arc::new(ShardLockTable::default());
        let _a = table.lock(Uuid::new_v4()).await;
        let _b = table.lock(Uuid::new_v4()).await;
    }
}
