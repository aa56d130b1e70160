//! Shared test fixtures.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::manager::ShardMapManager;
use crate::store::memory::MemoryStore;

/// A manager over a fresh in-memory store, plus the store itself for
/// direct inspection and fault injection.
pub(crate) fn manager() -> (ShardMapManager, MemoryStore) {
    crate::logger();
    let store = MemoryStore::new();
    let manager = ShardMapManager::with_defaults(Arc::new(store.clone()));
    (manager, store)
}

/// A second manager sharing the same store; models another process.
pub(crate) fn attach(store: &MemoryStore) -> ShardMapManager {
    ShardMapManager::with_defaults(Arc::new(store.clone()))
}

pub(crate) fn run() -> CancellationToken {
    CancellationToken::new()
}
