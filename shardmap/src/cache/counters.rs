//! Cache performance counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCounter {
    Hit,
    Miss,
    Add,
    Update,
    Eviction,
}

/// Live per-shard-map counters.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    adds: AtomicU64,
    updates: AtomicU64,
    evictions: AtomicU64,
}

/// Frozen counter values.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub adds: u64,
    pub updates: u64,
    pub evictions: u64,
}

impl CacheCounters {
    pub(crate) fn increment(&self, counter: CacheCounter) {
        let cell = match counter {
            CacheCounter::Hit => &self.hits,
            CacheCounter::Miss => &self.misses,
            CacheCounter::Add => &self.adds,
            CacheCounter::Update => &self.updates,
            CacheCounter::Eviction => &self.evictions,
        };
        cell.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            adds: self.adds.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
