//! Process-wide mapping cache.
//!
//! Routing consults this before going to the GSM. Entries age out softly:
//! an expired entry is only a hint to revalidate when the data plane
//! misbehaves, never a reason to evict.

pub mod counters;
pub mod entry;

pub use counters::{CacheCounter, CacheCounters, CacheStats};
pub use entry::CachedMapping;

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::key::ShardKey;
use crate::model::{ShardMap, StoreMapping};

/// What an insert does when it meets an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Replace whatever overlaps.
    OverwriteExisting,
    /// Replace and refresh the clock; used by stale-entry revalidation.
    UpdateTimeToLive,
    /// Keep an existing overlapping entry, drop the new one.
    NeverOverwrite,
}

struct MapCache {
    // Keyed by the normalized low bound. Point mappings are unit ranges,
    // so one ordered map serves both kinds.
    entries: RwLock<BTreeMap<Bytes, CachedMapping>>,
    counters: CacheCounters,
}

impl MapCache {
    fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            counters: CacheCounters::default(),
        }
    }
}

/// Mapping cache, sharded by shard map so lookups and evictions on
/// different maps never serialize against each other.
pub struct MappingCache {
    ttl: Duration,
    maps: DashMap<Uuid, MapCache>,
}

impl MappingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            maps: DashMap::new(),
        }
    }

    /// The cached mapping covering `key`, if any. Expired entries are
    /// still returned; `CachedMapping::has_expired` tells the caller to
    /// treat them as stale.
    pub fn lookup(&self, shard_map: &ShardMap, key: &ShardKey) -> Option<CachedMapping> {
        let raw = key.raw_value()?;
        let map = self.maps.get(&shard_map.id)?;
        let entries = map.entries.read();

        let hit = entries
            .range(..=raw.clone())
            .next_back()
            .filter(|(_, cached)| covers(&cached.mapping, raw))
            .map(|(_, cached)| cached.clone());

        map.counters.increment(if hit.is_some() {
            CacheCounter::Hit
        } else {
            CacheCounter::Miss
        });
        hit
    }

    /// Insert a mapping, evicting everything its range overlaps.
    pub fn insert(&self, shard_map: &ShardMap, mapping: StoreMapping, policy: CachePolicy) {
        let map = self.maps.entry(shard_map.id).or_insert_with(MapCache::new);
        let mut entries = map.entries.write();

        let overlapping: Vec<Bytes> = entries
            .values()
            .filter(|cached| overlaps(&cached.mapping, &mapping))
            .map(|cached| cached.mapping.min_value.clone())
            .collect();

        if policy == CachePolicy::NeverOverwrite && !overlapping.is_empty() {
            return;
        }

        for key in overlapping {
            entries.remove(&key);
            map.counters.increment(CacheCounter::Eviction);
        }

        map.counters.increment(match policy {
            CachePolicy::UpdateTimeToLive => CacheCounter::Update,
            _ => CacheCounter::Add,
        });
        entries.insert(
            mapping.min_value.clone(),
            CachedMapping::new(mapping, self.ttl),
        );
    }

    /// Drop the entry for a mapping, if cached.
    pub fn delete_mapping(&self, mapping: &StoreMapping) {
        if let Some(map) = self.maps.get(&mapping.shard_map_id) {
            let mut entries = map.entries.write();
            let matches = entries
                .get(&mapping.min_value)
                .map(|cached| cached.mapping.id == mapping.id)
                .unwrap_or(false);
            if matches {
                entries.remove(&mapping.min_value);
                map.counters.increment(CacheCounter::Eviction);
            }
        }
    }

    /// Drop every entry of a shard map.
    pub fn delete_shard_map(&self, shard_map_id: Uuid) {
        self.maps.remove(&shard_map_id);
    }

    /// Refresh the clock on the entry covering `key`. No-op when the
    /// entry is gone; the routing path may race an eviction here.
    pub fn reset_ttl(&self, shard_map: &ShardMap, key: &ShardKey) {
        let Some(raw) = key.raw_value() else {
            return;
        };
        if let Some(map) = self.maps.get(&shard_map.id) {
            let mut entries = map.entries.write();
            if let Some((_, cached)) = entries
                .range_mut(..=raw.clone())
                .next_back()
                .filter(|(_, cached)| covers(&cached.mapping, raw))
            {
                cached.reset_ttl();
            }
        }
    }

    pub fn increment_counter(&self, shard_map: &ShardMap, counter: CacheCounter) {
        if let Some(map) = self.maps.get(&shard_map.id) {
            map.counters.increment(counter);
        }
    }

    pub fn counters(&self, shard_map: &ShardMap) -> CacheStats {
        self.maps
            .get(&shard_map.id)
            .map(|map| map.counters.snapshot())
            .unwrap_or_default()
    }
}

fn covers(mapping: &StoreMapping, key: &Bytes) -> bool {
    mapping.min_value <= *key
        && match &mapping.max_value {
            Some(max) => key < max,
            None => true,
        }
}

fn overlaps(a: &StoreMapping, b: &StoreMapping) -> bool {
    let a_starts_first = match &b.max_value {
        Some(max) => a.min_value < *max,
        None => true,
    };
    let b_starts_first = match &a.max_value {
        Some(max) => b.min_value < *max,
        None => true,
    };
    a_starts_first && b_starts_first
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::{ShardKeyType, ShardRange};
    use crate::model::{MappingKind, MappingStatus, Shard, ShardLocation, ShardMapKind, ShardStatus};

    fn fixture() -> (MappingCache, ShardMap, Shard) {
        let map = ShardMap::new("cache", ShardMapKind::Range, ShardKeyType::Int32);
        let shard = Shard::new(map.id, ShardLocation::new_test(1), ShardStatus::Online);
        (MappingCache::new(Duration::from_secs(60)), map, shard)
    }

    fn mapping(map: &ShardMap, shard: &Shard, low: i32, high: i32) -> StoreMapping {
        let range = ShardRange::new(
            ShardKey::new(low).unwrap(),
            ShardKey::new(high).unwrap(),
        )
        .unwrap();
        StoreMapping::new(map, MappingKind::Range, &range, shard.clone(), MappingStatus::Online)
    }

    fn key(value: i32) -> ShardKey {
        ShardKey::new(value).unwrap()
    }

    #[test]
    fn test_lookup_by_containing_range() {
        let (cache, map, shard) = fixture();
        let m = mapping(&map, &shard, 10, 20);
        cache.insert(&map, m.clone(), CachePolicy::OverwriteExisting);

        assert_eq!(cache.lookup(&map, &key(10)).unwrap().mapping.id, m.id);
        assert_eq!(cache.lookup(&map, &key(19)).unwrap().mapping.id, m.id);
        assert!(cache.lookup(&map, &key(20)).is_none());
        assert!(cache.lookup(&map, &key(9)).is_none());

        let counters = cache.counters(&map);
        assert_eq!(counters.hits, 2);
        assert_eq!(counters.misses, 2);
    }

    #[test]
    fn test_insert_evicts_overlapping() {
        let (cache, map, shard) = fixture();
        cache.insert(&map, mapping(&map, &shard, 10, 20), CachePolicy::OverwriteExisting);
        cache.insert(&map, mapping(&map, &shard, 20, 30), CachePolicy::OverwriteExisting);

        // Covers [15, 25): both existing entries go.
        let replacement = mapping(&map, &shard, 15, 25);
        cache.insert(&map, replacement.clone(), CachePolicy::OverwriteExisting);

        assert_eq!(
            cache.lookup(&map, &key(16)).unwrap().mapping.id,
            replacement.id
        );
        assert!(cache.lookup(&map, &key(10)).is_none());
        assert!(cache.lookup(&map, &key(29)).is_none());
    }

    #[test]
    fn test_never_overwrite_keeps_existing() {
        let (cache, map, shard) = fixture();
        let original = mapping(&map, &shard, 10, 20);
        cache.insert(&map, original.clone(), CachePolicy::OverwriteExisting);
        cache.insert(&map, mapping(&map, &shard, 10, 20), CachePolicy::NeverOverwrite);

        assert_eq!(cache.lookup(&map, &key(15)).unwrap().mapping.id, original.id);
    }

    #[test]
    fn test_expiry_is_soft() {
        let (_, map, shard) = fixture();
        let cache = MappingCache::new(Duration::ZERO);
        cache.insert(&map, mapping(&map, &shard, 10, 20), CachePolicy::OverwriteExisting);

        // Expired entries still resolve; staleness is the caller's hint.
        let hit = cache.lookup(&map, &key(15)).unwrap();
        assert!(hit.has_expired());
    }

    #[test]
    fn test_delete_mapping_checks_identity() {
        let (cache, map, shard) = fixture();
        let m = mapping(&map, &shard, 10, 20);
        cache.insert(&map, m.clone(), CachePolicy::OverwriteExisting);

        // Same range, different id: not the cached row, nothing happens.
        let other = mapping(&map, &shard, 10, 20);
        cache.delete_mapping(&other);
        assert!(cache.lookup(&map, &key(15)).is_some());

        cache.delete_mapping(&m);
        assert!(cache.lookup(&map, &key(15)).is_none());
    }

    #[test]
    fn test_reset_ttl_missing_entry_is_noop() {
        let (cache, map, _) = fixture();
        cache.reset_ttl(&map, &key(15));
    }

    #[test]
    fn test_delete_shard_map() {
        let (cache, map, shard) = fixture();
        cache.insert(&map, mapping(&map, &shard, 10, 20), CachePolicy::OverwriteExisting);
        cache.delete_shard_map(map.id);
        assert!(cache.lookup(&map, &key(15)).is_none());
    }
}
