//! Point and range mappings.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::key::{Error as KeyError, ShardKey, ShardKeyType, ShardRange};

use super::{Shard, ShardMap};

/// The zero GUID: mapping is not locked.
pub const NO_LOCK: Uuid = Uuid::nil();

/// The all-ones GUID. Unlocks any mapping regardless of owner and is
/// rejected as a lock owner.
pub fn force_unlock_token() -> Uuid {
    Uuid::max()
}

/// Whether a data-plane connection may be routed to the mapping.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Offline,
    #[default]
    Online,
}

impl From<MappingStatus> for i32 {
    fn from(value: MappingStatus) -> Self {
        match value {
            MappingStatus::Offline => 0,
            MappingStatus::Online => 1,
        }
    }
}

impl From<i32> for MappingStatus {
    fn from(value: i32) -> Self {
        match value {
            1 => Self::Online,
            _ => Self::Offline,
        }
    }
}

/// Point or range row, as stored.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MappingKind {
    Point,
    Range,
}

/// A mapping row in its stored form: normalized key bytes plus the target
/// shard snapshot. Public [`PointMapping`]/[`RangeMapping`] views decode
/// the key bounds on top of this.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoreMapping {
    pub id: Uuid,
    pub shard_map_id: Uuid,
    pub kind: MappingKind,
    /// Normalized low bound; empty bytes is the key-space minimum.
    pub min_value: Bytes,
    /// Normalized high bound; `None` is +inf.
    pub max_value: Option<Bytes>,
    pub status: MappingStatus,
    pub lock_owner_id: Uuid,
    pub shard: Shard,
    /// Set while a multi-phase operation owns the row.
    pub operation_id: Option<Uuid>,
}

impl StoreMapping {
    pub(crate) fn new(
        shard_map: &ShardMap,
        kind: MappingKind,
        range: &ShardRange,
        shard: Shard,
        status: MappingStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            shard_map_id: shard_map.id,
            kind,
            min_value: range.low().raw_value().cloned().unwrap_or_default(),
            max_value: range.high().raw_value().cloned(),
            status,
            lock_owner_id: NO_LOCK,
            shard,
            operation_id: None,
        }
    }

    /// The key range covered by the row.
    pub fn range(&self, key_type: ShardKeyType) -> Result<ShardRange, KeyError> {
        let low = ShardKey::from_raw(key_type, self.min_value.clone())?;
        let high = ShardKey::from_stored(key_type, self.max_value.clone())?;
        ShardRange::new(low, high)
    }

    pub fn is_locked(&self) -> bool {
        self.lock_owner_id != NO_LOCK
    }
}

/// Common surface of point and range mappings.
pub trait MappingInfo {
    fn id(&self) -> Uuid;
    fn range(&self) -> &ShardRange;
    fn status(&self) -> MappingStatus;
    fn shard(&self) -> &Shard;
    fn store_mapping(&self) -> &StoreMapping;
}

/// `key -> shard`.
#[derive(Debug, Clone, PartialEq)]
pub struct PointMapping {
    pub(crate) store: StoreMapping,
    pub(crate) key: ShardKey,
    pub(crate) range: ShardRange,
}

impl PointMapping {
    pub(crate) fn from_store(store: StoreMapping, key_type: ShardKeyType) -> Result<Self, KeyError> {
        let range = store.range(key_type)?;
        let key = range.low().clone();
        Ok(Self { store, key, range })
    }

    pub fn key(&self) -> &ShardKey {
        &self.key
    }

    pub fn lock_owner_id(&self) -> Uuid {
        self.store.lock_owner_id
    }
}

impl MappingInfo for PointMapping {
    fn id(&self) -> Uuid {
        self.store.id
    }

    fn range(&self) -> &ShardRange {
        &self.range
    }

    fn status(&self) -> MappingStatus {
        self.store.status
    }

    fn shard(&self) -> &Shard {
        &self.store.shard
    }

    fn store_mapping(&self) -> &StoreMapping {
        &self.store
    }
}

/// Half-open `[low, high) -> shard`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeMapping {
    pub(crate) store: StoreMapping,
    pub(crate) range: ShardRange,
}

impl RangeMapping {
    pub(crate) fn from_store(store: StoreMapping, key_type: ShardKeyType) -> Result<Self, KeyError> {
        let range = store.range(key_type)?;
        Ok(Self { store, range })
    }

    pub fn lock_owner_id(&self) -> Uuid {
        self.store.lock_owner_id
    }
}

impl MappingInfo for RangeMapping {
    fn id(&self) -> Uuid {
        self.store.id
    }

    fn range(&self) -> &ShardRange {
        &self.range
    }

    fn status(&self) -> MappingStatus {
        self.store.status
    }

    fn shard(&self) -> &Shard {
        &self.store.shard
    }

    fn store_mapping(&self) -> &StoreMapping {
        &self.store
    }
}

/// Changes to apply to an existing mapping. Unset fields keep their
/// current value; a set `shard` moves the mapping.
#[derive(Debug, Clone, Default)]
pub struct MappingUpdate {
    pub status: Option<MappingStatus>,
    pub shard: Option<Shard>,
}

impl MappingUpdate {
    pub fn status(mut self, status: MappingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn shard(mut self, shard: Shard) -> Self {
        self.shard = Some(shard);
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{ShardLocation, ShardMapKind, ShardStatus};

    fn fixture() -> (ShardMap, Shard) {
        let map = ShardMap::new("test", ShardMapKind::Range, ShardKeyType::Int32);
        let shard = Shard::new(map.id, ShardLocation::new_test(1), ShardStatus::Online);
        (map, shard)
    }

    #[test]
    fn test_range_round_trip() {
        let (map, shard) = fixture();
        let range = ShardRange::new(
            ShardKey::new(10i32).unwrap(),
            ShardKey::new(20i32).unwrap(),
        )
        .unwrap();

        let store = StoreMapping::new(&map, MappingKind::Range, &range, shard, MappingStatus::Online);
        assert_eq!(store.range(ShardKeyType::Int32).unwrap(), range);
        assert!(!store.is_locked());
    }

    #[test]
    fn test_point_mapping_key() {
        let (map, shard) = fixture();
        let key = ShardKey::new(42i32).unwrap();
        let range = ShardRange::unit(key.clone()).unwrap();

        let store = StoreMapping::new(&map, MappingKind::Point, &range, shard, MappingStatus::Online);
        let point = PointMapping::from_store(store, ShardKeyType::Int32).unwrap();
        assert_eq!(point.key(), &key);
        assert_eq!(point.range().high(), &key.next_key());
    }

    #[test]
    fn test_force_token_is_all_ones() {
        assert_eq!(force_unlock_token().as_bytes(), &[0xff; 16]);
        assert_ne!(force_unlock_token(), NO_LOCK);
    }

    #[test]
    fn test_max_bound_is_absent_bytes() {
        let (map, shard) = fixture();
        let range = ShardRange::new(
            ShardKey::new(10i32).unwrap(),
            ShardKey::max(ShardKeyType::Int32),
        )
        .unwrap();

        let store = StoreMapping::new(&map, MappingKind::Range, &range, shard, MappingStatus::Online);
        assert!(store.max_value.is_none());
        assert!(store
            .range(ShardKeyType::Int32)
            .unwrap()
            .contains(&ShardKey::new(i32::MAX).unwrap())
            .unwrap());
    }
}
