//! Range shard maps.

use std::marker::PhantomData;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Error;
use crate::key::{Key, ShardKey, ShardRange};
use crate::mapper::{ConnectionOptions, ShardConnection};
use crate::model::{
    MappingInfo, MappingKind, MappingStatus, MappingUpdate, RangeMapping, Shard, ShardLocation,
    ShardMap, ShardStatus,
};

use super::ops::MapOps;

/// A shard map of half-open range mappings over keys of type `K`.
#[derive(Debug)]
pub struct RangeShardMap<K: Key> {
    ops: MapOps,
    _key: PhantomData<fn() -> K>,
}

impl<K: Key> RangeShardMap<K> {
    pub(crate) fn new(ops: MapOps) -> Self {
        Self {
            ops,
            _key: PhantomData,
        }
    }

    pub fn shard_map(&self) -> &ShardMap {
        &self.ops.map
    }

    fn key(&self, value: K) -> Result<ShardKey, Error> {
        Ok(ShardKey::new(value.into_value())?)
    }

    fn mapping(&self, store: crate::model::StoreMapping) -> Result<RangeMapping, Error> {
        Ok(RangeMapping::from_store(store, K::TYPE)?)
    }

    // Shards.

    pub async fn create_shard(
        &self,
        location: ShardLocation,
        cancel: &CancellationToken,
    ) -> Result<Shard, Error> {
        self.ops.create_shard(location, cancel).await
    }

    pub async fn remove_shard(
        &self,
        shard: &Shard,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.ops.remove_shard(shard, cancel).await
    }

    pub async fn update_shard_status(
        &self,
        shard: &Shard,
        status: ShardStatus,
        cancel: &CancellationToken,
    ) -> Result<Shard, Error> {
        self.ops.update_shard_status(shard, status, cancel).await
    }

    pub async fn get_shards(&self, cancel: &CancellationToken) -> Result<Vec<Shard>, Error> {
        self.ops.get_shards(cancel).await
    }

    pub async fn get_shard_by_location(
        &self,
        location: &ShardLocation,
        cancel: &CancellationToken,
    ) -> Result<Shard, Error> {
        self.ops.get_shard_by_location(location, cancel).await
    }

    // Mappings.

    pub async fn create_range_mapping(
        &self,
        range: ShardRange,
        shard: &Shard,
        cancel: &CancellationToken,
    ) -> Result<RangeMapping, Error> {
        let store = self
            .ops
            .add_mapping(
                MappingKind::Range,
                range,
                shard,
                MappingStatus::Online,
                cancel,
            )
            .await?;
        self.mapping(store)
    }

    pub async fn remove_mapping(
        &self,
        mapping: &RangeMapping,
        lock_owner_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.ops
            .remove_mapping(mapping.store_mapping(), lock_owner_id, cancel)
            .await
    }

    pub async fn update_mapping(
        &self,
        mapping: &RangeMapping,
        update: MappingUpdate,
        lock_owner_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<RangeMapping, Error> {
        let store = self
            .ops
            .update_mapping(mapping.store_mapping(), update, lock_owner_id, cancel)
            .await?;
        self.mapping(store)
    }

    pub async fn mark_mapping_offline(
        &self,
        mapping: &RangeMapping,
        cancel: &CancellationToken,
    ) -> Result<RangeMapping, Error> {
        self.update_mapping(
            mapping,
            MappingUpdate::default().status(MappingStatus::Offline),
            None,
            cancel,
        )
        .await
    }

    pub async fn mark_mapping_online(
        &self,
        mapping: &RangeMapping,
        cancel: &CancellationToken,
    ) -> Result<RangeMapping, Error> {
        self.update_mapping(
            mapping,
            MappingUpdate::default().status(MappingStatus::Online),
            None,
            cancel,
        )
        .await
    }

    pub async fn get_mapping_for_key(
        &self,
        key: K,
        cancel: &CancellationToken,
    ) -> Result<RangeMapping, Error> {
        let key = self.key(key)?;
        let store = self.ops.get_mapping_for_key(&key, cancel).await?;
        self.mapping(store)
    }

    pub async fn get_mappings(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<RangeMapping>, Error> {
        let rows = self.ops.get_mappings(None, None, cancel).await?;
        rows.into_iter().map(|row| self.mapping(row)).collect()
    }

    pub async fn get_mappings_for_range(
        &self,
        range: &ShardRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<RangeMapping>, Error> {
        let rows = self.ops.get_mappings(Some(range), None, cancel).await?;
        rows.into_iter().map(|row| self.mapping(row)).collect()
    }

    pub async fn get_mappings_for_shard(
        &self,
        shard: &Shard,
        cancel: &CancellationToken,
    ) -> Result<Vec<RangeMapping>, Error> {
        let rows = self.ops.get_mappings(None, Some(shard), cancel).await?;
        rows.into_iter().map(|row| self.mapping(row)).collect()
    }

    /// Split a mapping into two at `split_at`. Both halves get fresh ids
    /// and keep the source's status, shard and lock owner.
    pub async fn split_mapping(
        &self,
        mapping: &RangeMapping,
        split_at: K,
        lock_owner_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<(RangeMapping, RangeMapping), Error> {
        let split_at = self.key(split_at)?;
        let (left, right) = self
            .ops
            .split_mapping(mapping.store_mapping(), &split_at, lock_owner_id, cancel)
            .await?;
        Ok((self.mapping(left)?, self.mapping(right)?))
    }

    /// Merge two adjacent mappings targeting the same shard.
    pub async fn merge_mappings(
        &self,
        left: &RangeMapping,
        right: &RangeMapping,
        lock_owner_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<RangeMapping, Error> {
        let merged = self
            .ops
            .merge_mappings(
                left.store_mapping(),
                right.store_mapping(),
                lock_owner_id,
                cancel,
            )
            .await?;
        self.mapping(merged)
    }

    // Locks.

    pub async fn lock_mapping(
        &self,
        mapping: &RangeMapping,
        lock_owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.ops
            .lock_mapping(mapping.store_mapping(), lock_owner_id, cancel)
            .await
    }

    pub async fn unlock_mapping(
        &self,
        mapping: &RangeMapping,
        lock_owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.ops
            .unlock_mapping(mapping.store_mapping(), lock_owner_id, cancel)
            .await
    }

    pub async fn unlock_all_mappings_for(
        &self,
        lock_owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.ops.unlock_all_for(lock_owner_id, cancel).await
    }

    /// Unlock every mapping via the force token.
    pub async fn unlock_all_mappings(&self, cancel: &CancellationToken) -> Result<(), Error> {
        self.ops.unlock_all(cancel).await
    }

    pub async fn get_lock_owner(
        &self,
        mapping: &RangeMapping,
        cancel: &CancellationToken,
    ) -> Result<Uuid, Error> {
        self.ops.get_lock_owner(mapping.store_mapping(), cancel).await
    }

    // Routing.

    pub async fn open_connection_for_key(
        &self,
        key: K,
        options: ConnectionOptions,
        cancel: &CancellationToken,
    ) -> Result<ShardConnection, Error> {
        let key = self.key(key)?;
        self.ops.open_connection_for_key(&key, options, cancel).await
    }
}
