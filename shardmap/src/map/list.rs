//! List shard maps.

use std::marker::PhantomData;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Error;
use crate::key::{Key, ShardKey, ShardRange};
use crate::mapper::{ConnectionOptions, ShardConnection};
use crate::model::{
    MappingInfo, MappingKind, MappingStatus, MappingUpdate, PointMapping, Shard, ShardLocation,
    ShardMap, ShardStatus,
};

use super::ops::MapOps;

/// A shard map of point mappings over keys of type `K`.
#[derive(Debug)]
pub struct ListShardMap<K: Key> {
    ops: MapOps,
    _key: PhantomData<fn() -> K>,
}

impl<K: Key> ListShardMap<K> {
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

    fn mapping(&self, store: crate::model::StoreMapping) -> Result<PointMapping, Error> {
        Ok(PointMapping::from_store(store, K::TYPE)?)
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

    // Mappings. A point mapping is stored as the unit range
    // `[key, successor(key))`.

    pub async fn create_point_mapping(
        &self,
        key: K,
        shard: &Shard,
        cancel: &CancellationToken,
    ) -> Result<PointMapping, Error> {
        let range = ShardRange::unit(self.key(key)?)?;
        let store = self
            .ops
            .add_mapping(
                MappingKind::Point,
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
        mapping: &PointMapping,
        lock_owner_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.ops
            .remove_mapping(mapping.store_mapping(), lock_owner_id, cancel)
            .await
    }

    pub async fn update_mapping(
        &self,
        mapping: &PointMapping,
        update: MappingUpdate,
        lock_owner_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<PointMapping, Error> {
        let store = self
            .ops
            .update_mapping(mapping.store_mapping(), update, lock_owner_id, cancel)
            .await?;
        self.mapping(store)
    }

    pub async fn mark_mapping_offline(
        &self,
        mapping: &PointMapping,
        cancel: &CancellationToken,
    ) -> Result<PointMapping, Error> {
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
        mapping: &PointMapping,
        cancel: &CancellationToken,
    ) -> Result<PointMapping, Error> {
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
    ) -> Result<PointMapping, Error> {
        let key = self.key(key)?;
        let store = self.ops.get_mapping_for_key(&key, cancel).await?;
        self.mapping(store)
    }

    pub async fn get_mappings(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<PointMapping>, Error> {
        let rows = self.ops.get_mappings(None, None, cancel).await?;
        rows.into_iter().map(|row| self.mapping(row)).collect()
    }

    pub async fn get_mappings_for_shard(
        &self,
        shard: &Shard,
        cancel: &CancellationToken,
    ) -> Result<Vec<PointMapping>, Error> {
        let rows = self.ops.get_mappings(None, Some(shard), cancel).await?;
        rows.into_iter().map(|row| self.mapping(row)).collect()
    }

    // Locks.

    pub async fn lock_mapping(
        &self,
        mapping: &PointMapping,
        lock_owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.ops
            .lock_mapping(mapping.store_mapping(), lock_owner_id, cancel)
            .await
    }

    pub async fn unlock_mapping(
        &self,
        mapping: &PointMapping,
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
        mapping: &PointMapping,
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorCode;
    use crate::test::{manager, run};

    async fn tenants() -> (crate::store::memory::MemoryStore, ListShardMap<i64>) {
        let (manager, store) = manager();
        let map = manager
            .create_list_shard_map::<i64>("tenants", &run())
            .await
            .unwrap();
        (store, map)
    }

    #[tokio::test]
    async fn test_point_mapping_lifecycle() {
        let (store, map) = tenants().await;
        let shard = map
            .create_shard(ShardLocation::new_test(1), &run())
            .await
            .unwrap();

        let mapping = map.create_point_mapping(42, &shard, &run()).await.unwrap();
        assert_eq!(mapping.key().typed::<i64>().unwrap(), 42);

        // The point is stored as the unit range [42, 43).
        let hit = map.get_mapping_for_key(42, &run()).await.unwrap();
        assert_eq!(hit.id(), mapping.id());
        assert!(map.get_mapping_for_key(43, &run()).await.is_err());

        // Both tiers hold the row.
        assert_eq!(store.gsm_mappings(map.shard_map().id).len(), 1);
        assert_eq!(store.lsm_mappings(&shard.location).len(), 1);

        map.remove_mapping(&mapping, None, &run()).await.unwrap();
        let err = map.get_mapping_for_key(42, &run()).await.unwrap_err();
        assert!(err.is_code(ErrorCode::MappingNotFoundForKey));
        assert!(store.lsm_mappings(&shard.location).is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_point_rejected() {
        let (_, map) = tenants().await;
        let shard = map
            .create_shard(ShardLocation::new_test(1), &run())
            .await
            .unwrap();

        map.create_point_mapping(7, &shard, &run()).await.unwrap();
        let err = map
            .create_point_mapping(7, &shard, &run())
            .await
            .unwrap_err();
        assert!(err.is_code(ErrorCode::MappingPointAlreadyMapped));
    }

    #[tokio::test]
    async fn test_mappings_per_shard() {
        let (_, map) = tenants().await;
        let shard_a = map
            .create_shard(ShardLocation::new_test(1), &run())
            .await
            .unwrap();
        let shard_b = map
            .create_shard(ShardLocation::new_test(2), &run())
            .await
            .unwrap();

        map.create_point_mapping(1, &shard_a, &run()).await.unwrap();
        map.create_point_mapping(2, &shard_b, &run()).await.unwrap();

        let on_a = map.get_mappings_for_shard(&shard_a, &run()).await.unwrap();
        assert_eq!(on_a.len(), 1);
        assert_eq!(on_a[0].key().typed::<i64>().unwrap(), 1);

        assert_eq!(map.get_mappings(&run()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_offline_point_refuses_connections() {
        let (_, map) = tenants().await;
        let shard = map
            .create_shard(ShardLocation::new_test(1), &run())
            .await
            .unwrap();
        let mapping = map.create_point_mapping(9, &shard, &run()).await.unwrap();
        map.mark_mapping_offline(&mapping, &run()).await.unwrap();

        let err = map
            .open_connection_for_key(9, ConnectionOptions::default(), &run())
            .await
            .unwrap_err();
        assert!(err.is_code(ErrorCode::MappingIsOffline));

        // keep_offline routes anyway.
        let conn = map
            .open_connection_for_key(
                9,
                ConnectionOptions {
                    keep_offline: true,
                    ..Default::default()
                },
                &run(),
            )
            .await
            .unwrap();
        assert!(conn.is_open());
    }
}
