//! The shard map manager.
//!
//! Owns the store handle, the coordinator, the mapping cache and the
//! routing engine; hands out typed shard map handles. One manager per
//! process is the normal shape, but nothing here is hidden global state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use shardmap_config::ShardMapConfig;

use crate::cache::MappingCache;
use crate::coordinator::Coordinator;
use crate::error::{Error, ErrorCategory, ErrorCode};
use crate::key::Key;
use crate::map::ops::MapOps;
use crate::map::{ListShardMap, RangeShardMap};
use crate::mapper::Router;
use crate::model::{ShardMap, ShardMapKind};
use crate::retry::RetryPolicy;
use crate::store::{Store, StoreProcedure, StoreRequest, GSM_VERSION};

pub struct ShardMapManager {
    coordinator: Coordinator,
    router: Router,
}

impl ShardMapManager {
    pub fn new(store: Arc<dyn Store>, config: &ShardMapConfig) -> Self {
        let retry = RetryPolicy {
            max_attempts: config.retry.max_attempts,
            base_delay: config.retry.base_delay(),
            max_delay: config.retry.max_delay(),
        };
        let coordinator = Coordinator::new(store, retry);
        let cache = Arc::new(MappingCache::new(config.cache.ttl()));
        let router = Router::new(coordinator.clone(), cache);

        Self {
            coordinator,
            router,
        }
    }

    /// Manager with default configuration; handy for embedded use.
    pub fn with_defaults(store: Arc<dyn Store>) -> Self {
        Self::new(store, &ShardMapConfig::default())
    }

    fn request(&self) -> StoreRequest {
        StoreRequest::new(GSM_VERSION)
    }

    fn ops(&self, map: ShardMap, category: ErrorCategory) -> MapOps {
        MapOps {
            map,
            coordinator: self.coordinator.clone(),
            router: self.router.clone(),
            category,
        }
    }

    async fn create_shard_map(
        &self,
        name: &str,
        kind: ShardMapKind,
        key_type: crate::key::ShardKeyType,
        cancel: &CancellationToken,
    ) -> Result<ShardMap, Error> {
        let map = ShardMap::new(name, kind, key_type);
        self.coordinator
            .execute_global(
                StoreProcedure::AddShardMapGlobal,
                &self.request().shard_map(&map),
                ErrorCategory::ShardMapManager,
                cancel,
            )
            .await?;
        info!("created {:?} shard map \"{}\"", kind, name);
        Ok(map)
    }

    async fn find_shard_map(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ShardMap, Error> {
        let results = self
            .coordinator
            .execute_global(
                StoreProcedure::FindShardMapByNameGlobal,
                &self.request().name(name),
                ErrorCategory::ShardMapManager,
                cancel,
            )
            .await?;
        results.shard_maps.into_iter().next().ok_or_else(|| {
            Error::management(
                ErrorCategory::ShardMapManager,
                ErrorCode::ShardMapDoesNotExist,
                format!("no shard map named \"{}\"", name),
            )
        })
    }

    fn check_map<K: Key>(map: &ShardMap, kind: ShardMapKind) -> Result<(), Error> {
        if map.kind != kind {
            return Err(Error::validation(format!(
                "shard map \"{}\" is a {:?} map",
                map.name, map.kind
            )));
        }
        if map.key_type != K::TYPE {
            return Err(Error::validation(format!(
                "shard map \"{}\" keys are \"{}\", not \"{}\"",
                map.name,
                map.key_type,
                K::TYPE
            )));
        }
        Ok(())
    }

    pub async fn create_list_shard_map<K: Key>(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ListShardMap<K>, Error> {
        let map = self
            .create_shard_map(name, ShardMapKind::List, K::TYPE, cancel)
            .await?;
        Ok(ListShardMap::new(
            self.ops(map, ErrorCategory::ListShardMap),
        ))
    }

    pub async fn create_range_shard_map<K: Key>(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<RangeShardMap<K>, Error> {
        let map = self
            .create_shard_map(name, ShardMapKind::Range, K::TYPE, cancel)
            .await?;
        Ok(RangeShardMap::new(
            self.ops(map, ErrorCategory::RangeShardMap),
        ))
    }

    pub async fn get_list_shard_map<K: Key>(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ListShardMap<K>, Error> {
        let map = self.find_shard_map(name, cancel).await?;
        Self::check_map::<K>(&map, ShardMapKind::List)?;
        Ok(ListShardMap::new(
            self.ops(map, ErrorCategory::ListShardMap),
        ))
    }

    pub async fn get_range_shard_map<K: Key>(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<RangeShardMap<K>, Error> {
        let map = self.find_shard_map(name, cancel).await?;
        Self::check_map::<K>(&map, ShardMapKind::Range)?;
        Ok(RangeShardMap::new(
            self.ops(map, ErrorCategory::RangeShardMap),
        ))
    }

    pub async fn get_shard_maps(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ShardMap>, Error> {
        let results = self
            .coordinator
            .execute_global(
                StoreProcedure::GetAllShardMapsGlobal,
                &self.request(),
                ErrorCategory::ShardMapManager,
                cancel,
            )
            .await?;
        Ok(results.shard_maps)
    }

    /// Delete an empty shard map.
    pub async fn delete_shard_map(
        &self,
        map: &ShardMap,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.coordinator
            .execute_global(
                StoreProcedure::RemoveShardMapGlobal,
                &self.request().shard_map(map),
                ErrorCategory::ShardMapManager,
                cancel,
            )
            .await?;
        self.router.cache().delete_shard_map(map.id);
        Ok(())
    }

    /// Cache statistics for a shard map.
    pub fn cache_stats(&self, map: &ShardMap) -> crate::cache::CacheStats {
        self.router.cache().counters(map)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{manager, run};

    #[tokio::test]
    async fn test_create_and_get_shard_map() {
        let (manager, _) = manager();

        let created = manager
            .create_range_shard_map::<i32>("orders", &run())
            .await
            .unwrap();
        let fetched = manager
            .get_range_shard_map::<i32>("orders", &run())
            .await
            .unwrap();
        assert_eq!(created.shard_map(), fetched.shard_map());

        let all = manager.get_shard_maps(&run()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "orders");
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (manager, _) = manager();

        manager
            .create_range_shard_map::<i32>("orders", &run())
            .await
            .unwrap();
        let err = manager
            .create_list_shard_map::<i64>("orders", &run())
            .await
            .unwrap_err();
        assert!(err.is_code(ErrorCode::ShardMapAlreadyExists));
    }

    #[tokio::test]
    async fn test_get_missing_map() {
        let (manager, _) = manager();
        let err = manager
            .get_range_shard_map::<i32>("nope", &run())
            .await
            .unwrap_err();
        assert!(err.is_code(ErrorCode::ShardMapDoesNotExist));
    }

    #[tokio::test]
    async fn test_kind_and_key_type_checked() {
        let (manager, _) = manager();
        manager
            .create_range_shard_map::<i32>("orders", &run())
            .await
            .unwrap();

        // Wrong kind.
        assert!(manager
            .get_list_shard_map::<i32>("orders", &run())
            .await
            .is_err());
        // Wrong key type.
        assert!(manager
            .get_range_shard_map::<i64>("orders", &run())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_shard_map() {
        let (manager, _) = manager();
        let map = manager
            .create_range_shard_map::<i32>("orders", &run())
            .await
            .unwrap();

        manager
            .delete_shard_map(map.shard_map(), &run())
            .await
            .unwrap();
        assert!(manager.get_shard_maps(&run()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_with_shards_rejected() {
        let (manager, _) = manager();
        let map = manager
            .create_range_shard_map::<i32>("orders", &run())
            .await
            .unwrap();
        map.create_shard(crate::model::ShardLocation::new_test(1), &run())
            .await
            .unwrap();

        let err = manager
            .delete_shard_map(map.shard_map(), &run())
            .await
            .unwrap_err();
        assert!(err.is_code(ErrorCode::ShardMapHasShards));
    }

    #[tokio::test]
    async fn test_global_store_version_mismatch() {
        let (manager, store) = manager();
        store.set_gsm_version(crate::store::StoreVersion { major: 1, minor: 0 });

        let err = manager.get_shard_maps(&run()).await.unwrap_err();
        assert!(err.is_code(ErrorCode::GlobalStoreVersionMismatch));
    }
}
