//! Shared shard map operations.
//!
//! The typed list/range handles differ only in how they build ranges from
//! keys and which mapping view they expose; everything else funnels
//! through here at the stored-row level.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::CachePolicy;
use crate::coordinator::{Coordinator, Operation};
use crate::error::{Error, ErrorCategory, ErrorCode};
use crate::key::{ShardKey, ShardRange};
use crate::mapper::{ConnectionOptions, Router, ShardConnection};
use crate::model::{
    force_unlock_token, MappingKind, MappingStatus, MappingUpdate, Shard, ShardLocation, ShardMap,
    ShardStatus, StoreMapping, NO_LOCK,
};
use crate::store::{
    LockOpKind, LockRequest, StoreProcedure, StoreRange, StoreRequest, GSM_VERSION,
};

pub(crate) struct MapOps {
    pub map: ShardMap,
    pub coordinator: Coordinator,
    pub router: Router,
    pub category: ErrorCategory,
}

impl std::fmt::Debug for MapOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapOps")
            .field("map", &self.map)
            .field("category", &self.category)
            .finish()
    }
}

impl MapOps {
    fn request(&self) -> StoreRequest {
        StoreRequest::new(GSM_VERSION).shard_map(&self.map)
    }

    fn check_shard(&self, shard: &Shard) -> Result<(), Error> {
        if shard.shard_map_id != self.map.id {
            return Err(Error::validation(format!(
                "{} belongs to a different shard map",
                shard
            )));
        }
        Ok(())
    }

    fn check_mapping(&self, mapping: &StoreMapping) -> Result<(), Error> {
        if mapping.shard_map_id != self.map.id {
            return Err(Error::validation(format!(
                "mapping {} belongs to a different shard map",
                mapping.id
            )));
        }
        Ok(())
    }

    // Shards.

    pub async fn create_shard(
        &self,
        location: ShardLocation,
        cancel: &CancellationToken,
    ) -> Result<Shard, Error> {
        let shard = Shard::new(self.map.id, location, ShardStatus::Online);
        let op = Operation::add_shard(&self.map, shard.clone());
        self.coordinator.execute(&op, self.category, cancel).await?;
        Ok(shard)
    }

    pub async fn remove_shard(
        &self,
        shard: &Shard,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.check_shard(shard)?;
        let op = Operation::remove_shard(&self.map, shard.clone());
        self.coordinator.execute(&op, self.category, cancel).await?;
        Ok(())
    }

    pub async fn update_shard_status(
        &self,
        shard: &Shard,
        status: ShardStatus,
        cancel: &CancellationToken,
    ) -> Result<Shard, Error> {
        self.check_shard(shard)?;
        let mut new = shard.with_fresh_version();
        new.status = status;
        let op = Operation::update_shard(&self.map, shard.clone(), new.clone());
        self.coordinator.execute(&op, self.category, cancel).await?;
        Ok(new)
    }

    pub async fn get_shards(&self, cancel: &CancellationToken) -> Result<Vec<Shard>, Error> {
        let results = self
            .coordinator
            .execute_global(
                StoreProcedure::GetAllShardsGlobal,
                &self.request(),
                self.category,
                cancel,
            )
            .await?;
        Ok(results.shards)
    }

    pub async fn get_shard_by_location(
        &self,
        location: &ShardLocation,
        cancel: &CancellationToken,
    ) -> Result<Shard, Error> {
        let results = self
            .coordinator
            .execute_global(
                StoreProcedure::FindShardByLocationGlobal,
                &self.request().location(location),
                self.category,
                cancel,
            )
            .await?;
        results.shards.into_iter().next().ok_or_else(|| {
            Error::management(
                self.category,
                ErrorCode::ShardDoesNotExist,
                format!("no shard at {}", location),
            )
        })
    }

    // Mappings.

    pub async fn add_mapping(
        &self,
        kind: MappingKind,
        range: ShardRange,
        shard: &Shard,
        status: MappingStatus,
        cancel: &CancellationToken,
    ) -> Result<StoreMapping, Error> {
        self.check_shard(shard)?;
        if range.kind() != self.map.key_type {
            return Err(Error::validation(format!(
                "range key type \"{}\" does not match the shard map",
                range.kind()
            )));
        }

        let mut mapping = StoreMapping::new(&self.map, kind, &range, shard.clone(), status);
        let op = Operation::add_mapping(&self.map, mapping.clone());
        self.coordinator.execute(&op, self.category, cancel).await?;

        // Hand back the post-operation shard version.
        if let Some(bumped) = op.shard_updates.first() {
            mapping.shard = bumped.clone();
        }
        self.router
            .cache()
            .insert(&self.map, mapping.clone(), CachePolicy::OverwriteExisting);
        Ok(mapping)
    }

    pub async fn remove_mapping(
        &self,
        mapping: &StoreMapping,
        lock_owner_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.check_mapping(mapping)?;
        let op = Operation::remove_mapping(&self.map, mapping.clone(), lock_owner_id);
        self.coordinator.execute(&op, self.category, cancel).await?;
        self.router.cache().delete_mapping(mapping);
        Ok(())
    }

    pub async fn update_mapping(
        &self,
        old: &StoreMapping,
        update: MappingUpdate,
        lock_owner_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<StoreMapping, Error> {
        self.check_mapping(old)?;

        let mut new = old.clone();
        new.id = Uuid::new_v4();
        new.operation_id = None;
        if let Some(status) = update.status {
            new.status = status;
        }
        if let Some(shard) = update.shard {
            self.check_shard(&shard)?;
            // Moving a mapping requires taking it offline first, or the
            // two shards would both accept writes for its range.
            if shard.id != old.shard.id && old.status != MappingStatus::Offline {
                return Err(Error::management(
                    self.category,
                    ErrorCode::MappingIsNotOffline,
                    format!("mapping {} must be offline to move shards", old.id),
                ));
            }
            new.shard = shard;
        }

        let op = Operation::update_mapping(&self.map, old.clone(), new.clone(), lock_owner_id);
        self.coordinator.execute(&op, self.category, cancel).await?;

        if let Some(bumped) = op
            .shard_updates
            .iter()
            .find(|shard| shard.id == new.shard.id)
        {
            new.shard = bumped.clone();
        }
        self.router.cache().delete_mapping(old);
        self.router
            .cache()
            .insert(&self.map, new.clone(), CachePolicy::OverwriteExisting);
        Ok(new)
    }

    pub async fn split_mapping(
        &self,
        source: &StoreMapping,
        split_at: &ShardKey,
        lock_owner_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<(StoreMapping, StoreMapping), Error> {
        self.check_mapping(source)?;
        let range = source.range(self.map.key_type)?;
        if !range.contains(split_at)? || split_at == range.low() {
            return Err(Error::validation(format!(
                "split point {} is not inside {}",
                split_at, range
            )));
        }

        let left_range = ShardRange::new(range.low().clone(), split_at.clone())?;
        let right_range = ShardRange::new(split_at.clone(), range.high().clone())?;

        let mut left = StoreMapping::new(
            &self.map,
            source.kind,
            &left_range,
            source.shard.clone(),
            source.status,
        );
        let mut right = StoreMapping::new(
            &self.map,
            source.kind,
            &right_range,
            source.shard.clone(),
            source.status,
        );
        left.lock_owner_id = source.lock_owner_id;
        right.lock_owner_id = source.lock_owner_id;

        let op = Operation::split_mapping(
            &self.map,
            source.clone(),
            left.clone(),
            right.clone(),
            lock_owner_id,
        );
        self.coordinator.execute(&op, self.category, cancel).await?;

        if let Some(bumped) = op.shard_updates.first() {
            left.shard = bumped.clone();
            right.shard = bumped.clone();
        }
        self.router.cache().delete_mapping(source);
        self.router
            .cache()
            .insert(&self.map, left.clone(), CachePolicy::OverwriteExisting);
        self.router
            .cache()
            .insert(&self.map, right.clone(), CachePolicy::OverwriteExisting);
        Ok((left, right))
    }

    pub async fn merge_mappings(
        &self,
        left: &StoreMapping,
        right: &StoreMapping,
        lock_owner_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<StoreMapping, Error> {
        self.check_mapping(left)?;
        self.check_mapping(right)?;
        if left.max_value.as_ref() != Some(&right.min_value) {
            return Err(Error::validation(
                "mappings to merge must be adjacent".to_string(),
            ));
        }
        if left.shard.id != right.shard.id {
            return Err(Error::validation(
                "mappings to merge must target the same shard".to_string(),
            ));
        }
        if left.status != right.status {
            return Err(Error::validation(
                "mappings to merge must share a status".to_string(),
            ));
        }

        let left_range = left.range(self.map.key_type)?;
        let right_range = right.range(self.map.key_type)?;
        let merged_range = ShardRange::new(left_range.low().clone(), right_range.high().clone())?;

        let mut merged = StoreMapping::new(
            &self.map,
            left.kind,
            &merged_range,
            left.shard.clone(),
            left.status,
        );
        merged.lock_owner_id = left.lock_owner_id;

        let op = Operation::merge_mappings(
            &self.map,
            left.clone(),
            right.clone(),
            merged.clone(),
            lock_owner_id,
        );
        self.coordinator.execute(&op, self.category, cancel).await?;

        if let Some(bumped) = op.shard_updates.first() {
            merged.shard = bumped.clone();
        }
        self.router.cache().delete_mapping(left);
        self.router.cache().delete_mapping(right);
        self.router
            .cache()
            .insert(&self.map, merged.clone(), CachePolicy::OverwriteExisting);
        Ok(merged)
    }

    // Reads. These run through the pending-operation probe, so a fresh
    // client walking the directory drives crashed operations to
    // completion as a side effect.

    pub async fn get_mappings(
        &self,
        range: Option<&ShardRange>,
        shard: Option<&Shard>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoreMapping>, Error> {
        let mut request = self.request();
        if let Some(range) = range {
            request = request.range(StoreRange {
                min_value: range.low().raw_value().cloned().unwrap_or_default(),
                max_value: range.high().raw_value().cloned(),
            });
        }
        if let Some(shard) = shard {
            self.check_shard(shard)?;
            request = request.shard(shard);
        }

        let results = self
            .coordinator
            .execute_global(
                StoreProcedure::GetAllShardMappingsGlobal,
                &request,
                self.category,
                cancel,
            )
            .await?;
        Ok(results.mappings)
    }

    pub async fn get_mapping_for_key(
        &self,
        key: &ShardKey,
        cancel: &CancellationToken,
    ) -> Result<StoreMapping, Error> {
        self.router
            .lookup_in_store(
                &self.map,
                key,
                CachePolicy::OverwriteExisting,
                self.category,
                cancel,
            )
            .await
    }

    // Locks.

    async fn lock_op(
        &self,
        lock: LockRequest,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.coordinator
            .execute_global(
                StoreProcedure::LockOrUnlockShardMappingsGlobal,
                &self.request().lock(lock),
                self.category,
                cancel,
            )
            .await?;
        Ok(())
    }

    pub async fn lock_mapping(
        &self,
        mapping: &StoreMapping,
        lock_owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.check_mapping(mapping)?;
        if lock_owner_id == NO_LOCK {
            return Err(Error::validation("the zero GUID cannot own a lock"));
        }
        if lock_owner_id == force_unlock_token() {
            return Err(Error::validation(
                "the force-unlock token cannot own a lock",
            ));
        }

        self.lock_op(
            LockRequest {
                kind: LockOpKind::Lock,
                lock_owner_id,
                mapping_id: Some(mapping.id),
            },
            cancel,
        )
        .await?;
        self.router.cache().delete_mapping(mapping);
        Ok(())
    }

    pub async fn unlock_mapping(
        &self,
        mapping: &StoreMapping,
        lock_owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.check_mapping(mapping)?;
        self.lock_op(
            LockRequest {
                kind: LockOpKind::UnlockMapping,
                lock_owner_id,
                mapping_id: Some(mapping.id),
            },
            cancel,
        )
        .await?;
        self.router.cache().delete_mapping(mapping);
        Ok(())
    }

    pub async fn unlock_all_for(
        &self,
        lock_owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if lock_owner_id == NO_LOCK || lock_owner_id == force_unlock_token() {
            return Err(Error::validation("invalid lock owner"));
        }
        self.lock_op(
            LockRequest {
                kind: LockOpKind::UnlockAllForOwner,
                lock_owner_id,
                mapping_id: None,
            },
            cancel,
        )
        .await
    }

    pub async fn unlock_all(&self, cancel: &CancellationToken) -> Result<(), Error> {
        self.lock_op(
            LockRequest {
                kind: LockOpKind::UnlockAll,
                lock_owner_id: force_unlock_token(),
                mapping_id: None,
            },
            cancel,
        )
        .await
    }

    pub async fn get_lock_owner(
        &self,
        mapping: &StoreMapping,
        cancel: &CancellationToken,
    ) -> Result<Uuid, Error> {
        self.check_mapping(mapping)?;
        let range = mapping.range(self.map.key_type)?;
        let rows = self.get_mappings(Some(&range), None, cancel).await?;
        rows.into_iter()
            .find(|row| row.id == mapping.id)
            .map(|row| row.lock_owner_id)
            .ok_or_else(|| {
                Error::management(
                    self.category,
                    ErrorCode::MappingDoesNotExist,
                    format!("mapping {} no longer exists", mapping.id),
                )
            })
    }

    // Routing.

    pub async fn open_connection_for_key(
        &self,
        key: &ShardKey,
        options: ConnectionOptions,
        cancel: &CancellationToken,
    ) -> Result<ShardConnection, Error> {
        self.router
            .open_connection_for_key(&self.map, key, options, self.category, cancel)
            .await
    }
}
