//! Connection routing.
//!
//! `open_connection_for_key` resolves a key to its shard through the
//! cache, falls back to the GSM, validates against the LSM when asked,
//! and recovers from stale cache entries without stampeding the GSM.

pub mod lock_table;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::cache::{CachePolicy, MappingCache};
use crate::coordinator::Coordinator;
use crate::error::{Error, ErrorCategory, ErrorCode};
use crate::key::ShardKey;
use crate::model::{MappingStatus, ShardLocation, ShardMap, StoreMapping};
use crate::store::{DataConnection, StoreProcedure, StoreRequest, GSM_VERSION, LSM_VERSION};

use lock_table::ShardLockTable;

/// Options for [`Router::open_connection_for_key`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    /// Revalidate the mapping against its LSM before yielding the
    /// connection.
    pub validate: bool,
    /// Route to offline mappings too. Rare; administrative tooling only.
    pub keep_offline: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            validate: true,
            keep_offline: false,
        }
    }
}

/// A routed data-plane connection.
pub struct ShardConnection {
    conn: Box<dyn DataConnection>,
    mapping_id: Uuid,
    location: ShardLocation,
}

impl std::fmt::Debug for ShardConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardConnection")
            .field("mapping_id", &self.mapping_id)
            .field("location", &self.location)
            .finish()
    }
}

impl ShardConnection {
    pub fn location(&self) -> &ShardLocation {
        &self.location
    }

    pub fn mapping_id(&self) -> Uuid {
        self.mapping_id
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    pub fn data(&mut self) -> &mut dyn DataConnection {
        self.conn.as_mut()
    }

    pub async fn close(&mut self) {
        self.conn.close().await;
    }
}

/// The routing engine, shared by every shard map handle of one manager.
#[derive(Clone)]
pub(crate) struct Router {
    coordinator: Coordinator,
    cache: Arc<MappingCache>,
    locks: Arc<ShardLockTable>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl Router {
    pub fn new(coordinator: Coordinator, cache: Arc<MappingCache>) -> Self {
        Self {
            coordinator,
            cache,
            locks: Arc::new(ShardLockTable::default()),
        }
    }

    pub fn cache(&self) -> &Arc<MappingCache> {
        &self.cache
    }

    /// Resolve `key` on the GSM and refresh the cache with the result.
    pub async fn lookup_in_store(
        &self,
        shard_map: &ShardMap,
        key: &ShardKey,
        policy: CachePolicy,
        category: ErrorCategory,
        cancel: &CancellationToken,
    ) -> Result<StoreMapping, Error> {
        let raw = key
            .raw_value()
            .ok_or_else(|| Error::validation("cannot look up the +inf sentinel"))?
            .clone();

        let request = StoreRequest::new(GSM_VERSION)
            .shard_map(shard_map)
            .key(raw);
        let results = self
            .coordinator
            .execute_global(
                StoreProcedure::FindMappingByKeyGlobal,
                &request,
                category,
                cancel,
            )
            .await?;

        let mapping = results.mappings.into_iter().next().ok_or_else(|| {
            Error::management(
                category,
                ErrorCode::MappingNotFoundForKey,
                format!("key {} has no mapping", key),
            )
        })?;

        self.cache.insert(shard_map, mapping.clone(), policy);
        Ok(mapping)
    }

    /// Yield a data-plane connection to the shard owning `key`.
    pub async fn open_connection_for_key(
        &self,
        shard_map: &ShardMap,
        key: &ShardKey,
        options: ConnectionOptions,
        category: ErrorCategory,
        cancel: &CancellationToken,
    ) -> Result<ShardConnection, Error> {
        let cached = self.cache.lookup(shard_map, key);
        let mapping = match &cached {
            Some(entry) => entry.mapping.clone(),
            None => {
                self.lookup_in_store(
                    shard_map,
                    key,
                    CachePolicy::OverwriteExisting,
                    category,
                    cancel,
                )
                .await?
            }
        };

        let first_failure = match self.try_open(shard_map, &mapping, options, category).await {
            Ok(conn) => {
                self.cache.reset_ttl(shard_map, key);
                return Ok(conn);
            }
            Err(err) => err,
        };

        match &first_failure {
            // The LSM no longer knows this mapping: the cached view is
            // stale. One forced refresh, then the second error stands.
            Error::Management(err)
                if err.code == ErrorCode::MappingDoesNotExist && options.validate =>
            {
                debug!("mapping for key {} failed validation, refreshing", key);
                let fresh = self
                    .lookup_in_store(
                        shard_map,
                        key,
                        CachePolicy::OverwriteExisting,
                        category,
                        cancel,
                    )
                    .await?;
                let conn = self.try_open(shard_map, &fresh, options, category).await?;
                self.cache.reset_ttl(shard_map, key);
                Ok(conn)
            }

            // The shard is unreachable and the cache entry is past its
            // TTL: revalidate, one requester per shard at a time.
            Error::Transport(_)
                if cached
                    .as_ref()
                    .map(|entry| entry.has_expired())
                    .unwrap_or(false) =>
            {
                let guard = self.locks.lock(mapping.shard.id).await;
                // Someone may have refreshed while this task waited.
                let fresh = match self.cache.lookup(shard_map, key) {
                    Some(entry) if !entry.has_expired() => entry.mapping.clone(),
                    _ => {
                        self.lookup_in_store(
                            shard_map,
                            key,
                            CachePolicy::UpdateTimeToLive,
                            category,
                            cancel,
                        )
                        .await?
                    }
                };
                drop(guard);

                let conn = self.try_open(shard_map, &fresh, options, category).await?;
                self.cache.reset_ttl(shard_map, key);
                Ok(conn)
            }

            _ => Err(first_failure),
        }
    }

    async fn try_open(
        &self,
        shard_map: &ShardMap,
        mapping: &StoreMapping,
        options: ConnectionOptions,
        category: ErrorCategory,
    ) -> Result<ShardConnection, Error> {
        if mapping.status == MappingStatus::Offline && !options.keep_offline {
            self.cache.delete_mapping(mapping);
            return Err(Error::management(
                category,
                ErrorCode::MappingIsOffline,
                format!("mapping {} refuses connections", mapping.id),
            ));
        }

        let location = mapping.shard.location.clone();
        let conn = self.coordinator.store().open_data(&location).await?;

        if options.validate {
            if let Err(err) = self
                .validate(mapping, &location, options.keep_offline, category)
                .await
            {
                return Err(err);
            }
        }

        Ok(ShardConnection {
            conn,
            mapping_id: mapping.id,
            location,
        })
    }

    // Point-in-time check against the copy on the mapping's own shard.
    async fn validate(
        &self,
        mapping: &StoreMapping,
        location: &ShardLocation,
        keep_offline: bool,
        category: ErrorCategory,
    ) -> Result<(), Error> {
        let mut conn = self.coordinator.store().open_local(location).await?;

        let result = async {
            let request = StoreRequest::new(LSM_VERSION).mapping_id(mapping.id);
            let results = conn
                .execute(StoreProcedure::FindMappingByIdLocal, &request)
                .await?;

            if !results.is_success() {
                self.cache.delete_mapping(mapping);
                return Err(Error::Management(results.result.to_error(
                    category,
                    false,
                    format!("validation of mapping {}", mapping.id),
                )));
            }

            let offline = results
                .mappings
                .first()
                .map(|row| row.status == MappingStatus::Offline)
                .unwrap_or(false);
            if offline && !keep_offline {
                self.cache.delete_mapping(mapping);
                return Err(Error::management(
                    category,
                    ErrorCode::MappingIsOffline,
                    format!("mapping {} is offline on its shard", mapping.id),
                ));
            }

            Ok(())
        }
        .await;

        conn.close().await;
        result
    }
}
