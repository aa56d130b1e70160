//! In-process store.
//!
//! A complete GSM plus per-location LSMs living in process memory, with
//! real transaction rollback and advisory lock semantics. The test suite
//! runs every coordinator and routing scenario against it.

mod db;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::model::ShardLocation;

use super::{
    DataConnection, Store, StoreConnection, StoreProcedure, StoreRequest, StoreResults,
    TransportError,
};
use db::DbState;

struct Db {
    state: Mutex<DbState>,
    txn_lock: Arc<AsyncMutex<()>>,
}

impl Db {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DbState::default()),
            txn_lock: Arc::new(AsyncMutex::new(())),
        })
    }
}

#[derive(Default)]
struct DataFaults {
    fail_opens: usize,
    killed: bool,
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum Scope {
    Global,
    Local(ShardLocation),
}

struct Inner {
    global: Arc<Db>,
    locals: Mutex<HashMap<ShardLocation, Arc<Db>>>,
    locks: Mutex<HashMap<(Scope, Uuid), Arc<AsyncMutex<()>>>>,
    data_faults: Mutex<HashMap<ShardLocation, DataFaults>>,
}

/// In-memory store: one GSM and one LSM per shard location.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                global: Db::new(),
                locals: Mutex::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
                data_faults: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn local(&self, location: &ShardLocation) -> Arc<Db> {
        self.inner
            .locals
            .lock()
            .entry(location.clone())
            .or_insert_with(Db::new)
            .clone()
    }

    fn lock_handle(&self, scope: Scope, key: Uuid) -> Arc<AsyncMutex<()>> {
        self.inner
            .locks
            .lock()
            .entry((scope, key))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn open_global(&self) -> Result<Box<dyn StoreConnection>, TransportError> {
        Ok(Box::new(MemoryConnection {
            scope: Scope::Global,
            db: self.inner.global.clone(),
            store: self.clone(),
            app_locks: Vec::new(),
            txn: None,
            closed: false,
        }))
    }

    async fn open_local(
        &self,
        location: &ShardLocation,
    ) -> Result<Box<dyn StoreConnection>, TransportError> {
        Ok(Box::new(MemoryConnection {
            scope: Scope::Local(location.clone()),
            db: self.local(location),
            store: self.clone(),
            app_locks: Vec::new(),
            txn: None,
            closed: false,
        }))
    }

    async fn open_data(
        &self,
        location: &ShardLocation,
    ) -> Result<Box<dyn DataConnection>, TransportError> {
        {
            let mut faults = self.inner.data_faults.lock();
            if let Some(entry) = faults.get_mut(location) {
                if entry.fail_opens > 0 {
                    entry.fail_opens -= 1;
                    return Err(TransportError::ConnectionBroken(location.to_string()));
                }
                if entry.killed {
                    return Err(TransportError::ConnectionBroken(location.to_string()));
                }
            }
        }

        Ok(Box::new(MemoryDataConnection {
            location: location.clone(),
            store: self.clone(),
            open: true,
        }))
    }
}

struct Txn {
    _guard: OwnedMutexGuard<()>,
    snapshot: DbState,
}

/// One store connection: advisory locks held until close, transactions
/// with snapshot rollback.
struct MemoryConnection {
    scope: Scope,
    db: Arc<Db>,
    store: MemoryStore,
    app_locks: Vec<OwnedMutexGuard<()>>,
    txn: Option<Txn>,
    closed: bool,
}

impl MemoryConnection {
    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn acquire_app_lock(&mut self, key: Uuid) -> Result<(), TransportError> {
        self.check_open()?;
        let handle = self.store.lock_handle(self.scope.clone(), key);
        let guard = handle.lock_owned().await;
        self.app_locks.push(guard);
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), TransportError> {
        self.check_open()?;
        if self.txn.is_some() {
            return Err(TransportError::Protocol("nested transaction"));
        }

        let guard = self.db.txn_lock.clone().lock_owned().await;
        let snapshot = self.db.state.lock().clone();
        self.txn = Some(Txn {
            _guard: guard,
            snapshot,
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), TransportError> {
        self.check_open()?;
        match self.txn.take() {
            Some(_) => Ok(()),
            None => Err(TransportError::Protocol("commit without transaction")),
        }
    }

    async fn rollback(&mut self) -> Result<(), TransportError> {
        self.check_open()?;
        match self.txn.take() {
            Some(txn) => {
                *self.db.state.lock() = txn.snapshot;
                Ok(())
            }
            None => Err(TransportError::Protocol("rollback without transaction")),
        }
    }

    async fn execute(
        &mut self,
        procedure: StoreProcedure,
        request: &StoreRequest,
    ) -> Result<StoreResults, TransportError> {
        self.check_open()?;
        let global = matches!(self.scope, Scope::Global);
        if procedure.is_global() != global {
            return Err(TransportError::Protocol("procedure scope mismatch"));
        }

        Ok(self.db.state.lock().apply(procedure, request))
    }

    async fn close(&mut self) {
        if let Some(txn) = self.txn.take() {
            *self.db.state.lock() = txn.snapshot;
        }
        self.app_locks.clear();
        self.closed = true;
    }
}

// A dropped connection behaves like a dead client: open work rolls back,
// advisory locks release.
impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            *self.db.state.lock() = txn.snapshot;
        }
    }
}

struct MemoryDataConnection {
    location: ShardLocation,
    store: MemoryStore,
    open: bool,
}

#[async_trait]
impl DataConnection for MemoryDataConnection {
    fn location(&self) -> &ShardLocation {
        &self.location
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let killed = self
            .store
            .inner
            .data_faults
            .lock()
            .get(&self.location)
            .map(|faults| faults.killed)
            .unwrap_or(false);
        if killed {
            self.open = false;
            return Err(TransportError::ConnectionBroken(self.location.to_string()));
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod instrumentation {
    use super::*;
    use crate::model::{Shard, StoreMapping};
    use crate::store::{LogEntry, StoreVersion};

    /// Fault injection and direct state access for tests.
    impl MemoryStore {
        pub fn fail_data_opens(&self, location: &ShardLocation, count: usize) {
            self.inner
                .data_faults
                .lock()
                .entry(location.clone())
                .or_default()
                .fail_opens = count;
        }

        pub fn set_data_killed(&self, location: &ShardLocation, killed: bool) {
            self.inner
                .data_faults
                .lock()
                .entry(location.clone())
                .or_default()
                .killed = killed;
        }

        pub fn set_gsm_version(&self, version: StoreVersion) {
            self.inner.global.state.lock().version = version;
        }

        pub fn set_lsm_version(&self, location: &ShardLocation, version: StoreVersion) {
            self.local(location).state.lock().version = version;
        }

        pub fn log_entry(&self, operation_id: Uuid) -> Option<LogEntry> {
            self.inner
                .global
                .state
                .lock()
                .log
                .get(&operation_id)
                .cloned()
        }

        pub fn log_entries(&self) -> Vec<LogEntry> {
            self.inner
                .global
                .state
                .lock()
                .log
                .values()
                .cloned()
                .collect()
        }

        pub fn pending_log_entries(&self) -> Vec<LogEntry> {
            self.inner
                .global
                .state
                .lock()
                .log
                .values()
                .filter(|entry| entry.is_pending())
                .cloned()
                .collect()
        }

        pub fn gsm_mappings(&self, shard_map_id: Uuid) -> Vec<StoreMapping> {
            self.inner
                .global
                .state
                .lock()
                .mappings
                .values()
                .filter(|m| m.shard_map_id == shard_map_id)
                .cloned()
                .collect()
        }

        pub fn gsm_shards(&self, shard_map_id: Uuid) -> Vec<Shard> {
            self.inner
                .global
                .state
                .lock()
                .shards
                .values()
                .filter(|row| row.shard.shard_map_id == shard_map_id)
                .map(|row| row.shard.clone())
                .collect()
        }

        pub fn lsm_mappings(&self, location: &ShardLocation) -> Vec<StoreMapping> {
            self.local(location)
                .state
                .lock()
                .mappings
                .values()
                .cloned()
                .collect()
        }

        pub fn lsm_shards(&self, location: &ShardLocation) -> Vec<Shard> {
            self.local(location)
                .state
                .lock()
                .shards
                .values()
                .map(|row| row.shard.clone())
                .collect()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::ShardKeyType;
    use crate::model::{ShardMap, ShardMapKind};
    use crate::store::{StoreResult, StoreVersion, GSM_VERSION};

    fn request() -> StoreRequest {
        StoreRequest::new(GSM_VERSION)
    }

    #[tokio::test]
    async fn test_rollback_restores_state() {
        let store = MemoryStore::new();
        let map = ShardMap::new("maps", ShardMapKind::Range, ShardKeyType::Int32);

        let mut conn = store.open_global().await.unwrap();
        conn.begin().await.unwrap();
        let results = conn
            .execute(
                StoreProcedure::AddShardMapGlobal,
                &request().shard_map(&map),
            )
            .await
            .unwrap();
        assert!(results.is_success());
        conn.rollback().await.unwrap();

        let results = conn
            .execute(StoreProcedure::GetAllShardMapsGlobal, &request())
            .await
            .unwrap();
        assert!(results.shard_maps.is_empty());
        conn.close().await;
    }

    #[tokio::test]
    async fn test_commit_keeps_state() {
        let store = MemoryStore::new();
        let map = ShardMap::new("maps", ShardMapKind::Range, ShardKeyType::Int32);

        let mut conn = store.open_global().await.unwrap();
        conn.begin().await.unwrap();
        conn.execute(
            StoreProcedure::AddShardMapGlobal,
            &request().shard_map(&map),
        )
        .await
        .unwrap();
        conn.commit().await.unwrap();
        conn.close().await;

        let mut conn = store.open_global().await.unwrap();
        let results = conn
            .execute(StoreProcedure::GetAllShardMapsGlobal, &request())
            .await
            .unwrap();
        assert_eq!(results.shard_maps.len(), 1);
        conn.close().await;
    }

    #[tokio::test]
    async fn test_dropped_connection_rolls_back() {
        let store = MemoryStore::new();
        let map = ShardMap::new("maps", ShardMapKind::Range, ShardKeyType::Int32);

        {
            let mut conn = store.open_global().await.unwrap();
            conn.begin().await.unwrap();
            conn.execute(
                StoreProcedure::AddShardMapGlobal,
                &request().shard_map(&map),
            )
            .await
            .unwrap();
            // Dropped mid-transaction.
        }

        let mut conn = store.open_global().await.unwrap();
        let results = conn
            .execute(StoreProcedure::GetAllShardMapsGlobal, &request())
            .await
            .unwrap();
        assert!(results.shard_maps.is_empty());
        conn.close().await;
    }

    #[tokio::test]
    async fn test_app_lock_serializes() {
        let store = MemoryStore::new();
        let key = Uuid::new_v4();

        let mut first = store.open_global().await.unwrap();
        first.acquire_app_lock(key).await.unwrap();

        let store2 = store.clone();
        let waiter = tokio::spawn(async move {
            let mut second = store2.open_global().await.unwrap();
            second.acquire_app_lock(key).await.unwrap();
            second.close().await;
        });

        // The second connection can't take the lock until the first closes.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        first.close().await;
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let store = MemoryStore::new();
        store.set_gsm_version(StoreVersion { major: 1, minor: 0 });

        let mut conn = store.open_global().await.unwrap();
        let results = conn
            .execute(StoreProcedure::GetAllShardMapsGlobal, &request())
            .await
            .unwrap();
        assert_eq!(results.result, StoreResult::StoreVersionMismatch);
        assert_eq!(
            results.store_version,
            Some(StoreVersion { major: 1, minor: 0 })
        );
        conn.close().await;
    }

    #[tokio::test]
    async fn test_scope_mismatch() {
        let store = MemoryStore::new();
        let mut conn = store.open_global().await.unwrap();
        let err = conn
            .execute(StoreProcedure::GetAllShardsLocal, &request())
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Protocol("procedure scope mismatch"));
        conn.close().await;
    }

    #[tokio::test]
    async fn test_data_faults() {
        let store = MemoryStore::new();
        let location = ShardLocation::new_test(1);

        store.fail_data_opens(&location, 1);
        assert!(store.open_data(&location).await.is_err());
        let mut conn = store.open_data(&location).await.unwrap();
        assert!(conn.ping().await.is_ok());

        store.set_data_killed(&location, true);
        assert!(conn.ping().await.is_err());
        assert!(!conn.is_open());
        assert!(store.open_data(&location).await.is_err());
    }
}
