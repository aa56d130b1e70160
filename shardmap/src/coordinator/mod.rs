//! The two-tier operation coordinator.
//!
//! Keeps the GSM and the LSMs consistent under concurrent mutations and
//! partial failures: write-ahead log entries on the GSM, four-phase
//! execution, idempotent undo, and recovery of pending operations left by
//! crashed clients.

pub mod engine;
pub mod op;
pub mod state;

pub use op::Operation;
pub use state::StoreOperationState;

use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, ErrorCategory, ErrorCode};
use crate::retry::RetryPolicy;
use crate::store::{LogEntry, Store, StoreProcedure, StoreRequest, StoreResult, StoreResults};

use engine::{DoOutcome, Runner};

// A do attempt yields to at most this many pending-operation recoveries
// before giving up.
const MAX_RECOVERIES: u32 = 3;

enum GlobalOutcome {
    Done(StoreResults),
    Pending(LogEntry),
}

/// Executes coordinated operations against a store.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("retry", &self.retry)
            .finish()
    }
}

impl Coordinator {
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Run a four-phase operation to completion.
    ///
    /// Transient transport faults retry the whole attempt; the runner's
    /// max-state survives retries so a later undo enters at the right
    /// point. Pending operations found in the way are recovered first.
    pub async fn execute(
        &self,
        op: &Operation,
        category: ErrorCategory,
        cancel: &CancellationToken,
    ) -> Result<StoreResults, Error> {
        let mut runner = Runner::new(op, category);
        let mut attempt = 0;
        let mut recoveries = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match runner.execute_once(self.store.as_ref(), cancel).await {
                Ok(DoOutcome::Done(results)) => return Ok(results),
                Ok(DoOutcome::Pending(entry)) => {
                    recoveries += 1;
                    if recoveries > MAX_RECOVERIES {
                        return Err(Error::management(
                            category,
                            ErrorCode::ShardPendingOperation,
                            format!(
                                "operation {} still blocked by pending operation {}",
                                op.id, entry.operation_id
                            ),
                        ));
                    }
                    self.undo_log_entry(&entry).await?;
                }
                Err(err) if err_is_transient(&err) && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    warn!(
                        "operation {} attempt {} failed, retrying: {}",
                        op.id, attempt, err
                    );
                    tokio::select! {
                        _ = sleep(self.retry.base_delay.saturating_mul(1 << attempt.min(6))) => {}
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Recover a pending operation left behind by another client: rebuild
    /// it from the logged payload and drive its undo.
    pub async fn undo_log_entry(&self, entry: &LogEntry) -> Result<(), Error> {
        warn!(
            "recovering pending operation {} ({:?})",
            entry.operation_id, entry.code
        );
        let op: Operation = serde_json::from_value(entry.payload.clone())?;
        engine::undo_from(
            self.store.as_ref(),
            &op,
            op.undo_start_state,
            ErrorCategory::Recovery,
        )
        .await
    }

    /// Run a single-transaction GSM operation (reads, shard map CRUD,
    /// lock manipulation), retry-wrapped, recovering pending operations
    /// it stumbles over.
    pub async fn execute_global(
        &self,
        procedure: StoreProcedure,
        request: &StoreRequest,
        category: ErrorCategory,
        cancel: &CancellationToken,
    ) -> Result<StoreResults, Error> {
        let mut recoveries = 0;

        loop {
            let outcome = self
                .retry
                .run(cancel, || self.global_once(procedure, request, category))
                .await?;

            match outcome {
                GlobalOutcome::Done(results) => return Ok(results),
                GlobalOutcome::Pending(entry) => {
                    recoveries += 1;
                    if recoveries > MAX_RECOVERIES {
                        return Err(Error::management(
                            category,
                            ErrorCode::ShardPendingOperation,
                            format!("blocked by pending operation {}", entry.operation_id),
                        ));
                    }
                    self.undo_log_entry(&entry).await?;
                }
            }
        }
    }

    async fn global_once(
        &self,
        procedure: StoreProcedure,
        request: &StoreRequest,
        category: ErrorCategory,
    ) -> Result<GlobalOutcome, Error> {
        let mut conn = self.store.open_global().await?;

        let result = async {
            conn.begin().await?;
            let results = conn.execute(procedure, request).await?;

            if results.result == StoreResult::ShardPendingOperation {
                if let Some(entry) = results.pending_entry().cloned() {
                    let _ = conn.rollback().await;
                    return Ok(GlobalOutcome::Pending(entry));
                }
            }
            if !results.is_success() {
                let _ = conn.rollback().await;
                return Err(Error::Management(results.result.to_error(
                    category,
                    true,
                    procedure.name(),
                )));
            }

            conn.commit().await?;
            Ok(GlobalOutcome::Done(results))
        }
        .await;

        conn.close().await;
        result
    }
}

fn err_is_transient(err: &Error) -> bool {
    matches!(err, Error::Transport(transport) if transport.is_transient())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    impl Coordinator {
        /// Run a do attempt that dies at `state`: no undo, no teardown
        /// semantics beyond dropped connections. Returns the simulated
        /// crash error.
        pub async fn execute_crashing(
            &self,
            op: &Operation,
            category: ErrorCategory,
            state: StoreOperationState,
        ) -> Error {
            let mut runner = Runner::crash_at(op, category, state);
            match runner
                .execute_once(self.store.as_ref(), &CancellationToken::new())
                .await
            {
                Err(err) => err,
                Ok(_) => panic!("operation survived its crash point"),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::key::ShardRange;
    use crate::mapper::ConnectionOptions;
    use crate::model::{MappingInfo, ShardLocation};
    use crate::store::memory::MemoryStore;
    use crate::test::{attach, manager, run};
    use state::StoreOperationState::*;

    // A map with one shard and one mapping [10, 20), plus a coordinator
    // wired to the same store for driving raw operations.
    async fn fixture() -> (
        MemoryStore,
        crate::map::RangeShardMap<i32>,
        Coordinator,
        Operation,
    ) {
        let (manager, store) = manager();
        let map = manager
            .create_range_shard_map::<i32>("orders", &run())
            .await
            .unwrap();
        let shard = map
            .create_shard(ShardLocation::new_test(1), &run())
            .await
            .unwrap();
        let mapping = map
            .create_range_mapping(ShardRange::from_values(10, 20).unwrap(), &shard, &run())
            .await
            .unwrap();

        let coordinator = Coordinator::new(
            Arc::new(store.clone()),
            crate::retry::RetryPolicy::default(),
        );
        let op = Operation::remove_mapping(
            map.shard_map(),
            mapping.store_mapping().clone(),
            None,
        );
        (store, map, coordinator, op)
    }

    #[tokio::test]
    async fn test_crash_before_local_source_recovers_cleanly() {
        let (store, map, coordinator, op) = fixture().await;
        let location = ShardLocation::new_test(1);

        // Dies after the log entry committed, before any local work.
        coordinator
            .execute_crashing(&op, ErrorCategory::RangeShardMap, DoLocalSourceConnect)
            .await;

        assert_eq!(store.pending_log_entries().len(), 1);
        assert_eq!(store.lsm_mappings(&location).len(), 1);

        // A fresh client walking the directory recovers it; the mapping
        // is intact on both tiers and the entry is no longer pending.
        let other = attach(&store);
        let view = other
            .get_range_shard_map::<i32>("orders", &run())
            .await
            .unwrap();
        let rows = view.get_mappings(&run()).await.unwrap();
        assert_eq!(rows.len(), 1);

        assert!(store.pending_log_entries().is_empty());
        assert_eq!(store.lsm_mappings(&location).len(), 1);
        assert_eq!(store.gsm_mappings(map.shard_map().id).len(), 1);
    }

    #[tokio::test]
    async fn test_crash_after_local_source_commit_restores_lsm() {
        let (store, map, coordinator, op) = fixture().await;
        let location = ShardLocation::new_test(1);

        // Dies after the source LSM removed the mapping, before the
        // global post-local phase.
        coordinator
            .execute_crashing(
                &op,
                ErrorCategory::RangeShardMap,
                DoGlobalPostLocalBeginTransaction,
            )
            .await;

        assert_eq!(store.pending_log_entries().len(), 1);
        assert!(store.lsm_mappings(&location).is_empty());

        // Recovery re-creates the LSM copy and releases the GSM row.
        let other = attach(&store);
        let view = other
            .get_range_shard_map::<i32>("orders", &run())
            .await
            .unwrap();
        let rows = view.get_mappings(&run()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id(), op.mappings_removed[0].id);

        assert!(store.pending_log_entries().is_empty());
        assert_eq!(store.lsm_mappings(&location).len(), 1);
        assert_eq!(store.gsm_mappings(map.shard_map().id).len(), 1);
    }

    #[tokio::test]
    async fn test_crash_before_log_commit_leaves_no_trace() {
        let (store, map, coordinator, op) = fixture().await;

        // Dies inside the pre-local transaction: nothing committed.
        coordinator
            .execute_crashing(&op, ErrorCategory::RangeShardMap, DoGlobalPreLocalExecute)
            .await;

        assert!(store.pending_log_entries().is_empty());
        assert_eq!(store.gsm_mappings(map.shard_map().id).len(), 1);

        // And the operation can simply run again.
        coordinator
            .execute(&op, ErrorCategory::RangeShardMap, &run())
            .await
            .unwrap();
        assert!(store.gsm_mappings(map.shard_map().id).is_empty());
    }

    #[tokio::test]
    async fn test_undo_is_idempotent() {
        let (store, _, coordinator, op) = fixture().await;

        coordinator
            .execute_crashing(
                &op,
                ErrorCategory::RangeShardMap,
                DoGlobalPostLocalBeginTransaction,
            )
            .await;
        let entry = store.pending_log_entries().pop().unwrap();

        coordinator.undo_log_entry(&entry).await.unwrap();
        assert!(store.pending_log_entries().is_empty());

        // Undoing again is a no-op.
        coordinator.undo_log_entry(&entry).await.unwrap();
        coordinator.undo_log_entry(&entry).await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_operation_blocks_then_recovers() {
        let (store, map, coordinator, op) = fixture().await;

        coordinator
            .execute_crashing(
                &op,
                ErrorCategory::RangeShardMap,
                DoGlobalPostLocalBeginTransaction,
            )
            .await;

        // A conflicting mutation through the public surface stumbles over
        // the pending entry, recovers it, and proceeds.
        let mapping = map.get_mapping_for_key(15, &run()).await.unwrap();
        map.remove_mapping(&mapping, None, &run()).await.unwrap();

        assert!(store.pending_log_entries().is_empty());
        assert!(store.gsm_mappings(map.shard_map().id).is_empty());
    }

    #[tokio::test]
    async fn test_crashed_add_shard_is_undone() {
        let (manager, store) = manager();
        let map = manager
            .create_range_shard_map::<i32>("orders", &run())
            .await
            .unwrap();
        let location = ShardLocation::new_test(7);

        let coordinator = Coordinator::new(
            Arc::new(store.clone()),
            crate::retry::RetryPolicy::default(),
        );
        let shard = crate::model::Shard::new(
            map.shard_map().id,
            location.clone(),
            crate::model::ShardStatus::Online,
        );
        let op = Operation::add_shard(map.shard_map(), shard);

        // Dies after the shard row landed on the LSM.
        coordinator
            .execute_crashing(
                &op,
                ErrorCategory::ShardMap,
                DoGlobalPostLocalBeginTransaction,
            )
            .await;
        assert_eq!(store.pending_log_entries().len(), 1);
        assert_eq!(store.lsm_shards(&location).len(), 1);

        // Listing the shards from a fresh client undoes the half-added
        // shard on both tiers.
        let other = attach(&store);
        let view = other
            .get_range_shard_map::<i32>("orders", &run())
            .await
            .unwrap();
        assert!(view.get_shards(&run()).await.unwrap().is_empty());
        assert!(store.pending_log_entries().is_empty());
        assert!(store.lsm_shards(&location).is_empty());
        assert!(store.gsm_shards(map.shard_map().id).is_empty());

        // The location is free for a clean retry.
        view.create_shard(location.clone(), &run()).await.unwrap();
        assert_eq!(view.get_shards(&run()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_routing_recovers_pending_operations() {
        let (store, _, coordinator, op) = fixture().await;

        coordinator
            .execute_crashing(
                &op,
                ErrorCategory::RangeShardMap,
                DoGlobalPostLocalBeginTransaction,
            )
            .await;
        assert_eq!(store.pending_log_entries().len(), 1);

        // A plain routed connection from a fresh client is enough to heal
        // the directory.
        let other = attach(&store);
        let view = other
            .get_range_shard_map::<i32>("orders", &run())
            .await
            .unwrap();
        let conn = view
            .open_connection_for_key(15, ConnectionOptions::default(), &run())
            .await
            .unwrap();
        assert!(conn.is_open());
        assert!(store.pending_log_entries().is_empty());
    }
}
