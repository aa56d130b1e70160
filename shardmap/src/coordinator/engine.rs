//! The four-phase do/undo engine.
//!
//! Do: GSM pre-local, LSM source, LSM target (moves only), GSM post-local.
//! Each phase is one transaction. Undo runs the reverse with inverted
//! steps, entering at the point the do provably reached; a missing or
//! completed log entry makes the whole undo a no-op.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{Error, ErrorCategory};
use crate::model::ShardLocation;
use crate::store::{
    LogEntry, Store, StoreConnection, StoreProcedure, StoreRequest, StoreResult, StoreResults,
    GSM_VERSION,
};

use super::op::Operation;
use super::state::StoreOperationState;

/// Result of one do attempt.
pub(crate) enum DoOutcome {
    Done(StoreResults),
    /// Another operation's pending log entry blocks this one; the caller
    /// recovers it and retries.
    Pending(LogEntry),
}

struct Connections {
    global: Box<dyn StoreConnection>,
    source: Option<Box<dyn StoreConnection>>,
    target: Option<Box<dyn StoreConnection>>,
}

impl Connections {
    async fn teardown(&mut self) {
        if let Some(conn) = self.target.as_mut() {
            conn.close().await;
        }
        if let Some(conn) = self.source.as_mut() {
            conn.close().await;
        }
        self.global.close().await;
    }
}

pub(crate) struct Runner<'a> {
    op: &'a Operation,
    category: ErrorCategory,
    state: StoreOperationState,
    max_state: StoreOperationState,
    #[cfg(test)]
    crash_at: Option<StoreOperationState>,
    #[cfg(test)]
    crashed: bool,
}

impl<'a> Runner<'a> {
    pub fn new(op: &'a Operation, category: ErrorCategory) -> Self {
        Self {
            op,
            category,
            state: StoreOperationState::DoBegin,
            max_state: StoreOperationState::DoBegin,
            #[cfg(test)]
            crash_at: None,
            #[cfg(test)]
            crashed: false,
        }
    }

    /// Simulate a process death at the given state: the attempt aborts
    /// with a transport error and no undo runs.
    #[cfg(test)]
    pub fn crash_at(op: &'a Operation, category: ErrorCategory, state: StoreOperationState) -> Self {
        let mut runner = Self::new(op, category);
        runner.crash_at = Some(state);
        runner
    }

    fn set(&mut self, state: StoreOperationState) -> Result<(), Error> {
        self.state = state;
        self.max_state = self.max_state.max(state);
        debug!("operation {} at {:?}", self.op.id, state);

        #[cfg(test)]
        if self.crash_at == Some(state) {
            self.crashed = true;
            return Err(crate::store::TransportError::Fault("simulated crash").into());
        }

        Ok(())
    }

    fn store_error(&self, result: StoreResult, global: bool) -> Error {
        result
            .to_error(
                self.category,
                global,
                format!("operation {} ({:?})", self.op.id, self.state),
            )
            .into()
    }

    fn check_cancel(&self, cancel: &CancellationToken) -> Result<(), Error> {
        if cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// One full do attempt. Transport failures and cancellation trigger a
    /// best-effort undo that never masks the original error.
    pub async fn execute_once(
        &mut self,
        store: &dyn Store,
        cancel: &CancellationToken,
    ) -> Result<DoOutcome, Error> {
        self.set(StoreOperationState::DoGlobalConnect)?;
        let mut conns = self.establish(store).await?;

        let result = self.run_do_phases(&mut conns, cancel).await;
        conns.teardown().await;

        if matches!(&result, Err(Error::Transport(_)) | Err(Error::Cancelled)) {
            #[cfg(test)]
            if self.crashed {
                return result;
            }

            let from = StoreOperationState::undo_entry_point(self.max_state);
            if let Err(undo_err) = undo_from(store, self.op, from, self.category).await {
                // Swallowed: the original failure is the one that matters.
                error!(
                    "undo of operation {} after failure did not complete: {}",
                    self.op.id, undo_err
                );
            }
        }

        result
    }

    async fn establish(&mut self, store: &dyn Store) -> Result<Connections, Error> {
        let mut global = store.open_global().await?;
        if let Err(err) = global.acquire_app_lock(self.op.id).await {
            global.close().await;
            return Err(err.into());
        }

        let mut conns = Connections {
            global,
            source: None,
            target: None,
        };

        let locations = [
            self.op.source_location(),
            self.op.target_location(),
        ];
        for (n, location) in locations.into_iter().enumerate() {
            let Some(location) = location else {
                continue;
            };
            match self.open_local(store, &location).await {
                Ok(conn) => {
                    if n == 0 {
                        conns.source = Some(conn);
                    } else {
                        conns.target = Some(conn);
                    }
                }
                Err(err) => {
                    conns.teardown().await;
                    return Err(err);
                }
            }
        }

        Ok(conns)
    }

    async fn open_local(
        &self,
        store: &dyn Store,
        location: &ShardLocation,
    ) -> Result<Box<dyn StoreConnection>, Error> {
        let mut conn = store.open_local(location).await?;
        if let Err(err) = conn.acquire_app_lock(self.op.id).await {
            conn.close().await;
            return Err(err.into());
        }
        Ok(conn)
    }

    async fn run_do_phases(
        &mut self,
        conns: &mut Connections,
        cancel: &CancellationToken,
    ) -> Result<DoOutcome, Error> {
        use StoreOperationState::*;

        // GSM pre-local: preconditions, staged rows, the log entry.
        self.set(DoGlobalPreLocalBeginTransaction)?;
        conns.global.begin().await?;
        self.set(DoGlobalPreLocalExecute)?;
        let (procedure, request) = self.op.global_begin()?;
        let results = conns.global.execute(procedure, &request).await?;
        if results.result == StoreResult::ShardPendingOperation {
            if let Some(entry) = results.pending_entry().cloned() {
                let _ = conns.global.rollback().await;
                return Ok(DoOutcome::Pending(entry));
            }
        }
        if !results.is_success() {
            let _ = conns.global.rollback().await;
            return Err(self.store_error(results.result, true));
        }
        self.set(DoGlobalPreLocalCommitTransaction)?;
        conns.global.commit().await?;

        self.check_cancel(cancel)?;

        // LSM source.
        if let Some((procedure, request)) = self.op.local_request(false, false) {
            self.set(DoLocalSourceConnect)?;
            if let Some(conn) = conns.source.as_mut() {
                self.set(DoLocalSourceBeginTransaction)?;
                conn.begin().await?;
                self.set(DoLocalSourceExecute)?;
                let results = conn.execute(procedure, &request).await?;
                if !results.is_success() {
                    let _ = conn.rollback().await;
                    return Err(self.store_error(results.result, false));
                }
                self.set(DoLocalSourceCommitTransaction)?;
                conn.commit().await?;
            }
        }

        self.check_cancel(cancel)?;

        // LSM target, for mapping moves.
        if let Some((procedure, request)) = self.op.local_request(true, false) {
            self.set(DoLocalTargetConnect)?;
            if let Some(conn) = conns.target.as_mut() {
                self.set(DoLocalTargetBeginTransaction)?;
                conn.begin().await?;
                self.set(DoLocalTargetExecute)?;
                let results = conn.execute(procedure, &request).await?;
                if !results.is_success() {
                    let _ = conn.rollback().await;
                    return Err(self.store_error(results.result, false));
                }
                self.set(DoLocalTargetCommitTransaction)?;
                conn.commit().await?;
            }
        }

        self.check_cancel(cancel)?;

        // GSM post-local: finalize rows, complete the log entry. Past this
        // commit the operation is done and cancellation is ignored.
        self.set(DoGlobalPostLocalBeginTransaction)?;
        conns.global.begin().await?;
        self.set(DoGlobalPostLocalExecute)?;
        let (procedure, request) = self.op.global_end(false);
        let results = conns.global.execute(procedure, &request).await?;
        if !results.is_success() {
            let _ = conns.global.rollback().await;
            return Err(self.store_error(results.result, true));
        }
        self.set(DoGlobalPostLocalCommitTransaction)?;
        conns.global.commit().await?;
        self.set(DoEnd)?;

        Ok(DoOutcome::Done(results))
    }
}

/// Undo an operation, entering at `from`. Idempotent: if the log entry is
/// absent or already completed this is a no-op, so re-running an undo, or
/// undoing an operation that never logged, is safe.
pub(crate) async fn undo_from(
    store: &dyn Store,
    op: &Operation,
    from: StoreOperationState,
    category: ErrorCategory,
) -> Result<(), Error> {
    use StoreOperationState::*;

    if from >= UndoEnd {
        return Ok(());
    }

    let mut global = store.open_global().await?;
    if let Err(err) = global.acquire_app_lock(op.id).await {
        global.close().await;
        return Err(err.into());
    }

    let result = undo_phases(global.as_mut(), store, op, from, category).await;
    global.close().await;
    result
}

async fn undo_phases(
    global: &mut dyn StoreConnection,
    store: &dyn Store,
    op: &Operation,
    from: StoreOperationState,
    category: ErrorCategory,
) -> Result<(), Error> {
    use StoreOperationState::*;

    // UndoGlobalPreLocal: read the log entry back. Absent or completed
    // means there is nothing to undo.
    global.begin().await?;
    let request = StoreRequest::new(GSM_VERSION).operation(op.id, op.code, true);
    let results = global
        .execute(StoreProcedure::GetOperationLogEntryGlobal, &request)
        .await?;
    let active = results
        .log_entries
        .first()
        .map(|entry| entry.is_pending())
        .unwrap_or(false);
    global.commit().await?;

    if !active {
        debug!("operation {} has no pending log entry, undo is a no-op", op.id);
        return Ok(());
    }

    warn!("undoing operation {} ({:?}) from {:?}", op.id, op.code, from);

    // Local phases, deepest side first.
    if from <= UndoLocalTargetBeginTransaction {
        if let (Some(location), Some((procedure, request))) =
            (op.target_location(), op.local_request(true, true))
        {
            run_local_phase(store, &location, op.id, procedure, &request, category).await?;
        }
    }
    if from <= UndoLocalSourceBeginTransaction {
        if let (Some(location), Some((procedure, request))) =
            (op.source_location(), op.local_request(false, true))
        {
            run_local_phase(store, &location, op.id, procedure, &request, category).await?;
        }
    }

    // UndoGlobalPostLocal: revert the staged GSM rows, complete the entry.
    global.begin().await?;
    let (procedure, request) = op.global_end(true);
    let results = global.execute(procedure, &request).await?;
    if !results.is_success() {
        let _ = global.rollback().await;
        return Err(results
            .result
            .to_error(category, true, format!("undo of operation {}", op.id))
            .into());
    }
    global.commit().await?;

    Ok(())
}

async fn run_local_phase(
    store: &dyn Store,
    location: &ShardLocation,
    operation_id: Uuid,
    procedure: StoreProcedure,
    request: &StoreRequest,
    category: ErrorCategory,
) -> Result<(), Error> {
    let mut conn = store.open_local(location).await?;
    let result = async {
        conn.acquire_app_lock(operation_id).await?;
        conn.begin().await?;
        let results = conn.execute(procedure, request).await?;
        if !results.is_success() {
            let _ = conn.rollback().await;
            return Err(results
                .result
                .to_error(category, false, format!("local phase at {}", location))
                .into());
        }
        conn.commit().await?;
        Ok(())
    }
    .await;
    conn.close().await;
    result
}
