//! Operation state machine.

use serde::{Deserialize, Serialize};

/// Progress of a multi-phase operation. Declaration order is execution
/// order; the derived `Ord` drives the undo entry-point table.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StoreOperationState {
    DoBegin,
    DoGlobalConnect,
    DoGlobalPreLocalBeginTransaction,
    DoGlobalPreLocalExecute,
    DoGlobalPreLocalCommitTransaction,
    DoLocalSourceConnect,
    DoLocalSourceBeginTransaction,
    DoLocalSourceExecute,
    DoLocalSourceCommitTransaction,
    DoLocalTargetConnect,
    DoLocalTargetBeginTransaction,
    DoLocalTargetExecute,
    DoLocalTargetCommitTransaction,
    DoGlobalPostLocalBeginTransaction,
    DoGlobalPostLocalExecute,
    DoGlobalPostLocalCommitTransaction,
    DoEnd,

    UndoBegin,
    UndoGlobalConnect,
    UndoGlobalPreLocalBeginTransaction,
    UndoGlobalPreLocalExecute,
    UndoGlobalPreLocalCommitTransaction,
    UndoLocalTargetConnect,
    UndoLocalTargetBeginTransaction,
    UndoLocalTargetExecute,
    UndoLocalTargetCommitTransaction,
    UndoLocalSourceConnect,
    UndoLocalSourceBeginTransaction,
    UndoLocalSourceExecute,
    UndoLocalSourceCommitTransaction,
    UndoGlobalPostLocalBeginTransaction,
    UndoGlobalPostLocalExecute,
    UndoGlobalPostLocalCommitTransaction,
    UndoEnd,
}

impl StoreOperationState {
    /// Where undo starts, given the furthest Do state an operation
    /// reached.
    ///
    /// Anything before the pre-local commit never hit the log, so there is
    /// nothing to undo. Once a local phase committed, its side must be
    /// reverted before the global post-local revert runs.
    pub fn undo_entry_point(max_do_state: Self) -> Self {
        use StoreOperationState::*;

        if max_do_state <= DoGlobalPreLocalExecute {
            UndoEnd
        } else if max_do_state <= DoLocalSourceExecute {
            UndoGlobalPostLocalBeginTransaction
        } else if max_do_state <= DoLocalTargetExecute {
            UndoLocalSourceBeginTransaction
        } else if max_do_state <= DoGlobalPostLocalCommitTransaction {
            UndoLocalTargetBeginTransaction
        } else {
            UndoEnd
        }
    }
}
