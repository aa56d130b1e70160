//! Operation log entries.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::OperationCode;

/// Lifecycle of a log entry.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogState {
    /// The operation is in flight; a fresh client finding this entry must
    /// drive it to completion before touching the same objects.
    Pending,
    /// The operation finished (or was fully undone). Kept for audit.
    Completed,
}

/// Write-ahead record of a multi-phase operation, stored on the GSM before
/// any local work begins. The payload is the serialized operation itself,
/// sufficient to rebuild and undo it from another process.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LogEntry {
    pub operation_id: Uuid,
    pub code: OperationCode,
    pub state: LogState,
    pub payload: serde_json::Value,
}

impl LogEntry {
    pub fn pending(operation_id: Uuid, code: OperationCode, payload: serde_json::Value) -> Self {
        Self {
            operation_id,
            code,
            state: LogState::Pending,
            payload,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == LogState::Pending
    }
}
