//! Structured store results.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, ErrorCode, ManagementError};
use crate::model::{Shard, ShardMap, StoreMapping};

use super::log::LogEntry;
use super::version::StoreVersion;

/// Result code returned by every store procedure.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreResult {
    #[default]
    Success,
    StoreVersionMismatch,
    ShardMapDoesNotExist,
    ShardMapAlreadyExists,
    ShardMapHasShards,
    ShardDoesNotExist,
    ShardAlreadyExists,
    ShardLocationAlreadyExists,
    ShardVersionMismatch,
    ShardHasMappings,
    MappingDoesNotExist,
    MappingRangeAlreadyMapped,
    MappingPointAlreadyMapped,
    MappingNotFoundForKey,
    MappingIsAlreadyLocked,
    MappingLockOwnerIdDoesNotMatch,
    MappingIsNotOffline,
    MappingIsOffline,
    ShardPendingOperation,
    UnexpectedError,
}

impl StoreResult {
    /// Convert a non-success result into a domain error. The category is
    /// the call site's; the code mapping is fixed. `is_global`
    /// disambiguates the two store-version mismatches.
    pub fn to_error(
        self,
        category: ErrorCategory,
        is_global: bool,
        context: impl Into<String>,
    ) -> ManagementError {
        let code = match self {
            Self::Success => ErrorCode::UnexpectedError,
            Self::StoreVersionMismatch => {
                if is_global {
                    ErrorCode::GlobalStoreVersionMismatch
                } else {
                    ErrorCode::LocalStoreVersionMismatch
                }
            }
            Self::ShardMapDoesNotExist => ErrorCode::ShardMapDoesNotExist,
            Self::ShardMapAlreadyExists => ErrorCode::ShardMapAlreadyExists,
            Self::ShardMapHasShards => ErrorCode::ShardMapHasShards,
            Self::ShardDoesNotExist => ErrorCode::ShardDoesNotExist,
            Self::ShardAlreadyExists => ErrorCode::ShardAlreadyExists,
            Self::ShardLocationAlreadyExists => ErrorCode::ShardLocationAlreadyExists,
            Self::ShardVersionMismatch => ErrorCode::ShardVersionMismatch,
            Self::ShardHasMappings => ErrorCode::ShardHasMappings,
            Self::MappingDoesNotExist => ErrorCode::MappingDoesNotExist,
            Self::MappingRangeAlreadyMapped => ErrorCode::MappingRangeAlreadyMapped,
            Self::MappingPointAlreadyMapped => ErrorCode::MappingPointAlreadyMapped,
            Self::MappingNotFoundForKey => ErrorCode::MappingNotFoundForKey,
            Self::MappingIsAlreadyLocked => ErrorCode::MappingIsAlreadyLocked,
            Self::MappingLockOwnerIdDoesNotMatch => ErrorCode::MappingLockOwnerIdDoesNotMatch,
            Self::MappingIsNotOffline => ErrorCode::MappingIsNotOffline,
            Self::MappingIsOffline => ErrorCode::MappingIsOffline,
            Self::ShardPendingOperation => ErrorCode::ShardPendingOperation,
            Self::UnexpectedError => ErrorCode::UnexpectedError,
        };

        ManagementError::new(category, code, context)
    }
}

/// Decoded response of one store procedure: a result code plus row sets.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StoreResults {
    pub result: StoreResult,
    #[serde(default)]
    pub shard_maps: Vec<ShardMap>,
    #[serde(default)]
    pub shards: Vec<Shard>,
    #[serde(default)]
    pub mappings: Vec<StoreMapping>,
    #[serde(default)]
    pub log_entries: Vec<LogEntry>,
    #[serde(default)]
    pub store_version: Option<StoreVersion>,
}

impl StoreResults {
    pub fn error(result: StoreResult) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == StoreResult::Success
    }

    /// The pending log entry attached to a `ShardPendingOperation` result.
    pub fn pending_entry(&self) -> Option<&LogEntry> {
        self.log_entries.iter().find(|entry| entry.is_pending())
    }
}
