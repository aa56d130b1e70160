//! Error taxonomy.
//!
//! Domain errors are a (category, code, context) triple. Store-level result
//! codes are converted to exactly one (category, code) pair at each call
//! site; transport problems keep their own type so the retry wrapper can
//! tell them apart from hard failures.

use thiserror::Error;

/// Which part of the API surfaced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ShardMap,
    ShardMapManager,
    ListShardMap,
    RangeShardMap,
    Recovery,
    Validation,
    General,
}

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ShardMapDoesNotExist,
    ShardMapAlreadyExists,
    ShardMapHasShards,
    ShardAlreadyExists,
    ShardLocationAlreadyExists,
    ShardDoesNotExist,
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
    MappingsKillConnectionFailure,
    ShardPendingOperation,
    GlobalStoreVersionMismatch,
    LocalStoreVersionMismatch,
    UnexpectedError,
}

/// A typed domain error: category, code and human context.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{category:?}/{code:?}: {message}")]
pub struct ManagementError {
    pub category: ErrorCategory,
    pub code: ErrorCode,
    pub message: String,
}

impl ManagementError {
    pub fn new(category: ErrorCategory, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            category,
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Management(#[from] ManagementError),

    #[error("{0}")]
    Key(#[from] crate::key::Error),

    #[error("transport: {0}")]
    Transport(#[from] crate::store::TransportError),

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn management(
        category: ErrorCategory,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self::Management(ManagementError::new(category, code, message))
    }

    /// Validation errors are raised locally, before any store round trip.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::management(
            ErrorCategory::Validation,
            ErrorCode::UnexpectedError,
            message,
        )
    }

    /// The domain error code, if this is a domain error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Management(err) => Some(err.code),
            _ => None,
        }
    }

    pub fn is_code(&self, code: ErrorCode) -> bool {
        self.code() == Some(code)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = Error::management(
            ErrorCategory::RangeShardMap,
            ErrorCode::MappingNotFoundForKey,
            "key 15 has no mapping",
        );
        let text = err.to_string();
        assert!(text.contains("RangeShardMap"));
        assert!(text.contains("MappingNotFoundForKey"));
        assert!(text.contains("key 15"));
        assert!(err.is_code(ErrorCode::MappingNotFoundForKey));
    }
}
