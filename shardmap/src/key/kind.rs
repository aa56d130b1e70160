use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Data type of a shard key.
///
/// Persisted with the shard map, so every client resolving keys against the
/// same directory agrees on the normalized encoding.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShardKeyType {
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// GUID, ordered the way the server compares `uniqueidentifier`.
    Guid,
    /// Variable-length binary, trailing zeros trimmed, max 128 bytes.
    Binary,
    /// Timestamp, stored as ticks (100ns) since 0001-01-01.
    DateTime,
    /// Duration, stored as ticks.
    TimeSpan,
    /// Timestamp with offset; ordered and hashed by the UTC instant only.
    DateTimeOffset,
}

impl Display for ShardKeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Guid => "guid",
            Self::Binary => "binary",
            Self::DateTime => "datetime",
            Self::TimeSpan => "timespan",
            Self::DateTimeOffset => "datetimeoffset",
        };
        write!(f, "{}", name)
    }
}
