//! Shards.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ShardLocation;

/// Availability of a shard for new mappings and connections.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Offline,
    #[default]
    Online,
}

impl From<ShardStatus> for i32 {
    fn from(value: ShardStatus) -> Self {
        match value {
            ShardStatus::Offline => 0,
            ShardStatus::Online => 1,
        }
    }
}

impl From<i32> for ShardStatus {
    // Other writers share the store; unknown values decode as offline.
    fn from(value: i32) -> Self {
        match value {
            1 => Self::Online,
            _ => Self::Offline,
        }
    }
}

/// A physical database holding a subset of mapped rows.
///
/// `version` changes on every coordinated mutation that touches the shard,
/// which is how stale cached references are detected.
#[derive(Serialize, Deserialize, Debug, Clone, Eq)]
pub struct Shard {
    pub id: Uuid,
    pub version: Uuid,
    pub shard_map_id: Uuid,
    pub location: ShardLocation,
    pub status: ShardStatus,
}

impl Shard {
    pub fn new(shard_map_id: Uuid, location: ShardLocation, status: ShardStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: Uuid::new_v4(),
            shard_map_id,
            location,
            status,
        }
    }

    /// Same shard, ignoring the version. Use this when checking identity
    /// across refreshes; `==` intentionally fails for stale references.
    pub fn id_equals(&self, other: &Self) -> bool {
        self.id == other.id
    }

    pub(crate) fn with_fresh_version(&self) -> Self {
        let mut shard = self.clone();
        shard.version = Uuid::new_v4();
        shard
    }
}

/// Equality includes `version`: a cached reference to a shard that has
/// since been mutated is NOT equal to its refreshed counterpart. Compare
/// with [`Shard::id_equals`] to ignore staleness.
impl PartialEq for Shard {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.version == other.version
    }
}

impl Display for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shard {} [{}]", self.id, self.location)
    }
}
