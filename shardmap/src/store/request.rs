//! Structured store requests.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Shard, ShardLocation, ShardMap, StoreMapping};

use super::log::LogEntry;
use super::version::StoreVersion;

/// Code of a coordinated multi-phase operation, recorded in the log.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationCode {
    AddShard,
    RemoveShard,
    UpdateShard,
    AddMapping,
    RemoveMapping,
    UpdateMapping,
    SplitMapping,
    MergeMappings,
}

/// What a bulk-operation step does to its row.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Add,
    Remove,
    Update,
}

/// One row touched by a bulk operation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoreStep {
    pub kind: StepKind,
    #[serde(default)]
    pub mapping: Option<StoreMapping>,
    #[serde(default)]
    pub shard: Option<Shard>,
    /// Expected version of the shard touched by this step; the store
    /// rejects the phase with a version mismatch when it moved.
    #[serde(default)]
    pub expected_shard_version: Option<Uuid>,
    /// Lock token presented for lock-guarded mapping steps.
    #[serde(default)]
    pub lock_owner_id: Option<Uuid>,
}

/// Lock manipulation kinds for `LockOrUnlockShardMappingsGlobal`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockOpKind {
    Lock,
    UnlockMapping,
    UnlockAllForOwner,
    UnlockAll,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LockRequest {
    pub kind: LockOpKind,
    pub lock_owner_id: Uuid,
    #[serde(default)]
    pub mapping_id: Option<Uuid>,
}

/// Half-open range filter in normalized form.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoreRange {
    pub min_value: Bytes,
    #[serde(default)]
    pub max_value: Option<Bytes>,
}

/// Tree-structured payload of one store RPC.
///
/// The wire format is stable across library versions; the embedded
/// `version` marker is how both sides negotiate compatibility.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoreRequest {
    pub version: StoreVersion,
    #[serde(default)]
    pub operation_id: Option<Uuid>,
    #[serde(default)]
    pub operation_code: Option<OperationCode>,
    #[serde(default)]
    pub undo: bool,
    #[serde(default)]
    pub steps_count: usize,
    #[serde(default)]
    pub steps: Vec<StoreStep>,
    #[serde(default)]
    pub shard_map: Option<ShardMap>,
    #[serde(default)]
    pub shard: Option<Shard>,
    #[serde(default)]
    pub location: Option<ShardLocation>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub key: Option<Bytes>,
    #[serde(default)]
    pub range: Option<StoreRange>,
    #[serde(default)]
    pub mapping_id: Option<Uuid>,
    #[serde(default)]
    pub lock: Option<LockRequest>,
    #[serde(default)]
    pub log_entry: Option<LogEntry>,
    /// Fresh-version shard snapshots applied by the closing phase of a
    /// bulk operation.
    #[serde(default)]
    pub shard_updates: Vec<Shard>,
}

impl StoreRequest {
    pub fn new(version: StoreVersion) -> Self {
        Self {
            version,
            operation_id: None,
            operation_code: None,
            undo: false,
            steps_count: 0,
            steps: Vec::new(),
            shard_map: None,
            shard: None,
            location: None,
            name: None,
            key: None,
            range: None,
            mapping_id: None,
            lock: None,
            log_entry: None,
            shard_updates: Vec::new(),
        }
    }

    pub fn operation(mut self, id: Uuid, code: OperationCode, undo: bool) -> Self {
        self.operation_id = Some(id);
        self.operation_code = Some(code);
        self.undo = undo;
        self
    }

    pub fn step(mut self, step: StoreStep) -> Self {
        self.steps.push(step);
        self.steps_count = self.steps.len();
        self
    }

    pub fn shard_map(mut self, shard_map: &ShardMap) -> Self {
        self.shard_map = Some(shard_map.clone());
        self
    }

    pub fn shard(mut self, shard: &Shard) -> Self {
        self.shard = Some(shard.clone());
        self
    }

    pub fn location(mut self, location: &ShardLocation) -> Self {
        self.location = Some(location.clone());
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn key(mut self, key: Bytes) -> Self {
        self.key = Some(key);
        self
    }

    pub fn range(mut self, range: StoreRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn mapping_id(mut self, id: Uuid) -> Self {
        self.mapping_id = Some(id);
        self
    }

    pub fn lock(mut self, lock: LockRequest) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn log_entry(mut self, entry: LogEntry) -> Self {
        self.log_entry = Some(entry);
        self
    }

    pub fn shard_update(mut self, shard: Shard) -> Self {
        self.shard_updates.push(shard);
        self
    }
}
