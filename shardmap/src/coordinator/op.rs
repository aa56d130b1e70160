//! Operation payloads.
//!
//! Every coordinated mutation is one `Operation` value: an op code plus
//! the rows it removes and adds, with enough pre-image material to build
//! the undo requests from another process. The four-phase engine derives
//! every store request from this one value.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Shard, ShardLocation, ShardMap, StoreMapping};
use crate::store::{
    LogEntry, OperationCode, StepKind, StoreProcedure, StoreRequest, StoreStep, GSM_VERSION,
    LSM_VERSION,
};

use super::state::StoreOperationState;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Operation {
    pub id: Uuid,
    pub code: OperationCode,
    pub shard_map: ShardMap,
    /// Pre-images removed from the directory.
    pub mappings_removed: Vec<StoreMapping>,
    /// Post-images added to the directory.
    pub mappings_added: Vec<StoreMapping>,
    /// Pre-image of the shard a shard operation touches.
    pub shard_old: Option<Shard>,
    /// Post-image for shard adds and updates.
    pub shard_new: Option<Shard>,
    /// Fresh-version snapshots applied by the closing phase.
    pub shard_updates: Vec<Shard>,
    /// Lock token presented for lock-guarded mapping steps.
    pub lock_owner_id: Option<Uuid>,
    /// Conservative undo entry point recorded in the log for recovery by
    /// another process.
    pub undo_start_state: StoreOperationState,
}

impl Operation {
    fn new(code: OperationCode, shard_map: &ShardMap) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            shard_map: shard_map.clone(),
            mappings_removed: Vec::new(),
            mappings_added: Vec::new(),
            shard_old: None,
            shard_new: None,
            shard_updates: Vec::new(),
            lock_owner_id: None,
            undo_start_state: StoreOperationState::UndoLocalSourceBeginTransaction,
        }
    }

    // Undo from another process can't know how far the local phases got,
    // so the logged entry point covers the deepest one; local undo steps
    // are idempotent, over-undoing is safe.
    fn seal(mut self) -> Self {
        self.undo_start_state = if self.target_location().is_some() {
            StoreOperationState::UndoLocalTargetBeginTransaction
        } else {
            StoreOperationState::UndoLocalSourceBeginTransaction
        };
        self
    }

    pub fn add_shard(shard_map: &ShardMap, shard: Shard) -> Self {
        let mut op = Self::new(OperationCode::AddShard, shard_map);
        op.shard_new = Some(shard);
        op.seal()
    }

    pub fn remove_shard(shard_map: &ShardMap, shard: Shard) -> Self {
        let mut op = Self::new(OperationCode::RemoveShard, shard_map);
        op.shard_old = Some(shard);
        op.seal()
    }

    pub fn update_shard(shard_map: &ShardMap, old: Shard, new: Shard) -> Self {
        let mut op = Self::new(OperationCode::UpdateShard, shard_map);
        op.shard_old = Some(old);
        op.shard_new = Some(new);
        op.seal()
    }

    // Adding a mapping checks the shard version but does not bump it:
    // callers add many mappings from one shard snapshot.
    pub fn add_mapping(shard_map: &ShardMap, mapping: StoreMapping) -> Self {
        let mut op = Self::new(OperationCode::AddMapping, shard_map);
        op.mappings_added = vec![mapping];
        op.seal()
    }

    pub fn remove_mapping(
        shard_map: &ShardMap,
        mapping: StoreMapping,
        lock_owner_id: Option<Uuid>,
    ) -> Self {
        let mut op = Self::new(OperationCode::RemoveMapping, shard_map);
        op.shard_updates = vec![mapping.shard.with_fresh_version()];
        op.mappings_removed = vec![mapping];
        op.lock_owner_id = lock_owner_id;
        op.seal()
    }

    pub fn update_mapping(
        shard_map: &ShardMap,
        old: StoreMapping,
        new: StoreMapping,
        lock_owner_id: Option<Uuid>,
    ) -> Self {
        let mut op = Self::new(OperationCode::UpdateMapping, shard_map);
        op.shard_updates = vec![old.shard.with_fresh_version()];
        if new.shard.id != old.shard.id {
            op.shard_updates.push(new.shard.with_fresh_version());
        }
        op.mappings_removed = vec![old];
        op.mappings_added = vec![new];
        op.lock_owner_id = lock_owner_id;
        op.seal()
    }

    pub fn split_mapping(
        shard_map: &ShardMap,
        source: StoreMapping,
        left: StoreMapping,
        right: StoreMapping,
        lock_owner_id: Option<Uuid>,
    ) -> Self {
        let mut op = Self::new(OperationCode::SplitMapping, shard_map);
        op.shard_updates = vec![source.shard.with_fresh_version()];
        op.mappings_removed = vec![source];
        op.mappings_added = vec![left, right];
        op.lock_owner_id = lock_owner_id;
        op.seal()
    }

    pub fn merge_mappings(
        shard_map: &ShardMap,
        left: StoreMapping,
        right: StoreMapping,
        merged: StoreMapping,
        lock_owner_id: Option<Uuid>,
    ) -> Self {
        let mut op = Self::new(OperationCode::MergeMappings, shard_map);
        op.shard_updates = vec![merged.shard.with_fresh_version()];
        op.mappings_removed = vec![left, right];
        op.mappings_added = vec![merged];
        op.lock_owner_id = lock_owner_id;
        op.seal()
    }

    fn is_shard_op(&self) -> bool {
        matches!(
            self.code,
            OperationCode::AddShard | OperationCode::RemoveShard | OperationCode::UpdateShard
        )
    }

    /// The shard whose LSM the operation mutates first.
    pub fn source_location(&self) -> Option<ShardLocation> {
        if self.is_shard_op() {
            return self
                .shard_new
                .as_ref()
                .or(self.shard_old.as_ref())
                .map(|shard| shard.location.clone());
        }

        self.mappings_removed
            .first()
            .or(self.mappings_added.first())
            .map(|mapping| mapping.shard.location.clone())
    }

    /// The destination shard of a mapping move, when different from the
    /// source.
    pub fn target_location(&self) -> Option<ShardLocation> {
        let source = self.source_location()?;
        self.mappings_added
            .iter()
            .map(|mapping| mapping.shard.location.clone())
            .find(|location| location != &source)
    }

    fn shard_steps(&self) -> Vec<StoreStep> {
        let mut steps = Vec::new();
        match self.code {
            OperationCode::AddShard => {
                if let Some(shard) = &self.shard_new {
                    steps.push(StoreStep {
                        kind: StepKind::Add,
                        mapping: None,
                        shard: Some(shard.clone()),
                        expected_shard_version: None,
                        lock_owner_id: None,
                    });
                }
            }
            OperationCode::RemoveShard => {
                if let Some(shard) = &self.shard_old {
                    steps.push(StoreStep {
                        kind: StepKind::Remove,
                        mapping: None,
                        shard: Some(shard.clone()),
                        expected_shard_version: Some(shard.version),
                        lock_owner_id: None,
                    });
                }
            }
            OperationCode::UpdateShard => {
                if let (Some(old), Some(new)) = (&self.shard_old, &self.shard_new) {
                    steps.push(StoreStep {
                        kind: StepKind::Update,
                        mapping: None,
                        shard: Some(new.clone()),
                        expected_shard_version: Some(old.version),
                        lock_owner_id: None,
                    });
                }
            }
            _ => {}
        }
        steps
    }

    fn mapping_steps(&self) -> Vec<StoreStep> {
        let removes = self.mappings_removed.iter().map(|mapping| StoreStep {
            kind: StepKind::Remove,
            mapping: Some(mapping.clone()),
            shard: None,
            expected_shard_version: None,
            lock_owner_id: self.lock_owner_id,
        });
        let adds = self.mappings_added.iter().map(|mapping| StoreStep {
            kind: StepKind::Add,
            mapping: Some(mapping.clone()),
            shard: None,
            expected_shard_version: Some(mapping.shard.version),
            lock_owner_id: None,
        });
        removes.chain(adds).collect()
    }

    /// The GSM pre-local request: preconditions, staged rows, log entry.
    pub fn global_begin(&self) -> Result<(StoreProcedure, StoreRequest), serde_json::Error> {
        let entry = LogEntry::pending(self.id, self.code, serde_json::to_value(self)?);
        let mut request = StoreRequest::new(GSM_VERSION)
            .operation(self.id, self.code, false)
            .shard_map(&self.shard_map)
            .log_entry(entry);

        let procedure = if self.is_shard_op() {
            for step in self.shard_steps() {
                request = request.step(step);
            }
            StoreProcedure::BulkOperationShardsGlobalBegin
        } else {
            for step in self.mapping_steps() {
                request = request.step(step);
            }
            StoreProcedure::BulkOperationShardMappingsGlobalBegin
        };

        Ok((procedure, request))
    }

    /// The GSM post-local request. With `undo` set it reverts the staged
    /// rows instead of finalizing them; either way the log entry
    /// completes.
    pub fn global_end(&self, undo: bool) -> (StoreProcedure, StoreRequest) {
        let mut request = StoreRequest::new(GSM_VERSION)
            .operation(self.id, self.code, undo)
            .shard_map(&self.shard_map);

        let procedure = if self.is_shard_op() {
            for step in self.shard_steps() {
                request = request.step(step);
            }
            StoreProcedure::BulkOperationShardsGlobalEnd
        } else {
            for step in self.mapping_steps() {
                request = request.step(step);
            }
            for shard in &self.shard_updates {
                request = request.shard_update(shard.clone());
            }
            StoreProcedure::BulkOperationShardMappingsGlobalEnd
        };

        (procedure, request)
    }

    /// The LSM request for the source (or target) side. Undo requests
    /// carry the steps already inverted so the store applies them
    /// literally and idempotently.
    pub fn local_request(&self, target: bool, undo: bool) -> Option<(StoreProcedure, StoreRequest)> {
        let location = if target {
            self.target_location()?
        } else {
            self.source_location()?
        };

        let mut request = StoreRequest::new(LSM_VERSION)
            .operation(self.id, self.code, undo)
            .shard_map(&self.shard_map);

        if self.is_shard_op() {
            for mut step in self.shard_steps() {
                if undo {
                    step = invert_shard_step(step, self);
                }
                request = request.step(step);
            }
            return Some((StoreProcedure::BulkOperationShardsLocal, request));
        }

        let on_location = |mapping: &&StoreMapping| mapping.shard.location == location;
        let removes = self.mappings_removed.iter().filter(on_location);
        let adds = self.mappings_added.iter().filter(on_location);

        let mut steps = Vec::new();
        for mapping in removes {
            steps.push(StoreStep {
                kind: if undo { StepKind::Add } else { StepKind::Remove },
                mapping: Some(mapping.clone()),
                shard: None,
                expected_shard_version: None,
                lock_owner_id: None,
            });
        }
        for mapping in adds {
            steps.push(StoreStep {
                kind: if undo { StepKind::Remove } else { StepKind::Add },
                mapping: Some(mapping.clone()),
                shard: None,
                expected_shard_version: None,
                lock_owner_id: None,
            });
        }
        if steps.is_empty() {
            return None;
        }

        for step in steps {
            request = request.step(step);
        }
        if !undo {
            for shard in self
                .shard_updates
                .iter()
                .filter(|shard| shard.location == location)
            {
                request = request.shard_update(shard.clone());
            }
        }

        Some((StoreProcedure::BulkOperationShardMappingsLocal, request))
    }
}

fn invert_shard_step(mut step: StoreStep, op: &Operation) -> StoreStep {
    step.kind = match step.kind {
        StepKind::Add => StepKind::Remove,
        StepKind::Remove => StepKind::Add,
        StepKind::Update => StepKind::Update,
    };
    // Undoing an update restores the pre-image.
    if step.kind == StepKind::Update {
        step.shard = op.shard_old.clone();
    }
    step
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::{ShardKey, ShardKeyType, ShardRange};
    use crate::model::{MappingKind, MappingStatus, ShardLocation, ShardMapKind, ShardStatus};

    fn fixture() -> (ShardMap, Shard, Shard) {
        let map = ShardMap::new("orders", ShardMapKind::Range, ShardKeyType::Int32);
        let a = Shard::new(map.id, ShardLocation::new_test(1), ShardStatus::Online);
        let b = Shard::new(map.id, ShardLocation::new_test(2), ShardStatus::Online);
        (map, a, b)
    }

    fn mapping(map: &ShardMap, shard: &Shard, low: i32, high: i32) -> StoreMapping {
        let range = ShardRange::new(
            ShardKey::new(low).unwrap(),
            ShardKey::new(high).unwrap(),
        )
        .unwrap();
        StoreMapping::new(map, MappingKind::Range, &range, shard.clone(), MappingStatus::Online)
    }

    #[test]
    fn test_round_trips_through_log_payload() {
        let (map, shard, _) = fixture();
        let op = Operation::add_mapping(&map, mapping(&map, &shard, 10, 20));

        let payload = serde_json::to_value(&op).unwrap();
        let back: Operation = serde_json::from_value(payload).unwrap();

        assert_eq!(back.id, op.id);
        assert_eq!(back.code, OperationCode::AddMapping);
        assert_eq!(back.mappings_added.len(), 1);
        assert_eq!(back.undo_start_state, op.undo_start_state);
    }

    #[test]
    fn test_move_has_source_and_target() {
        let (map, a, b) = fixture();
        let old = mapping(&map, &a, 10, 20);
        let mut new = mapping(&map, &b, 10, 20);
        new.status = MappingStatus::Offline;

        let op = Operation::update_mapping(&map, old, new, None);
        assert_eq!(op.source_location().unwrap(), a.location);
        assert_eq!(op.target_location().unwrap(), b.location);
        assert_eq!(
            op.undo_start_state,
            StoreOperationState::UndoLocalTargetBeginTransaction
        );

        // Source side removes the old row, target side adds the new one.
        let (_, source) = op.local_request(false, false).unwrap();
        assert_eq!(source.steps.len(), 1);
        assert_eq!(source.steps[0].kind, StepKind::Remove);

        let (_, target) = op.local_request(true, false).unwrap();
        assert_eq!(target.steps.len(), 1);
        assert_eq!(target.steps[0].kind, StepKind::Add);

        // Undo inverts both.
        let (_, undo_source) = op.local_request(false, true).unwrap();
        assert_eq!(undo_source.steps[0].kind, StepKind::Add);
        let (_, undo_target) = op.local_request(true, true).unwrap();
        assert_eq!(undo_target.steps[0].kind, StepKind::Remove);
    }

    #[test]
    fn test_in_place_update_has_no_target(){
        let (map, a, _) = fixture();
        let old = mapping(&map, &a, 10, 20);
        let mut new = old.clone();
        new.id = Uuid::new_v4();
        new.status = MappingStatus::Offline;

        let op = Operation::update_mapping(&map, old, new, None);
        assert!(op.target_location().is_none());
        assert_eq!(
            op.undo_start_state,
            StoreOperationState::UndoLocalSourceBeginTransaction
        );

        // Both rows live on the source shard.
        let (_, source) = op.local_request(false, false).unwrap();
        assert_eq!(source.steps.len(), 2);
    }

    #[test]
    fn test_split_bumps_shard_version_once() {
        let (map, a, _) = fixture();
        let source = mapping(&map, &a, 10, 30);
        let left = mapping(&map, &a, 10, 20);
        let right = mapping(&map, &a, 20, 30);

        let op = Operation::split_mapping(&map, source, left, right, None);
        assert_eq!(op.shard_updates.len(), 1);
        assert!(op.shard_updates[0].id_equals(&a));
        assert_ne!(op.shard_updates[0].version, a.version);

        let (_, request) = op.global_begin().unwrap();
        assert_eq!(request.steps_count, 3);
        assert!(request.log_entry.is_some());
    }
}
