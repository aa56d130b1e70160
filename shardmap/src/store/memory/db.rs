//! In-memory store state and procedure semantics.
//!
//! One `DbState` models one store namespace; the GSM and every LSM share
//! the table shapes, matching the persisted schema both namespaces carry.

use std::collections::HashMap;

use bytes::Bytes;
use uuid::Uuid;

use crate::model::{force_unlock_token, Shard, ShardMap, ShardMapKind, StoreMapping, NO_LOCK};
use crate::store::log::{LogEntry, LogState};
use crate::store::request::{LockOpKind, StepKind, StoreRequest};
use crate::store::results::{StoreResult, StoreResults};
use crate::store::version::GSM_VERSION;
use crate::store::{StoreProcedure, StoreVersion};

/// Shard row as stored: the public snapshot plus the pending marker.
#[derive(Debug, Clone)]
pub(crate) struct StoreShard {
    pub shard: Shard,
    pub operation_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub(crate) struct DbState {
    pub version: StoreVersion,
    pub shard_maps: HashMap<Uuid, ShardMap>,
    pub shards: HashMap<Uuid, StoreShard>,
    pub mappings: HashMap<Uuid, StoreMapping>,
    pub log: HashMap<Uuid, LogEntry>,
}

impl Default for DbState {
    fn default() -> Self {
        Self {
            version: GSM_VERSION,
            shard_maps: HashMap::new(),
            shards: HashMap::new(),
            mappings: HashMap::new(),
            log: HashMap::new(),
        }
    }
}

// Does `[min, max)` of one row overlap `[other_min, other_max)`? Bounds are
// normalized bytes; `None` is +inf.
fn overlaps(
    min: &Bytes,
    max: &Option<Bytes>,
    other_min: &Bytes,
    other_max: &Option<Bytes>,
) -> bool {
    let starts_before_other_ends = match other_max {
        Some(other_max) => min < other_max,
        None => true,
    };
    let other_starts_before_ends = match max {
        Some(max) => other_min < max,
        None => true,
    };
    starts_before_other_ends && other_starts_before_ends
}

fn contains(min: &Bytes, max: &Option<Bytes>, key: &Bytes) -> bool {
    min <= key
        && match max {
            Some(max) => key < max,
            None => true,
        }
}

impl DbState {
    fn check_version(&self, request: &StoreRequest) -> Option<StoreResults> {
        if self.version.supports(&request.version) {
            None
        } else {
            Some(StoreResults {
                result: StoreResult::StoreVersionMismatch,
                store_version: Some(self.version),
                ..Default::default()
            })
        }
    }

    // Mapping row with the shard snapshot refreshed from the shards table.
    fn joined(&self, mapping: &StoreMapping) -> StoreMapping {
        let mut mapping = mapping.clone();
        if let Some(row) = self.shards.get(&mapping.shard.id) {
            mapping.shard = row.shard.clone();
        }
        mapping
    }

    fn pending(&self, operation_id: Uuid) -> StoreResults {
        let mut results = StoreResults::error(StoreResult::ShardPendingOperation);
        if let Some(entry) = self.log.get(&operation_id) {
            results.log_entries.push(entry.clone());
        }
        results
    }

    fn shard_map_or_missing(&self, request: &StoreRequest) -> Result<&ShardMap, StoreResults> {
        request
            .shard_map
            .as_ref()
            .and_then(|map| self.shard_maps.get(&map.id))
            .ok_or_else(|| StoreResults::error(StoreResult::ShardMapDoesNotExist))
    }

    pub fn apply(&mut self, procedure: StoreProcedure, request: &StoreRequest) -> StoreResults {
        if let Some(mismatch) = self.check_version(request) {
            return mismatch;
        }

        let mut results = match procedure {
            StoreProcedure::GetAllShardMapsGlobal => {
                let mut shard_maps: Vec<_> = self.shard_maps.values().cloned().collect();
                shard_maps.sort_by(|a, b| a.name.cmp(&b.name));
                StoreResults {
                    shard_maps,
                    ..Default::default()
                }
            }
            StoreProcedure::FindShardMapByNameGlobal => {
                match self
                    .shard_maps
                    .values()
                    .find(|map| Some(&map.name) == request.name.as_ref())
                {
                    Some(map) => StoreResults {
                        shard_maps: vec![map.clone()],
                        ..Default::default()
                    },
                    None => StoreResults::error(StoreResult::ShardMapDoesNotExist),
                }
            }
            StoreProcedure::AddShardMapGlobal => self.add_shard_map(request),
            StoreProcedure::RemoveShardMapGlobal => self.remove_shard_map(request),
            StoreProcedure::GetAllShardsGlobal => self.get_all_shards(request),
            StoreProcedure::FindShardByLocationGlobal => self.find_shard_by_location(request),
            StoreProcedure::GetAllShardMappingsGlobal
            | StoreProcedure::GetAllShardMappingsLocal => self.get_all_mappings(request),
            StoreProcedure::FindMappingByKeyGlobal => self.find_mapping_by_key(request),
            StoreProcedure::LockOrUnlockShardMappingsGlobal => self.lock_or_unlock(request),
            StoreProcedure::GetOperationLogEntryGlobal => {
                let mut results = StoreResults::default();
                if let Some(entry) = request.operation_id.and_then(|id| self.log.get(&id)) {
                    results.log_entries.push(entry.clone());
                }
                results
            }
            StoreProcedure::BulkOperationShardsGlobalBegin => self.shards_global_begin(request),
            StoreProcedure::BulkOperationShardsGlobalEnd => self.shards_global_end(request),
            StoreProcedure::BulkOperationShardMappingsGlobalBegin => {
                self.mappings_global_begin(request)
            }
            StoreProcedure::BulkOperationShardMappingsGlobalEnd => {
                self.mappings_global_end(request)
            }
            StoreProcedure::GetAllShardsLocal => StoreResults {
                shards: self.shards.values().map(|row| row.shard.clone()).collect(),
                ..Default::default()
            },
            StoreProcedure::FindMappingByIdLocal => {
                match request.mapping_id.and_then(|id| self.mappings.get(&id)) {
                    Some(mapping) => StoreResults {
                        mappings: vec![mapping.clone()],
                        ..Default::default()
                    },
                    None => StoreResults::error(StoreResult::MappingDoesNotExist),
                }
            }
            StoreProcedure::BulkOperationShardsLocal
            | StoreProcedure::BulkOperationShardMappingsLocal => self.bulk_local(request),
        };

        results.store_version = Some(self.version);
        results
    }

    fn add_shard_map(&mut self, request: &StoreRequest) -> StoreResults {
        let Some(map) = &request.shard_map else {
            return StoreResults::error(StoreResult::UnexpectedError);
        };
        if self.shard_maps.values().any(|m| m.name == map.name) {
            return StoreResults::error(StoreResult::ShardMapAlreadyExists);
        }
        self.shard_maps.insert(map.id, map.clone());
        StoreResults::default()
    }

    fn remove_shard_map(&mut self, request: &StoreRequest) -> StoreResults {
        let map = match self.shard_map_or_missing(request) {
            Ok(map) => map.clone(),
            Err(results) => return results,
        };
        if self
            .shards
            .values()
            .any(|row| row.shard.shard_map_id == map.id)
        {
            return StoreResults::error(StoreResult::ShardMapHasShards);
        }
        self.shard_maps.remove(&map.id);
        StoreResults::default()
    }

    fn get_all_shards(&self, request: &StoreRequest) -> StoreResults {
        let map = match self.shard_map_or_missing(request) {
            Ok(map) => map,
            Err(results) => return results,
        };
        let rows: Vec<_> = self
            .shards
            .values()
            .filter(|row| row.shard.shard_map_id == map.id)
            .collect();

        if let Some(pending) = rows.iter().find_map(|row| row.operation_id) {
            return self.pending(pending);
        }

        let mut shards: Vec<_> = rows.into_iter().map(|row| row.shard.clone()).collect();
        shards.sort_by(|a, b| a.location.server.cmp(&b.location.server));
        StoreResults {
            shards,
            ..Default::default()
        }
    }

    fn find_shard_by_location(&self, request: &StoreRequest) -> StoreResults {
        let map = match self.shard_map_or_missing(request) {
            Ok(map) => map,
            Err(results) => return results,
        };
        let Some(location) = &request.location else {
            return StoreResults::error(StoreResult::UnexpectedError);
        };

        match self
            .shards
            .values()
            .find(|row| row.shard.shard_map_id == map.id && &row.shard.location == location)
        {
            Some(row) => match row.operation_id {
                Some(pending) => self.pending(pending),
                None => StoreResults {
                    shards: vec![row.shard.clone()],
                    ..Default::default()
                },
            },
            None => StoreResults::error(StoreResult::ShardDoesNotExist),
        }
    }

    fn get_all_mappings(&self, request: &StoreRequest) -> StoreResults {
        let map = match self.shard_map_or_missing(request) {
            Ok(map) => map,
            Err(results) => return results,
        };

        let rows: Vec<_> = self
            .mappings
            .values()
            .filter(|m| m.shard_map_id == map.id)
            .filter(|m| match &request.shard {
                Some(shard) => m.shard.id == shard.id,
                None => true,
            })
            .filter(|m| match &request.range {
                Some(range) => overlaps(&m.min_value, &m.max_value, &range.min_value, &range.max_value),
                None => true,
            })
            .collect();

        if let Some(pending) = rows.iter().find_map(|m| m.operation_id) {
            return self.pending(pending);
        }

        let mut mappings: Vec<_> = rows.into_iter().map(|m| self.joined(m)).collect();
        mappings.sort_by(|a, b| a.min_value.cmp(&b.min_value));
        StoreResults {
            mappings,
            ..Default::default()
        }
    }

    fn find_mapping_by_key(&self, request: &StoreRequest) -> StoreResults {
        let map = match self.shard_map_or_missing(request) {
            Ok(map) => map,
            Err(results) => return results,
        };
        let Some(key) = &request.key else {
            return StoreResults::error(StoreResult::UnexpectedError);
        };

        match self
            .mappings
            .values()
            .find(|m| m.shard_map_id == map.id && contains(&m.min_value, &m.max_value, key))
        {
            Some(mapping) => match mapping.operation_id {
                Some(pending) => self.pending(pending),
                None => StoreResults {
                    mappings: vec![self.joined(mapping)],
                    ..Default::default()
                },
            },
            None => StoreResults::error(StoreResult::MappingNotFoundForKey),
        }
    }

    fn lock_or_unlock(&mut self, request: &StoreRequest) -> StoreResults {
        let Some(lock) = &request.lock else {
            return StoreResults::error(StoreResult::UnexpectedError);
        };

        match lock.kind {
            LockOpKind::Lock | LockOpKind::UnlockMapping => {
                let Some(pending) = lock
                    .mapping_id
                    .and_then(|id| self.mappings.get(&id))
                    .map(|m| m.operation_id)
                else {
                    return StoreResults::error(StoreResult::MappingDoesNotExist);
                };
                if let Some(pending) = pending {
                    return self.pending(pending);
                }
                let Some(mapping) = lock.mapping_id.and_then(|id| self.mappings.get_mut(&id))
                else {
                    return StoreResults::error(StoreResult::MappingDoesNotExist);
                };

                if lock.kind == LockOpKind::Lock {
                    if mapping.lock_owner_id != NO_LOCK {
                        return StoreResults::error(StoreResult::MappingIsAlreadyLocked);
                    }
                    mapping.lock_owner_id = lock.lock_owner_id;
                } else {
                    if mapping.lock_owner_id != lock.lock_owner_id
                        && lock.lock_owner_id != force_unlock_token()
                    {
                        return StoreResults::error(StoreResult::MappingLockOwnerIdDoesNotMatch);
                    }
                    mapping.lock_owner_id = NO_LOCK;
                }
                StoreResults::default()
            }
            LockOpKind::UnlockAllForOwner => {
                for mapping in self.mappings.values_mut() {
                    if mapping.lock_owner_id == lock.lock_owner_id {
                        mapping.lock_owner_id = NO_LOCK;
                    }
                }
                StoreResults::default()
            }
            LockOpKind::UnlockAll => {
                if lock.lock_owner_id != force_unlock_token() {
                    return StoreResults::error(StoreResult::UnexpectedError);
                }
                let map_id = request.shard_map.as_ref().map(|map| map.id);
                for mapping in self.mappings.values_mut() {
                    if map_id.is_none() || map_id == Some(mapping.shard_map_id) {
                        mapping.lock_owner_id = NO_LOCK;
                    }
                }
                StoreResults::default()
            }
        }
    }

    fn write_log(&mut self, request: &StoreRequest) {
        if let Some(entry) = &request.log_entry {
            self.log.insert(entry.operation_id, entry.clone());
        }
    }

    fn complete_log(&mut self, operation_id: Option<Uuid>) {
        if let Some(entry) = operation_id.and_then(|id| self.log.get_mut(&id)) {
            entry.state = LogState::Completed;
        }
    }

    fn shards_global_begin(&mut self, request: &StoreRequest) -> StoreResults {
        let Some(operation_id) = request.operation_id else {
            return StoreResults::error(StoreResult::UnexpectedError);
        };
        if self.shard_map_or_missing(request).is_err() {
            return StoreResults::error(StoreResult::ShardMapDoesNotExist);
        }

        for step in &request.steps {
            let Some(shard) = &step.shard else {
                return StoreResults::error(StoreResult::UnexpectedError);
            };

            // A row already owned by another in-flight operation wins.
            if let Some(row) = self.shards.get(&shard.id) {
                if let Some(pending) = row.operation_id {
                    if pending != operation_id {
                        return self.pending(pending);
                    }
                }
            }

            match step.kind {
                StepKind::Add => {
                    // A retried phase may meet its own staged row; anything
                    // else at this id or location is a conflict.
                    if let Some(row) = self.shards.get(&shard.id) {
                        if row.operation_id != Some(operation_id) {
                            return StoreResults::error(StoreResult::ShardAlreadyExists);
                        }
                    }
                    let occupied = self.shards.values().find(|row| {
                        row.shard.shard_map_id == shard.shard_map_id
                            && row.shard.location == shard.location
                            && row.operation_id != Some(operation_id)
                    });
                    if let Some(row) = occupied {
                        // A row staged by a crashed operation surfaces its
                        // log entry so the caller can recover it.
                        return match row.operation_id {
                            Some(pending) => self.pending(pending),
                            None => StoreResults::error(StoreResult::ShardLocationAlreadyExists),
                        };
                    }
                    self.shards.insert(
                        shard.id,
                        StoreShard {
                            shard: shard.clone(),
                            operation_id: Some(operation_id),
                        },
                    );
                }
                StepKind::Remove | StepKind::Update => {
                    let Some(row) = self.shards.get(&shard.id) else {
                        return StoreResults::error(StoreResult::ShardDoesNotExist);
                    };
                    if Some(row.shard.version) != step.expected_shard_version {
                        return StoreResults::error(StoreResult::ShardVersionMismatch);
                    }
                    if step.kind == StepKind::Remove
                        && self.mappings.values().any(|m| m.shard.id == shard.id)
                    {
                        return StoreResults::error(StoreResult::ShardHasMappings);
                    }
                    if let Some(row) = self.shards.get_mut(&shard.id) {
                        row.operation_id = Some(operation_id);
                    }
                }
            }
        }

        self.write_log(request);
        StoreResults::default()
    }

    fn shards_global_end(&mut self, request: &StoreRequest) -> StoreResults {
        let operation_id = request.operation_id;

        for step in &request.steps {
            let Some(shard) = &step.shard else {
                return StoreResults::error(StoreResult::UnexpectedError);
            };

            let owned = self
                .shards
                .get(&shard.id)
                .map(|row| row.operation_id == operation_id)
                .unwrap_or(false);

            match (step.kind, request.undo) {
                // Finalize: adds and updates become live, removes disappear.
                (StepKind::Add, false) => {
                    if let Some(row) = self.shards.get_mut(&shard.id) {
                        row.operation_id = None;
                    }
                }
                (StepKind::Remove, false) => {
                    if owned {
                        self.shards.remove(&shard.id);
                    }
                }
                (StepKind::Update, false) => {
                    self.shards.insert(
                        shard.id,
                        StoreShard {
                            shard: shard.clone(),
                            operation_id: None,
                        },
                    );
                }
                // Revert: adds disappear, removes and updates are released.
                (StepKind::Add, true) => {
                    if owned {
                        self.shards.remove(&shard.id);
                    }
                }
                (StepKind::Remove, true) | (StepKind::Update, true) => {
                    if let Some(row) = self.shards.get_mut(&shard.id) {
                        row.operation_id = None;
                    }
                }
            }
        }

        self.complete_log(operation_id);
        StoreResults::default()
    }

    fn mappings_global_begin(&mut self, request: &StoreRequest) -> StoreResults {
        let Some(operation_id) = request.operation_id else {
            return StoreResults::error(StoreResult::UnexpectedError);
        };
        let map = match self.shard_map_or_missing(request) {
            Ok(map) => map.clone(),
            Err(results) => return results,
        };

        // Removes first: replacement operations (update, split, merge)
        // must not collide with the rows they are replacing.
        let removes = request.steps.iter().filter(|s| s.kind == StepKind::Remove);
        let adds = request.steps.iter().filter(|s| s.kind == StepKind::Add);

        for step in removes.clone() {
            let Some(mapping) = &step.mapping else {
                return StoreResults::error(StoreResult::UnexpectedError);
            };
            let Some(row) = self.mappings.get(&mapping.id) else {
                return StoreResults::error(StoreResult::MappingDoesNotExist);
            };
            if let Some(pending) = row.operation_id {
                if pending != operation_id {
                    return self.pending(pending);
                }
            }
            if row.lock_owner_id != NO_LOCK {
                let presented = step.lock_owner_id.unwrap_or(NO_LOCK);
                if presented != row.lock_owner_id && presented != force_unlock_token() {
                    return StoreResults::error(StoreResult::MappingLockOwnerIdDoesNotMatch);
                }
            }
        }

        for step in adds.clone() {
            let Some(mapping) = &step.mapping else {
                return StoreResults::error(StoreResult::UnexpectedError);
            };
            let Some(shard_row) = self.shards.get(&mapping.shard.id) else {
                return StoreResults::error(StoreResult::ShardDoesNotExist);
            };
            if let Some(expected) = step.expected_shard_version {
                if shard_row.shard.version != expected {
                    return StoreResults::error(StoreResult::ShardVersionMismatch);
                }
            }

            let removed_ids: Vec<Uuid> = removes
                .clone()
                .filter_map(|s| s.mapping.as_ref())
                .map(|m| m.id)
                .collect();
            let conflict = self.mappings.values().find(|m| {
                m.shard_map_id == map.id
                    && m.operation_id != Some(operation_id)
                    && !removed_ids.contains(&m.id)
                    && overlaps(&m.min_value, &m.max_value, &mapping.min_value, &mapping.max_value)
            });
            if let Some(row) = conflict {
                return match row.operation_id {
                    // Staged by a crashed operation: recoverable.
                    Some(pending) => self.pending(pending),
                    None => StoreResults::error(match map.kind {
                        ShardMapKind::List => StoreResult::MappingPointAlreadyMapped,
                        ShardMapKind::Range => StoreResult::MappingRangeAlreadyMapped,
                    }),
                };
            }
        }

        // Validation passed; stage both sides under this operation.
        for step in &request.steps {
            let Some(mapping) = &step.mapping else {
                continue;
            };
            match step.kind {
                StepKind::Remove => {
                    if let Some(row) = self.mappings.get_mut(&mapping.id) {
                        row.operation_id = Some(operation_id);
                    }
                }
                StepKind::Add => {
                    let mut row = mapping.clone();
                    row.operation_id = Some(operation_id);
                    self.mappings.insert(row.id, row);
                }
                StepKind::Update => {
                    return StoreResults::error(StoreResult::UnexpectedError);
                }
            }
        }

        self.write_log(request);
        StoreResults::default()
    }

    fn mappings_global_end(&mut self, request: &StoreRequest) -> StoreResults {
        let operation_id = request.operation_id;

        for step in &request.steps {
            let Some(mapping) = &step.mapping else {
                return StoreResults::error(StoreResult::UnexpectedError);
            };
            let owned = self
                .mappings
                .get(&mapping.id)
                .map(|row| row.operation_id == operation_id)
                .unwrap_or(false);

            match (step.kind, request.undo) {
                (StepKind::Remove, false) | (StepKind::Add, true) => {
                    if owned {
                        self.mappings.remove(&mapping.id);
                    }
                }
                (StepKind::Add, false) | (StepKind::Remove, true) => {
                    if let Some(row) = self.mappings.get_mut(&mapping.id) {
                        row.operation_id = None;
                    }
                }
                (StepKind::Update, _) => {
                    return StoreResults::error(StoreResult::UnexpectedError);
                }
            }
        }

        if !request.undo {
            for shard in &request.shard_updates {
                self.shards.insert(
                    shard.id,
                    StoreShard {
                        shard: shard.clone(),
                        operation_id: None,
                    },
                );
            }
        }

        self.complete_log(operation_id);
        StoreResults::default()
    }

    // Local bulk phases apply their steps literally; the coordinator builds
    // undo requests with the steps already inverted, so replaying a phase
    // is always idempotent.
    fn bulk_local(&mut self, request: &StoreRequest) -> StoreResults {
        if let Some(map) = &request.shard_map {
            self.shard_maps.insert(map.id, map.clone());
        }

        for step in &request.steps {
            match (step.kind, &step.mapping, &step.shard) {
                (StepKind::Add | StepKind::Update, Some(mapping), _) => {
                    let mut row = mapping.clone();
                    row.operation_id = None;
                    self.mappings.insert(row.id, row);
                }
                (StepKind::Remove, Some(mapping), _) => {
                    self.mappings.remove(&mapping.id);
                }
                (StepKind::Add | StepKind::Update, None, Some(shard)) => {
                    self.shards.insert(
                        shard.id,
                        StoreShard {
                            shard: shard.clone(),
                            operation_id: None,
                        },
                    );
                }
                (StepKind::Remove, None, Some(shard)) => {
                    self.shards.remove(&shard.id);
                }
                _ => return StoreResults::error(StoreResult::UnexpectedError),
            }
        }

        for shard in &request.shard_updates {
            self.shards.insert(
                shard.id,
                StoreShard {
                    shard: shard.clone(),
                    operation_id: None,
                },
            );
        }

        StoreResults::default()
    }
}
