//! Catalogue of named store procedures.
//!
//! The core only ever calls the store by these names with a structured
//! payload. Global procedures live in the GSM namespace, local ones in the
//! LSM namespace on each shard.

/// A store procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreProcedure {
    // Global (GSM).
    GetAllShardMapsGlobal,
    FindShardMapByNameGlobal,
    AddShardMapGlobal,
    RemoveShardMapGlobal,
    GetAllShardsGlobal,
    FindShardByLocationGlobal,
    GetAllShardMappingsGlobal,
    FindMappingByKeyGlobal,
    LockOrUnlockShardMappingsGlobal,
    GetOperationLogEntryGlobal,
    BulkOperationShardsGlobalBegin,
    BulkOperationShardsGlobalEnd,
    BulkOperationShardMappingsGlobalBegin,
    BulkOperationShardMappingsGlobalEnd,

    // Local (LSM).
    GetAllShardsLocal,
    GetAllShardMappingsLocal,
    FindMappingByIdLocal,
    BulkOperationShardsLocal,
    BulkOperationShardMappingsLocal,
}

impl StoreProcedure {
    pub fn is_global(&self) -> bool {
        !matches!(
            self,
            Self::GetAllShardsLocal
                | Self::GetAllShardMappingsLocal
                | Self::FindMappingByIdLocal
                | Self::BulkOperationShardsLocal
                | Self::BulkOperationShardMappingsLocal
        )
    }

    /// Wire name of the procedure.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetAllShardMapsGlobal => "get_all_shard_maps_global",
            Self::FindShardMapByNameGlobal => "find_shard_map_by_name_global",
            Self::AddShardMapGlobal => "add_shard_map_global",
            Self::RemoveShardMapGlobal => "remove_shard_map_global",
            Self::GetAllShardsGlobal => "get_all_shards_global",
            Self::FindShardByLocationGlobal => "find_shard_by_location_global",
            Self::GetAllShardMappingsGlobal => "get_all_shard_mappings_global",
            Self::FindMappingByKeyGlobal => "find_mapping_by_key_global",
            Self::LockOrUnlockShardMappingsGlobal => "lock_or_unlock_shard_mappings_global",
            Self::GetOperationLogEntryGlobal => "get_operation_log_entry_global",
            Self::BulkOperationShardsGlobalBegin => "bulk_operation_shards_global_begin",
            Self::BulkOperationShardsGlobalEnd => "bulk_operation_shards_global_end",
            Self::BulkOperationShardMappingsGlobalBegin => {
                "bulk_operation_shard_mappings_global_begin"
            }
            Self::BulkOperationShardMappingsGlobalEnd => "bulk_operation_shard_mappings_global_end",
            Self::GetAllShardsLocal => "get_all_shards_local",
            Self::GetAllShardMappingsLocal => "get_all_shard_mappings_local",
            Self::FindMappingByIdLocal => "find_mapping_by_id_local",
            Self::BulkOperationShardsLocal => "bulk_operation_shards_local",
            Self::BulkOperationShardMappingsLocal => "bulk_operation_shard_mappings_local",
        }
    }
}

impl std::fmt::Display for StoreProcedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
