//! Mapping directory model.
//!
//! Immutable snapshot types for shard maps, shards and mappings. Mutation
//! goes through coordinator operations only; every update produces a fresh
//! version or a fresh id, never an in-place change.

pub mod location;
pub mod mapping;
pub mod shard;
pub mod shard_map;

pub use location::{Protocol, ShardLocation};
pub use mapping::{
    force_unlock_token, MappingInfo, MappingKind, MappingStatus, MappingUpdate, PointMapping,
    RangeMapping, StoreMapping, NO_LOCK,
};
pub use shard::{Shard, ShardStatus};
pub use shard_map::{ShardMap, ShardMapKind};
