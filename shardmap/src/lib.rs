//! Client-side control plane for horizontally sharded SQL databases.
//!
//! A directory (the global shard map, GSM) maps keys and key ranges to the
//! shard holding them; each shard carries a local replica (LSM) of its own
//! mappings. This crate mutates both through a crash-safe multi-phase
//! coordinator and routes data-plane connections to the right shard.

pub mod cache;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod manager;
pub mod map;
pub mod mapper;
pub mod model;
pub mod retry;
pub mod store;

#[cfg(test)]
pub(crate) mod test;

pub use error::{Error, ErrorCategory, ErrorCode, ManagementError};
pub use key::{Key, ShardKey, ShardKeyType, ShardKeyValue, ShardRange};
pub use manager::ShardMapManager;
pub use map::{ListShardMap, RangeShardMap};
pub use mapper::{ConnectionOptions, ShardConnection};
pub use model::{
    MappingInfo, MappingStatus, MappingUpdate, PointMapping, RangeMapping, Shard, ShardLocation,
    ShardMap, ShardMapKind, ShardStatus,
};
pub use retry::RetryPolicy;

/// Wire up test logging. Safe to call more than once.
pub fn logger() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
