//! Store schema versions.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Version marker embedded in every request and persisted with each store
/// namespace. Compatibility is per major; a request may not ask for a
/// minor the store doesn't have.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreVersion {
    pub major: u32,
    pub minor: u32,
}

/// Version of the global shard map namespace this library speaks.
pub const GSM_VERSION: StoreVersion = StoreVersion { major: 1, minor: 2 };

/// Version of the local shard map namespace this library speaks.
pub const LSM_VERSION: StoreVersion = StoreVersion { major: 1, minor: 2 };

impl StoreVersion {
    /// Can a client speaking `request` work against a store at `self`?
    pub fn supports(&self, request: &StoreVersion) -> bool {
        self.major == request.major && self.minor >= request.minor
    }
}

impl Display for StoreVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Default for StoreVersion {
    fn default() -> Self {
        GSM_VERSION
    }
}
