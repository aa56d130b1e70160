//! Mapping cache behavior.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct CacheOptions {
    /// How long a cached mapping stays fresh. Expiry marks entries stale,
    /// it never evicts them.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_ttl_ms() -> u64 {
    120_000
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
        }
    }
}

impl CacheOptions {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.ttl_ms == 0 {
            return Err(Error::Invalid("cache ttl_ms must be positive".into()));
        }
        Ok(())
    }
}
