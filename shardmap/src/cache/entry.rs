//! Cached mapping entries.

use std::time::{Duration, Instant};

use crate::model::StoreMapping;

/// A mapping plus its cache clock.
#[derive(Debug, Clone)]
pub struct CachedMapping {
    pub mapping: StoreMapping,
    created: Instant,
    ttl: Duration,
}

impl CachedMapping {
    pub(crate) fn new(mapping: StoreMapping, ttl: Duration) -> Self {
        Self {
            mapping,
            created: Instant::now(),
            ttl,
        }
    }

    /// Past its TTL. Expiry never evicts by itself; the router uses it to
    /// decide whether a data-plane failure warrants a refresh.
    pub fn has_expired(&self) -> bool {
        self.created.elapsed() >= self.ttl
    }

    pub fn reset_ttl(&mut self) {
        self.created = Instant::now();
    }
}
