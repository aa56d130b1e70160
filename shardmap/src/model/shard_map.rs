//! Shard maps.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::key::ShardKeyType;

/// Kind of mappings a shard map holds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShardMapKind {
    /// Point mappings: `key -> shard`.
    List,
    /// Range mappings: `[low, high) -> shard`.
    Range,
}

/// A named collection of mappings of one kind over one key type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShardMap {
    pub id: Uuid,
    pub name: String,
    pub kind: ShardMapKind,
    pub key_type: ShardKeyType,
}

impl ShardMap {
    pub fn new(name: impl Into<String>, kind: ShardMapKind, key_type: ShardKeyType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            key_type,
        }
    }
}

impl Display for ShardMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?}/{})", self.name, self.kind, self.key_type)
    }
}
