//! Store transport.
//!
//! The core calls a fixed catalogue of named procedures with structured
//! payloads; the wire protocol to real databases lives behind the traits
//! here. [`memory::MemoryStore`] is a complete in-process implementation
//! used by the test suite.

pub mod error;
pub mod log;
pub mod memory;
pub mod procedure;
pub mod request;
pub mod results;
pub mod version;

pub use error::TransportError;
pub use log::{LogEntry, LogState};
pub use procedure::StoreProcedure;
pub use request::{
    LockOpKind, LockRequest, OperationCode, StepKind, StoreRange, StoreRequest, StoreStep,
};
pub use results::{StoreResult, StoreResults};
pub use version::{StoreVersion, GSM_VERSION, LSM_VERSION};

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::ShardLocation;

/// Factory for store and data-plane connections.
#[async_trait]
pub trait Store: Send + Sync {
    /// Connect to the global shard map database.
    async fn open_global(&self) -> Result<Box<dyn StoreConnection>, TransportError>;

    /// Connect to the local shard map namespace on a shard.
    async fn open_local(
        &self,
        location: &ShardLocation,
    ) -> Result<Box<dyn StoreConnection>, TransportError>;

    /// Open a data-plane connection to a shard.
    async fn open_data(
        &self,
        location: &ShardLocation,
    ) -> Result<Box<dyn DataConnection>, TransportError>;
}

/// A single store connection. Connections are scoped to one operation and
/// closed on every exit path.
#[async_trait]
pub trait StoreConnection: Send {
    /// Take the advisory lock for `key`. Held until the connection closes.
    async fn acquire_app_lock(&mut self, key: Uuid) -> Result<(), TransportError>;

    async fn begin(&mut self) -> Result<(), TransportError>;
    async fn commit(&mut self) -> Result<(), TransportError>;
    async fn rollback(&mut self) -> Result<(), TransportError>;

    /// Execute a named procedure with a structured payload.
    async fn execute(
        &mut self,
        procedure: StoreProcedure,
        request: &StoreRequest,
    ) -> Result<StoreResults, TransportError>;

    /// Release locks, roll back any open transaction, close.
    async fn close(&mut self);
}

/// Data-plane handle the router yields to callers.
#[async_trait]
pub trait DataConnection: Send {
    fn location(&self) -> &ShardLocation;
    fn is_open(&self) -> bool;

    /// Cheap liveness probe.
    async fn ping(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self);
}
