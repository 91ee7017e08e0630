/// SQLite free-punch journal.
pub mod sqlite;
/// Shared-store synchronization contract.
pub mod sync;

use thiserror::Error;

use crate::{
    core::store::{StoreError, StoreSnapshotV1},
    model::EntityKind,
    op::StoredOp,
    types::OpSeq,
};

/// Journal or shared-store failure.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload (de)serialization error.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// Replayed op rejected by the store.
    #[error("store: {0}")]
    Store(#[from] StoreError),
    /// Another site already claimed the id.
    #[error("{kind:?} {id} is already taken in the shared store")]
    IdentityTaken {
        /// Entity kind.
        kind: EntityKind,
        /// Requested id.
        id: u32,
    },
    /// Any other failure.
    #[error("{0}")]
    Message(String),
}

/// Result alias for persistence calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Destination of free-punch journal ops.
pub trait OpSink: Send {
    /// Appends ops in order and returns the last durable sequence.
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq>;
    /// Forces buffered ops to disk.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
    /// Writes a store snapshot covering `last_seq`.
    fn write_snapshot(&mut self, _snapshot: &StoreSnapshotV1, _last_seq: OpSeq) -> PersistResult<()> {
        Ok(())
    }
    /// Drops ops up to `seq`; returns how many.
    fn compact_through(&mut self, _seq: OpSeq) -> PersistResult<usize> {
        Ok(0)
    }
}
