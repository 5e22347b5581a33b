//! Resume capability for collection runs
//!
//! Provides checkpoint persistence with atomic writes and per-run locking.

pub mod checkpoint;
pub mod lock;
pub mod store;

pub use checkpoint::Checkpoint;
pub use lock::RunLock;
pub use store::CheckpointStore;
pub(crate) use store::{sync_parent, unique_path, write_atomic};

/// Errors related to checkpoint persistence
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: u32,
        /// Found schema version
        found: u32,
    },

    /// Checkpoint file too large
    #[error("checkpoint file too large: {size} bytes (max: {max} bytes)")]
    TooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// Another collector holds the run
    #[error("run '{run_id}' is already in progress in another process")]
    Locked {
        /// Contended run id
        run_id: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
