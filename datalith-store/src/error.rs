//! Error types for datalith-store

use datalith_core::ValueType;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Storage engine error type
#[derive(Error, Debug)]
pub enum Error {
    /// Codec-level errors (bad bounds, undecodable keys)
    #[error(transparent)]
    Core(#[from] datalith_core::Error),

    /// Operation attempted on a closed store
    #[error("Store is closed")]
    Closed,

    /// Refused schema migration; no state was changed
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    /// Ingested value contradicts the attribute's declared value type
    #[error("Value type mismatch on :{attr}: schema declares {expected}, got {actual}")]
    ValueTypeMismatch {
        attr: String,
        expected: ValueType,
        actual: ValueType,
    },

    /// Propagated from the K/V layer; the batch did not commit
    #[error("Storage error: {0}")]
    Lmdb(#[from] lmdb::Error),

    /// Persisted record failed to (de)serialize
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error while opening the environment
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk state violates a store invariant
    #[error("Corrupt store: {0}")]
    Corrupt(String),
}

impl Error {
    /// Create a schema conflict error
    pub fn schema_conflict(msg: impl Into<String>) -> Self {
        Error::SchemaConflict(msg.into())
    }

    /// Create a corrupt store error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }
}
