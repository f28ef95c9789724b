//! Error types for datalith-core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Range endpoint cannot be encoded: a known value with an unknown
    /// attribute must be a reference
    #[error("Bad range bound: {0}")]
    BadBound(String),

    /// Index key bytes do not decode
    #[error("Invalid index key: {0}")]
    InvalidKey(String),
}

impl Error {
    /// Create a bad bound error
    pub fn bad_bound(msg: impl Into<String>) -> Self {
        Error::BadBound(msg.into())
    }

    /// Create an invalid key error
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Error::InvalidKey(msg.into())
    }
}
