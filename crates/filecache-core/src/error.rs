//! Error types for the cache engine.
//!
//! Variants correspond to the wire-stable error codes the service reports to
//! callers; `error_code` returns the numeric code for each.

use thiserror::Error;

/// Result type alias for cache operations.
pub type FileCacheResult<T> = Result<T, FileCacheError>;

/// Error variants for cache operations.
#[derive(Debug, Error)]
pub enum FileCacheError {
    /// Schema-valid but semantically invalid parameters.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Entity not found when it must exist, or already exists when it must not.
    #[error("{0}")]
    Exists(String),

    /// Type creation failed.
    #[error("{0}")]
    Define(String),

    /// Type modification failed.
    #[error("{0}")]
    Change(String),

    /// Type deletion blocked or failed.
    #[error("{0}")]
    Delete(String),

    /// Resize could not be satisfied.
    #[error("{0}")]
    Resize(String),

    /// Expire deferred because the target is in use.
    #[error("{0}")]
    InUse(String),

    /// Invalid argument, e.g. no filename available or no unique destination.
    #[error("{0}")]
    Argument(String),

    /// Destination not writable.
    #[error("{0}")]
    Perm(String),

    /// Filesystem failure during a directory operation.
    #[error("{0}")]
    Directory(String),

    /// Reserved for config-driven type re-definition mismatches.
    #[error("{0}")]
    Configuration(String),

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileCacheError {
    /// Returns the wire-stable numeric code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            FileCacheError::InvalidParams(_) => -10001,
            FileCacheError::Exists(_) => -10002,
            FileCacheError::Define(_) => -10003,
            FileCacheError::Change(_) => -10004,
            FileCacheError::Delete(_) => -10005,
            FileCacheError::Resize(_) => -10006,
            FileCacheError::InUse(_) => -10007,
            FileCacheError::Argument(_) => -10008,
            FileCacheError::Perm(_) => -10009,
            FileCacheError::Directory(_) => -10010,
            FileCacheError::Configuration(_) => -10011,
            FileCacheError::Io(_) => -10010,
        }
    }
}
