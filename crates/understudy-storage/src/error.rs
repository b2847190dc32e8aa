//! Storage error types.

use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from rusqlite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error (e.g., creating directories).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Key not present in the bucket.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid bucket name.
    #[error("Invalid bucket name: {0}")]
    InvalidBucket(String),

    /// The database was written by a newer schema than this build knows.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StorageError {
    /// Returns true for a missing key, as opposed to a storage failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub(crate) fn not_found(key: &[u8]) -> Self {
        Self::NotFound(String::from_utf8_lossy(key).into_owned())
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
