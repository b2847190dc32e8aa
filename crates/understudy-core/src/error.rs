//! Error types shared by the core modules.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while converting or encoding pairs.
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A body flagged as base64 did not decode.
    #[error("invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Transform failure.
    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// Errors raised by the transform bridge.
///
/// Every variant is scoped to the single request that triggered the
/// transform.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The transform definition is empty or malformed.
    #[error("invalid transform: {0}")]
    Invalid(String),

    /// The transform process could not be started.
    #[error("failed to start transform `{command}`: {source}")]
    Spawn {
        /// Program that failed to start.
        command: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The transform process exited unsuccessfully.
    #[error("transform exited with {status}: {stderr}")]
    Exit {
        /// Exit status as reported by the OS.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The transform did not finish in time and was killed.
    #[error("transform timed out after {0:?}")]
    Timeout(Duration),

    /// The transform output was not a valid envelope.
    #[error("failed to decode transform output: {0}")]
    Decode(String),

    /// Remote transform returned an error or could not be reached.
    #[error("remote transform failed: {0}")]
    Remote(String),

    /// IO error while talking to the transform process.
    #[error("transform IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
