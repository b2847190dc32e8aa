//! Error types for the proxy.

use thiserror::Error;

use understudy_core::{CoreError, ModeError, TransformError};
use understudy_storage::StorageError;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// CA certificate error.
    #[error("CA error: {0}")]
    Ca(#[from] CaError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed request or response.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The real destination could not be reached or answered badly.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Pair conversion or encoding error.
    #[error("Encoding error: {0}")]
    Core(#[from] CoreError),

    /// Transform failure.
    #[error("Middleware error: {0}")]
    Transform(#[from] TransformError),

    /// Unknown mode name.
    #[error(transparent)]
    Mode(#[from] ModeError),

    /// Destination filter did not compile.
    #[error("Invalid destination pattern: {0}")]
    Destination(#[from] regex::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Import source could not be read.
    #[error("Import error: {0}")]
    Import(String),

    /// Background task failed.
    #[error("Task error: {0}")]
    Task(String),

    /// Proxy server error.
    #[error("Proxy error: {0}")]
    Proxy(String),
}

impl ProxyError {
    /// Returns true when a cache lookup found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_not_found())
    }
}

/// Certificate authority error type.
#[derive(Debug, Error)]
pub enum CaError {
    /// Failed to generate a key pair or certificate.
    #[error("Failed to generate certificate: {0}")]
    Generation(String),

    /// Failed to read the CA files.
    #[error("Failed to read CA: {0}")]
    Read(#[from] std::io::Error),

    /// Failed to parse the CA files.
    #[error("Failed to parse CA: {0}")]
    Parse(String),

    /// Failed to write the CA files.
    #[error("Failed to write CA: {0}")]
    Write(String),

    /// Key algorithm not supported.
    #[error("Unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Failed to build a TLS server configuration.
    #[error("TLS error: {0}")]
    Tls(String),
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
