//! Common error types for cmsync.

use thiserror::Error;

/// Top-level error type for cmsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Handle is not in the state the operation requires.
    #[error("State mismatch: {0}")]
    StateMismatch(String),

    /// Plugin could not be reached or did not answer in time.
    #[error("Plugin unavailable: {0}")]
    PluginUnavailable(String),

    /// Plugin answered with a non-success response.
    #[error("Plugin rejected request: {0}")]
    PluginRejected(String),

    /// Schema set or anchor already exists.
    #[error("Already defined: {0}")]
    AlreadyDefined(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Distributed primitive (lock, queue, map) failed.
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// Backing store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error came from talking to a plugin.
    pub fn is_plugin_failure(&self) -> bool {
        matches!(self, Error::PluginUnavailable(_) | Error::PluginRejected(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
