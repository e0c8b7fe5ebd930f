//! Error types for the election collaborator.

use thiserror::Error;

/// Result type for election operations
pub type LeaderResult<T> = Result<T, LeaderError>;

/// Errors that can occur while running the election collaborator
#[derive(Error, Debug)]
pub enum LeaderError {
    /// Leadership election failed
    #[error("Leadership election failed: {reason}")]
    ElectionFailed { reason: String },

    /// The liveness listener could not be bound
    #[error("Failed to bind election listener on {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    /// Term state could not be read or written
    #[error("Election storage error: {reason}")]
    StorageError { reason: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    /// The election was already started
    #[error("Election already started")]
    AlreadyStarted,
}

impl From<spy_core::SpyError> for LeaderError {
    fn from(err: spy_core::SpyError) -> Self {
        LeaderError::ConfigError {
            reason: err.to_string(),
        }
    }
}
