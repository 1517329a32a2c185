//! Error types for blobq
//!
//! One taxonomy is shared by the blob backends, the metadata store and the
//! queue, so backend failures propagate to callers unchanged.

use thiserror::Error;

/// Main error type for blobq operations
#[derive(Error, Debug)]
pub enum Error {
    /// Caller-supplied input was missing or malformed
    #[error("{0}")]
    InvalidInput(String),

    /// No blob or record exists under the given key
    #[error("Not found: {0}")]
    NotFound(String),

    /// The queue holds no available message
    #[error("No messages available")]
    Empty,

    /// A blob already occupies the given key
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The backing medium could not be reached; retrying may succeed
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// A metadata record and its blob could not be kept paired.
    ///
    /// The operator should run a repair pass; the affected key is included.
    #[error("Inconsistent state for {key}: {reason}")]
    Inconsistent { key: String, reason: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an [`Error::Inconsistent`]
    pub fn inconsistent(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Inconsistent {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether a caller may reasonably retry the same operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result type alias for blobq operations
pub type Result<T> = std::result::Result<T, Error>;
