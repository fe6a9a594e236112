//! Error types for trail_core operations.

use thiserror::Error;

/// Core error type for trail_core operations.
///
/// Every failure the engine can produce falls into one of these
/// categories; the original lower-level message is preserved for logs.
#[derive(Error, Debug)]
pub enum TrailError {
    /// A ref, commit, tree entry, or session record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A ref moved under us, or a rename target already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed state, id, or message content.
    #[error("invalid: {0}")]
    Invalid(String),

    /// I/O error during file or repository operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An external operation exceeded its deadline.
    #[error("timed out after {seconds}s: {operation}")]
    Timeout {
        /// What was being attempted.
        operation: String,
        /// The deadline that was exceeded.
        seconds: u64,
    },

    /// The underlying store cannot perform the requested operation.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<git2::Error> for TrailError {
    fn from(e: git2::Error) -> Self {
        match e.code() {
            git2::ErrorCode::NotFound | git2::ErrorCode::UnbornBranch => {
                TrailError::NotFound(e.message().to_string())
            }
            git2::ErrorCode::Exists | git2::ErrorCode::Modified | git2::ErrorCode::Locked => {
                TrailError::Conflict(e.message().to_string())
            }
            git2::ErrorCode::Invalid | git2::ErrorCode::InvalidSpec | git2::ErrorCode::Ambiguous => {
                TrailError::Invalid(e.message().to_string())
            }
            _ => TrailError::Unsupported(format!("{} ({:?})", e.message(), e.class())),
        }
    }
}

impl From<serde_json::Error> for TrailError {
    fn from(e: serde_json::Error) -> Self {
        TrailError::Invalid(e.to_string())
    }
}

impl TrailError {
    /// True when the error simply means "the thing is not there".
    ///
    /// Hook handlers use this to distinguish an absent session or ref
    /// (expected, continue) from a real failure (log and bail).
    pub fn is_not_found(&self) -> bool {
        matches!(self, TrailError::NotFound(_))
    }
}

/// Convenience Result type for trail_core operations.
pub type Result<T> = std::result::Result<T, TrailError>;
