//! Error taxonomy for store and engine operations.

use thiserror::Error;

/// Failures surfaced by the task store or by engine operations that hit it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient I/O failure; the operation may succeed on retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write referenced a task id the store does not know.
    #[error("task not found: {0}")]
    NotFound(String),

    /// The store rejected a write over a constraint violation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A trigger link points at a task that no longer exists.
    #[error("stale reference to task {0}")]
    StaleReference(String),
}

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }

    /// Whether retrying the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<StoreError>() {
            Ok(store_err) => store_err,
            Err(err) => StoreError::Unavailable(err.to_string()),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
