//! Errors for the transactional store.

use thiserror::Error;

/// Errors surfaced by [`crate::Store`] operations.
#[derive(Debug, Error, miette::Diagnostic)]
pub enum StoreError {
    /// The requested row does not exist. Never conflated with a conflict.
    #[error("not found: {0}")]
    NotFound(String),

    /// An optimistic-concurrency check failed and the bounded retry budget
    /// was exhausted.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The underlying embedded database failed.
    #[error("storage error: {0}")]
    Backend(#[from] sled::Error),

    /// A stored row failed to deserialize.
    #[error("corrupt row: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for pds_repo::error::RepoError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => pds_repo::error::RepoError::not_found("block", id),
            other => pds_repo::error::RepoError::storage(other),
        }
    }
}
