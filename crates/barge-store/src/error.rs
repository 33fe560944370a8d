//! Storage error types.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The path is not valid for this store.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns true if this error means the path was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
