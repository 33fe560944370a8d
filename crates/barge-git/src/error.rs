//! Git layer error types.

use thiserror::Error;

/// Errors that can occur in the git object and protocol framing layer.
#[derive(Debug, Error)]
pub enum GitError {
    /// A pkt-line payload exceeds the 65,516-byte maximum.
    #[error("pkt-line payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Fewer bytes were available than the pkt-line header demands.
    #[error("short buffer: need {need} bytes, have {have}")]
    ShortBuffer { need: usize, have: usize },

    /// The 4-char length prefix is not hex or encodes an invalid length.
    #[error("bad pkt-line length: {0:?}")]
    BadLength(String),

    /// An inbound packfile failed structural verification.
    #[error("unpack failed: {0}")]
    UnpackFailed(String),

    /// An object is not present in loose storage or any pack.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// A ref does not exist or does not resolve.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// A path does not exist in the requested tree.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// Malformed object content (bad header, truncated tree entry, …).
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] barge_store::StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Returns true for the family of lookup failures.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ObjectNotFound(_) | Self::RefNotFound(_) | Self::PathNotFound(_)
        ) || matches!(self, Self::Store(e) if e.is_not_found())
    }
}
