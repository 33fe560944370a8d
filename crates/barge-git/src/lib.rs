//! Git internals for Barge.
//!
//! This crate implements the object model, pkt-line framing, packfile
//! reading/writing, and the repository-level operations (ref resolution,
//! graph walking, ref transactions, derived read queries) that the wire
//! protocol and the browsing layer are built on.

mod error;
mod object;
mod oid;
pub mod pack;
pub mod pktline;
mod read;
mod repo;

pub use error::GitError;
pub use object::{is_binary, Commit, GitObject, ObjectKind, Signature, Tag, TreeEntry};
pub use oid::Oid;
pub use read::{
    BlobInfo, Change, ChangeBlob, ChangeKind, CommitDetail, CommitInfo, TreeEntryInfo,
};
pub use repo::{RefListing, RefResult, RefStatus, RefUpdate, Repository};

/// Result type for git operations.
pub type Result<T> = std::result::Result<T, GitError>;
