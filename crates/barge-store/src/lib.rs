//! Storage backends for Barge repositories.
//!
//! A bare repository is a tree of byte files (`HEAD`, `refs/…`, `objects/…`)
//! behind the [`ByteStore`] trait. Two backends ship here: [`FsStore`] for
//! the filesystem and [`MemoryStore`] for tests.

mod error;
mod fs;
pub mod layout;
mod memory;
mod store;

pub use error::StoreError;
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use store::ByteStore;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
