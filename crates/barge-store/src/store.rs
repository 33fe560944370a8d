//! The byte store trait.
//!
//! A repository is a tree of byte files under a root; the store exposes the
//! minimal operations the git layer needs. Paths are relative,
//! slash-separated (`HEAD`, `refs/heads/main`, `objects/pack/pack-x.pack`).

use crate::Result;
use std::sync::Arc;

/// A byte-addressed store backing one bare repository.
///
/// `write` is create-or-replace and atomic at path granularity; `rename` is
/// atomic and is how packfiles are published after indexing.
pub trait ByteStore: Send + Sync {
    /// Returns the size of the file at `path`, or `None` if absent.
    fn stat(&self, path: &str) -> Result<Option<u64>>;

    /// Reads the full contents at `path`. Fails with `NotFound` if absent.
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Writes `data` to `path`, creating or replacing atomically.
    fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Atomically renames `src` to `dst`.
    fn rename(&self, src: &str, dst: &str) -> Result<()>;

    /// Lists all paths that start with `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Deletes the file at `path`. Fails with `NotFound` if absent.
    fn delete(&self, path: &str) -> Result<()>;

    /// Returns true if `path` exists.
    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path)?.is_some())
    }
}

impl<T: ByteStore + ?Sized> ByteStore for Arc<T> {
    fn stat(&self, path: &str) -> Result<Option<u64>> {
        (**self).stat(path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path)
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        (**self).write(path, data)
    }

    fn rename(&self, src: &str, dst: &str) -> Result<()> {
        (**self).rename(src, dst)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix)
    }

    fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path)
    }
}
