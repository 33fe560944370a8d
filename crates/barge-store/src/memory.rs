//! In-memory byte store, used by tests and ephemeral repositories.

use crate::{ByteStore, Result, StoreError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Thread-safe in-memory store.
///
/// A `BTreeMap` keeps `list` output in lexicographic order, which mirrors
/// what a sorted directory walk produces on the filesystem backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ByteStore for MemoryStore {
    fn stat(&self, path: &str) -> Result<Option<u64>> {
        Ok(self.files.read().get(path).map(|d| d.len() as u64))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.files.write().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let mut files = self.files.write();
        let data = files
            .remove(src)
            .ok_or_else(|| StoreError::NotFound(src.to_string()))?;
        files.insert(dst.to_string(), data);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .files
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.files
            .write()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_roundtrip() {
        let store = MemoryStore::new();
        store.write("HEAD", b"ref: refs/heads/main\n").unwrap();
        assert_eq!(store.read("HEAD").unwrap(), b"ref: refs/heads/main\n");
        assert_eq!(store.stat("HEAD").unwrap(), Some(21));
    }

    #[test]
    fn read_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.read("refs/heads/main").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn rename_moves_content() {
        let store = MemoryStore::new();
        store.write("objects/pack/pack-1.pack.tmp", b"PACK").unwrap();
        store
            .rename("objects/pack/pack-1.pack.tmp", "objects/pack/pack-1.pack")
            .unwrap();
        assert!(!store.exists("objects/pack/pack-1.pack.tmp").unwrap());
        assert_eq!(store.read("objects/pack/pack-1.pack").unwrap(), b"PACK");
    }

    #[test]
    fn list_filters_by_prefix() {
        let store = MemoryStore::new();
        store.write("refs/heads/main", b"x").unwrap();
        store.write("refs/heads/dev", b"x").unwrap();
        store.write("refs/tags/v1", b"x").unwrap();

        let heads = store.list("refs/heads/").unwrap();
        assert_eq!(heads, vec!["refs/heads/dev", "refs/heads/main"]);
    }

    #[test]
    fn delete_removes_file() {
        let store = MemoryStore::new();
        store.write("refs/heads/gone", b"x").unwrap();
        store.delete("refs/heads/gone").unwrap();
        assert!(store.delete("refs/heads/gone").is_err());
    }
}
