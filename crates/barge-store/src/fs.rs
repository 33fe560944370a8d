//! Filesystem byte store.

use crate::{ByteStore, Result, StoreError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// A store rooted at one directory on the local filesystem.
///
/// Writes go to a sibling temp file and are renamed into place, so a
/// concurrent reader sees either the old or the new content, never a
/// partial write.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Creates a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() {
            return Err(StoreError::InvalidPath("empty path".to_string()));
        }
        for part in path.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return Err(StoreError::InvalidPath(path.to_string()));
            }
        }
        Ok(self.root.join(path))
    }

    fn walk(dir: &Path, rel: &str, out: &mut Vec<String>) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let child_rel = if rel.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", rel, name)
            };
            if entry.file_type()?.is_dir() {
                Self::walk(&entry.path(), &child_rel, out)?;
            } else {
                out.push(child_rel);
            }
        }
        Ok(())
    }
}

impl ByteStore for FsStore {
    fn stat(&self, path: &str) -> Result<Option<u64>> {
        let full = self.resolve(path)?;
        match fs::metadata(&full) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        match fs::read(&full) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = full.with_extension(format!("wr{}-{}", std::process::id(), seq));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &full)?;
        Ok(())
    }

    fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let src_full = self.resolve(src)?;
        let dst_full = self.resolve(dst)?;
        if !src_full.exists() {
            return Err(StoreError::NotFound(src.to_string()));
        }
        if let Some(parent) = dst_full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&src_full, &dst_full)?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        match Self::walk(&self.root, "", &mut out) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        }
        out.retain(|p| p.starts_with(prefix));
        out.sort();
        Ok(out)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::open(temp.path()).unwrap();

        store.write("objects/ab/cdef", b"data").unwrap();
        assert_eq!(store.read("objects/ab/cdef").unwrap(), b"data");
    }

    #[test]
    fn stat_missing_is_none() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::open(temp.path()).unwrap();
        assert_eq!(store.stat("HEAD").unwrap(), None);
    }

    #[test]
    fn rejects_path_traversal() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::open(temp.path()).unwrap();
        assert!(store.read("../outside").is_err());
        assert!(store.write("refs/../../x", b"no").is_err());
    }

    #[test]
    fn list_is_sorted_and_recursive() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::open(temp.path()).unwrap();
        store.write("refs/heads/main", b"x").unwrap();
        store.write("refs/heads/dev", b"x").unwrap();
        store.write("HEAD", b"x").unwrap();

        let refs = store.list("refs/").unwrap();
        assert_eq!(refs, vec!["refs/heads/dev", "refs/heads/main"]);
    }

    #[test]
    fn rename_publishes_atomically() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::open(temp.path()).unwrap();
        store.write("objects/pack/pack-a.pack.tmp", b"PACK...").unwrap();
        store
            .rename("objects/pack/pack-a.pack.tmp", "objects/pack/pack-a.pack")
            .unwrap();
        assert!(store.exists("objects/pack/pack-a.pack").unwrap());
        assert!(!store.exists("objects/pack/pack-a.pack.tmp").unwrap());
    }
}
