//! A bare repository over a byte store.
//!
//! This type owns all object and ref access for one repository: loose and
//! packed object IO, ref resolution, pack ingestion with staging, the object
//! graph walk behind fetch, and the two-phase ref transaction behind push.

use crate::pack::{self, PackIdx, PackReader, PackWriter};
use crate::{GitError, GitObject, ObjectKind, Oid, Result};
use barge_store::{layout, ByteStore};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::{HashSet, VecDeque};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Symref chains longer than this fail to resolve.
const MAX_SYMREF_HOPS: usize = 5;

static PACK_SEQ: AtomicU64 = AtomicU64::new(0);

/// All refs of a repository, in advertisement order.
#[derive(Debug, Clone, Default)]
pub struct RefListing {
    /// `(full name, oid)` pairs: `HEAD` first if resolvable, then branches
    /// in ASCII order, then tags in ASCII order.
    pub refs: Vec<(String, Oid)>,
    /// Target of `HEAD` when it is symbolic.
    pub symbolic_head: Option<String>,
}

impl RefListing {
    /// Looks up a ref by full name.
    pub fn get(&self, name: &str) -> Option<Oid> {
        self.refs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, oid)| *oid)
    }
}

/// One push command: `<old> <new> <name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub old: Oid,
    pub new: Oid,
    pub name: String,
}

impl RefUpdate {
    /// True if this command creates the ref.
    pub fn is_create(&self) -> bool {
        self.old.is_zero() && !self.new.is_zero()
    }

    /// True if this command deletes the ref.
    pub fn is_delete(&self) -> bool {
        self.new.is_zero()
    }
}

/// Outcome of one push command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefStatus {
    /// The command was applied.
    Ok,
    /// The command was rejected; the reason goes on the wire verbatim.
    Failed(String),
}

impl RefStatus {
    fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// True for `Ok`.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// A command paired with its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefResult {
    pub name: String,
    pub status: RefStatus,
}

/// A bare git repository. Clones share the same store handle.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn ByteStore>,
}

impl Repository {
    /// Creates a repository over `store`. Does not touch the store.
    pub fn new(store: Arc<dyn ByteStore>) -> Self {
        Self { store }
    }

    /// Access to the underlying store.
    pub fn store(&self) -> &Arc<dyn ByteStore> {
        &self.store
    }

    /// Writes the bare skeleton if `HEAD` is absent. Idempotent.
    pub fn init(&self) -> Result<()> {
        if self.store.exists(layout::HEAD)? {
            return Ok(());
        }
        self.store.write(layout::HEAD, b"ref: refs/heads/main\n")?;
        self.store.write(
            layout::CONFIG,
            b"[core]\n\trepositoryformatversion = 0\n\tbare = true\n",
        )?;
        Ok(())
    }

    /// True once `init` has run.
    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.store.exists(layout::HEAD)?)
    }

    // ---- refs ----------------------------------------------------------

    /// Resolves a ref name (possibly symbolic) to an OID, following at most
    /// five symref hops.
    pub fn resolve_ref(&self, name: &str) -> Result<Oid> {
        let mut current = name.to_string();
        for _ in 0..=MAX_SYMREF_HOPS {
            let content = match self.store.read(&current) {
                Ok(c) => c,
                Err(e) if e.is_not_found() => {
                    return Err(GitError::RefNotFound(name.to_string()))
                }
                Err(e) => return Err(e.into()),
            };
            let text = String::from_utf8_lossy(&content);
            let text = text.trim();
            match text.strip_prefix("ref: ") {
                Some(target) => current = target.to_string(),
                None => return Oid::from_hex(text),
            }
        }
        Err(GitError::InvalidObject(format!(
            "symref chain for {} exceeds {} hops",
            name, MAX_SYMREF_HOPS
        )))
    }

    /// Reads a ref file as a direct OID, `None` if absent.
    pub fn read_ref_direct(&self, name: &str) -> Result<Option<Oid>> {
        match self.store.read(name) {
            Ok(content) => {
                let text = String::from_utf8_lossy(&content);
                Ok(Some(Oid::from_hex(text.trim())?))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes a ref file.
    pub fn write_ref(&self, name: &str, oid: &Oid) -> Result<()> {
        self.store
            .write(name, format!("{}\n", oid.to_hex()).as_bytes())?;
        Ok(())
    }

    /// Deletes a ref file.
    pub fn delete_ref(&self, name: &str) -> Result<()> {
        self.store.delete(name)?;
        Ok(())
    }

    /// The symbolic target of `HEAD`, if `HEAD` is a symref.
    pub fn head_target(&self) -> Result<Option<String>> {
        match self.store.read(layout::HEAD) {
            Ok(content) => {
                let text = String::from_utf8_lossy(&content);
                Ok(text.trim().strip_prefix("ref: ").map(str::to_string))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists all refs in advertisement order.
    pub fn list_refs(&self) -> Result<RefListing> {
        let mut refs = Vec::new();

        if let Ok(head) = self.resolve_ref(layout::HEAD) {
            refs.push((layout::HEAD.to_string(), head));
        }
        for prefix in [layout::HEADS_PREFIX, layout::TAGS_PREFIX] {
            // Store listings are sorted, which is the ASCII order the
            // advertisement wants.
            for name in self.store.list(prefix)? {
                if let Some(oid) = self.read_ref_direct(&name)? {
                    refs.push((name, oid));
                }
            }
        }

        Ok(RefListing {
            refs,
            symbolic_head: self.head_target()?,
        })
    }

    // ---- objects -------------------------------------------------------

    /// Writes an object to loose storage, returning its OID.
    pub fn write_object(&self, object: &GitObject) -> Result<Oid> {
        let path = layout::loose_object(&object.id.to_hex());
        if self.store.exists(&path)? {
            return Ok(object.id);
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(
            format!("{} {}\0", object.kind.as_str(), object.data.len()).as_bytes(),
        )?;
        encoder.write_all(&object.data)?;
        let compressed = encoder.finish()?;
        self.store.write(&path, &compressed)?;
        Ok(object.id)
    }

    fn read_loose(&self, oid: &Oid) -> Result<Option<GitObject>> {
        let path = layout::loose_object(&oid.to_hex());
        let compressed = match self.store.read(&path) {
            Ok(c) => c,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut decoder = ZlibDecoder::new(compressed.as_slice());
        let mut raw = Vec::new();
        decoder
            .read_to_end(&mut raw)
            .map_err(|e| GitError::InvalidObject(format!("loose object {}: {}", oid, e)))?;

        let nul = raw
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| GitError::InvalidObject("loose object without header".to_string()))?;
        let header = String::from_utf8_lossy(&raw[..nul]);
        let (kind_str, len_str) = header
            .split_once(' ')
            .ok_or_else(|| GitError::InvalidObject(format!("bad object header: {}", header)))?;
        let kind = ObjectKind::parse(kind_str)?;
        let len: usize = len_str
            .parse()
            .map_err(|_| GitError::InvalidObject(format!("bad object length: {}", len_str)))?;
        let data = raw[nul + 1..].to_vec();
        if data.len() != len {
            return Err(GitError::InvalidObject(format!(
                "object length mismatch: header {}, content {}",
                len,
                data.len()
            )));
        }
        Ok(Some(GitObject::new(kind, data)))
    }

    fn pack_stems(&self) -> Result<Vec<String>> {
        let mut stems = Vec::new();
        for path in self.store.list(layout::PACK_DIR)? {
            if let Some(stem) = path
                .strip_prefix(layout::PACK_DIR)
                .and_then(|f| f.strip_suffix(".idx"))
            {
                stems.push(stem.to_string());
            }
        }
        Ok(stems)
    }

    fn read_from_pack(&self, stem: &str, oid: &Oid) -> Result<Option<GitObject>> {
        let idx_bytes = match self.store.read(&layout::pack_index(stem)) {
            Ok(b) => b,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let idx = PackIdx::parse(&idx_bytes)?;
        if idx.lookup(oid).is_none() {
            return Ok(None);
        }
        let pack_bytes = self.store.read(&layout::pack_file(stem))?;
        let external = |base: &Oid| {
            self.read_loose(base)
                .ok()
                .flatten()
                .map(|o| (o.kind, o.data.to_vec()))
        };
        PackReader::new(&pack_bytes, &idx).read(oid, &external)
    }

    /// Reads an object, checking loose storage first, then each pack index.
    pub fn read_object(&self, oid: &Oid) -> Result<GitObject> {
        if let Some(obj) = self.read_loose(oid)? {
            return Ok(obj);
        }
        for stem in self.pack_stems()? {
            if let Some(obj) = self.read_from_pack(&stem, oid)? {
                return Ok(obj);
            }
        }
        Err(GitError::ObjectNotFound(oid.to_hex()))
    }

    /// True if the object is present loose or in any pack.
    pub fn contains_object(&self, oid: &Oid) -> bool {
        let loose = layout::loose_object(&oid.to_hex());
        if matches!(self.store.exists(&loose), Ok(true)) {
            return true;
        }
        let Ok(stems) = self.pack_stems() else {
            return false;
        };
        stems.iter().any(|stem| {
            self.store
                .read(&layout::pack_index(stem))
                .ok()
                .and_then(|bytes| PackIdx::parse(&bytes).ok())
                .is_some_and(|idx| idx.lookup(oid).is_some())
        })
    }

    // ---- packs ---------------------------------------------------------

    /// Stages, verifies, and publishes an inbound pack.
    ///
    /// The raw bytes go to `pack-<nonce>.pack.tmp` first. Indexing failure
    /// leaves that staging file behind and publishes nothing; on success the
    /// `.idx` is written before the `.pack` is renamed into place, so
    /// readers never observe a pack without its index.
    pub fn add_pack(&self, data: &[u8]) -> Result<usize> {
        let stem = next_pack_stem();
        let staging = layout::pack_staging(&stem);
        self.store.write(&staging, data)?;

        let external = |oid: &Oid| {
            self.read_object(oid)
                .ok()
                .map(|o| (o.kind, o.data.to_vec()))
        };
        let summary = match pack::index_pack(data, &external) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(stem = %stem, error = %e, "inbound pack failed to index");
                return Err(e);
            }
        };

        self.store
            .write(&layout::pack_index(&stem), &pack::write_idx(&summary))?;
        self.store.rename(&staging, &layout::pack_file(&stem))?;
        tracing::debug!(stem = %stem, objects = summary.count(), "pack published");
        Ok(summary.count())
    }

    /// Emits a pack containing exactly `oids`, all as full entries.
    pub fn pack_objects(&self, oids: &[Oid]) -> Result<Vec<u8>> {
        let mut writer = PackWriter::new();
        for oid in oids {
            writer.add(self.read_object(oid)?);
        }
        writer.build()
    }

    // ---- graph walk ----------------------------------------------------

    /// BFS over the object graph from `wants`, stopping at `haves`.
    ///
    /// Unreadable objects are skipped with a warning unless they are wants,
    /// which abort the walk.
    pub fn collect_objects_for_pack(&self, wants: &[Oid], haves: &[Oid]) -> Result<Vec<Oid>> {
        let have_set: HashSet<Oid> = haves.iter().copied().collect();
        let want_set: HashSet<Oid> = wants.iter().copied().collect();
        let mut visited: HashSet<Oid> = HashSet::new();
        let mut queue: VecDeque<Oid> = wants.iter().copied().collect();
        let mut out = Vec::new();

        while let Some(oid) = queue.pop_front() {
            if !visited.insert(oid) {
                continue;
            }
            if have_set.contains(&oid) {
                continue;
            }
            let children = match self.object_children(&oid) {
                Ok(children) => children,
                Err(e) => {
                    if want_set.contains(&oid) {
                        return Err(e);
                    }
                    tracing::warn!(oid = %oid, error = %e, "skipping unreadable object in pack walk");
                    continue;
                }
            };
            out.push(oid);
            queue.extend(children);
        }
        Ok(out)
    }

    /// Immediate children of an object in the reachability graph.
    fn object_children(&self, oid: &Oid) -> Result<Vec<Oid>> {
        let obj = self.read_object(oid)?;
        Ok(match obj.kind {
            ObjectKind::Commit => {
                let commit = obj.as_commit()?;
                let mut children = vec![commit.tree];
                children.extend(commit.parents);
                children
            }
            ObjectKind::Tree => obj.as_tree()?.into_iter().map(|e| e.oid).collect(),
            ObjectKind::Tag => vec![obj.as_tag()?.object],
            ObjectKind::Blob => Vec::new(),
        })
    }

    /// The subset of `haves` that exist in this repository.
    pub fn find_common_commits(&self, haves: &[Oid]) -> Vec<Oid> {
        haves
            .iter()
            .copied()
            .filter(|oid| self.read_object(oid).is_ok())
            .collect()
    }

    /// True iff `ancestor` is reachable from `candidate` via parent links.
    pub fn is_descendant(&self, candidate: &Oid, ancestor: &Oid) -> bool {
        let mut visited: HashSet<Oid> = HashSet::new();
        let mut queue: VecDeque<Oid> = VecDeque::from([*candidate]);
        while let Some(oid) = queue.pop_front() {
            if oid == *ancestor {
                return true;
            }
            if !visited.insert(oid) {
                continue;
            }
            if let Ok(obj) = self.read_object(&oid) {
                if let Ok(commit) = obj.as_commit() {
                    queue.extend(commit.parents);
                }
            }
        }
        false
    }

    // ---- ref transactions ----------------------------------------------

    /// Applies push commands with two-phase validation.
    ///
    /// All commands are validated first. With `atomic`, any failure marks
    /// every otherwise-ok command `atomic transaction failed` and nothing
    /// is applied. Store-level failures during apply flip the entry to
    /// `failed to update: <msg>`.
    pub fn apply_ref_updates(&self, commands: &[RefUpdate], atomic: bool) -> Vec<RefResult> {
        let mut results: Vec<RefResult> = commands
            .iter()
            .map(|cmd| RefResult {
                name: cmd.name.clone(),
                status: self.validate_update(cmd),
            })
            .collect();

        if atomic && results.iter().any(|r| !r.status.is_ok()) {
            for result in &mut results {
                if result.status.is_ok() {
                    result.status = RefStatus::failed("atomic transaction failed");
                }
            }
            return results;
        }

        for (cmd, result) in commands.iter().zip(results.iter_mut()) {
            if !result.status.is_ok() {
                continue;
            }
            let applied = if cmd.is_delete() {
                self.delete_ref(&cmd.name)
            } else {
                self.write_ref(&cmd.name, &cmd.new)
            };
            if let Err(e) = applied {
                result.status = RefStatus::failed(format!("failed to update: {}", e));
            }
        }
        results
    }

    fn validate_update(&self, cmd: &RefUpdate) -> RefStatus {
        if !cmd.name.starts_with("refs/") {
            return RefStatus::failed(format!("failed to update: funny refname {}", cmd.name));
        }
        let current = match self.read_ref_direct(&cmd.name) {
            Ok(current) => current,
            Err(e) => return RefStatus::failed(format!("failed to update: {}", e)),
        };

        match (cmd.old.is_zero(), cmd.new.is_zero()) {
            // Create: the ref must be absent and the target present.
            (true, false) => match current {
                Some(_) => RefStatus::failed("ref already exists"),
                None if !self.contains_object(&cmd.new) => {
                    RefStatus::failed("failed to update: missing necessary objects")
                }
                None => RefStatus::Ok,
            },
            // Delete: the ref must be present and match the old OID.
            (false, true) => match current {
                None => RefStatus::failed("ref doesn't exist"),
                Some(oid) if oid != cmd.old => {
                    RefStatus::failed("ref update rejected: old OID mismatch")
                }
                Some(_) => RefStatus::Ok,
            },
            // Update: present, matching, and fast-forward.
            (false, false) => match current {
                None => RefStatus::failed("ref doesn't exist"),
                Some(oid) if oid != cmd.old => {
                    RefStatus::failed("ref update rejected: old OID mismatch")
                }
                Some(oid) => {
                    if !self.contains_object(&cmd.new) {
                        RefStatus::failed("failed to update: missing necessary objects")
                    } else if !self.is_descendant(&cmd.new, &oid) {
                        RefStatus::failed("non-fast-forward update rejected")
                    } else {
                        RefStatus::Ok
                    }
                }
            },
            // Zero to zero never names a real transition.
            (true, true) => RefStatus::failed("ref doesn't exist"),
        }
    }
}

fn next_pack_stem() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seq = PACK_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("pack-{:x}-{:x}", nanos, seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TreeEntry;
    use barge_store::MemoryStore;

    fn test_repo() -> Repository {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        repo.init().unwrap();
        repo
    }

    /// One commit over one blob; returns (commit, tree, blob) oids.
    fn seed_commit(repo: &Repository, content: &[u8], parents: &[Oid]) -> (Oid, Oid, Oid) {
        let blob = GitObject::blob(content.to_vec());
        let tree = GitObject::tree(vec![TreeEntry::file("file.txt", blob.id)]);
        let commit = GitObject::commit(
            &tree.id,
            parents,
            "A <a@example.com> 1700000000 +0000",
            "A <a@example.com> 1700000000 +0000",
            "commit\n",
        );
        repo.write_object(&blob).unwrap();
        repo.write_object(&tree).unwrap();
        repo.write_object(&commit).unwrap();
        (commit.id, tree.id, blob.id)
    }

    #[test]
    fn init_is_idempotent() {
        let repo = test_repo();
        assert!(repo.is_initialized().unwrap());
        assert_eq!(repo.head_target().unwrap().as_deref(), Some("refs/heads/main"));
        repo.init().unwrap();
        assert_eq!(repo.head_target().unwrap().as_deref(), Some("refs/heads/main"));
    }

    #[test]
    fn loose_object_roundtrip() {
        let repo = test_repo();
        let blob = GitObject::blob(b"hello\n".to_vec());
        let oid = repo.write_object(&blob).unwrap();
        assert_eq!(oid.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");

        let read = repo.read_object(&oid).unwrap();
        assert_eq!(read.kind, ObjectKind::Blob);
        assert_eq!(read.data.as_ref(), b"hello\n");
        assert!(repo.contains_object(&oid));
        assert!(!repo.contains_object(&Oid::from_bytes([9u8; 20])));
    }

    #[test]
    fn resolve_follows_symrefs() {
        let repo = test_repo();
        let (commit, _, _) = seed_commit(&repo, b"x", &[]);
        repo.write_ref("refs/heads/main", &commit).unwrap();

        assert_eq!(repo.resolve_ref("refs/heads/main").unwrap(), commit);
        assert_eq!(repo.resolve_ref("HEAD").unwrap(), commit);
    }

    #[test]
    fn unresolvable_head_is_ref_not_found() {
        let repo = test_repo();
        assert!(matches!(
            repo.resolve_ref("HEAD"),
            Err(GitError::RefNotFound(_))
        ));
    }

    #[test]
    fn symref_chain_is_bounded() {
        let repo = test_repo();
        for i in 0..7 {
            repo.store()
                .write(
                    &format!("refs/sym{}", i),
                    format!("ref: refs/sym{}\n", i + 1).as_bytes(),
                )
                .unwrap();
        }
        assert!(repo.resolve_ref("refs/sym0").is_err());
    }

    #[test]
    fn list_refs_orders_head_branches_tags() {
        let repo = test_repo();
        let (commit, _, _) = seed_commit(&repo, b"x", &[]);
        repo.write_ref("refs/heads/main", &commit).unwrap();
        repo.write_ref("refs/heads/dev", &commit).unwrap();
        repo.write_ref("refs/tags/v1.0", &commit).unwrap();

        let listing = repo.list_refs().unwrap();
        let names: Vec<_> = listing.refs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["HEAD", "refs/heads/dev", "refs/heads/main", "refs/tags/v1.0"]
        );
        assert_eq!(listing.symbolic_head.as_deref(), Some("refs/heads/main"));
        assert_eq!(listing.get("HEAD"), Some(commit));
    }

    #[test]
    fn empty_repo_lists_no_refs() {
        let repo = test_repo();
        let listing = repo.list_refs().unwrap();
        assert!(listing.refs.is_empty());
        // HEAD is symbolic even when unresolvable.
        assert_eq!(listing.symbolic_head.as_deref(), Some("refs/heads/main"));
    }

    #[test]
    fn add_pack_publishes_and_serves_objects() {
        let repo = test_repo();
        let blob = GitObject::blob(b"packed content".to_vec());
        let mut writer = PackWriter::new();
        writer.add(blob.clone());
        let pack = writer.build().unwrap();

        let count = repo.add_pack(&pack).unwrap();
        assert_eq!(count, 1);

        // No staging leftovers, and the idx sibling exists.
        let files = repo.store().list(layout::PACK_DIR).unwrap();
        assert!(files.iter().any(|f| f.ends_with(".pack")));
        assert!(files.iter().any(|f| f.ends_with(".idx")));
        assert!(!files.iter().any(|f| f.ends_with(".tmp")));

        let read = repo.read_object(&blob.id).unwrap();
        assert_eq!(read.data.as_ref(), b"packed content");
        assert!(repo.contains_object(&blob.id));
    }

    #[test]
    fn bad_pack_stays_in_staging() {
        let repo = test_repo();
        let mut writer = PackWriter::new();
        writer.add(GitObject::blob(b"x".to_vec()));
        let mut pack = writer.build().unwrap();
        let last = pack.len() - 1;
        pack[last] ^= 0xff;

        assert!(repo.add_pack(&pack).is_err());
        let files = repo.store().list(layout::PACK_DIR).unwrap();
        assert!(files.iter().all(|f| f.ends_with(".pack.tmp")));
    }

    #[test]
    fn walk_excludes_haves() {
        let repo = test_repo();
        let (old, old_tree, old_blob) = seed_commit(&repo, b"v1", &[]);
        let (new, _, _) = seed_commit(&repo, b"v2", &[old]);

        let all = repo.collect_objects_for_pack(&[new], &[]).unwrap();
        assert_eq!(all.len(), 6);

        let delta = repo.collect_objects_for_pack(&[new], &[old]).unwrap();
        assert!(!delta.contains(&old));
        assert!(!delta.contains(&old_tree));
        assert!(!delta.contains(&old_blob));
        assert_eq!(delta.len(), 3);
    }

    #[test]
    fn walk_visits_each_object_once() {
        let repo = test_repo();
        // Diamond: two commits sharing the same tree and blob.
        let (a, _, _) = seed_commit(&repo, b"same", &[]);
        let (b, _, _) = seed_commit(&repo, b"same", &[a]);
        let collected = repo.collect_objects_for_pack(&[b, a], &[]).unwrap();
        let unique: HashSet<_> = collected.iter().copied().collect();
        assert_eq!(collected.len(), unique.len());
        // b, a, shared tree, shared blob
        assert_eq!(collected.len(), 4);
    }

    #[test]
    fn missing_want_aborts_walk() {
        let repo = test_repo();
        let ghost = Oid::from_bytes([0xaa; 20]);
        assert!(matches!(
            repo.collect_objects_for_pack(&[ghost], &[]),
            Err(GitError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn descendant_relation() {
        let repo = test_repo();
        let (root, _, _) = seed_commit(&repo, b"v1", &[]);
        let (child, _, _) = seed_commit(&repo, b"v2", &[root]);
        let (other, _, _) = seed_commit(&repo, b"unrelated", &[]);

        assert!(repo.is_descendant(&root, &root));
        assert!(repo.is_descendant(&child, &root));
        assert!(!repo.is_descendant(&root, &child));
        assert!(!repo.is_descendant(&other, &root));
    }

    #[test]
    fn find_common_filters_unknown() {
        let repo = test_repo();
        let (known, _, _) = seed_commit(&repo, b"known", &[]);
        let ghost = Oid::from_bytes([0xbb; 20]);
        assert_eq!(repo.find_common_commits(&[known, ghost]), vec![known]);
    }

    #[test]
    fn create_update_delete_refs() {
        let repo = test_repo();
        let (first, _, _) = seed_commit(&repo, b"v1", &[]);
        let (second, _, _) = seed_commit(&repo, b"v2", &[first]);

        // Create.
        let results = repo.apply_ref_updates(
            &[RefUpdate {
                old: Oid::ZERO,
                new: first,
                name: "refs/heads/main".to_string(),
            }],
            false,
        );
        assert!(results[0].status.is_ok());
        assert_eq!(
            repo.read_ref_direct("refs/heads/main").unwrap(),
            Some(first)
        );

        // Fast-forward update.
        let results = repo.apply_ref_updates(
            &[RefUpdate {
                old: first,
                new: second,
                name: "refs/heads/main".to_string(),
            }],
            false,
        );
        assert!(results[0].status.is_ok());

        // Delete.
        let results = repo.apply_ref_updates(
            &[RefUpdate {
                old: second,
                new: Oid::ZERO,
                name: "refs/heads/main".to_string(),
            }],
            false,
        );
        assert!(results[0].status.is_ok());
        assert_eq!(repo.read_ref_direct("refs/heads/main").unwrap(), None);
    }

    #[test]
    fn non_fast_forward_is_rejected_verbatim() {
        let repo = test_repo();
        let (main_tip, _, _) = seed_commit(&repo, b"v1", &[]);
        let (sideways, _, _) = seed_commit(&repo, b"v2", &[]);
        repo.write_ref("refs/heads/main", &main_tip).unwrap();

        let results = repo.apply_ref_updates(
            &[RefUpdate {
                old: main_tip,
                new: sideways,
                name: "refs/heads/main".to_string(),
            }],
            false,
        );
        assert_eq!(
            results[0].status,
            RefStatus::Failed("non-fast-forward update rejected".to_string())
        );
        // Repo unchanged.
        assert_eq!(
            repo.read_ref_direct("refs/heads/main").unwrap(),
            Some(main_tip)
        );
    }

    #[test]
    fn stale_old_oid_is_rejected() {
        let repo = test_repo();
        let (tip, _, _) = seed_commit(&repo, b"v1", &[]);
        let (stale, _, _) = seed_commit(&repo, b"v0", &[]);
        let (next, _, _) = seed_commit(&repo, b"v2", &[tip]);
        repo.write_ref("refs/heads/main", &tip).unwrap();

        let results = repo.apply_ref_updates(
            &[RefUpdate {
                old: stale,
                new: next,
                name: "refs/heads/main".to_string(),
            }],
            false,
        );
        assert_eq!(
            results[0].status,
            RefStatus::Failed("ref update rejected: old OID mismatch".to_string())
        );
    }

    #[test]
    fn create_existing_and_delete_missing() {
        let repo = test_repo();
        let (tip, _, _) = seed_commit(&repo, b"v1", &[]);
        repo.write_ref("refs/heads/main", &tip).unwrap();

        let results = repo.apply_ref_updates(
            &[
                RefUpdate {
                    old: Oid::ZERO,
                    new: tip,
                    name: "refs/heads/main".to_string(),
                },
                RefUpdate {
                    old: tip,
                    new: Oid::ZERO,
                    name: "refs/heads/ghost".to_string(),
                },
            ],
            false,
        );
        assert_eq!(
            results[0].status,
            RefStatus::Failed("ref already exists".to_string())
        );
        assert_eq!(
            results[1].status,
            RefStatus::Failed("ref doesn't exist".to_string())
        );
    }

    #[test]
    fn atomic_failure_rolls_back_everything() {
        let repo = test_repo();
        let (tip, _, _) = seed_commit(&repo, b"v1", &[]);
        let (sideways, _, _) = seed_commit(&repo, b"v2", &[]);
        repo.write_ref("refs/heads/main", &tip).unwrap();

        let results = repo.apply_ref_updates(
            &[
                RefUpdate {
                    old: Oid::ZERO,
                    new: tip,
                    name: "refs/heads/feature".to_string(),
                },
                RefUpdate {
                    old: tip,
                    new: sideways,
                    name: "refs/heads/main".to_string(),
                },
            ],
            true,
        );
        assert_eq!(
            results[0].status,
            RefStatus::Failed("atomic transaction failed".to_string())
        );
        assert_eq!(
            results[1].status,
            RefStatus::Failed("non-fast-forward update rejected".to_string())
        );
        // Nothing applied.
        assert_eq!(repo.read_ref_direct("refs/heads/feature").unwrap(), None);
        assert_eq!(repo.read_ref_direct("refs/heads/main").unwrap(), Some(tip));
    }

    #[test]
    fn create_with_missing_object_is_rejected() {
        let repo = test_repo();
        let ghost = Oid::from_bytes([0xcc; 20]);
        let results = repo.apply_ref_updates(
            &[RefUpdate {
                old: Oid::ZERO,
                new: ghost,
                name: "refs/heads/main".to_string(),
            }],
            false,
        );
        assert_eq!(
            results[0].status,
            RefStatus::Failed("failed to update: missing necessary objects".to_string())
        );
    }
}
