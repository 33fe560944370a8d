//! Derived read queries over a repository snapshot.
//!
//! These back the browsing layer: branch listing, commit log with optional
//! path filter, tree listing with last-touching commit, blob fetch, and a
//! single-commit change list.

use crate::{
    is_binary, Commit, GitError, ObjectKind, Oid, Repository, Result, Signature, TreeEntry,
};
use barge_store::layout;
use bytes::Bytes;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};

/// A commit as presented to the browsing layer.
#[derive(Debug, Clone, Serialize)]
pub struct CommitInfo {
    pub oid: Oid,
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl CommitInfo {
    fn new(oid: Oid, commit: Commit) -> Self {
        Self {
            oid,
            tree: commit.tree,
            parents: commit.parents,
            author: commit.author,
            committer: commit.committer,
            message: commit.message,
        }
    }
}

/// One tree listing row.
#[derive(Debug, Clone, Serialize)]
pub struct TreeEntryInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    pub oid: Oid,
    pub mode: String,
    /// The most recent commit that touched this entry's path.
    #[serde(rename = "lastCommit", skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<CommitInfo>,
}

/// A blob with its metadata.
#[derive(Debug, Clone)]
pub struct BlobInfo {
    pub oid: Oid,
    pub content: Bytes,
    pub size: usize,
    pub is_binary: bool,
}

/// How a path changed in a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Modify,
    Remove,
}

/// One side of a changed path.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeBlob {
    pub oid: Oid,
    pub is_binary: bool,
}

/// One changed path in a commit.
#[derive(Debug, Clone, Serialize)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<ChangeBlob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<ChangeBlob>,
}

/// A commit plus the file changes it introduced over its first parent.
#[derive(Debug, Clone, Serialize)]
pub struct CommitDetail {
    pub commit: CommitInfo,
    pub changes: Vec<Change>,
}

impl Repository {
    /// Branch names, without the `refs/heads/` prefix, in ASCII order.
    pub fn branches(&self) -> Result<Vec<String>> {
        Ok(self
            .store()
            .list(layout::HEADS_PREFIX)?
            .into_iter()
            .filter_map(|p| {
                p.strip_prefix(layout::HEADS_PREFIX)
                    .map(str::to_string)
            })
            .collect())
    }

    /// The branch `HEAD` points at, if `HEAD` is symbolic.
    pub fn current_branch(&self) -> Result<Option<String>> {
        Ok(self
            .head_target()?
            .and_then(|t| t.strip_prefix(layout::HEADS_PREFIX).map(str::to_string)))
    }

    /// Resolves a revision string: a 40-hex OID, a full ref name, or a
    /// short branch/tag name.
    pub fn resolve_rev(&self, rev: &str) -> Result<Oid> {
        if rev.len() == 40 {
            if let Ok(oid) = Oid::from_hex(rev) {
                return Ok(oid);
            }
        }
        if rev == layout::HEAD || rev.starts_with("refs/") {
            return self.resolve_ref(rev);
        }
        for prefix in [layout::HEADS_PREFIX, layout::TAGS_PREFIX] {
            let full = format!("{}{}", prefix, rev);
            if let Ok(oid) = self.resolve_ref(&full) {
                return Ok(oid);
            }
        }
        Err(GitError::RefNotFound(rev.to_string()))
    }

    /// Peels a revision OID to the commit it names, following tags.
    fn peel_to_commit(&self, oid: &Oid) -> Result<(Oid, Commit)> {
        let mut current = *oid;
        for _ in 0..8 {
            let obj = self.read_object(&current)?;
            match obj.kind {
                ObjectKind::Commit => return Ok((current, obj.as_commit()?)),
                ObjectKind::Tag => current = obj.as_tag()?.object,
                other => {
                    return Err(GitError::InvalidObject(format!(
                        "{} is a {}, not a commit",
                        current,
                        other.as_str()
                    )))
                }
            }
        }
        Err(GitError::InvalidObject("tag chain too deep".to_string()))
    }

    /// The OID stored at `path` under `tree`, descending by `/` components.
    fn oid_at_path(&self, tree: &Oid, path: &str) -> Result<Option<TreeEntry>> {
        let mut current = *tree;
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        while let Some(component) = components.next() {
            let entries = self.read_object(&current)?.as_tree()?;
            let Some(entry) = entries.into_iter().find(|e| e.name == component) else {
                return Ok(None);
            };
            if components.peek().is_none() {
                return Ok(Some(entry));
            }
            if !entry.is_tree() {
                return Ok(None);
            }
            current = entry.oid;
        }
        // Empty path names the tree itself.
        Ok(Some(TreeEntry::dir("", *tree)))
    }

    /// Commit log, newest first along first-parent-then-parents order.
    ///
    /// With `path`, only commits that changed the OID at that path against
    /// their first parent are included. `depth` bounds the number of
    /// returned commits.
    pub fn log(
        &self,
        refname: Option<&str>,
        depth: Option<usize>,
        path: Option<&str>,
    ) -> Result<Vec<CommitInfo>> {
        let tip = self.resolve_rev(refname.unwrap_or(layout::HEAD))?;
        let (tip, _) = self.peel_to_commit(&tip)?;

        let mut out = Vec::new();
        let mut visited: HashSet<Oid> = HashSet::new();
        let mut queue: VecDeque<Oid> = VecDeque::from([tip]);
        let limit = depth.unwrap_or(usize::MAX);

        while let Some(oid) = queue.pop_front() {
            if out.len() >= limit {
                break;
            }
            if !visited.insert(oid) {
                continue;
            }
            let commit = self.read_object(&oid)?.as_commit()?;
            let included = match path {
                None => true,
                Some(p) => self.commit_touches(&commit, p)?,
            };
            queue.extend(commit.parents.iter().copied());
            if included {
                out.push(CommitInfo::new(oid, commit));
            }
        }
        Ok(out)
    }

    /// True if the commit changed the object at `path` relative to its
    /// first parent (or introduced it, for root commits).
    fn commit_touches(&self, commit: &Commit, path: &str) -> Result<bool> {
        let current = self.oid_at_path(&commit.tree, path)?.map(|e| e.oid);
        let previous = match commit.first_parent() {
            None => None,
            Some(parent) => {
                let parent_commit = self.read_object(&parent)?.as_commit()?;
                self.oid_at_path(&parent_commit.tree, path)?.map(|e| e.oid)
            }
        };
        Ok(current != previous)
    }

    /// Entries of the tree at `path` under the given revision, each with
    /// the most recent commit that touched it.
    pub fn tree_entries(&self, rev: &str, path: Option<&str>) -> Result<Vec<TreeEntryInfo>> {
        let tip = self.resolve_rev(rev)?;
        let (_, commit) = self.peel_to_commit(&tip)?;

        let dir = path.unwrap_or("");
        let tree_oid = if dir.is_empty() {
            commit.tree
        } else {
            let entry = self
                .oid_at_path(&commit.tree, dir)?
                .ok_or_else(|| GitError::PathNotFound(dir.to_string()))?;
            if !entry.is_tree() {
                return Err(GitError::PathNotFound(format!("{} is not a tree", dir)));
            }
            entry.oid
        };

        let mut out = Vec::new();
        for entry in self.read_object(&tree_oid)?.as_tree()? {
            let full_path = if dir.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", dir.trim_matches('/'), entry.name)
            };
            let last_commit = self
                .log(Some(rev), Some(1), Some(&full_path))?
                .into_iter()
                .next();
            out.push(TreeEntryInfo {
                name: entry.name.clone(),
                kind: entry.kind(),
                oid: entry.oid,
                mode: entry.mode.clone(),
                last_commit,
            });
        }
        Ok(out)
    }

    /// The blob at `path` under the given revision.
    pub fn blob_at(&self, rev: &str, path: &str) -> Result<BlobInfo> {
        let tip = self.resolve_rev(rev)?;
        let (_, commit) = self.peel_to_commit(&tip)?;
        let entry = self
            .oid_at_path(&commit.tree, path)?
            .ok_or_else(|| GitError::PathNotFound(path.to_string()))?;
        if entry.is_tree() {
            return Err(GitError::PathNotFound(format!("{} is a tree", path)));
        }
        let obj = self.read_object(&entry.oid)?;
        Ok(BlobInfo {
            oid: entry.oid,
            size: obj.data.len(),
            is_binary: is_binary(&obj.data),
            content: obj.data,
        })
    }

    /// A commit with the changes it introduced, diffed tree-vs-tree against
    /// its first parent (or the empty tree for root commits).
    pub fn commit_with_changes(&self, oid: &Oid) -> Result<CommitDetail> {
        let commit = self.read_object(oid)?.as_commit()?;
        let parent_tree = match commit.first_parent() {
            None => None,
            Some(parent) => Some(self.read_object(&parent)?.as_commit()?.tree),
        };

        let mut changes = Vec::new();
        self.diff_trees(parent_tree.as_ref(), Some(&commit.tree), "", &mut changes)?;
        Ok(CommitDetail {
            commit: CommitInfo::new(*oid, commit),
            changes,
        })
    }

    fn change_blob(&self, oid: &Oid) -> Result<ChangeBlob> {
        let obj = self.read_object(oid)?;
        Ok(ChangeBlob {
            oid: *oid,
            is_binary: is_binary(&obj.data),
        })
    }

    fn diff_trees(
        &self,
        old: Option<&Oid>,
        new: Option<&Oid>,
        prefix: &str,
        out: &mut Vec<Change>,
    ) -> Result<()> {
        let read_entries = |oid: Option<&Oid>| -> Result<BTreeMap<String, TreeEntry>> {
            Ok(match oid {
                None => BTreeMap::new(),
                Some(oid) => self
                    .read_object(oid)?
                    .as_tree()?
                    .into_iter()
                    .map(|e| (e.name.clone(), e))
                    .collect(),
            })
        };
        let old_entries = read_entries(old)?;
        let new_entries = read_entries(new)?;

        let names: std::collections::BTreeSet<&String> =
            old_entries.keys().chain(new_entries.keys()).collect();

        for name in names {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            match (old_entries.get(name), new_entries.get(name)) {
                (None, Some(added)) => {
                    if added.is_tree() {
                        self.diff_trees(None, Some(&added.oid), &path, out)?;
                    } else {
                        out.push(Change {
                            path,
                            kind: ChangeKind::Add,
                            old: None,
                            new: Some(self.change_blob(&added.oid)?),
                        });
                    }
                }
                (Some(removed), None) => {
                    if removed.is_tree() {
                        self.diff_trees(Some(&removed.oid), None, &path, out)?;
                    } else {
                        out.push(Change {
                            path,
                            kind: ChangeKind::Remove,
                            old: Some(self.change_blob(&removed.oid)?),
                            new: None,
                        });
                    }
                }
                (Some(before), Some(after)) => {
                    if before.oid == after.oid && before.is_tree() == after.is_tree() {
                        continue;
                    }
                    match (before.is_tree(), after.is_tree()) {
                        (true, true) => {
                            self.diff_trees(Some(&before.oid), Some(&after.oid), &path, out)?
                        }
                        (false, false) => out.push(Change {
                            path,
                            kind: ChangeKind::Modify,
                            old: Some(self.change_blob(&before.oid)?),
                            new: Some(self.change_blob(&after.oid)?),
                        }),
                        (true, false) => {
                            self.diff_trees(Some(&before.oid), None, &path, out)?;
                            out.push(Change {
                                path,
                                kind: ChangeKind::Add,
                                old: None,
                                new: Some(self.change_blob(&after.oid)?),
                            });
                        }
                        (false, true) => {
                            out.push(Change {
                                path: path.clone(),
                                kind: ChangeKind::Remove,
                                old: Some(self.change_blob(&before.oid)?),
                                new: None,
                            });
                            self.diff_trees(None, Some(&after.oid), &path, out)?;
                        }
                    }
                }
                (None, None) => unreachable!("name came from one of the maps"),
            }
        }
        Ok(())
    }
}
