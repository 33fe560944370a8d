//! Git objects: blobs, trees, commits, and annotated tags.

use crate::{GitError, Oid, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Number of leading bytes inspected for NUL when classifying blobs.
const BINARY_SNIFF_LEN: usize = 8000;

/// Git object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// Commit object.
    Commit,
    /// Directory listing.
    Tree,
    /// File content.
    Blob,
    /// Annotated tag.
    Tag,
}

impl ObjectKind {
    /// Returns the string used in object headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }

    /// Parses an object type name.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "commit" => Ok(Self::Commit),
            "tree" => Ok(Self::Tree),
            "blob" => Ok(Self::Blob),
            "tag" => Ok(Self::Tag),
            _ => Err(GitError::InvalidObject(format!("unknown object type: {}", s))),
        }
    }

    /// Returns the type code used in pack entry headers.
    pub fn pack_type(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }

    /// Parses a pack entry type code.
    pub fn from_pack_type(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::Commit),
            2 => Ok(Self::Tree),
            3 => Ok(Self::Blob),
            4 => Ok(Self::Tag),
            _ => Err(GitError::InvalidObject(format!("unknown pack type: {}", code))),
        }
    }
}

/// A git object with its content-derived identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitObject {
    /// SHA-1 of `"<type> <len>\0" || data`.
    pub id: Oid,
    /// The object type.
    pub kind: ObjectKind,
    /// Raw object content, uncompressed, without the header.
    pub data: Bytes,
}

impl GitObject {
    /// Creates a new object, computing its ID from the data.
    pub fn new(kind: ObjectKind, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let id = Oid::hash_object(kind, &data);
        Self { id, kind, data }
    }

    /// Creates a blob.
    pub fn blob(content: impl Into<Bytes>) -> Self {
        Self::new(ObjectKind::Blob, content)
    }

    /// Builds a commit object from its parts.
    pub fn commit(
        tree: &Oid,
        parents: &[Oid],
        author: &str,
        committer: &str,
        message: &str,
    ) -> Self {
        let mut content = format!("tree {}\n", tree);
        for parent in parents {
            content.push_str(&format!("parent {}\n", parent));
        }
        content.push_str(&format!("author {}\n", author));
        content.push_str(&format!("committer {}\n", committer));
        content.push('\n');
        content.push_str(message);
        Self::new(ObjectKind::Commit, content.into_bytes())
    }

    /// Builds a tree object from entries; entries are sorted the way git
    /// sorts them (directories compare as if suffixed with `/`).
    pub fn tree(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        let mut data = Vec::new();
        for entry in &entries {
            data.extend_from_slice(entry.mode.as_bytes());
            data.push(b' ');
            data.extend_from_slice(entry.name.as_bytes());
            data.push(0);
            data.extend_from_slice(entry.oid.as_bytes());
        }
        Self::new(ObjectKind::Tree, data)
    }

    /// Returns the size of the object data in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Parses the payload as a commit.
    pub fn as_commit(&self) -> Result<Commit> {
        if self.kind != ObjectKind::Commit {
            return Err(GitError::InvalidObject(format!(
                "expected commit, found {}",
                self.kind.as_str()
            )));
        }
        Commit::parse(&self.data)
    }

    /// Parses the payload as a tree.
    pub fn as_tree(&self) -> Result<Vec<TreeEntry>> {
        if self.kind != ObjectKind::Tree {
            return Err(GitError::InvalidObject(format!(
                "expected tree, found {}",
                self.kind.as_str()
            )));
        }
        TreeEntry::parse_all(&self.data)
    }

    /// Parses the payload as an annotated tag.
    pub fn as_tag(&self) -> Result<Tag> {
        if self.kind != ObjectKind::Tag {
            return Err(GitError::InvalidObject(format!(
                "expected tag, found {}",
                self.kind.as_str()
            )));
        }
        Tag::parse(&self.data)
    }
}

/// Returns true if the content looks binary: a NUL byte appears within the
/// first 8,000 bytes.
pub fn is_binary(content: &[u8]) -> bool {
    let window = &content[..content.len().min(BINARY_SNIFF_LEN)];
    window.contains(&0)
}

/// An author/committer/tagger line: `name <email> unix_seconds ±HHMM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch.
    pub time: i64,
    /// Timezone offset as written, e.g. `+0200`.
    pub tz: String,
}

impl Signature {
    fn parse(line: &str) -> Result<Self> {
        let open = line
            .find('<')
            .ok_or_else(|| GitError::InvalidObject(format!("bad signature: {}", line)))?;
        let close = line
            .rfind('>')
            .ok_or_else(|| GitError::InvalidObject(format!("bad signature: {}", line)))?;
        if close < open {
            return Err(GitError::InvalidObject(format!("bad signature: {}", line)));
        }
        let name = line[..open].trim_end().to_string();
        let email = line[open + 1..close].to_string();
        let rest = line[close + 1..].trim();
        let mut parts = rest.split_whitespace();
        let time = parts
            .next()
            .and_then(|t| t.parse::<i64>().ok())
            .ok_or_else(|| GitError::InvalidObject(format!("bad signature time: {}", line)))?;
        let tz = parts.next().unwrap_or("+0000").to_string();
        Ok(Self { name, email, time, tz })
    }

    /// Renders back to the on-disk line format.
    pub fn to_line(&self) -> String {
        format!("{} <{}> {} {}", self.name, self.email, self.time, self.tz)
    }
}

/// A parsed commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl Commit {
    /// Parses commit content: header lines, a blank line, then the message.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| GitError::InvalidObject("commit is not utf-8".to_string()))?;

        let (headers, message) = match text.split_once("\n\n") {
            Some((h, m)) => (h, m.to_string()),
            None => (text.trim_end_matches('\n'), String::new()),
        };

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;

        for line in headers.lines() {
            if let Some(rest) = line.strip_prefix("tree ") {
                tree = Some(Oid::from_hex(rest)?);
            } else if let Some(rest) = line.strip_prefix("parent ") {
                parents.push(Oid::from_hex(rest)?);
            } else if let Some(rest) = line.strip_prefix("author ") {
                author = Some(Signature::parse(rest)?);
            } else if let Some(rest) = line.strip_prefix("committer ") {
                committer = Some(Signature::parse(rest)?);
            }
            // Other headers (gpgsig, encoding, …) pass through unparsed.
        }

        Ok(Self {
            tree: tree.ok_or_else(|| GitError::InvalidObject("commit without tree".to_string()))?,
            parents,
            author: author
                .ok_or_else(|| GitError::InvalidObject("commit without author".to_string()))?,
            committer: committer
                .ok_or_else(|| GitError::InvalidObject("commit without committer".to_string()))?,
            message,
        })
    }

    /// First parent, if any.
    pub fn first_parent(&self) -> Option<Oid> {
        self.parents.first().copied()
    }
}

/// One entry of a tree object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Octal mode as stored, e.g. `100644` or `40000`.
    pub mode: String,
    pub name: String,
    pub oid: Oid,
}

impl TreeEntry {
    /// Creates a regular-file entry.
    pub fn file(name: impl Into<String>, oid: Oid) -> Self {
        Self {
            mode: "100644".to_string(),
            name: name.into(),
            oid,
        }
    }

    /// Creates a subdirectory entry.
    pub fn dir(name: impl Into<String>, oid: Oid) -> Self {
        Self {
            mode: "40000".to_string(),
            name: name.into(),
            oid,
        }
    }

    /// True iff the entry is a subtree (mode `040000`, stored as `40000`).
    pub fn is_tree(&self) -> bool {
        self.mode == "40000" || self.mode == "040000"
    }

    /// The object type this entry points at.
    pub fn kind(&self) -> ObjectKind {
        if self.is_tree() {
            ObjectKind::Tree
        } else {
            ObjectKind::Blob
        }
    }

    fn sort_key(&self) -> Vec<u8> {
        // Git orders tree entries as if directory names ended with '/'.
        let mut key = self.name.clone().into_bytes();
        if self.is_tree() {
            key.push(b'/');
        }
        key
    }

    /// Parses packed tree content: `<mode> <name>\0<20-byte-oid>` repeated.
    pub fn parse_all(data: &[u8]) -> Result<Vec<TreeEntry>> {
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let space = data[pos..]
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| GitError::InvalidObject("tree entry without mode".to_string()))?
                + pos;
            let nul = data[space..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| GitError::InvalidObject("tree entry without name".to_string()))?
                + space;
            if nul + 21 > data.len() {
                return Err(GitError::InvalidObject("truncated tree entry".to_string()));
            }
            let mode = std::str::from_utf8(&data[pos..space])
                .map_err(|_| GitError::InvalidObject("non-utf8 tree mode".to_string()))?
                .to_string();
            let name = std::str::from_utf8(&data[space + 1..nul])
                .map_err(|_| GitError::InvalidObject("non-utf8 tree name".to_string()))?
                .to_string();
            let mut oid = [0u8; 20];
            oid.copy_from_slice(&data[nul + 1..nul + 21]);
            entries.push(TreeEntry {
                mode,
                name,
                oid: Oid::from_bytes(oid),
            });
            pos = nul + 21;
        }
        Ok(entries)
    }
}

/// A parsed annotated tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub object: Oid,
    pub target_kind: ObjectKind,
    pub name: String,
    pub tagger: Option<Signature>,
    pub message: String,
}

impl Tag {
    /// Parses tag content.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| GitError::InvalidObject("tag is not utf-8".to_string()))?;
        let (headers, message) = match text.split_once("\n\n") {
            Some((h, m)) => (h, m.to_string()),
            None => (text.trim_end_matches('\n'), String::new()),
        };

        let mut object = None;
        let mut target_kind = None;
        let mut name = None;
        let mut tagger = None;

        for line in headers.lines() {
            if let Some(rest) = line.strip_prefix("object ") {
                object = Some(Oid::from_hex(rest)?);
            } else if let Some(rest) = line.strip_prefix("type ") {
                target_kind = Some(ObjectKind::parse(rest)?);
            } else if let Some(rest) = line.strip_prefix("tag ") {
                name = Some(rest.to_string());
            } else if let Some(rest) = line.strip_prefix("tagger ") {
                tagger = Some(Signature::parse(rest)?);
            }
        }

        Ok(Self {
            object: object
                .ok_or_else(|| GitError::InvalidObject("tag without object".to_string()))?,
            target_kind: target_kind
                .ok_or_else(|| GitError::InvalidObject("tag without type".to_string()))?,
            name: name.ok_or_else(|| GitError::InvalidObject("tag without name".to_string()))?,
            tagger,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_hash_matches_git() {
        // git hash-object for "hello\n"
        let obj = GitObject::blob(b"hello\n".to_vec());
        assert_eq!(obj.id.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn empty_blob_hash_matches_git() {
        let obj = GitObject::blob(b"".to_vec());
        assert_eq!(obj.id.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn commit_roundtrip() {
        let tree = Oid::from_bytes([1u8; 20]);
        let parent = Oid::from_bytes([2u8; 20]);
        let obj = GitObject::commit(
            &tree,
            &[parent],
            "Alice <alice@example.com> 1700000000 +0100",
            "Bob <bob@example.com> 1700000001 +0000",
            "Initial commit\n",
        );

        let commit = obj.as_commit().unwrap();
        assert_eq!(commit.tree, tree);
        assert_eq!(commit.parents, vec![parent]);
        assert_eq!(commit.author.name, "Alice");
        assert_eq!(commit.author.email, "alice@example.com");
        assert_eq!(commit.author.time, 1700000000);
        assert_eq!(commit.author.tz, "+0100");
        assert_eq!(commit.committer.name, "Bob");
        assert_eq!(commit.message, "Initial commit\n");
    }

    #[test]
    fn commit_without_parents() {
        let tree = Oid::from_bytes([1u8; 20]);
        let obj = GitObject::commit(
            &tree,
            &[],
            "A <a@b.c> 1 +0000",
            "A <a@b.c> 1 +0000",
            "root",
        );
        let commit = obj.as_commit().unwrap();
        assert!(commit.parents.is_empty());
        assert!(commit.first_parent().is_none());
    }

    #[test]
    fn signature_with_spaces_in_name() {
        let sig = Signature::parse("Jean Paul Dupont <jp@example.org> 1650000000 -0500").unwrap();
        assert_eq!(sig.name, "Jean Paul Dupont");
        assert_eq!(sig.tz, "-0500");
        assert_eq!(
            sig.to_line(),
            "Jean Paul Dupont <jp@example.org> 1650000000 -0500"
        );
    }

    #[test]
    fn tree_roundtrip_and_ordering() {
        let blob = Oid::from_bytes([3u8; 20]);
        let sub = Oid::from_bytes([4u8; 20]);
        // Git compares the directory as "a/": '-' (0x2d) < '/' (0x2f),
        // so "a-file" sorts first.
        let obj = GitObject::tree(vec![
            TreeEntry::dir("a", sub),
            TreeEntry::file("a-file", blob),
        ]);

        let entries = obj.as_tree().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a-file");
        assert_eq!(entries[1].name, "a");
        assert!(entries[1].is_tree());
        assert_eq!(entries[1].kind(), ObjectKind::Tree);
    }

    #[test]
    fn known_tree_hash() {
        // Tree with a single entry "hello.txt" -> blob("hello\n"),
        // verified against git write-tree.
        let blob = GitObject::blob(b"hello\n".to_vec());
        let tree = GitObject::tree(vec![TreeEntry::file("hello.txt", blob.id)]);
        assert_eq!(tree.id.to_hex(), "aaa96ced2d9a1c8e72c56b253a0e2fe78393feb7");
    }

    #[test]
    fn tag_parse() {
        let target = Oid::from_bytes([7u8; 20]);
        let content = format!(
            "object {}\ntype commit\ntag v1.0\ntagger T <t@e.x> 1700000000 +0000\n\nrelease\n",
            target
        );
        let obj = GitObject::new(ObjectKind::Tag, content.into_bytes());
        let tag = obj.as_tag().unwrap();
        assert_eq!(tag.object, target);
        assert_eq!(tag.target_kind, ObjectKind::Commit);
        assert_eq!(tag.name, "v1.0");
        assert_eq!(tag.message, "release\n");
    }

    #[test]
    fn binary_detection_window() {
        assert!(!is_binary(b"plain text"));
        assert!(is_binary(b"has\0nul"));

        // NUL past the 8,000-byte window does not count.
        let mut late = vec![b'a'; 8001];
        late.push(0);
        assert!(!is_binary(&late));

        let mut edge = vec![b'a'; 7999];
        edge.push(0);
        assert!(is_binary(&edge));
    }

    #[test]
    fn kind_roundtrips() {
        for kind in [
            ObjectKind::Commit,
            ObjectKind::Tree,
            ObjectKind::Blob,
            ObjectKind::Tag,
        ] {
            assert_eq!(ObjectKind::parse(kind.as_str()).unwrap(), kind);
            assert_eq!(ObjectKind::from_pack_type(kind.pack_type()).unwrap(), kind);
        }
        assert!(ObjectKind::parse("banana").is_err());
        assert!(ObjectKind::from_pack_type(0).is_err());
        assert!(ObjectKind::from_pack_type(5).is_err());
    }

    #[test]
    fn truncated_tree_is_rejected() {
        let data = b"100644 file\0shortoid".to_vec();
        assert!(TreeEntry::parse_all(&data).is_err());
    }
}
