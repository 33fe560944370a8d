//! Packfile reading, writing, and indexing.
//!
//! Outgoing packs contain only full (non-delta) entries. Inbound packs may
//! carry `OFS_DELTA`/`REF_DELTA` entries; indexing materializes them so the
//! companion `.idx` maps every object in the pack by its real OID.
//! See: https://git-scm.com/docs/pack-format

use crate::{GitError, GitObject, ObjectKind, Oid, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::{Read, Write};

/// Magic bytes at the start of a pack file.
const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Pack file version we support.
const PACK_VERSION: u32 = 2;
/// Magic bytes at the start of a pack index (v2).
const IDX_SIGNATURE: [u8; 4] = [0xff, 0x74, 0x4f, 0x63];

/// Pack entry type code for an offset delta.
const OBJ_OFS_DELTA: u8 = 6;
/// Pack entry type code for a ref delta.
const OBJ_REF_DELTA: u8 = 7;

/// Bound on delta chain recursion when reading from a pack.
const MAX_DELTA_DEPTH: usize = 32;

/// Resolves a delta base that is not in the pack being read (a loose
/// object or an object in another pack).
pub type ExternalBase<'a> = &'a dyn Fn(&Oid) -> Option<(ObjectKind, Vec<u8>)>;

fn zlib_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| GitError::UnpackFailed(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| GitError::UnpackFailed(e.to_string()))
}

/// Inflates one zlib stream starting at `data[pos..]`.
///
/// Returns the inflated bytes and the number of compressed bytes consumed.
/// Reads to the end of the deflate stream so the consumed count includes
/// the stream trailer.
fn zlib_inflate_at(data: &[u8], pos: usize) -> Result<(Vec<u8>, usize)> {
    let mut decoder = ZlibDecoder::new(&data[pos..]);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| GitError::UnpackFailed(format!("inflate failed: {}", e)))?;
    Ok((out, decoder.total_in() as usize))
}

/// Parses the object count from a pack header, if the buffer has one.
pub fn object_count(pack: &[u8]) -> Option<u32> {
    if pack.len() < 12 || &pack[..4] != PACK_SIGNATURE {
        return None;
    }
    Some(u32::from_be_bytes([pack[8], pack[9], pack[10], pack[11]]))
}

/// Builds a pack file of full entries from a set of objects.
pub struct PackWriter {
    objects: Vec<GitObject>,
}

impl PackWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
        }
    }

    /// Adds an object to the pack.
    pub fn add(&mut self, object: GitObject) {
        self.objects.push(object);
    }

    /// Number of objects added so far.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if no objects have been added.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Serializes the pack: header, entries, trailing SHA-1.
    pub fn build(self) -> Result<Vec<u8>> {
        let mut pack = Vec::new();
        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack.extend_from_slice(&(self.objects.len() as u32).to_be_bytes());

        for object in &self.objects {
            Self::write_entry(&mut pack, object)?;
        }

        let mut hasher = Sha1::new();
        hasher.update(&pack);
        let checksum = hasher.finalize();
        pack.extend_from_slice(&checksum);
        Ok(pack)
    }

    /// Writes one full entry: varint type+size header, zlib payload.
    fn write_entry(pack: &mut Vec<u8>, object: &GitObject) -> Result<()> {
        let type_code = object.kind.pack_type();
        let size = object.data.len();

        let mut first = (type_code << 4) | ((size & 0x0f) as u8);
        let mut remaining = size >> 4;
        if remaining > 0 {
            first |= 0x80;
        }
        pack.push(first);
        while remaining > 0 {
            let mut byte = (remaining & 0x7f) as u8;
            remaining >>= 7;
            if remaining > 0 {
                byte |= 0x80;
            }
            pack.push(byte);
        }

        let compressed = zlib_compress(&object.data)?;
        pack.extend_from_slice(&compressed);
        Ok(())
    }
}

impl Default for PackWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Header of one pack entry.
struct EntryHeader {
    type_code: u8,
    size: usize,
    /// Position just past the header (and past the delta base field).
    data_pos: usize,
    /// For `OFS_DELTA`: absolute offset of the base entry.
    base_offset: Option<u64>,
    /// For `REF_DELTA`: OID of the base object.
    base_oid: Option<Oid>,
}

/// Reads the type+size varint header (and any delta base field) at `pos`.
fn read_entry_header(data: &[u8], entry_offset: usize) -> Result<EntryHeader> {
    let mut pos = entry_offset;
    let err_eof = || GitError::UnpackFailed("unexpected end of pack".to_string());

    let first = *data.get(pos).ok_or_else(err_eof)?;
    pos += 1;
    let type_code = (first >> 4) & 0x07;
    let mut size = (first & 0x0f) as usize;
    let mut shift = 4;
    let mut cont = first & 0x80 != 0;
    while cont {
        let byte = *data.get(pos).ok_or_else(err_eof)?;
        pos += 1;
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        cont = byte & 0x80 != 0;
    }

    let mut base_offset = None;
    let mut base_oid = None;
    if type_code == OBJ_OFS_DELTA {
        // Negative offset: big-endian 7-bit groups with a +1 bias on
        // continuation.
        let mut byte = *data.get(pos).ok_or_else(err_eof)?;
        pos += 1;
        let mut distance = (byte & 0x7f) as u64;
        while byte & 0x80 != 0 {
            byte = *data.get(pos).ok_or_else(err_eof)?;
            pos += 1;
            distance = ((distance + 1) << 7) | (byte & 0x7f) as u64;
        }
        let base = (entry_offset as u64)
            .checked_sub(distance)
            .ok_or_else(|| GitError::UnpackFailed("ofs-delta base before pack start".to_string()))?;
        base_offset = Some(base);
    } else if type_code == OBJ_REF_DELTA {
        if pos + 20 > data.len() {
            return Err(err_eof());
        }
        let mut oid = [0u8; 20];
        oid.copy_from_slice(&data[pos..pos + 20]);
        pos += 20;
        base_oid = Some(Oid::from_bytes(oid));
    }

    Ok(EntryHeader {
        type_code,
        size,
        data_pos: pos,
        base_offset,
        base_oid,
    })
}

/// Applies a git delta to a base, producing the full object content.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut pos = 0;
    let base_size = delta_varint(delta, &mut pos)? as usize;
    let result_size = delta_varint(delta, &mut pos)? as usize;
    if base_size != base.len() {
        return Err(GitError::UnpackFailed(format!(
            "delta base size mismatch: expected {}, have {}",
            base_size,
            base.len()
        )));
    }

    let mut out = Vec::with_capacity(result_size);
    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;
        if cmd & 0x80 != 0 {
            // Copy from base: offset bytes for bits 0-3, size for bits 4-6.
            let mut offset = 0usize;
            for bit in 0..4 {
                if cmd & (1 << bit) != 0 {
                    let byte = *delta
                        .get(pos)
                        .ok_or_else(|| GitError::UnpackFailed("truncated delta".to_string()))?;
                    pos += 1;
                    offset |= (byte as usize) << (8 * bit);
                }
            }
            let mut size = 0usize;
            for bit in 0..3 {
                if cmd & (1 << (4 + bit)) != 0 {
                    let byte = *delta
                        .get(pos)
                        .ok_or_else(|| GitError::UnpackFailed("truncated delta".to_string()))?;
                    pos += 1;
                    size |= (byte as usize) << (8 * bit);
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            let end = offset
                .checked_add(size)
                .filter(|&e| e <= base.len())
                .ok_or_else(|| GitError::UnpackFailed("delta copy out of range".to_string()))?;
            out.extend_from_slice(&base[offset..end]);
        } else if cmd != 0 {
            // Insert literal bytes.
            let len = cmd as usize;
            if pos + len > delta.len() {
                return Err(GitError::UnpackFailed("truncated delta insert".to_string()));
            }
            out.extend_from_slice(&delta[pos..pos + len]);
            pos += len;
        } else {
            return Err(GitError::UnpackFailed("delta opcode 0".to_string()));
        }
    }

    if out.len() != result_size {
        return Err(GitError::UnpackFailed(format!(
            "delta result size mismatch: expected {}, have {}",
            result_size,
            out.len()
        )));
    }
    Ok(out)
}

fn delta_varint(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0;
    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| GitError::UnpackFailed("truncated delta header".to_string()))?;
        *pos += 1;
        value |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

/// One object located in a pack.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    pub oid: Oid,
    pub offset: u64,
    pub crc32: u32,
}

/// The result of indexing a pack: every object with its offset and CRC,
/// plus the pack trailer checksum.
#[derive(Debug)]
pub struct PackSummary {
    pub entries: Vec<IndexEntry>,
    pub pack_sha: [u8; 20],
}

impl PackSummary {
    /// Number of objects in the pack.
    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

/// Verifies and indexes a pack buffer.
///
/// Streams through all entries, materializing deltas against in-pack bases
/// or `external` bases, and verifies the trailing SHA-1. Fails with
/// `UnpackFailed` on any structural error.
pub fn index_pack(data: &[u8], external: ExternalBase<'_>) -> Result<PackSummary> {
    if data.len() < 32 {
        return Err(GitError::UnpackFailed("pack too small".to_string()));
    }
    if &data[..4] != PACK_SIGNATURE {
        return Err(GitError::UnpackFailed("bad pack signature".to_string()));
    }
    let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if version != PACK_VERSION {
        return Err(GitError::UnpackFailed(format!(
            "unsupported pack version: {}",
            version
        )));
    }
    let count = u32::from_be_bytes([data[8], data[9], data[10], data[11]]) as usize;

    let body_end = data.len() - 20;
    let mut hasher = Sha1::new();
    hasher.update(&data[..body_end]);
    let computed: [u8; 20] = hasher.finalize().into();
    if computed != data[body_end..] {
        return Err(GitError::UnpackFailed("pack checksum mismatch".to_string()));
    }

    let mut by_offset: HashMap<u64, (ObjectKind, Vec<u8>)> = HashMap::new();
    let mut by_oid: HashMap<Oid, u64> = HashMap::new();
    let mut entries = Vec::with_capacity(count);
    let mut pos = 12usize;

    for _ in 0..count {
        let entry_offset = pos;
        if entry_offset >= body_end {
            return Err(GitError::UnpackFailed("pack entry past body".to_string()));
        }
        let header = read_entry_header(data, entry_offset)?;
        let (raw, consumed) = zlib_inflate_at(data, header.data_pos)?;
        if raw.len() != header.size {
            return Err(GitError::UnpackFailed(format!(
                "entry size mismatch at offset {}: expected {}, inflated {}",
                entry_offset,
                header.size,
                raw.len()
            )));
        }
        pos = header.data_pos + consumed;
        if pos > body_end {
            return Err(GitError::UnpackFailed("entry overruns checksum".to_string()));
        }

        let (kind, content) = match header.type_code {
            OBJ_OFS_DELTA => {
                let base_offset = header.base_offset.unwrap_or_default();
                let (base_kind, base) = by_offset.get(&base_offset).ok_or_else(|| {
                    GitError::UnpackFailed(format!(
                        "ofs-delta base at offset {} not seen",
                        base_offset
                    ))
                })?;
                (*base_kind, apply_delta(base, &raw)?)
            }
            OBJ_REF_DELTA => {
                let base_oid = header.base_oid.unwrap_or(Oid::ZERO);
                let resolved = by_oid
                    .get(&base_oid)
                    .and_then(|off| by_offset.get(off))
                    .map(|(k, d)| (*k, d.clone()))
                    .or_else(|| external(&base_oid));
                let (base_kind, base) = resolved.ok_or_else(|| {
                    GitError::UnpackFailed(format!("ref-delta base {} missing", base_oid))
                })?;
                (base_kind, apply_delta(&base, &raw)?)
            }
            code => (ObjectKind::from_pack_type(code)?, raw),
        };

        let oid = Oid::hash_object(kind, &content);
        let crc = crc32fast::hash(&data[entry_offset..pos]);
        entries.push(IndexEntry {
            oid,
            offset: entry_offset as u64,
            crc32: crc,
        });
        by_oid.insert(oid, entry_offset as u64);
        by_offset.insert(entry_offset as u64, (kind, content));
    }

    if pos != body_end {
        return Err(GitError::UnpackFailed(format!(
            "{} trailing bytes after last entry",
            body_end - pos
        )));
    }

    let mut pack_sha = [0u8; 20];
    pack_sha.copy_from_slice(&data[body_end..]);
    Ok(PackSummary { entries, pack_sha })
}

/// Serializes a pack index (idx v2) for an indexed pack.
pub fn write_idx(summary: &PackSummary) -> Vec<u8> {
    let mut sorted = summary.entries.clone();
    sorted.sort_by(|a, b| a.oid.cmp(&b.oid));

    let mut out = Vec::new();
    out.extend_from_slice(&IDX_SIGNATURE);
    out.extend_from_slice(&2u32.to_be_bytes());

    let mut fanout = [0u32; 256];
    for entry in &sorted {
        fanout[entry.oid.as_bytes()[0] as usize] += 1;
    }
    let mut cumulative = 0u32;
    for bucket in fanout.iter_mut() {
        cumulative += *bucket;
        *bucket = cumulative;
        out.extend_from_slice(&bucket.to_be_bytes());
    }

    for entry in &sorted {
        out.extend_from_slice(entry.oid.as_bytes());
    }
    for entry in &sorted {
        out.extend_from_slice(&entry.crc32.to_be_bytes());
    }
    for entry in &sorted {
        // Offsets here always fit in 31 bits; no large-offset table.
        out.extend_from_slice(&(entry.offset as u32).to_be_bytes());
    }

    out.extend_from_slice(&summary.pack_sha);
    let mut hasher = Sha1::new();
    hasher.update(&out);
    let idx_sha: [u8; 20] = hasher.finalize().into();
    out.extend_from_slice(&idx_sha);
    out
}

/// A parsed pack index.
#[derive(Debug)]
pub struct PackIdx {
    oids: Vec<Oid>,
    offsets: Vec<u64>,
}

impl PackIdx {
    /// Parses idx v2 bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let bad = |msg: &str| GitError::InvalidObject(format!("bad pack index: {}", msg));
        if data.len() < 8 + 256 * 4 + 40 {
            return Err(bad("too small"));
        }
        if data[..4] != IDX_SIGNATURE {
            return Err(bad("signature"));
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != 2 {
            return Err(bad("version"));
        }

        let fanout_end = 8 + 256 * 4;
        let count = u32::from_be_bytes([
            data[fanout_end - 4],
            data[fanout_end - 3],
            data[fanout_end - 2],
            data[fanout_end - 1],
        ]) as usize;

        let names_end = fanout_end + count * 20;
        let crcs_end = names_end + count * 4;
        let offsets_end = crcs_end + count * 4;
        if offsets_end + 40 > data.len() {
            return Err(bad("truncated tables"));
        }

        let mut oids = Vec::with_capacity(count);
        for i in 0..count {
            let start = fanout_end + i * 20;
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(&data[start..start + 20]);
            oids.push(Oid::from_bytes(bytes));
        }

        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let start = crcs_end + i * 4;
            let raw = u32::from_be_bytes([
                data[start],
                data[start + 1],
                data[start + 2],
                data[start + 3],
            ]);
            if raw & 0x8000_0000 != 0 {
                return Err(bad("large offsets unsupported"));
            }
            offsets.push(raw as u64);
        }

        Ok(Self { oids, offsets })
    }

    /// Number of objects indexed.
    pub fn len(&self) -> usize {
        self.oids.len()
    }

    /// Returns true if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.oids.is_empty()
    }

    /// Finds the pack offset of `oid`, if present.
    pub fn lookup(&self, oid: &Oid) -> Option<u64> {
        self.oids
            .binary_search(oid)
            .ok()
            .map(|pos| self.offsets[pos])
    }

    /// Iterates all indexed OIDs.
    pub fn oids(&self) -> impl Iterator<Item = &Oid> {
        self.oids.iter()
    }
}

/// Reads objects out of one pack buffer through its index.
pub struct PackReader<'a> {
    pack: &'a [u8],
    idx: &'a PackIdx,
}

impl<'a> PackReader<'a> {
    /// Creates a reader over a pack and its parsed index.
    pub fn new(pack: &'a [u8], idx: &'a PackIdx) -> Self {
        Self { pack, idx }
    }

    /// Reads and materializes the object `oid`, if this pack contains it.
    pub fn read(&self, oid: &Oid, external: ExternalBase<'_>) -> Result<Option<GitObject>> {
        let Some(offset) = self.idx.lookup(oid) else {
            return Ok(None);
        };
        let (kind, content) = self.read_at(offset, 0, external)?;
        Ok(Some(GitObject::new(kind, content)))
    }

    fn read_at(
        &self,
        offset: u64,
        depth: usize,
        external: ExternalBase<'_>,
    ) -> Result<(ObjectKind, Vec<u8>)> {
        if depth > MAX_DELTA_DEPTH {
            return Err(GitError::UnpackFailed("delta chain too deep".to_string()));
        }
        let header = read_entry_header(self.pack, offset as usize)?;
        let (raw, _) = zlib_inflate_at(self.pack, header.data_pos)?;
        if raw.len() != header.size {
            return Err(GitError::UnpackFailed("entry size mismatch".to_string()));
        }

        match header.type_code {
            OBJ_OFS_DELTA => {
                let base_offset = header.base_offset.unwrap_or_default();
                let (kind, base) = self.read_at(base_offset, depth + 1, external)?;
                Ok((kind, apply_delta(&base, &raw)?))
            }
            OBJ_REF_DELTA => {
                let base_oid = header.base_oid.unwrap_or(Oid::ZERO);
                let (kind, base) = if let Some(base_offset) = self.idx.lookup(&base_oid) {
                    self.read_at(base_offset, depth + 1, external)?
                } else {
                    external(&base_oid).ok_or_else(|| {
                        GitError::ObjectNotFound(base_oid.to_hex())
                    })?
                };
                Ok((kind, apply_delta(&base, &raw)?))
            }
            code => Ok((ObjectKind::from_pack_type(code)?, raw)),
        }
    }
}
