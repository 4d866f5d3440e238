//! On-disk layout of a collection directory.
//!
//! ```text
//! {root}/{name}/
//!   vectors.npy    ← "VSV1", u32 N, u32 D, then N·D little-endian f32
//!   ids.json       ← JSON array of N ids, row-aligned with vectors.npy
//!   metadata.json  ← JSON object id → metadata document
//!   index.bin      ← "VSH1" HNSW snapshot (optional; rebuilt when absent/bad)
//!   config.json    ← dimension, size, params, hnsw flag, created_at, version
//!   .lock          ← advisory single-opener lockfile
//! ```
//!
//! Every file is replaced atomically: the new content goes to `{file}.tmp`,
//! is fsynced, then renamed over the old file. Binary decoding is bounds
//! checked throughout; any malformed input surfaces as `CorruptStore`, never
//! a panic or an over-allocation.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;
use crate::hnsw::{HnswIndex, HnswParams};
use crate::store::VectorStore;

pub(crate) const VECTORS_FILE: &str = "vectors.npy";
pub(crate) const IDS_FILE: &str = "ids.json";
pub(crate) const METADATA_FILE: &str = "metadata.json";
pub(crate) const INDEX_FILE: &str = "index.bin";
pub(crate) const CONFIG_FILE: &str = "config.json";
pub(crate) const LOCK_FILE: &str = ".lock";

/// Bumped when any file layout changes.
pub(crate) const FORMAT_VERSION: u32 = 1;

const VECTORS_MAGIC: [u8; 4] = *b"VSV1";
const INDEX_MAGIC: [u8; 4] = *b"VSH1";

/// Persisted collection configuration (`config.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub dimension: Option<usize>,
    pub size: usize,
    pub params: HnswParams,
    pub hnsw: bool,
    pub created_at: u64,
    pub version: u32,
}

// ─────────────────────────────────────────────
// Atomic file replacement
// ─────────────────────────────────────────────

/// Write `bytes` to `{path}.tmp`, fsync, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| StoreError::CorruptStore(format!("serialize {}: {e}", path.display())))?;
    write_atomic(path, &bytes)
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::CorruptStore(format!("parse {}: {e}", path.display())))
}

// ─────────────────────────────────────────────
// Bounded byte reader
// ─────────────────────────────────────────────

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    file: &'static str,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8], file: &'static str) -> Self {
        Self { buf, pos: 0, file }
    }

    fn truncated(&self) -> StoreError {
        StoreError::CorruptStore(format!("{}: unexpected end of file", self.file))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StoreError> {
        let end = self.pos.checked_add(n).ok_or_else(|| self.truncated())?;
        if end > self.buf.len() {
            return Err(self.truncated());
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, StoreError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, StoreError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, StoreError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn f32(&mut self) -> Result<f32, StoreError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn finished(&self) -> bool {
        self.pos == self.buf.len()
    }
}

// ─────────────────────────────────────────────
// vectors.npy — VSV1
// ─────────────────────────────────────────────

/// Encode the vector matrix in `ids` row order.
pub(crate) fn encode_vectors(store: &VectorStore, ids: &[String]) -> Result<Vec<u8>, StoreError> {
    let dim = store.dimension().unwrap_or(0);
    let mut out = Vec::with_capacity(12 + ids.len() * dim * 4);
    out.extend_from_slice(&VECTORS_MAGIC);
    out.extend_from_slice(&(ids.len() as u32).to_le_bytes());
    out.extend_from_slice(&(dim as u32).to_le_bytes());
    for id in ids {
        let record = store.get(id)?;
        for x in &record.vector {
            out.extend_from_slice(&x.to_le_bytes());
        }
    }
    Ok(out)
}

/// Decode a VSV1 matrix into per-row vectors.
pub(crate) fn decode_vectors(bytes: &[u8]) -> Result<Vec<Vec<f32>>, StoreError> {
    let mut r = ByteReader::new(bytes, VECTORS_FILE);
    if r.take(4)? != VECTORS_MAGIC {
        return Err(StoreError::CorruptStore(format!(
            "{VECTORS_FILE}: bad magic"
        )));
    }
    let n = r.u32()? as usize;
    let dim = r.u32()? as usize;

    // The header must agree with the physical size before any allocation.
    let expected = n
        .checked_mul(dim)
        .and_then(|cells| cells.checked_mul(4))
        .and_then(|body| body.checked_add(12))
        .ok_or_else(|| StoreError::CorruptStore(format!("{VECTORS_FILE}: header overflow")))?;
    if expected != bytes.len() {
        return Err(StoreError::CorruptStore(format!(
            "{VECTORS_FILE}: expected {expected} bytes for {n}x{dim}, found {}",
            bytes.len()
        )));
    }

    let mut rows = Vec::with_capacity(n);
    for _ in 0..n {
        let mut row = Vec::with_capacity(dim);
        for _ in 0..dim {
            row.push(r.f32()?);
        }
        rows.push(row);
    }
    Ok(rows)
}

// ─────────────────────────────────────────────
// index.bin — VSH1
// ─────────────────────────────────────────────

/// The decoded graph snapshot, ready for `HnswIndex::from_parts`.
pub(crate) struct DecodedIndex {
    pub params: HnswParams,
    pub entry_point: Option<String>,
    pub levels: HashMap<String, usize>,
    pub neighbors: HashMap<String, Vec<BTreeSet<String>>>,
}

/// Encode the graph in `ids` row order; neighbor ids become u32 row indices.
pub(crate) fn encode_index(index: &HnswIndex, ids: &[String]) -> Result<Vec<u8>, StoreError> {
    let params = index.params();
    let row_of: HashMap<&str, u32> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i as u32))
        .collect();

    let mut out = Vec::new();
    out.extend_from_slice(&INDEX_MAGIC);
    out.extend_from_slice(&(params.m as u32).to_le_bytes());
    out.extend_from_slice(&(params.m_max(0) as u32).to_le_bytes());
    out.extend_from_slice(&(params.ef_construction as u32).to_le_bytes());
    out.extend_from_slice(&params.seed.to_le_bytes());
    match index.entry_point() {
        Some(ep) => {
            out.extend_from_slice(&(ep.len() as u32).to_le_bytes());
            out.extend_from_slice(ep.as_bytes());
        }
        None => out.extend_from_slice(&0u32.to_le_bytes()),
    }

    for id in ids {
        let level = index.level(id).ok_or_else(|| {
            StoreError::IndexInconsistency(format!("stored id '{id}' is not indexed"))
        })?;
        let level_u8 = u8::try_from(level).map_err(|_| {
            StoreError::IndexInconsistency(format!("level {level} of '{id}' exceeds u8"))
        })?;
        out.push(level_u8);
        let layers = index.neighbor_layers(id).ok_or_else(|| {
            StoreError::IndexInconsistency(format!("no neighbor lists for '{id}'"))
        })?;
        for set in layers {
            out.extend_from_slice(&(set.len() as u32).to_le_bytes());
            for n in set {
                let row = row_of.get(n.as_str()).ok_or_else(|| {
                    StoreError::IndexInconsistency(format!("neighbor '{n}' is not a stored id"))
                })?;
                out.extend_from_slice(&row.to_le_bytes());
            }
        }
    }
    Ok(out)
}

/// Decode a VSH1 snapshot against the row-aligned id list.
///
/// `ef_search` is not part of the snapshot; the caller patches it in from
/// `config.json` before reassembling the index.
pub(crate) fn decode_index(bytes: &[u8], ids: &[String]) -> Result<DecodedIndex, StoreError> {
    let mut r = ByteReader::new(bytes, INDEX_FILE);
    if r.take(4)? != INDEX_MAGIC {
        return Err(StoreError::CorruptStore(format!("{INDEX_FILE}: bad magic")));
    }
    let m = r.u32()? as usize;
    let m_max0 = r.u32()? as usize;
    let ef_construction = r.u32()? as usize;
    let seed = r.u64()?;
    if m < 2 || m_max0 != m * 2 {
        return Err(StoreError::CorruptStore(format!(
            "{INDEX_FILE}: inconsistent M/Mmax0 ({m}/{m_max0})"
        )));
    }

    let ep_len = r.u32()? as usize;
    let entry_point = if ep_len == 0 {
        None
    } else {
        let raw = r.take(ep_len)?;
        let ep = std::str::from_utf8(raw)
            .map_err(|_| StoreError::CorruptStore(format!("{INDEX_FILE}: entry point not UTF-8")))?;
        Some(ep.to_string())
    };
    if let Some(ep) = &entry_point {
        let known: HashSet<&str> = ids.iter().map(String::as_str).collect();
        if !known.contains(ep.as_str()) {
            return Err(StoreError::CorruptStore(format!(
                "{INDEX_FILE}: entry point '{ep}' is not a stored id"
            )));
        }
    }

    let mut levels = HashMap::with_capacity(ids.len());
    let mut neighbors = HashMap::with_capacity(ids.len());
    for id in ids {
        let level = r.u8()? as usize;
        let mut layers = Vec::with_capacity(level + 1);
        for _ in 0..=level {
            let count = r.u32()? as usize;
            if count > ids.len() {
                return Err(StoreError::CorruptStore(format!(
                    "{INDEX_FILE}: neighbor count {count} exceeds store size"
                )));
            }
            let mut set = BTreeSet::new();
            for _ in 0..count {
                let row = r.u32()? as usize;
                let neighbor = ids.get(row).ok_or_else(|| {
                    StoreError::CorruptStore(format!(
                        "{INDEX_FILE}: neighbor row {row} out of range"
                    ))
                })?;
                set.insert(neighbor.clone());
            }
            layers.push(set);
        }
        levels.insert(id.clone(), level);
        neighbors.insert(id.clone(), layers);
    }
    if !r.finished() {
        return Err(StoreError::CorruptStore(format!(
            "{INDEX_FILE}: trailing bytes after last record"
        )));
    }

    Ok(DecodedIndex {
        params: HnswParams {
            m,
            ef_construction,
            ef_search: HnswParams::default().ef_search,
            seed,
        },
        entry_point,
        levels,
        neighbors,
    })
}

// ─────────────────────────────────────────────
// Lockfile
// ─────────────────────────────────────────────

/// Advisory single-opener lock: created when a collection directory is
/// opened, removed on drop. A pre-existing lockfile is reported but not
/// enforced — detection of a stale lock is advisory.
#[derive(Debug)]
pub(crate) struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    pub(crate) fn acquire(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join(LOCK_FILE);
        if path.exists() {
            warn!(
                lock = %path.display(),
                "lockfile already present; previous opener did not shut down cleanly"
            );
        }
        fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample_store() -> (VectorStore, Vec<String>) {
        let mut store = VectorStore::new();
        for (id, v) in [
            ("a", vec![1.0f32, 0.0, 0.0]),
            ("b", vec![0.0, 1.0, 0.0]),
            ("c", vec![0.9, 0.1, 0.0]),
        ] {
            store.add(id, v, Value::Null).unwrap();
        }
        let ids = store.ids();
        (store, ids)
    }

    #[test]
    fn vectors_round_trip() {
        let (store, ids) = sample_store();
        let bytes = encode_vectors(&store, &ids).unwrap();
        assert_eq!(&bytes[..4], b"VSV1");
        let rows = decode_vectors(&bytes).unwrap();
        assert_eq!(rows.len(), 3);
        for (row, id) in rows.iter().zip(&ids) {
            assert_eq!(row, &store.get(id).unwrap().vector);
        }
    }

    #[test]
    fn vectors_reject_bad_magic_and_truncation() {
        let (store, ids) = sample_store();
        let bytes = encode_vectors(&store, &ids).unwrap();

        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(matches!(
            decode_vectors(&bad).unwrap_err(),
            StoreError::CorruptStore(_)
        ));

        let truncated = &bytes[..bytes.len() - 5];
        assert!(matches!(
            decode_vectors(truncated).unwrap_err(),
            StoreError::CorruptStore(_)
        ));
    }

    #[test]
    fn vectors_reject_oversized_header() {
        // A header claiming u32::MAX rows must fail the size check rather
        // than attempt the allocation.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"VSV1");
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode_vectors(&bytes).unwrap_err(),
            StoreError::CorruptStore(_)
        ));
    }

    #[test]
    fn index_round_trip_preserves_graph() {
        let (store, ids) = sample_store();
        let mut index = HnswIndex::new(HnswParams::default()).unwrap();
        for id in &ids {
            index.insert(id, &store).unwrap();
        }

        let bytes = encode_index(&index, &ids).unwrap();
        assert_eq!(&bytes[..4], b"VSH1");
        let decoded = decode_index(&bytes, &ids).unwrap();
        assert_eq!(decoded.entry_point.as_deref(), index.entry_point());
        assert_eq!(&decoded.levels, index.levels_map());
        for id in &ids {
            assert_eq!(
                decoded.neighbors.get(id),
                index.neighbor_layers(id),
                "id {id}"
            );
        }

        let restored = HnswIndex::from_parts(
            index.params().clone(),
            decoded.levels,
            decoded.neighbors,
            decoded.entry_point,
        )
        .unwrap();
        assert_eq!(restored.len(), index.len());
    }

    #[test]
    fn index_rejects_out_of_range_rows() {
        let (store, ids) = sample_store();
        let mut index = HnswIndex::new(HnswParams::default()).unwrap();
        for id in &ids {
            index.insert(id, &store).unwrap();
        }
        let bytes = encode_index(&index, &ids).unwrap();
        // Decoding against a shorter id list invalidates row references.
        let fewer = &ids[..1];
        assert!(decode_index(&bytes, fewer).is_err());
    }

    #[test]
    fn write_atomic_leaves_no_tmp_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        assert!(!dir.path().join("data.bin.tmp").exists());

        // Overwrite replaces content atomically.
        write_atomic(&path, b"world").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"world");
    }

    #[test]
    fn lock_guard_creates_and_removes() {
        let dir = tempfile::TempDir::new().unwrap();
        let lock_path = dir.path().join(LOCK_FILE);
        {
            let _guard = LockGuard::acquire(dir.path()).unwrap();
            assert!(lock_path.exists());
            // A second acquire over a live lock still succeeds (advisory).
            let _second = LockGuard::acquire(dir.path()).unwrap();
        }
        assert!(!lock_path.exists());
    }
}
