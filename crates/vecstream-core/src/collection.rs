//! A named collection: one vector store, one index, one directory.
//!
//! The collection is the consistency boundary. Compound writes are
//! two-phase with rollback (a failed index insert undoes the store insert),
//! searches never mutate, and `load` leaves the in-memory state untouched
//! unless every file decodes cleanly. A dirty flag tracks unsaved changes;
//! persistence happens only on explicit `save`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::filter::MetadataFilter;
use crate::hnsw::{HnswIndex, HnswParams};
use crate::index::{AnyIndex, VectorIndex};
use crate::persist::{
    self, CollectionConfig, LockGuard, CONFIG_FILE, FORMAT_VERSION, IDS_FILE, INDEX_FILE,
    METADATA_FILE, VECTORS_FILE,
};
use crate::similarity::l2_normalize;
use crate::store::VectorStore;

/// Deleted fraction past which removals trigger a full index rebuild.
const REBUILD_DELETED_FRACTION: f32 = 0.25;

/// Snapshot of a collection's runtime state, as returned by
/// [`Collection::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub count: usize,
    pub dimension: Option<usize>,
    pub params: HnswParams,
    pub hnsw: bool,
    pub dirty: bool,
    pub deleted_fraction: f32,
    pub vectors_bytes: u64,
    pub metadata_bytes: u64,
}

/// One isolated vector database: store + index bound to a directory.
#[derive(Debug)]
pub struct Collection {
    name: String,
    dir: PathBuf,
    store: VectorStore,
    index: AnyIndex,
    params: HnswParams,
    use_hnsw: bool,
    dirty: bool,
    removed_since_rebuild: usize,
    created_at: u64,
    _lock: LockGuard,
}

impl Collection {
    /// Open the collection at `dir`, creating the directory if needed.
    /// When a `config.json` is already present the persisted state is
    /// loaded and `use_hnsw`/`params` are taken from it; otherwise the
    /// collection starts empty with the given settings.
    pub fn open(
        name: &str,
        dir: &Path,
        use_hnsw: bool,
        params: HnswParams,
    ) -> Result<Self, StoreError> {
        params.validate()?;
        fs::create_dir_all(dir)?;
        let lock = LockGuard::acquire(dir)?;

        let mut collection = Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            store: VectorStore::new(),
            index: AnyIndex::new(use_hnsw, &params)?,
            params,
            use_hnsw,
            dirty: false,
            removed_since_rebuild: 0,
            created_at: unix_now(),
            _lock: lock,
        };
        if collection.dir.join(CONFIG_FILE).exists() {
            collection.load()?;
        }
        Ok(collection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn size(&self) -> usize {
        self.store.size()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.store.dimension()
    }

    pub fn ids(&self) -> Vec<String> {
        self.store.ids()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Insert a vector with optional metadata. The first insert fixes the
    /// collection dimension. Store and index move together: if indexing
    /// fails, the store insert is rolled back and the original error is
    /// surfaced.
    pub fn add_vector(
        &mut self,
        id: &str,
        vector: Vec<f32>,
        metadata: Option<Value>,
    ) -> Result<(), StoreError> {
        self.store.add(id, vector, metadata.unwrap_or(Value::Null))?;
        if let Err(e) = self.index.insert(id, &self.store) {
            let _ = self.store.remove(id);
            return Err(e);
        }
        self.dirty = true;
        Ok(())
    }

    pub fn get_vector(&self, id: &str) -> Result<Vec<f32>, StoreError> {
        Ok(self.store.get(id)?.vector.clone())
    }

    pub fn get_vector_with_metadata(&self, id: &str) -> Result<(Vec<f32>, Value), StoreError> {
        let record = self.store.get(id)?;
        Ok((record.vector.clone(), record.metadata.clone()))
    }

    /// Remove a vector from store and index. Past a 25% deleted fraction
    /// the graph has degraded enough to be rebuilt from the live set under
    /// a fresh seed.
    pub fn remove_vector(&mut self, id: &str) -> Result<(), StoreError> {
        self.store.remove(id)?;
        self.index.remove(id);
        self.removed_since_rebuild += 1;
        self.dirty = true;
        self.maybe_rebuild()?;
        Ok(())
    }

    /// k-NN over the collection, returning up to `k` `(id, similarity)`
    /// pairs in descending similarity.
    ///
    /// `ef` overrides the configured candidate-pool size; `filter` restricts
    /// results to matching metadata; `threshold` drops results below a
    /// similarity floor. An empty query or an empty collection yields an
    /// empty list; a non-empty query of the wrong length is
    /// [`StoreError::DimensionMismatch`].
    pub fn search_similar(
        &self,
        query: &[f32],
        k: usize,
        ef: Option<usize>,
        filter: Option<&MetadataFilter>,
        threshold: Option<f32>,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        if query.is_empty() || self.store.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.store.dimension() {
            if query.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    got: query.len(),
                });
            }
        }

        let query_unit = l2_normalize(query);
        let ef = ef.unwrap_or(self.params.ef_search);
        let hits = match filter {
            Some(f) if !f.is_empty() => {
                self.index
                    .filtered_search(&self.store, &query_unit, k, ef, f)?
            }
            _ => self.index.search(&self.store, &query_unit, k, ef)?,
        };

        let mut out: Vec<(String, f32)> = hits
            .into_iter()
            .map(|(id, dist)| (id, 1.0 - dist))
            .collect();
        if let Some(t) = threshold {
            out.retain(|(_, sim)| *sim >= t);
        }
        Ok(out)
    }

    /// Drop every vector, metadata entry, and the index; delete the data
    /// files. The collection itself (directory, config) survives with its
    /// dimension unset, ready for a fresh first insert.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.store = VectorStore::new();
        self.index = AnyIndex::new(self.use_hnsw, &self.params)?;
        self.removed_since_rebuild = 0;
        for file in [VECTORS_FILE, IDS_FILE, METADATA_FILE, INDEX_FILE] {
            let path = self.dir.join(file);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        self.dirty = true;
        self.save()
    }

    pub fn stats(&self) -> CollectionStats {
        let file_len = |name: &str| {
            fs::metadata(self.dir.join(name))
                .map(|m| m.len())
                .unwrap_or(0)
        };
        let removed = self.removed_since_rebuild;
        let total = self.store.size() + removed;
        CollectionStats {
            name: self.name.clone(),
            count: self.store.size(),
            dimension: self.store.dimension(),
            params: self.params.clone(),
            hnsw: self.use_hnsw,
            dirty: self.dirty,
            deleted_fraction: if total == 0 {
                0.0
            } else {
                removed as f32 / total as f32
            },
            vectors_bytes: file_len(VECTORS_FILE),
            metadata_bytes: file_len(METADATA_FILE),
        }
    }

    /// Flush the collection to its directory. Each file is replaced
    /// atomically; rows are written in ascending-id order so an unchanged
    /// collection saves to byte-identical files.
    pub fn save(&mut self) -> Result<(), StoreError> {
        let ids = self.store.ids();

        let vectors = persist::encode_vectors(&self.store, &ids)?;
        persist::write_atomic(&self.dir.join(VECTORS_FILE), &vectors)?;
        persist::write_json(&self.dir.join(IDS_FILE), &ids)?;

        let mut metadata = BTreeMap::new();
        for id in &ids {
            let meta = self.store.metadata(id).ok_or_else(|| {
                StoreError::IndexInconsistency(format!("stored id '{id}' has no metadata slot"))
            })?;
            metadata.insert(id.as_str(), meta);
        }
        persist::write_json(&self.dir.join(METADATA_FILE), &metadata)?;

        if let AnyIndex::Hnsw(h) = &self.index {
            let snapshot = persist::encode_index(h, &ids)?;
            persist::write_atomic(&self.dir.join(INDEX_FILE), &snapshot)?;
        }

        persist::write_json(&self.dir.join(CONFIG_FILE), &self.config())?;
        self.dirty = false;
        debug!(collection = %self.name, size = ids.len(), "flushed collection");
        Ok(())
    }

    /// Reload the collection from its directory.
    ///
    /// Everything is decoded into fresh structures first; the live state is
    /// replaced only after all files parse, so any failure leaves the
    /// collection exactly as it was. A missing or inconsistent `index.bin`
    /// is not an error: the index is rebuilt from the vectors.
    pub fn load(&mut self) -> Result<(), StoreError> {
        let config: CollectionConfig = persist::read_json(&self.dir.join(CONFIG_FILE))?;
        config.params.validate()?;

        let ids: Vec<String> = persist::read_json(&self.dir.join(IDS_FILE))?;
        let rows = persist::decode_vectors(&fs::read(self.dir.join(VECTORS_FILE))?)?;
        if rows.len() != ids.len() {
            return Err(StoreError::CorruptStore(format!(
                "{VECTORS_FILE} has {} rows but {IDS_FILE} lists {} ids",
                rows.len(),
                ids.len()
            )));
        }
        let metadata: HashMap<String, Value> = persist::read_json(&self.dir.join(METADATA_FILE))?;

        let mut store = VectorStore::new();
        for (id, row) in ids.iter().zip(rows) {
            let meta = metadata.get(id).cloned().unwrap_or(Value::Null);
            store
                .add(id, row, meta)
                .map_err(|e| StoreError::CorruptStore(format!("row for '{id}': {e}")))?;
        }
        if !store.is_empty() && store.dimension() != config.dimension {
            return Err(StoreError::CorruptStore(format!(
                "{CONFIG_FILE} dimension {:?} disagrees with {VECTORS_FILE} ({:?})",
                config.dimension,
                store.dimension()
            )));
        }

        let index = if config.hnsw {
            match self.load_index_snapshot(&config, &ids, &store) {
                Ok(index) => AnyIndex::Hnsw(index),
                Err(e) => {
                    warn!(
                        collection = %self.name,
                        error = %e,
                        "index snapshot rejected; rebuilding from vectors"
                    );
                    build_index(true, &config.params, &store)?
                }
            }
        } else {
            build_index(false, &config.params, &store)?
        };

        self.store = store;
        self.index = index;
        self.params = config.params;
        self.use_hnsw = config.hnsw;
        self.created_at = config.created_at;
        self.removed_since_rebuild = 0;
        self.dirty = false;
        Ok(())
    }

    fn load_index_snapshot(
        &self,
        config: &CollectionConfig,
        ids: &[String],
        store: &VectorStore,
    ) -> Result<HnswIndex, StoreError> {
        let bytes = fs::read(self.dir.join(INDEX_FILE))?;
        let decoded = persist::decode_index(&bytes, ids)?;
        if decoded.params.m != config.params.m
            || decoded.params.ef_construction != config.params.ef_construction
            || decoded.params.seed != config.params.seed
        {
            return Err(StoreError::CorruptStore(format!(
                "{INDEX_FILE} parameters disagree with {CONFIG_FILE}"
            )));
        }
        // Structural invariants are verified by from_parts; the id coverage
        // matches `ids` by construction of the decoder.
        let index = HnswIndex::from_parts(
            config.params.clone(),
            decoded.levels,
            decoded.neighbors,
            decoded.entry_point,
        )?;
        debug_assert_eq!(index.len(), store.size());
        Ok(index)
    }

    fn config(&self) -> CollectionConfig {
        CollectionConfig {
            dimension: self.store.dimension(),
            size: self.store.size(),
            params: self.params.clone(),
            hnsw: self.use_hnsw,
            created_at: self.created_at,
            version: FORMAT_VERSION,
        }
    }

    fn maybe_rebuild(&mut self) -> Result<(), StoreError> {
        if !self.use_hnsw || self.removed_since_rebuild == 0 {
            return Ok(());
        }
        let removed = self.removed_since_rebuild;
        let total = self.store.size() + removed;
        if (removed as f32 / total as f32) <= REBUILD_DELETED_FRACTION {
            return Ok(());
        }

        // Fresh seed so the rebuilt graph does not replay the degraded one.
        self.params.seed = self.params.seed.wrapping_add(1);
        let index = build_index(true, &self.params, &self.store)?;
        debug!(
            collection = %self.name,
            size = self.store.size(),
            seed = self.params.seed,
            "rebuilt index after removals"
        );
        self.index = index;
        self.removed_since_rebuild = 0;
        Ok(())
    }
}

/// Build an index of the requested variant over every id in `store`.
fn build_index(
    use_hnsw: bool,
    params: &HnswParams,
    store: &VectorStore,
) -> Result<AnyIndex, StoreError> {
    let mut index = AnyIndex::new(use_hnsw, params)?;
    for id in store.ids() {
        index.insert(&id, store)?;
    }
    Ok(index)
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
