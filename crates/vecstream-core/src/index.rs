//! Index strategy seam: HNSW or exact brute force behind one interface.
//!
//! A collection talks to its index through [`VectorIndex`]; [`AnyIndex`]
//! dispatches between the two variants without boxing, so a collection can
//! be opened with the approximate index disabled and keep the exact same
//! call surface.

use crate::error::StoreError;
use crate::filter::MetadataFilter;
use crate::hnsw::{HnswIndex, HnswParams};
use crate::store::VectorStore;

/// The operations a collection requires from an index. All search results
/// are `(id, distance)` pairs in ascending distance (`1 − similarity`).
pub trait VectorIndex {
    /// Index an id already present in the store.
    fn insert(&mut self, id: &str, store: &VectorStore) -> Result<(), StoreError>;

    /// Drop an id from the index. A no-op when absent.
    fn remove(&mut self, id: &str);

    /// Approximate (or exact, per variant) k-NN.
    fn search(
        &self,
        store: &VectorStore,
        query_unit: &[f32],
        k: usize,
        ef: usize,
    ) -> Result<Vec<(String, f32)>, StoreError>;

    /// k-NN restricted to records whose metadata matches `filter`.
    fn filtered_search(
        &self,
        store: &VectorStore,
        query_unit: &[f32],
        k: usize,
        ef: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<(String, f32)>, StoreError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exact-scan variant: every query delegates to the store's brute-force
/// search. Holds no state of its own — the store is the single source of
/// truth for what exists.
#[derive(Debug, Default)]
pub struct BruteIndex {
    size: usize,
}

impl VectorIndex for BruteIndex {
    fn insert(&mut self, _id: &str, _store: &VectorStore) -> Result<(), StoreError> {
        self.size += 1;
        Ok(())
    }

    fn remove(&mut self, _id: &str) {
        self.size = self.size.saturating_sub(1);
    }

    fn search(
        &self,
        store: &VectorStore,
        query_unit: &[f32],
        k: usize,
        _ef: usize,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        let hits = store.search_brute(query_unit, k, None)?;
        Ok(to_distances(hits))
    }

    fn filtered_search(
        &self,
        store: &VectorStore,
        query_unit: &[f32],
        k: usize,
        _ef: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        let hits = store.search_brute(query_unit, k, Some(filter))?;
        Ok(to_distances(hits))
    }

    fn len(&self) -> usize {
        self.size
    }
}

fn to_distances(hits: Vec<(String, f32)>) -> Vec<(String, f32)> {
    hits.into_iter()
        .map(|(id, sim)| (id, (1.0 - sim).clamp(0.0, 2.0)))
        .collect()
}

impl VectorIndex for HnswIndex {
    fn insert(&mut self, id: &str, store: &VectorStore) -> Result<(), StoreError> {
        HnswIndex::insert(self, id, store)
    }

    fn remove(&mut self, id: &str) {
        HnswIndex::remove(self, id);
    }

    fn search(
        &self,
        store: &VectorStore,
        query_unit: &[f32],
        k: usize,
        ef: usize,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        HnswIndex::search(self, store, query_unit, k, ef)
    }

    fn filtered_search(
        &self,
        store: &VectorStore,
        query_unit: &[f32],
        k: usize,
        ef: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        HnswIndex::filtered_search(self, store, query_unit, k, ef, filter)
    }

    fn len(&self) -> usize {
        HnswIndex::len(self)
    }
}

/// Runtime-selected index backend for a collection.
#[derive(Debug)]
pub enum AnyIndex {
    Hnsw(HnswIndex),
    Brute(BruteIndex),
}

impl AnyIndex {
    /// Build a fresh index of the requested variant.
    pub fn new(use_hnsw: bool, params: &HnswParams) -> Result<Self, StoreError> {
        if use_hnsw {
            Ok(Self::Hnsw(HnswIndex::new(params.clone())?))
        } else {
            Ok(Self::Brute(BruteIndex::default()))
        }
    }

    pub fn is_hnsw(&self) -> bool {
        matches!(self, Self::Hnsw(_))
    }

    pub fn as_hnsw(&self) -> Option<&HnswIndex> {
        match self {
            Self::Hnsw(h) => Some(h),
            Self::Brute(_) => None,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Hnsw(_) => "hnsw",
            Self::Brute(_) => "brute",
        }
    }
}

impl VectorIndex for AnyIndex {
    fn insert(&mut self, id: &str, store: &VectorStore) -> Result<(), StoreError> {
        match self {
            Self::Hnsw(h) => VectorIndex::insert(h, id, store),
            Self::Brute(b) => b.insert(id, store),
        }
    }

    fn remove(&mut self, id: &str) {
        match self {
            Self::Hnsw(h) => VectorIndex::remove(h, id),
            Self::Brute(b) => b.remove(id),
        }
    }

    fn search(
        &self,
        store: &VectorStore,
        query_unit: &[f32],
        k: usize,
        ef: usize,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        match self {
            Self::Hnsw(h) => VectorIndex::search(h, store, query_unit, k, ef),
            Self::Brute(b) => b.search(store, query_unit, k, ef),
        }
    }

    fn filtered_search(
        &self,
        store: &VectorStore,
        query_unit: &[f32],
        k: usize,
        ef: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        match self {
            Self::Hnsw(h) => VectorIndex::filtered_search(h, store, query_unit, k, ef, filter),
            Self::Brute(b) => b.filtered_search(store, query_unit, k, ef, filter),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Hnsw(h) => VectorIndex::len(h),
            Self::Brute(b) => b.len(),
        }
    }
}
