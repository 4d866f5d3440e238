//! In-memory vector + metadata store.
//!
//! Maps opaque string identifiers to `(vector, metadata)` records and
//! enforces the two structural invariants of a collection: identifier
//! uniqueness and dimensional uniformity (the dimension is fixed by the
//! first successful insert). A unit-normalized copy of every vector is
//! memoized at insert time so repeated cosine comparisons skip the norm.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use serde_json::Value;

use crate::error::StoreError;
use crate::filter::MetadataFilter;
use crate::similarity::{dot, l2_normalize};

/// One stored record: the caller's vector, its memoized unit-normalized
/// copy, and the metadata document (`Value::Null` when none was supplied).
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub vector: Vec<f32>,
    pub unit: Vec<f32>,
    pub metadata: Value,
}

/// In-memory mapping from identifier to [`VectorRecord`].
#[derive(Debug, Default)]
pub struct VectorStore {
    records: HashMap<String, VectorRecord>,
    dimension: Option<usize>,
}

/// Hit ordering for the bounded top-k heap: the root is the *worst* kept hit
/// (lowest similarity, then highest id), so eviction is a single `pop`.
struct BruteHit {
    sim: f32,
    id: String,
}

impl PartialEq for BruteHit {
    fn eq(&self, other: &Self) -> bool {
        self.sim == other.sim && self.id == other.id
    }
}

impl Eq for BruteHit {}

impl PartialOrd for BruteHit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BruteHit {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .sim
            .partial_cmp(&self.sim)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record.
    ///
    /// # Errors
    /// - [`StoreError::InvalidParameter`] for an empty identifier
    /// - [`StoreError::DuplicateId`] if `id` is already present
    /// - [`StoreError::EmptyVector`] for a zero-length vector
    /// - [`StoreError::DimensionMismatch`] if the store dimension is fixed
    ///   and `vector` disagrees with it
    pub fn add(&mut self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<(), StoreError> {
        if id.is_empty() {
            return Err(StoreError::InvalidParameter(
                "identifier must not be empty".into(),
            ));
        }
        if self.records.contains_key(id) {
            return Err(StoreError::DuplicateId(id.to_string()));
        }
        if vector.is_empty() {
            return Err(StoreError::EmptyVector);
        }
        match self.dimension {
            None => self.dimension = Some(vector.len()),
            Some(expected) if expected != vector.len() => {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
            Some(_) => {}
        }

        let unit = l2_normalize(&vector);
        self.records.insert(
            id.to_string(),
            VectorRecord {
                vector,
                unit,
                metadata,
            },
        );
        Ok(())
    }

    /// Fetch a record, or [`StoreError::NotFound`].
    pub fn get(&self, id: &str) -> Result<&VectorRecord, StoreError> {
        self.records
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Delete a record, returning it (callers use the returned record to
    /// roll back compound operations). [`StoreError::NotFound`] if absent.
    pub fn remove(&mut self, id: &str) -> Result<VectorRecord, StoreError> {
        self.records
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The fixed dimension, or `None` before the first insert.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Live identifiers in ascending order. The sorted order doubles as the
    /// persistent row order, so it must stay deterministic.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Memoized unit-normalized copy for `id`.
    pub fn unit(&self, id: &str) -> Option<&[f32]> {
        self.records.get(id).map(|r| r.unit.as_slice())
    }

    /// Metadata document for `id`.
    pub fn metadata(&self, id: &str) -> Option<&Value> {
        self.records.get(id).map(|r| &r.metadata)
    }

    /// Exact cosine k-NN over the whole store, the correctness fallback for
    /// the approximate index.
    ///
    /// Returns up to `k` `(id, similarity)` pairs in descending similarity,
    /// ties broken by ascending id. A `filter` restricts candidates to
    /// records whose metadata matches.
    ///
    /// # Errors
    /// [`StoreError::DimensionMismatch`] if `query` disagrees with the store
    /// dimension.
    pub fn search_brute(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        if self.records.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let expected = self.dimension.unwrap_or(query.len());
        if query.len() != expected {
            return Err(StoreError::DimensionMismatch {
                expected,
                got: query.len(),
            });
        }

        let query_unit = l2_normalize(query);
        let mut heap: BinaryHeap<BruteHit> = BinaryHeap::with_capacity(k + 1);

        for (id, record) in &self.records {
            if let Some(f) = filter {
                if !f.matches(&record.metadata) {
                    continue;
                }
            }
            // Both sides are unit-normalized (zero vectors stay zero), so
            // the dot product is the cosine similarity.
            let sim = dot(&query_unit, &record.unit);

            if heap.len() >= k {
                if let Some(worst) = heap.peek() {
                    let keep = sim > worst.sim || (sim == worst.sim && *id < worst.id);
                    if !keep {
                        continue;
                    }
                }
            }
            heap.push(BruteHit {
                sim,
                id: id.clone(),
            });
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut hits: Vec<(String, f32)> = heap.into_iter().map(|h| (h.id, h.sim)).collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(hits)
    }
}
