//! Hierarchical Navigable Small World index over store identifiers.
//!
//! The graph holds no vector data of its own: every distance evaluation goes
//! through the owning [`VectorStore`]'s memoized unit-normalized copies, so
//! the index and the store cannot drift apart on vector contents. Layers are
//! drawn from a geometric distribution with multiplier `1/ln(M)` using a
//! seeded RNG — two indexes built with the same seed and insertion order are
//! structurally identical.
//!
//! Layer invariants maintained by every mutation:
//! - an edge `(a, b)` at layer ℓ exists only when both endpoints have a
//!   level ≥ ℓ, and always in both directions;
//! - neighbor lists never exceed `Mmax(ℓ)` (`2M` at layer 0, `M` above);
//!   trimming keeps the closest;
//! - the entry point is a node of maximum level.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::filter::MetadataFilter;
use crate::similarity::unit_cosine_distance;
use crate::store::VectorStore;

/// Initial oversample multiplier for filtered search.
const OVERSAMPLE_INITIAL: usize = 10;
/// Oversample ceiling; past it the search falls back to an exact scan.
const OVERSAMPLE_CAP: usize = 64;

fn default_m() -> usize {
    16
}
fn default_ef_construction() -> usize {
    200
}
fn default_ef_search() -> usize {
    50
}
fn default_seed() -> u64 {
    42
}

/// Tunable index parameters. Persisted inside `config.json`, so unknown
/// future fields fall back to defaults on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Target neighbor count per node per layer.
    #[serde(default = "default_m")]
    pub m: usize,
    /// Candidate-pool size while building.
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    /// Default candidate-pool size while querying.
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    /// Seed for level assignment.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            seed: default_seed(),
        }
    }
}

impl HnswParams {
    /// Hard cap for a neighbor list at `layer`.
    pub fn m_max(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    /// Level multiplier `mL = 1/ln(M)`.
    pub fn level_multiplier(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.m < 2 {
            return Err(StoreError::InvalidParameter(format!(
                "M must be at least 2, got {}",
                self.m
            )));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(StoreError::InvalidParameter(
                "ef_construction and ef_search must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A scored candidate. Natural order is ascending distance, ties broken by
/// ascending id, so a max-heap keeps the worst candidate on top and a
/// sorted `Vec` reads best-first.
#[derive(Debug, Clone)]
struct Candidate {
    dist: f32,
    id: String,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.id == other.id
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Multi-layer proximity graph over string identifiers.
#[derive(Debug)]
pub struct HnswIndex {
    params: HnswParams,
    /// id → top layer of the node.
    levels: HashMap<String, usize>,
    /// id → one neighbor set per layer `0..=levels[id]`.
    neighbors: HashMap<String, Vec<BTreeSet<String>>>,
    /// Node of current maximum level; `None` when empty.
    entry_point: Option<String>,
    rng: StdRng,
}

impl HnswIndex {
    pub fn new(params: HnswParams) -> Result<Self, StoreError> {
        params.validate()?;
        let rng = StdRng::seed_from_u64(params.seed);
        Ok(Self {
            params,
            levels: HashMap::new(),
            neighbors: HashMap::new(),
            entry_point: None,
            rng,
        })
    }

    /// Reassemble from a persisted snapshot. Verifies the layer/edge
    /// invariants; a snapshot that fails them is rejected with
    /// [`StoreError::IndexInconsistency`] (callers then rebuild).
    pub(crate) fn from_parts(
        params: HnswParams,
        levels: HashMap<String, usize>,
        neighbors: HashMap<String, Vec<BTreeSet<String>>>,
        entry_point: Option<String>,
    ) -> Result<Self, StoreError> {
        params.validate()?;
        if levels.len() != neighbors.len() {
            return Err(StoreError::IndexInconsistency(
                "level and neighbor tables disagree".into(),
            ));
        }
        let mut max_level = None;
        for (id, &level) in &levels {
            let layers = neighbors.get(id).ok_or_else(|| {
                StoreError::IndexInconsistency(format!("no neighbor lists for '{id}'"))
            })?;
            if layers.len() != level + 1 {
                return Err(StoreError::IndexInconsistency(format!(
                    "'{id}' has level {level} but {} layers",
                    layers.len()
                )));
            }
            for (layer, set) in layers.iter().enumerate() {
                if set.len() > params.m_max(layer) {
                    return Err(StoreError::IndexInconsistency(format!(
                        "'{id}' exceeds Mmax at layer {layer}"
                    )));
                }
                for n in set {
                    match levels.get(n) {
                        Some(&nl) if nl >= layer => {}
                        _ => {
                            return Err(StoreError::IndexInconsistency(format!(
                                "edge ({id} → {n}) at layer {layer} has an invalid endpoint"
                            )))
                        }
                    }
                    let back = neighbors
                        .get(n)
                        .and_then(|l| l.get(layer))
                        .map(|s| s.contains(id))
                        .unwrap_or(false);
                    if !back {
                        return Err(StoreError::IndexInconsistency(format!(
                            "edge ({id} → {n}) at layer {layer} is not symmetric"
                        )));
                    }
                }
            }
            max_level = Some(max_level.map_or(level, |m: usize| m.max(level)));
        }
        match (&entry_point, max_level) {
            (None, None) => {}
            (Some(ep), Some(m)) if levels.get(ep.as_str()) == Some(&m) => {}
            _ => {
                return Err(StoreError::IndexInconsistency(
                    "entry point is not a node of maximum level".into(),
                ));
            }
        }
        let rng = StdRng::seed_from_u64(params.seed);
        Ok(Self {
            params,
            levels,
            neighbors,
            entry_point,
            rng,
        })
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.levels.contains_key(id)
    }

    pub fn entry_point(&self) -> Option<&str> {
        self.entry_point.as_deref()
    }

    pub fn level(&self, id: &str) -> Option<usize> {
        self.levels.get(id).copied()
    }

    /// Neighbor ids of `id` at `layer`, in ascending order.
    pub fn neighbors_at(&self, id: &str, layer: usize) -> Vec<String> {
        self.neighbors
            .get(id)
            .and_then(|layers| layers.get(layer))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn levels_map(&self) -> &HashMap<String, usize> {
        &self.levels
    }

    pub(crate) fn neighbor_layers(&self, id: &str) -> Option<&Vec<BTreeSet<String>>> {
        self.neighbors.get(id)
    }

    /// Draw a level from the geometric distribution `⌊−ln(U) · mL⌋`.
    fn draw_level(&mut self) -> usize {
        let u: f64 = self.rng.gen::<f64>().max(1e-15);
        (-u.ln() * self.params.level_multiplier()) as usize
    }

    /// Distance from `query_unit` to a stored node, via the store's
    /// memoized unit copy.
    fn dist(
        &self,
        store: &VectorStore,
        query_unit: &[f32],
        id: &str,
    ) -> Result<f32, StoreError> {
        let unit = store.unit(id).ok_or_else(|| {
            StoreError::IndexInconsistency(format!("indexed id '{id}' missing from store"))
        })?;
        Ok(unit_cosine_distance(query_unit, unit))
    }

    /// Candidate-pool search at a single layer. Returns up to `ef` nodes
    /// sorted ascending by distance (ties ascending by id).
    ///
    /// Two heaps drive the expansion: a min-heap of candidates still to
    /// expand and a max-heap of the best `ef` results seen, whose top is the
    /// current worst — expansion stops when the nearest unexpanded candidate
    /// cannot improve on it.
    fn search_layer(
        &self,
        store: &VectorStore,
        query_unit: &[f32],
        entry_id: &str,
        ef: usize,
        layer: usize,
    ) -> Result<Vec<Candidate>, StoreError> {
        let entry_dist = self.dist(store, query_unit, entry_id)?;

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(entry_id.to_string());

        let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        candidates.push(Reverse(Candidate {
            dist: entry_dist,
            id: entry_id.to_string(),
        }));

        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();
        results.push(Candidate {
            dist: entry_dist,
            id: entry_id.to_string(),
        });

        while let Some(Reverse(nearest)) = candidates.pop() {
            let worst = results.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
            if nearest.dist > worst && results.len() >= ef {
                break;
            }

            if let Some(set) = self
                .neighbors
                .get(&nearest.id)
                .and_then(|layers| layers.get(layer))
            {
                for neighbor in set {
                    if !visited.insert(neighbor.clone()) {
                        continue;
                    }
                    let d = self.dist(store, query_unit, neighbor)?;
                    let worst = results.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
                    if results.len() < ef || d < worst {
                        candidates.push(Reverse(Candidate {
                            dist: d,
                            id: neighbor.clone(),
                        }));
                        results.push(Candidate {
                            dist: d,
                            id: neighbor.clone(),
                        });
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out = results.into_vec();
        out.sort();
        Ok(out)
    }

    /// Greedy 1-best descent from `from_layer` down to `to_layer`
    /// (inclusive). At each layer the walk moves to the globally best
    /// neighbor until no neighbor improves; ties prefer the smaller id so
    /// the walk is deterministic.
    fn greedy_descend(
        &self,
        store: &VectorStore,
        query_unit: &[f32],
        mut current: String,
        from_layer: usize,
        to_layer: usize,
    ) -> Result<String, StoreError> {
        for layer in (to_layer..=from_layer).rev() {
            loop {
                let mut best_dist = self.dist(store, query_unit, &current)?;
                let mut best_id = current.clone();
                if let Some(set) = self
                    .neighbors
                    .get(&current)
                    .and_then(|layers| layers.get(layer))
                {
                    for n in set {
                        let d = self.dist(store, query_unit, n)?;
                        if d < best_dist || (d == best_dist && *n < best_id) {
                            best_dist = d;
                            best_id = n.clone();
                        }
                    }
                }
                if best_id == current {
                    break;
                }
                current = best_id;
            }
        }
        Ok(current)
    }

    /// Diverse neighbor selection: walking candidates in ascending distance
    /// to the owner, a candidate is kept only if it is closer to the owner
    /// than to every neighbor already kept. Prunes near-collinear neighbors
    /// and preserves long-range links.
    fn select_diverse(
        &self,
        store: &VectorStore,
        candidates: &[Candidate],
        m: usize,
    ) -> Result<Vec<String>, StoreError> {
        let mut kept: Vec<(&Candidate, &[f32])> = Vec::with_capacity(m);
        for c in candidates {
            if kept.len() >= m {
                break;
            }
            let c_unit = store.unit(&c.id).ok_or_else(|| {
                StoreError::IndexInconsistency(format!("indexed id '{}' missing from store", c.id))
            })?;
            let diverse = kept
                .iter()
                .all(|(_, n_unit)| c.dist < unit_cosine_distance(c_unit, n_unit));
            if diverse {
                kept.push((c, c_unit));
            }
        }
        Ok(kept.into_iter().map(|(c, _)| c.id.clone()).collect())
    }

    /// Re-select the `m_max` closest neighbors of `owner` at `layer`,
    /// removing dropped edges symmetrically.
    fn trim_neighbors(
        &mut self,
        store: &VectorStore,
        owner: &str,
        layer: usize,
        m_max: usize,
    ) -> Result<(), StoreError> {
        let owner_unit = store
            .unit(owner)
            .ok_or_else(|| {
                StoreError::IndexInconsistency(format!("indexed id '{owner}' missing from store"))
            })?
            .to_vec();

        let current: Vec<String> = match self.neighbors.get(owner).and_then(|l| l.get(layer)) {
            Some(set) if set.len() > m_max => set.iter().cloned().collect(),
            _ => return Ok(()),
        };

        let mut scored = Vec::with_capacity(current.len());
        for id in current {
            let d = self.dist(store, &owner_unit, &id)?;
            scored.push(Candidate { dist: d, id });
        }
        scored.sort();

        let keep: BTreeSet<String> = scored.iter().take(m_max).map(|c| c.id.clone()).collect();
        let dropped: Vec<String> = scored.iter().skip(m_max).map(|c| c.id.clone()).collect();

        if let Some(list) = self.neighbors.get_mut(owner).and_then(|l| l.get_mut(layer)) {
            *list = keep;
        }
        for d in dropped {
            if let Some(list) = self.neighbors.get_mut(&d).and_then(|l| l.get_mut(layer)) {
                list.remove(owner);
            }
        }
        Ok(())
    }

    /// Insert `id` (already present in `store`) into the graph.
    ///
    /// On error no partial edges survive: the node is erased again before
    /// the error is surfaced.
    pub fn insert(&mut self, id: &str, store: &VectorStore) -> Result<(), StoreError> {
        if self.levels.contains_key(id) {
            return Err(StoreError::DuplicateId(id.to_string()));
        }
        match self.insert_inner(id, store) {
            Ok(()) => Ok(()),
            Err(e) => {
                // No partial edges survive a failed insert.
                self.remove(id);
                Err(e)
            }
        }
    }

    fn insert_inner(&mut self, id: &str, store: &VectorStore) -> Result<(), StoreError> {
        let query_unit = store
            .unit(id)
            .ok_or_else(|| {
                StoreError::IndexInconsistency(format!("inserted id '{id}' missing from store"))
            })?
            .to_vec();
        let level = self.draw_level();

        let Some(entry) = self.entry_point.clone() else {
            self.levels.insert(id.to_string(), level);
            self.neighbors
                .insert(id.to_string(), vec![BTreeSet::new(); level + 1]);
            self.entry_point = Some(id.to_string());
            return Ok(());
        };
        let top = *self.levels.get(&entry).ok_or_else(|| {
            StoreError::IndexInconsistency("entry point missing from level table".into())
        })?;

        let mut current = entry;
        if top > level {
            current = self.greedy_descend(store, &query_unit, current, top, level + 1)?;
        }

        self.levels.insert(id.to_string(), level);
        self.neighbors
            .insert(id.to_string(), vec![BTreeSet::new(); level + 1]);

        for layer in (0..=level.min(top)).rev() {
            let pool =
                self.search_layer(store, &query_unit, &current, self.params.ef_construction, layer)?;
            let selected = self.select_diverse(store, &pool, self.params.m)?;
            let m_max = self.params.m_max(layer);

            for neighbor in &selected {
                if let Some(list) = self.neighbors.get_mut(id).and_then(|l| l.get_mut(layer)) {
                    list.insert(neighbor.clone());
                }
                let overflow = match self
                    .neighbors
                    .get_mut(neighbor)
                    .and_then(|l| l.get_mut(layer))
                {
                    Some(list) => {
                        list.insert(id.to_string());
                        list.len() > m_max
                    }
                    None => {
                        return Err(StoreError::IndexInconsistency(format!(
                            "selected neighbor '{neighbor}' has no layer {layer}"
                        )))
                    }
                };
                if overflow {
                    self.trim_neighbors(store, neighbor, layer, m_max)?;
                }
            }

            if let Some(closest) = pool.first() {
                current = closest.id.clone();
            }
        }

        if level > top {
            self.entry_point = Some(id.to_string());
        }
        Ok(())
    }

    /// Erase `id` from the graph: its level, its neighbor lists, and every
    /// back-edge pointing at it. A no-op when the id is not indexed. If the
    /// entry point is erased, a remaining node of maximum level takes over
    /// (smallest id on ties).
    pub fn remove(&mut self, id: &str) {
        if self.levels.remove(id).is_none() {
            return;
        }
        if let Some(layers) = self.neighbors.remove(id) {
            for (layer, set) in layers.iter().enumerate() {
                for n in set {
                    if let Some(list) = self.neighbors.get_mut(n).and_then(|l| l.get_mut(layer)) {
                        list.remove(id);
                    }
                }
            }
        }
        if self.entry_point.as_deref() == Some(id) {
            self.entry_point = self
                .levels
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                .map(|(id, _)| id.clone());
        }
    }

    /// Approximate k-NN. Returns up to `k` `(id, distance)` pairs in
    /// ascending distance, ties ascending by id.
    pub fn search(
        &self,
        store: &VectorStore,
        query_unit: &[f32],
        k: usize,
        ef: usize,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        let pool = self.pool_search(store, query_unit, ef.max(k))?;
        Ok(pool.into_iter().take(k).map(|c| (c.id, c.dist)).collect())
    }

    /// Full candidate-pool search at layer 0 after greedy descent; returns
    /// the whole pool sorted ascending.
    fn pool_search(
        &self,
        store: &VectorStore,
        query_unit: &[f32],
        ef: usize,
    ) -> Result<Vec<Candidate>, StoreError> {
        let Some(entry) = self.entry_point.clone() else {
            return Ok(Vec::new());
        };
        let top = *self.levels.get(&entry).ok_or_else(|| {
            StoreError::IndexInconsistency("entry point missing from level table".into())
        })?;
        let mut current = entry;
        if top > 0 {
            current = self.greedy_descend(store, query_unit, current, top, 1)?;
        }
        self.search_layer(store, query_unit, &current, ef, 0)
    }

    /// Filter-aware k-NN. The candidate pool is inflated by an oversample
    /// multiplier (starting at 10, doubling up to 64) and the predicate is
    /// applied after expansion; when even the capped pool yields fewer than
    /// `k` matches, falls back to the store's exact scan so a selective
    /// predicate can never silently lose results.
    pub fn filtered_search(
        &self,
        store: &VectorStore,
        query_unit: &[f32],
        k: usize,
        ef: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        if self.entry_point.is_none() || k == 0 {
            return Ok(Vec::new());
        }

        let mut oversample = OVERSAMPLE_INITIAL;
        let mut last_ef = None;
        loop {
            let ef_eff = ef.max(k.saturating_mul(oversample));
            if last_ef == Some(ef_eff) {
                // The pool stopped growing; doubling further is a no-op.
                break;
            }
            last_ef = Some(ef_eff);
            let pool = self.pool_search(store, query_unit, ef_eff)?;
            let hits: Vec<(String, f32)> = pool
                .into_iter()
                .filter(|c| {
                    store
                        .metadata(&c.id)
                        .map(|m| filter.matches(m))
                        .unwrap_or(false)
                })
                .take(k)
                .map(|c| (c.id, c.dist))
                .collect();
            if hits.len() >= k {
                return Ok(hits);
            }
            if oversample >= OVERSAMPLE_CAP || ef_eff >= self.levels.len() {
                break;
            }
            oversample = (oversample * 2).min(OVERSAMPLE_CAP);
        }

        let brute = store.search_brute(query_unit, k, Some(filter))?;
        Ok(brute
            .into_iter()
            .map(|(id, sim)| (id, (1.0 - sim).clamp(0.0, 2.0)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn populated(entries: &[(&str, &[f32])]) -> (VectorStore, HnswIndex) {
        let mut store = VectorStore::new();
        let mut index = HnswIndex::new(HnswParams::default()).unwrap();
        for (id, v) in entries {
            store.add(id, v.to_vec(), Value::Null).unwrap();
            index.insert(id, &store).unwrap();
        }
        (store, index)
    }

    fn assert_graph_invariants(index: &HnswIndex) {
        let mut max_level = None;
        for id in index.levels_map().keys() {
            let level = index.level(id).unwrap();
            max_level = Some(max_level.map_or(level, |m: usize| m.max(level)));
            for layer in 0..=level {
                let ns = index.neighbors_at(id, layer);
                assert!(
                    ns.len() <= index.params().m_max(layer),
                    "'{id}' over Mmax at layer {layer}"
                );
                for n in &ns {
                    assert!(
                        index.level(n).unwrap() >= layer,
                        "edge ({id} → {n}) above '{n}' level"
                    );
                    assert!(
                        index.neighbors_at(n, layer).contains(&id.to_string()),
                        "edge ({id} → {n}) at layer {layer} not symmetric"
                    );
                }
            }
        }
        match (index.entry_point(), max_level) {
            (None, None) => {}
            (Some(ep), Some(m)) => assert_eq!(index.level(ep), Some(m)),
            other => panic!("entry point / level mismatch: {other:?}"),
        }
    }

    #[test]
    fn basic_cosine_ordering() {
        let (store, index) = populated(&[
            ("a", &[1.0, 0.0, 0.0]),
            ("b", &[0.0, 1.0, 0.0]),
            ("c", &[0.9, 0.1, 0.0]),
        ]);
        let q = crate::similarity::l2_normalize(&[1.0, 0.0, 0.0]);
        let hits = index.search(&store, &q, 3, 50).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, "a");
        assert_eq!(hits[1].0, "c");
        assert_eq!(hits[2].0, "b");
        assert!(hits[0].1 < 1e-6);
        assert!((hits[2].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_index_returns_empty() {
        let store = VectorStore::new();
        let index = HnswIndex::new(HnswParams::default()).unwrap();
        assert!(index.search(&store, &[1.0, 0.0], 5, 50).unwrap().is_empty());
    }

    #[test]
    fn duplicate_insert_rejected() {
        let (store, mut index) = populated(&[("a", &[1.0, 0.0])]);
        assert!(matches!(
            index.insert("a", &store).unwrap_err(),
            StoreError::DuplicateId(_)
        ));
    }

    #[test]
    fn determinism_under_fixed_seed() {
        let entries: Vec<(String, Vec<f32>)> = (0..120)
            .map(|i| {
                let x = (i as f32 * 0.37).sin();
                let y = (i as f32 * 0.91).cos();
                let z = (i as f32 * 0.13).sin();
                (format!("v{i:03}"), vec![x, y, z])
            })
            .collect();

        let build = || {
            let mut store = VectorStore::new();
            let mut index = HnswIndex::new(HnswParams::default()).unwrap();
            for (id, v) in &entries {
                store.add(id, v.clone(), Value::Null).unwrap();
                index.insert(id, &store).unwrap();
            }
            (store, index)
        };
        let (_, a) = build();
        let (_, b) = build();

        assert_eq!(a.entry_point(), b.entry_point());
        assert_eq!(a.levels_map(), b.levels_map());
        for id in a.levels_map().keys() {
            assert_eq!(a.neighbor_layers(id), b.neighbor_layers(id), "id {id}");
        }
    }

    #[test]
    fn invariants_hold_through_inserts_and_removes() {
        let entries: Vec<(String, Vec<f32>)> = (0..100)
            .map(|i| {
                let x = (i as f32 * 0.7).sin();
                let y = (i as f32 * 1.3).cos();
                (format!("n{i:03}"), vec![x, y, x * y, x - y])
            })
            .collect();
        let mut store = VectorStore::new();
        let mut index = HnswIndex::new(HnswParams::default()).unwrap();
        for (id, v) in &entries {
            store.add(id, v.clone(), Value::Null).unwrap();
            index.insert(id, &store).unwrap();
        }
        assert_graph_invariants(&index);

        // Remove every third node, entry point included at some step.
        for (i, (id, _)) in entries.iter().enumerate() {
            if i % 3 == 0 {
                store.remove(id).unwrap();
                index.remove(id);
            }
        }
        assert_graph_invariants(&index);
        assert_eq!(index.len(), store.size());

        let q = crate::similarity::l2_normalize(&[0.3, -0.2, 0.1, 0.9]);
        let hits = index.search(&store, &q, 10, 50).unwrap();
        assert_eq!(hits.len(), 10);
        for w in hits.windows(2) {
            assert!(w[0].1 <= w[1].1);
        }
    }

    #[test]
    fn entry_point_replaced_on_remove() {
        let entries: Vec<(String, Vec<f32>)> = (0..100)
            .map(|i| {
                let x = (i as f32 * 0.21).sin();
                let y = (i as f32 * 0.77).cos();
                (format!("e{i:03}"), vec![x, y])
            })
            .collect();
        let mut store = VectorStore::new();
        let mut index = HnswIndex::new(HnswParams::default()).unwrap();
        for (id, v) in &entries {
            store.add(id, v.clone(), Value::Null).unwrap();
            index.insert(id, &store).unwrap();
        }

        let old_ep = index.entry_point().unwrap().to_string();
        store.remove(&old_ep).unwrap();
        index.remove(&old_ep);

        let new_ep = index.entry_point().unwrap().to_string();
        assert_ne!(new_ep, old_ep);
        let max = index.levels_map().values().copied().max().unwrap();
        assert_eq!(index.level(&new_ep), Some(max));
        assert_graph_invariants(&index);

        let q = crate::similarity::l2_normalize(&[0.5, 0.5]);
        assert_eq!(index.search(&store, &q, 5, 50).unwrap().len(), 5);
    }

    #[test]
    fn removing_last_node_clears_entry_point() {
        let (mut store, mut index) = populated(&[("only", &[1.0, 0.0])]);
        store.remove("only").unwrap();
        index.remove("only");
        assert_eq!(index.entry_point(), None);
        assert!(index.is_empty());
    }

    #[test]
    fn filtered_search_falls_back_to_exact_scan() {
        let mut store = VectorStore::new();
        let mut index = HnswIndex::new(HnswParams::default()).unwrap();
        for i in 0..200 {
            let id = format!("f{i:03}");
            let meta = if i % 67 == 0 {
                json!({"cat": "rare"})
            } else {
                json!({"cat": "common"})
            };
            let x = (i as f32 * 0.11).sin();
            let y = (i as f32 * 0.29).cos();
            store.add(&id, vec![x, y, 0.5], meta).unwrap();
            index.insert(&id, &store).unwrap();
        }
        // Only ids 0, 67, 134 match: fewer than k → exact-scan fallback,
        // exactly the global match count, no padding.
        let filter = MetadataFilter::new().with("cat", json!("rare"));
        let q = crate::similarity::l2_normalize(&[0.1, 0.2, 0.3]);
        let hits = index.filtered_search(&store, &q, 5, 50, &filter).unwrap();
        assert_eq!(hits.len(), 3);
        let mut ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["f000", "f067", "f134"]);
    }

    #[test]
    fn filtered_search_returns_top_k_matches() {
        let mut store = VectorStore::new();
        let mut index = HnswIndex::new(HnswParams::default()).unwrap();
        for i in 0..60 {
            let id = format!("g{i:02}");
            let meta = json!({"cat": if i % 2 == 0 { "even" } else { "odd" }});
            let x = (i as f32 * 0.41).sin();
            let y = (i as f32 * 0.17).cos();
            store.add(&id, vec![x, y], meta).unwrap();
            index.insert(&id, &store).unwrap();
        }
        let filter = MetadataFilter::new().with("cat", json!("even"));
        let q = crate::similarity::l2_normalize(&[0.7, 0.7]);
        let hits = index.filtered_search(&store, &q, 4, 50, &filter).unwrap();
        assert_eq!(hits.len(), 4);
        for (id, _) in &hits {
            let n: usize = id[1..].parse().unwrap();
            assert_eq!(n % 2, 0);
        }
        for w in hits.windows(2) {
            assert!(w[0].1 <= w[1].1);
        }
    }

    #[test]
    fn invalid_params_rejected() {
        let bad = HnswParams {
            m: 1,
            ..HnswParams::default()
        };
        assert!(matches!(
            HnswIndex::new(bad).unwrap_err(),
            StoreError::InvalidParameter(_)
        ));
    }
}
