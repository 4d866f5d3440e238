//! End-to-end tests over the public surface: collections, filtered search,
//! and randomized add/remove sequences.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use vecstream_core::{CollectionManager, HnswParams, MetadataFilter, StoreError};

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

fn open_temp_manager() -> (CollectionManager, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().unwrap();
    let manager = CollectionManager::open(dir.path()).unwrap();
    (manager, dir)
}

fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

// ─────────────────────────────────────────────
// Randomized operation sequences
// ─────────────────────────────────────────────

#[test]
fn size_and_ids_track_random_operations() {
    let (manager, _dir) = open_temp_manager();
    let shared = manager.create_collection("ops", None).unwrap();
    let mut rng = StdRng::seed_from_u64(7);

    let mut live: BTreeSet<String> = BTreeSet::new();
    let mut inserts = 0usize;
    let mut removes = 0usize;

    for step in 0..400 {
        let mut c = shared.write();
        if live.is_empty() || rng.gen_bool(0.7) {
            let id = format!("id{step:04}");
            c.add_vector(&id, random_vector(&mut rng, 8), None).unwrap();
            live.insert(id);
            inserts += 1;
        } else {
            let victim = live
                .iter()
                .nth(rng.gen_range(0..live.len()))
                .cloned()
                .unwrap();
            c.remove_vector(&victim).unwrap();
            live.remove(&victim);
            removes += 1;
        }
    }

    let c = shared.read();
    assert_eq!(c.size(), inserts - removes);
    let ids: BTreeSet<String> = c.ids().into_iter().collect();
    assert_eq!(ids, live);
}

#[test]
fn search_results_are_well_formed() {
    let (manager, _dir) = open_temp_manager();
    let shared = manager.create_collection("wellformed", None).unwrap();
    let mut rng = StdRng::seed_from_u64(11);

    {
        let mut c = shared.write();
        for i in 0..150 {
            c.add_vector(&format!("w{i:03}"), random_vector(&mut rng, 6), None)
                .unwrap();
        }
    }

    let c = shared.read();
    for _ in 0..20 {
        let q = random_vector(&mut rng, 6);
        let hits = c.search_similar(&q, 10, None, None, None).unwrap();
        assert!(hits.len() <= 10);
        for (id, sim) in &hits {
            assert!(c.get_vector(id).is_ok(), "unknown id '{id}' in results");
            assert!(*sim >= -1.0 - 1e-6 && *sim <= 1.0 + 1e-6);
        }
        for pair in hits.windows(2) {
            assert!(pair[0].1 >= pair[1].1, "results not sorted descending");
        }
    }
}

#[test]
fn non_negative_inputs_give_similarities_in_unit_range() {
    let (manager, _dir) = open_temp_manager();
    let shared = manager.create_collection("nonneg", None).unwrap();
    let mut rng = StdRng::seed_from_u64(13);

    {
        let mut c = shared.write();
        for i in 0..80 {
            let v: Vec<f32> = (0..5).map(|_| rng.gen_range(0.0..1.0)).collect();
            c.add_vector(&format!("n{i:02}"), v, None).unwrap();
        }
    }

    let c = shared.read();
    let q: Vec<f32> = (0..5).map(|_| rng.gen_range(0.0..1.0)).collect();
    for (_, sim) in c.search_similar(&q, 20, None, None, None).unwrap() {
        assert!((-1e-6..=1.0 + 1e-6).contains(&sim));
    }
}

// ─────────────────────────────────────────────
// Filtered search
// ─────────────────────────────────────────────

#[test]
fn selective_filter_returns_exactly_the_global_matches() {
    let (manager, _dir) = open_temp_manager();
    let shared = manager.create_collection("selective", None).unwrap();
    let mut rng = StdRng::seed_from_u64(17);

    let rare = ["k0042", "k0419", "k0777"];
    {
        let mut c = shared.write();
        for i in 0..1000 {
            let id = format!("k{i:04}");
            let meta = if rare.contains(&id.as_str()) {
                json!({"tier": "gold"})
            } else {
                json!({"tier": "basic"})
            };
            c.add_vector(&id, random_vector(&mut rng, 12), Some(meta))
                .unwrap();
        }
    }

    // Only 3 of 1000 match: the result is exactly those 3, not padded and
    // not an error.
    let filter = MetadataFilter::new().with("tier", json!("gold"));
    let c = shared.read();
    let q = random_vector(&mut rng, 12);
    let hits = c.search_similar(&q, 5, None, Some(&filter), None).unwrap();
    assert_eq!(hits.len(), 3);
    let mut found: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
    found.sort_unstable();
    assert_eq!(found, rare);
}

#[test]
fn filtered_results_are_a_subset_of_the_matching_set() {
    let (manager, _dir) = open_temp_manager();
    let shared = manager.create_collection("subset", None).unwrap();
    let mut rng = StdRng::seed_from_u64(19);

    {
        let mut c = shared.write();
        for i in 0..300 {
            let meta = json!({"lang": if i % 3 == 0 { "rust" } else { "other" }});
            c.add_vector(&format!("s{i:03}"), random_vector(&mut rng, 4), Some(meta))
                .unwrap();
        }
    }

    let filter = MetadataFilter::new().with("lang", json!("rust"));
    let c = shared.read();
    let q = random_vector(&mut rng, 4);
    let hits = c.search_similar(&q, 20, None, Some(&filter), None).unwrap();
    assert_eq!(hits.len(), 20);
    for (id, _) in &hits {
        let (_, meta) = c.get_vector_with_metadata(id).unwrap();
        assert_eq!(meta["lang"], "rust");
    }
}

#[test]
fn nested_filter_with_dot_path() {
    let (manager, _dir) = open_temp_manager();
    let shared = manager.create_collection("nested", None).unwrap();

    {
        let mut c = shared.write();
        c.add_vector(
            "doc1",
            vec![1.0, 0.0],
            Some(json!({"author": {"name": "ada", "tags": ["pioneer", "math"]}})),
        )
        .unwrap();
        c.add_vector(
            "doc2",
            vec![0.9, 0.1],
            Some(json!({"author": {"name": "bob", "tags": ["ops"]}})),
        )
        .unwrap();
    }

    let c = shared.read();
    let by_name = MetadataFilter::new().with("author.name", json!("ada"));
    let hits = c
        .search_similar(&[1.0, 0.0], 5, None, Some(&by_name), None)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, "doc1");

    // Scalar membership against an array field.
    let by_tag = MetadataFilter::new().with("author.tags", json!("math"));
    let hits = c
        .search_similar(&[1.0, 0.0], 5, None, Some(&by_tag), None)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, "doc1");
}

// ─────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────

#[test]
fn concurrent_readers_share_a_collection() {
    let (manager, _dir) = open_temp_manager();
    let shared = manager.create_collection("readers", None).unwrap();
    let mut rng = StdRng::seed_from_u64(23);

    {
        let mut c = shared.write();
        for i in 0..200 {
            c.add_vector(&format!("c{i:03}"), random_vector(&mut rng, 8), None)
                .unwrap();
        }
    }

    let queries: Arc<Vec<Vec<f32>>> =
        Arc::new((0..8).map(|_| random_vector(&mut rng, 8)).collect());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let shared = Arc::clone(&shared);
            let queries = Arc::clone(&queries);
            std::thread::spawn(move || {
                for q in queries.iter() {
                    let hits = shared.read().search_similar(q, 5, None, None, None).unwrap();
                    assert_eq!(hits.len(), 5);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn distinct_collections_mutate_in_parallel() {
    let (manager, _dir) = open_temp_manager();
    let manager = Arc::new(manager);
    let a = manager.create_collection("left", None).unwrap();
    let b = manager.create_collection("right", None).unwrap();

    let writer = |shared: vecstream_core::SharedCollection, tag: &'static str| {
        std::thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(29);
            for i in 0..100 {
                shared
                    .write()
                    .add_vector(&format!("{tag}{i:03}"), random_vector(&mut rng, 4), None)
                    .unwrap();
            }
        })
    };
    let ha = writer(a.clone(), "a");
    let hb = writer(b.clone(), "b");
    ha.join().unwrap();
    hb.join().unwrap();

    assert_eq!(a.read().size(), 100);
    assert_eq!(b.read().size(), 100);
}

// ─────────────────────────────────────────────
// Parameter plumbing
// ─────────────────────────────────────────────

#[test]
fn custom_params_are_persisted_per_collection() {
    let dir = tempfile::TempDir::new().unwrap();
    let params = HnswParams {
        m: 8,
        ef_construction: 120,
        ef_search: 30,
        seed: 99,
    };
    {
        let manager = CollectionManager::open(dir.path()).unwrap();
        let shared = manager
            .create_collection("tuned", Some(params.clone()))
            .unwrap();
        let mut c = shared.write();
        c.add_vector("a", vec![1.0, 0.0], None).unwrap();
        c.save().unwrap();
        assert_eq!(c.stats().params, params);
    }
    let manager = CollectionManager::open(dir.path()).unwrap();
    let stats = manager.get_collection_stats("tuned").unwrap();
    assert_eq!(stats.params, params);
}

#[test]
fn invalid_params_rejected_at_creation() {
    let (manager, _dir) = open_temp_manager();
    let bad = HnswParams {
        m: 1,
        ..HnswParams::default()
    };
    assert!(matches!(
        manager.create_collection("bad", Some(bad)).unwrap_err(),
        StoreError::InvalidParameter(_)
    ));
}
