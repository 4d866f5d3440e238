//! Human-readable and `--json` rendering of command results.

use serde_json::{json, Value};

use vecstream_core::{Collection, CollectionStats};

/// Render search hits. JSON mode emits an array of
/// `{id, similarity, metadata}`; human mode a compact table with the
/// `text` metadata field as a snippet when present.
pub fn print_hits(hits: &[(String, f32)], collection: &Collection, as_json: bool) {
    if as_json {
        let rows: Vec<Value> = hits
            .iter()
            .map(|(id, sim)| {
                let metadata = collection
                    .get_vector_with_metadata(id)
                    .map(|(_, m)| m)
                    .unwrap_or(Value::Null);
                json!({"id": id, "similarity": sim, "metadata": metadata})
            })
            .collect();
        println!("{}", Value::Array(rows));
        return;
    }

    if hits.is_empty() {
        println!("No matching documents found.");
        return;
    }
    println!("{:<24} {:>10}  {}", "ID", "SIMILARITY", "TEXT");
    for (id, sim) in hits {
        let snippet = collection
            .get_vector_with_metadata(id)
            .ok()
            .and_then(|(_, m)| m.get("text").and_then(|t| t.as_str()).map(truncate))
            .unwrap_or_default();
        println!("{id:<24} {sim:>10.4}  {snippet}");
    }
}

pub fn print_stats(stats: &CollectionStats, as_json: bool) {
    if as_json {
        match serde_json::to_string_pretty(stats) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("error: serialize stats: {e}"),
        }
        return;
    }
    println!("collection: {}", stats.name);
    println!("  vectors:          {}", stats.count);
    match stats.dimension {
        Some(d) => println!("  dimension:        {d}"),
        None => println!("  dimension:        (unset)"),
    }
    println!("  index:            {}", if stats.hnsw { "hnsw" } else { "brute" });
    println!(
        "  hnsw params:      M={} efConstruction={} efSearch={} seed={}",
        stats.params.m, stats.params.ef_construction, stats.params.ef_search, stats.params.seed
    );
    println!("  dirty:            {}", stats.dirty);
    println!("  deleted fraction: {:.2}", stats.deleted_fraction);
    println!("  vectors bytes:    {}", stats.vectors_bytes);
    println!("  metadata bytes:   {}", stats.metadata_bytes);
}

fn truncate(text: &str) -> String {
    const MAX: usize = 60;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX - 3).collect();
        format!("{cut}...")
    }
}
