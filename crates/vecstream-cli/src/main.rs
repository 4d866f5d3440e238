mod cli;
mod embed;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use vecstream_core::{CollectionManager, MetadataFilter, SharedCollection, StoreError};

use crate::cli::{Cli, Command};

const DEFAULT_COLLECTION: &str = "default";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Exit 1 for user errors (bad input, not-found), 2 for internal failures.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<StoreError>() {
        Some(e) if e.is_user_error() => 1,
        _ => 2,
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let root = cli.db_path.clone().unwrap_or_else(default_store_path);
    let manager = CollectionManager::open(&root)
        .with_context(|| format!("open store root {}", root.display()))?;
    let as_json = cli.json;

    match cli.command {
        Command::Add {
            text,
            id,
            collection,
            metadata,
            model,
        } => {
            let vector = embed::embed_text(&text, &model)?;
            let metadata = build_metadata(metadata, &text)?;
            let name = collection.as_deref().unwrap_or(DEFAULT_COLLECTION);
            let shared = get_or_create(&manager, name)?;
            let mut c = shared.write();
            c.add_vector(&id, vector, Some(metadata))?;
            c.save()?;
            if as_json {
                println!("{}", json!({"id": id, "collection": name}));
            } else {
                println!("Added document '{id}' to collection '{name}'.");
            }
        }

        Command::Search {
            text,
            k,
            threshold,
            filter,
            ef,
            collection,
            model,
        } => {
            let vector = embed::embed_text(&text, &model)?;
            let filter = filter
                .map(|raw| -> Result<MetadataFilter, StoreError> {
                    let value: Value = serde_json::from_str(&raw).map_err(|e| {
                        StoreError::InvalidParameter(format!("filter is not valid JSON: {e}"))
                    })?;
                    MetadataFilter::from_value(value)
                })
                .transpose()?;
            let name = collection.as_deref().unwrap_or(DEFAULT_COLLECTION);
            let shared = get_or_create(&manager, name)?;
            let c = shared.read();
            let hits = c.search_similar(&vector, k, ef, filter.as_ref(), Some(threshold))?;
            output::print_hits(&hits, &c, as_json);
        }

        Command::Get { id, collection } => {
            let name = collection.as_deref().unwrap_or(DEFAULT_COLLECTION);
            let shared = manager.get_collection(name)?;
            let c = shared.read();
            let (vector, metadata) = c.get_vector_with_metadata(&id)?;
            if as_json {
                println!(
                    "{}",
                    json!({"id": id, "dimension": vector.len(), "metadata": metadata})
                );
            } else {
                println!("Document '{id}' ({}-dimensional)", vector.len());
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            }
        }

        Command::Remove { id, collection } => {
            let name = collection.as_deref().unwrap_or(DEFAULT_COLLECTION);
            let shared = manager.get_collection(name)?;
            let mut c = shared.write();
            c.remove_vector(&id)?;
            c.save()?;
            if as_json {
                println!("{}", json!({"removed": id, "collection": name}));
            } else {
                println!("Removed document '{id}' from collection '{name}'.");
            }
        }

        Command::Info { collection } => match collection {
            Some(name) => {
                let stats = manager.get_collection_stats(&name)?;
                output::print_stats(&stats, as_json);
            }
            None => {
                let names = manager.list_collections();
                if as_json {
                    let rows: Vec<Value> = names
                        .iter()
                        .filter_map(|n| manager.get_collection_stats(n).ok())
                        .map(|s| serde_json::to_value(s).unwrap_or(Value::Null))
                        .collect();
                    println!("{}", Value::Array(rows));
                } else {
                    if names.is_empty() {
                        println!("No collections yet.");
                    }
                    for name in names {
                        if let Ok(stats) = manager.get_collection_stats(&name) {
                            println!(
                                "{:<24} {:>8} vectors  dim {:<6} index {}",
                                stats.name,
                                stats.count,
                                stats
                                    .dimension
                                    .map(|d| d.to_string())
                                    .unwrap_or_else(|| "-".into()),
                                if stats.hnsw { "hnsw" } else { "brute" },
                            );
                        }
                    }
                    println!("\nStorage location: {}", root.display());
                }
            }
        },

        Command::Clear { collection } => {
            let name = collection.as_deref().unwrap_or(DEFAULT_COLLECTION);
            let shared = manager.get_collection(name)?;
            shared.write().clear()?;
            if as_json {
                println!("{}", json!({"cleared": name}));
            } else {
                println!("Cleared collection '{name}'.");
            }
        }

        Command::Collection { action } => run_collection_action(&manager, action, as_json)?,
    }
    Ok(())
}

fn run_collection_action(
    manager: &CollectionManager,
    action: cli::CollectionAction,
    as_json: bool,
) -> anyhow::Result<()> {
    use crate::cli::CollectionAction;
    match action {
        CollectionAction::Create { name, no_hnsw } => {
            manager.create_collection_opts(&name, !no_hnsw, None)?;
            if as_json {
                println!("{}", json!({"created": name}));
            } else {
                println!("Created collection '{name}'.");
            }
        }
        CollectionAction::List => {
            let names = manager.list_collections();
            if as_json {
                println!("{}", json!(names));
            } else if names.is_empty() {
                println!("No collections yet.");
            } else {
                for name in names {
                    println!("{name}");
                }
            }
        }
        CollectionAction::Delete { name } => {
            if name == DEFAULT_COLLECTION {
                return Err(StoreError::InvalidParameter(
                    "the 'default' collection cannot be deleted".into(),
                )
                .into());
            }
            manager.delete_collection(&name)?;
            if as_json {
                println!("{}", json!({"deleted": name}));
            } else {
                println!("Deleted collection '{name}'.");
            }
        }
    }
    Ok(())
}

/// Parse `--metadata` JSON, defaulting to `{"text": ..., "timestamp": ...}`
/// and making sure the source text is always retrievable.
fn build_metadata(raw: Option<String>, text: &str) -> Result<Value, StoreError> {
    let mut metadata = match raw {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| {
            StoreError::InvalidParameter(format!("metadata is not valid JSON: {e}"))
        })?,
        None => json!({"text": text, "timestamp": unix_now()}),
    };
    if let Value::Object(map) = &mut metadata {
        map.entry("text".to_string())
            .or_insert_with(|| Value::String(text.to_string()));
    }
    Ok(metadata)
}

fn get_or_create(
    manager: &CollectionManager,
    name: &str,
) -> Result<SharedCollection, StoreError> {
    match manager.get_collection(name) {
        Ok(shared) => Ok(shared),
        Err(StoreError::NoSuchCollection(_)) => manager.create_collection(name, None),
        Err(e) => Err(e),
    }
}

fn default_store_path() -> PathBuf {
    if cfg!(windows) {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("VecStream").join("store");
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".vecstream").join("store");
    }
    PathBuf::from(".vecstream").join("store")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
