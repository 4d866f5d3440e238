use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// VecStream — a lightweight vector database with similarity search.
#[derive(Parser)]
#[command(name = "vecstream", version, about)]
pub struct Cli {
    /// Store root directory (default: ~/.vecstream/store, or
    /// %APPDATA%/VecStream/store on Windows).
    #[arg(long, env = "VECSTREAM_DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    /// Emit machine-readable JSON instead of human-readable output.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Add a document: TEXT is embedded and stored under ID.
    Add {
        text: String,
        id: String,
        /// Collection to add to (default: "default").
        #[arg(short, long)]
        collection: Option<String>,
        /// JSON metadata to attach to the document.
        #[arg(short, long)]
        metadata: Option<String>,
        /// Embedding model profile.
        #[arg(long, default_value = "mini")]
        model: String,
    },

    /// Search for documents similar to TEXT.
    Search {
        text: String,
        /// Number of results to return.
        #[arg(long, default_value_t = 5)]
        k: usize,
        /// Minimum similarity score for results.
        #[arg(long, default_value_t = 0.0)]
        threshold: f32,
        /// JSON metadata filter, e.g. '{"cat":"ai"}'.
        #[arg(short, long)]
        filter: Option<String>,
        /// Candidate-pool size override for the index.
        #[arg(long)]
        ef: Option<usize>,
        #[arg(short, long)]
        collection: Option<String>,
        #[arg(long, default_value = "mini")]
        model: String,
    },

    /// Show a document by ID.
    Get {
        id: String,
        #[arg(short, long)]
        collection: Option<String>,
    },

    /// Remove a document by ID.
    Remove {
        id: String,
        #[arg(short, long)]
        collection: Option<String>,
    },

    /// Show store or collection information.
    Info {
        #[arg(short, long)]
        collection: Option<String>,
    },

    /// Remove every document from a collection.
    Clear {
        #[arg(short, long)]
        collection: Option<String>,
    },

    /// Manage collections.
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
}

#[derive(Subcommand)]
pub enum CollectionAction {
    /// Create a new collection.
    Create {
        name: String,
        /// Disable HNSW indexing (exact search only).
        #[arg(long)]
        no_hnsw: bool,
    },
    /// List all collections.
    List,
    /// Delete a collection and its data.
    Delete { name: String },
}
