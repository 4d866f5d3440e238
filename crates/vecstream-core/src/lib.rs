//! # vecstream-core
//!
//! An embeddable vector database: high-dimensional f32 vectors keyed by
//! string identifiers, each carrying a JSON metadata document, searched by
//! cosine similarity through an HNSW proximity graph with optional metadata
//! predicates.
//!
//! ## Architecture
//!
//! - [`VectorStore`] — in-memory id → (vector, metadata) map with memoized
//!   unit-normalized copies and an exact brute-force search.
//! - [`HnswIndex`] — the approximate index; a layered proximity graph over
//!   identifiers with seeded, reproducible construction.
//! - [`MetadataFilter`] — dot-path AND-predicates over metadata documents,
//!   composed with the index through oversampled filtered search.
//! - [`Collection`] — one store + one index bound to a directory, with
//!   atomic per-file persistence.
//! - [`CollectionManager`] — a directory-rooted registry multiplexing
//!   independent collections.
//!
//! ## Example
//!
//! ```no_run
//! use vecstream_core::{CollectionManager, MetadataFilter};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), vecstream_core::StoreError> {
//! let manager = CollectionManager::open("/tmp/vecstream".as_ref())?;
//! let papers = manager.create_collection("papers", None)?;
//!
//! {
//!     let mut c = papers.write();
//!     c.add_vector("p1", vec![0.1, 0.9, 0.0], Some(json!({"cat": "ai"})))?;
//!     c.add_vector("p2", vec![0.9, 0.1, 0.0], Some(json!({"cat": "bio"})))?;
//!     c.save()?;
//! }
//!
//! let filter = MetadataFilter::new().with("cat", json!("ai"));
//! let hits = papers
//!     .read()
//!     .search_similar(&[0.2, 0.8, 0.0], 5, None, Some(&filter), None)?;
//! assert_eq!(hits[0].0, "p1");
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod error;
pub mod filter;
pub mod hnsw;
pub mod index;
pub mod manager;
pub mod persist;
pub mod similarity;
pub mod store;

pub use collection::{Collection, CollectionStats};
pub use error::StoreError;
pub use filter::MetadataFilter;
pub use hnsw::{HnswIndex, HnswParams};
pub use index::{AnyIndex, BruteIndex, VectorIndex};
pub use manager::{is_valid_name, CollectionManager, SharedCollection};
pub use persist::CollectionConfig;
pub use store::{VectorRecord, VectorStore};
