//! Directory-rooted registry of named collections.
//!
//! Each collection lives under `{root}/{name}/` and is guarded by its own
//! readers-writer lock, so operations on distinct collections proceed in
//! parallel without coordination. The registry itself serializes creation
//! and deletion through a dedicated mutex, closing the gap between the
//! existence check and the map insert.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::collection::{Collection, CollectionStats};
use crate::error::StoreError;
use crate::hnsw::HnswParams;
use crate::persist::CONFIG_FILE;

/// Shared handle to a collection. Acquire `.read()` for queries and
/// `.write()` for mutations; the manager stays the lifetime root.
pub type SharedCollection = Arc<RwLock<Collection>>;

const NAME_MAX_LEN: usize = 64;

/// Registry of named [`Collection`]s rooted at a directory.
pub struct CollectionManager {
    root: PathBuf,
    collections: DashMap<String, SharedCollection>,
    /// Serializes create/delete against the existence check.
    registry_lock: Mutex<()>,
    default_params: HnswParams,
    use_hnsw: bool,
}

impl CollectionManager {
    /// Open (or create) a store root with default settings and discover the
    /// collections already on disk.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        Self::with_defaults(root, true, HnswParams::default())
    }

    /// Open with explicit defaults for newly created collections. Existing
    /// collections keep the settings persisted in their `config.json`.
    pub fn with_defaults(
        root: &Path,
        use_hnsw: bool,
        default_params: HnswParams,
    ) -> Result<Self, StoreError> {
        default_params.validate()?;
        fs::create_dir_all(root)?;

        let manager = Self {
            root: root.to_path_buf(),
            collections: DashMap::new(),
            registry_lock: Mutex::new(()),
            default_params,
            use_hnsw,
        };

        // Discover collections by scanning for per-directory config files.
        for entry in fs::read_dir(&manager.root)? {
            let entry = entry?;
            let dir = entry.path();
            if !dir.is_dir() || !dir.join(CONFIG_FILE).exists() {
                continue;
            }
            let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !is_valid_name(name) {
                continue;
            }
            let collection = Collection::open(
                name,
                &dir,
                manager.use_hnsw,
                manager.default_params.clone(),
            )?;
            manager
                .collections
                .insert(name.to_string(), Arc::new(RwLock::new(collection)));
        }
        Ok(manager)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new collection.
    ///
    /// # Errors
    /// - [`StoreError::InvalidName`] for names outside `[A-Za-z0-9_-]{1,64}`
    /// - [`StoreError::CollectionExists`] when the name is taken, in memory
    ///   or on disk
    pub fn create_collection(
        &self,
        name: &str,
        params: Option<HnswParams>,
    ) -> Result<SharedCollection, StoreError> {
        self.create_collection_opts(name, self.use_hnsw, params)
    }

    /// Like [`Self::create_collection`], but overriding the manager-wide
    /// index choice for this one collection.
    pub fn create_collection_opts(
        &self,
        name: &str,
        use_hnsw: bool,
        params: Option<HnswParams>,
    ) -> Result<SharedCollection, StoreError> {
        if !is_valid_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        let _guard = self
            .registry_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let dir = self.collection_dir(name);
        if self.collections.contains_key(name) || dir.join(CONFIG_FILE).exists() {
            return Err(StoreError::CollectionExists(name.to_string()));
        }

        let params = params.unwrap_or_else(|| self.default_params.clone());
        let mut collection = Collection::open(name, &dir, use_hnsw, params)?;
        collection.save()?;

        let shared = Arc::new(RwLock::new(collection));
        self.collections.insert(name.to_string(), Arc::clone(&shared));
        Ok(shared)
    }

    /// Look up a collection handle.
    pub fn get_collection(&self, name: &str) -> Result<SharedCollection, StoreError> {
        self.collections
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::NoSuchCollection(name.to_string()))
    }

    /// Names of all collections in ascending order.
    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Drop a collection: the in-memory handle and the on-disk directory.
    /// A handle still held elsewhere becomes invalid — its directory is
    /// gone and the manager no longer knows the name.
    pub fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        let _guard = self
            .registry_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let existed = self.collections.remove(name).is_some();
        let dir = self.collection_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        } else if !existed {
            return Err(StoreError::NoSuchCollection(name.to_string()));
        }
        Ok(())
    }

    pub fn get_collection_stats(&self, name: &str) -> Result<CollectionStats, StoreError> {
        let shared = self.get_collection(name)?;
        let stats = shared.read().stats();
        Ok(stats)
    }

    fn collection_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

/// Collection names: 1..=64 characters from `[A-Za-z0-9_-]`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= NAME_MAX_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
