//! Named collections.
//!
//! A [`Database`] always holds the `default` collection. With a data directory,
//! collection `name` persists to `<dir>/<name>.evdb` with its WAL at
//! `<dir>/<name>.wal`, and [`Database::open`] restores every collection found there.

use crate::config::{
    CollectionConfig, DEFAULT_COLLECTION, MAX_COLLECTION_NAME_LEN, SNAPSHOT_EXTENSION,
    WAL_EXTENSION,
};
use crate::error::{Error, Result, ValidationError};
use crate::storage::collection::{wal_path_for, Collection, CollectionInfo};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Collection names are 1..=128 ASCII letters, digits, `_` or `-`, so they are
/// always safe as file stems.
pub fn validate_collection_name(name: &str) -> std::result::Result<(), ValidationError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_COLLECTION_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidCollectionName(name.to_string()))
    }
}

/// Database holds all collections.
#[derive(Debug, Clone)]
pub struct Database {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
    data_dir: Option<PathBuf>,
    default_config: CollectionConfig,
}

impl Default for Database {
    fn default() -> Self {
        Self::with_config(CollectionConfig::default())
    }
}

impl Database {
    /// In-memory database with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// In-memory database whose collections default to `config`.
    pub fn with_config(config: CollectionConfig) -> Self {
        let mut collections = HashMap::new();
        collections.insert(
            DEFAULT_COLLECTION.to_string(),
            Collection::build(DEFAULT_COLLECTION, config.clone()),
        );
        Self {
            collections: Arc::new(RwLock::new(collections)),
            data_dir: None,
            default_config: config,
        }
    }

    /// Opens (creating if needed) a database directory and restores every
    /// collection that has a snapshot or WAL in it.
    pub fn open(dir: impl AsRef<Path>, config: CollectionConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut names = BTreeSet::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if ext != Some(SNAPSHOT_EXTENSION) && ext != Some(WAL_EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) if validate_collection_name(stem).is_ok() => {
                    names.insert(stem.to_string());
                }
                _ => tracing::warn!(path = %path.display(), "ignoring file with invalid collection name"),
            }
        }
        names.insert(DEFAULT_COLLECTION.to_string());

        let mut collections = HashMap::with_capacity(names.len());
        for name in names {
            let path = snapshot_path(&dir, &name);
            let collection = Collection::open_named(name.clone(), Some(path), config.clone())?;
            collections.insert(name, collection);
        }
        tracing::info!(
            dir = %dir.display(),
            collections = collections.len(),
            "database opened"
        );
        Ok(Self {
            collections: Arc::new(RwLock::new(collections)),
            data_dir: Some(dir),
            default_config: config,
        })
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// The always-present `default` collection.
    pub fn default_collection(&self) -> Result<Collection> {
        self.get_collection(DEFAULT_COLLECTION)
    }

    /// Creates a new collection. Fails if the name is taken or invalid.
    pub fn create_collection(
        &self,
        name: &str,
        config: Option<CollectionConfig>,
    ) -> Result<Collection> {
        validate_collection_name(name)?;
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(ValidationError::CollectionExists(name.to_string()).into());
        }
        let config = config.unwrap_or_else(|| self.default_config.clone());
        let path = self.data_dir.as_deref().map(|d| snapshot_path(d, name));
        let collection = Collection::open_named(name, path, config)?;
        collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    /// Returns a handle to the named collection.
    pub fn get_collection(&self, name: &str) -> Result<Collection> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::CollectionNotFound(name.to_string()).into())
    }

    pub fn get_or_create_collection(
        &self,
        name: &str,
        config: Option<CollectionConfig>,
    ) -> Result<Collection> {
        if let Some(c) = self.collections.read().get(name) {
            return Ok(c.clone());
        }
        match self.create_collection(name, config) {
            Err(Error::Validation(ValidationError::CollectionExists(_))) => self.get_collection(name),
            other => other,
        }
    }

    /// Removes a collection and its files. Returns `false` if it did not exist.
    /// The `default` collection cannot be deleted.
    pub fn delete_collection(&self, name: &str) -> Result<bool> {
        if name == DEFAULT_COLLECTION {
            return Err(ValidationError::InvalidCollectionName(name.to_string()).into());
        }
        let Some(collection) = self.collections.write().remove(name) else {
            return Ok(false);
        };
        collection.detach_persistence();
        if let Some(dir) = &self.data_dir {
            let snapshot = snapshot_path(dir, name);
            for path in [wal_path_for(&snapshot), snapshot] {
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(true)
    }

    /// Collection names, sorted.
    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn collection_stats(&self, name: &str) -> Result<CollectionInfo> {
        Ok(self.get_collection(name)?.info())
    }

    /// Estimated memory across all collections.
    pub fn total_memory_bytes(&self) -> usize {
        self.collections
            .read()
            .values()
            .map(|c| c.memory_usage().total_bytes)
            .sum()
    }

    /// Checkpoints every persisted collection. Stops at the first failure.
    pub fn checkpoint_all(&self) -> Result<()> {
        if self.data_dir.is_none() {
            return Err(ValidationError::NoPersistencePath.into());
        }
        let collections: Vec<Collection> = self.collections.read().values().cloned().collect();
        for c in collections {
            c.checkpoint()?;
        }
        Ok(())
    }
}

fn snapshot_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{SNAPSHOT_EXTENSION}"))
}
