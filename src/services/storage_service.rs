//! Durable key-value store backends
//!
//! The ownership store only needs get / overwrite / remove on JSON values.
//! `MemoryStore` keeps them for the life of the process; `JsonFileStore`
//! persists the whole map as one JSON document per write batch.

use crate::error::{IapError, Result};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, info, instrument, warn};

/// A batch of overwrites; a `None` value removes the key
pub type Writes = Vec<(String, Option<Value>)>;

/// Process-surviving key-value mapping. Reads never fail; absent keys read as `None`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    /// Overwrite `key`; `None` removes it
    fn set(&self, key: &str, value: Option<Value>) -> Result<()> {
        self.set_many(vec![(key.to_string(), value)])
    }

    /// Apply every write, or none of them when the result cannot be persisted
    fn set_many(&self, writes: Writes) -> Result<()>;
}

// Returns whether anything changed
fn apply_writes(values: &mut BTreeMap<String, Value>, writes: Writes) -> bool {
    let mut changed = false;
    for (key, value) in writes {
        changed |= match value {
            Some(value) => values.insert(key, value.clone()) != Some(value),
            None => values.remove(&key).is_some(),
        };
    }
    changed
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    fn set_many(&self, writes: Writes) -> Result<()> {
        apply_writes(&mut self.values(), writes);
        Ok(())
    }
}

pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist yet
    #[instrument]
    pub fn open(path: impl AsRef<Path> + std::fmt::Debug) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let values = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                warn!("Ownership file is not valid JSON: {}", e);
                IapError::Storage(format!("Failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(IapError::Storage(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        info!(
            "JsonFileStore opened at {} with {} keys",
            path.display(),
            values.len()
        );

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Write to a sibling file and rename over the original
    fn persist(&self, values: &BTreeMap<String, Value>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(values)
            .map_err(|e| IapError::Storage(format!("Failed to encode store: {}", e)))?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, bytes)
            .and_then(|_| std::fs::rename(&tmp_path, &self.path))
            .map_err(|e| {
                warn!("Failed to persist ownership store: {}", e);
                IapError::Storage(format!("Failed to write {}: {}", self.path.display(), e))
            })?;

        debug!(keys = values.len(), "Ownership store persisted");
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    // Memory only takes the new map once it is on disk
    fn set_many(&self, writes: Writes) -> Result<()> {
        let mut values = self.values();
        let mut updated = values.clone();
        if apply_writes(&mut updated, writes) {
            self.persist(&updated)?;
            *values = updated;
        }
        Ok(())
    }
}
