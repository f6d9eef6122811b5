//! Client-local key-value storage.
//!
//! Two slots mirror what a browser offers: a persistent slot written to
//! `{state_dir}/storage.json` after every mutation, and a session slot that
//! lives only as long as the process. Values are opaque strings; callers
//! serialize their own records.

use fs2::FileExt;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

const STORAGE_FILE: &str = "storage.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Which slot a key is read from or written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Survives restarts.
    Persistent,
    /// Dropped when the process exits.
    Session,
}

/// In-memory key-value store with disk persistence for the persistent slot.
#[derive(Debug)]
pub struct LocalStore {
    persistent: RwLock<BTreeMap<String, String>>,
    session: RwLock<HashMap<String, String>>,
    storage_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open the store under `state_dir`, loading the persistent slot from disk.
    ///
    /// An unreadable or corrupt file is treated as empty storage.
    pub async fn open(state_dir: &Path) -> Self {
        let storage_path = state_dir.join(STORAGE_FILE);

        let persistent = if storage_path.exists() {
            match Self::load_from_path(&storage_path) {
                Ok(values) => {
                    tracing::debug!("Loaded local storage from {}", storage_path.display());
                    values
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load local storage from {}: {}, starting empty",
                        storage_path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Self {
            persistent: RwLock::new(persistent),
            session: RwLock::new(HashMap::new()),
            storage_path: Some(storage_path),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            persistent: RwLock::new(BTreeMap::new()),
            session: RwLock::new(HashMap::new()),
            storage_path: None,
        }
    }

    fn load_from_path(path: &Path) -> Result<BTreeMap<String, String>, StorageError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Apply a change to `key` in `slot`.
    ///
    /// `change` sees the current value and returns the new one (`None`
    /// removes the key). For the persistent slot the current value is re-read
    /// from disk under an exclusive file lock, so keys written by other
    /// processes since `open` are kept, and the in-memory map is refreshed
    /// from the merged file. Returns the value now stored.
    pub async fn update<F>(&self, slot: Slot, key: &str, change: F) -> Result<Option<String>, StorageError>
    where
        F: FnOnce(Option<&str>) -> Result<Option<String>, StorageError>,
    {
        match slot {
            Slot::Persistent => {
                let mut values = self.persistent.write().await;
                match &self.storage_path {
                    Some(path) => {
                        let (merged, stored) = Self::update_file(path, key, change)?;
                        *values = merged;
                        Ok(stored)
                    }
                    None => Ok(apply_change(&mut values, key, change)?.1),
                }
            }
            Slot::Session => {
                let mut values = self.session.write().await;
                let current = values.get(key).map(String::as_str);
                let next = change(current)?;
                match &next {
                    Some(value) => values.insert(key.to_string(), value.clone()),
                    None => values.remove(key),
                };
                Ok(next)
            }
        }
    }

    /// Re-read, change and rewrite the storage file while holding its lock.
    fn update_file<F>(
        path: &Path,
        key: &str,
        change: F,
    ) -> Result<(BTreeMap<String, String>, Option<String>), StorageError>
    where
        F: FnOnce(Option<&str>) -> Result<Option<String>, StorageError>,
    {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        let result = Self::update_locked(&mut file, path, key, change);
        file.unlock()?;
        result
    }

    fn update_locked<F>(
        file: &mut std::fs::File,
        path: &Path,
        key: &str,
        change: F,
    ) -> Result<(BTreeMap<String, String>, Option<String>), StorageError>
    where
        F: FnOnce(Option<&str>) -> Result<Option<String>, StorageError>,
    {
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let mut values = if contents.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(
                    "Discarding unreadable local storage at {}: {}",
                    path.display(),
                    e
                );
                BTreeMap::new()
            })
        };

        let (changed, stored) = apply_change(&mut values, key, change)?;
        if changed {
            let serialized = serde_json::to_string_pretty(&values)?;
            file.set_len(0)?;
            file.rewind()?;
            file.write_all(serialized.as_bytes())?;
            file.flush()?;
            tracing::trace!(key = %key, "Saved local storage to {}", path.display());
        }
        Ok((values, stored))
    }

    pub async fn get(&self, slot: Slot, key: &str) -> Option<String> {
        match slot {
            Slot::Persistent => self.persistent.read().await.get(key).cloned(),
            Slot::Session => self.session.read().await.get(key).cloned(),
        }
    }

    pub async fn set(&self, slot: Slot, key: &str, value: String) -> Result<(), StorageError> {
        self.update(slot, key, |_| Ok(Some(value))).await?;
        Ok(())
    }

    /// Remove `key` from `slot`. Removing a missing key is a no-op.
    pub async fn remove(&self, slot: Slot, key: &str) -> Result<(), StorageError> {
        self.update(slot, key, |_| Ok(None)).await?;
        Ok(())
    }

    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }
}

/// Shared store wrapped in Arc for concurrent access.
pub type SharedLocalStore = Arc<LocalStore>;

/// Apply `change` to `key` in `values`. Returns whether anything changed and
/// the value now stored.
fn apply_change<F>(
    values: &mut BTreeMap<String, String>,
    key: &str,
    change: F,
) -> Result<(bool, Option<String>), StorageError>
where
    F: FnOnce(Option<&str>) -> Result<Option<String>, StorageError>,
{
    let current = values.get(key).cloned();
    let next = change(current.as_deref())?;
    if next == current {
        return Ok((false, next));
    }
    match &next {
        Some(value) => values.insert(key.to_string(), value.clone()),
        None => values.remove(key),
    };
    Ok((true, next))
}
