//! Record collections
//!
//! The local object store that holds cutting records and settings. The sync
//! layer only needs a generic asynchronous key-value contract over named
//! collections, expressed by [`KeyValueStore`]. Two implementations ship:
//!
//! - [`MemoryCollections`]: process-local, used by tests and throwaway sessions
//! - [`FileCollections`]: one JSON array per collection under a directory
//!
//! Records are JSON objects. Every collection is keyed by `id`, except the
//! `settings` collection which is keyed by `name`.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use super::error::{StorageError, StorageResult};
use super::persistence::atomic_write;

/// Collection holding `{name, value}` settings rows
pub const SETTINGS_COLLECTION: &str = "settings";

/// Key path of a collection
pub fn key_path(collection: &str) -> &'static str {
    if collection == SETTINGS_COLLECTION {
        "name"
    } else {
        "id"
    }
}

/// Extract the key of a record for the given collection
pub fn record_key(collection: &str, record: &Value) -> StorageResult<String> {
    let path = key_path(collection);
    match record.get(path) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(StorageError::MissingKey {
            collection: collection.to_string(),
            key_path: path.to_string(),
        }),
    }
}

/// Asynchronous key-value contract over named collections
///
/// Failures surface as `Err` values; implementations never leave a
/// collection half-updated.
pub trait KeyValueStore {
    /// Get a record by key
    fn get(
        &self,
        collection: &str,
        key: &str,
    ) -> impl Future<Output = StorageResult<Option<Value>>> + Send;

    /// Get every record of a collection, in insertion order
    fn get_all(&self, collection: &str) -> impl Future<Output = StorageResult<Vec<Value>>> + Send;

    /// Insert a record; fails with [`StorageError::Duplicate`] if the key exists
    fn add(&self, collection: &str, record: Value) -> impl Future<Output = StorageResult<()>> + Send;

    /// Insert or replace a record
    fn put(&self, collection: &str, record: Value) -> impl Future<Output = StorageResult<()>> + Send;

    /// Delete a record; returns whether it existed
    fn delete(
        &self,
        collection: &str,
        key: &str,
    ) -> impl Future<Output = StorageResult<bool>> + Send;

    /// Remove every record of a collection
    fn clear(&self, collection: &str) -> impl Future<Output = StorageResult<()>> + Send;
}

/// Insert `record` into `records`, replacing an existing key only if allowed
fn upsert(
    records: &mut Vec<Value>,
    collection: &str,
    record: Value,
    replace: bool,
) -> StorageResult<()> {
    let key = record_key(collection, &record)?;
    let existing = records
        .iter()
        .position(|r| record_key(collection, r).ok().as_deref() == Some(key.as_str()));

    match existing {
        Some(_) if !replace => Err(StorageError::Duplicate {
            collection: collection.to_string(),
            key,
        }),
        Some(index) => {
            records[index] = record;
            Ok(())
        }
        None => {
            records.push(record);
            Ok(())
        }
    }
}

fn find(records: &[Value], collection: &str, key: &str) -> Option<Value> {
    records
        .iter()
        .find(|r| record_key(collection, r).ok().as_deref() == Some(key))
        .cloned()
}

fn remove(records: &mut Vec<Value>, collection: &str, key: &str) -> bool {
    let before = records.len();
    records.retain(|r| record_key(collection, r).ok().as_deref() != Some(key));
    records.len() != before
}

/// In-memory collections
#[derive(Debug, Default)]
pub struct MemoryCollections {
    collections: Mutex<HashMap<String, Vec<Value>>>,
}

impl MemoryCollections {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut HashMap<String, Vec<Value>>) -> T) -> T {
        let mut guard = self
            .collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl KeyValueStore for MemoryCollections {
    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.with(|c| {
            c.get(collection)
                .and_then(|records| find(records, collection, key))
        }))
    }

    async fn get_all(&self, collection: &str) -> StorageResult<Vec<Value>> {
        Ok(self.with(|c| c.get(collection).cloned().unwrap_or_default()))
    }

    async fn add(&self, collection: &str, record: Value) -> StorageResult<()> {
        self.with(|c| upsert(c.entry(collection.to_string()).or_default(), collection, record, false))
    }

    async fn put(&self, collection: &str, record: Value) -> StorageResult<()> {
        self.with(|c| upsert(c.entry(collection.to_string()).or_default(), collection, record, true))
    }

    async fn delete(&self, collection: &str, key: &str) -> StorageResult<bool> {
        Ok(self.with(|c| {
            c.get_mut(collection)
                .map(|records| remove(records, collection, key))
                .unwrap_or(false)
        }))
    }

    async fn clear(&self, collection: &str) -> StorageResult<()> {
        self.with(|c| c.remove(collection));
        Ok(())
    }
}

/// File-backed collections
///
/// Each collection is a JSON array in `<dir>/<collection>.json`. Every
/// mutation rewrites the file atomically.
#[derive(Debug)]
pub struct FileCollections {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCollections {
    /// Open (or lazily create) collections under `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Directory holding the collection files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, collection: &str) -> StorageResult<PathBuf> {
        let valid = !collection.is_empty()
            && collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidFormat {
                path: self.dir.clone(),
                details: format!("invalid collection name '{}'", collection),
            });
        }
        Ok(self.dir.join(format!("{}.json", collection)))
    }

    async fn load(&self, collection: &str) -> StorageResult<Vec<Value>> {
        let path = self.path_for(collection)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StorageError::ReadError { path, source }),
        };

        serde_json::from_str(&content).map_err(|e| StorageError::InvalidFormat {
            path,
            details: e.to_string(),
        })
    }

    fn store(&self, collection: &str, records: &[Value]) -> StorageResult<()> {
        let path = self.path_for(collection)?;
        let bytes = serde_json::to_vec_pretty(records)?;
        atomic_write(&path, &bytes)
    }

    async fn modify<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Vec<Value>) -> StorageResult<T> + Send,
    ) -> StorageResult<T> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load(collection).await?;
        let result = f(&mut records)?;
        self.store(collection, &records)?;
        Ok(result)
    }
}

impl KeyValueStore for FileCollections {
    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Value>> {
        let records = self.load(collection).await?;
        Ok(find(&records, collection, key))
    }

    async fn get_all(&self, collection: &str) -> StorageResult<Vec<Value>> {
        self.load(collection).await
    }

    async fn add(&self, collection: &str, record: Value) -> StorageResult<()> {
        self.modify(collection, |records| upsert(records, collection, record, false))
            .await
    }

    async fn put(&self, collection: &str, record: Value) -> StorageResult<()> {
        self.modify(collection, |records| upsert(records, collection, record, true))
            .await
    }

    async fn delete(&self, collection: &str, key: &str) -> StorageResult<bool> {
        self.modify(collection, |records| Ok(remove(records, collection, key)))
            .await
    }

    async fn clear(&self, collection: &str) -> StorageResult<()> {
        self.modify(collection, |records| {
            records.clear();
            Ok(())
        })
        .await
    }
}
