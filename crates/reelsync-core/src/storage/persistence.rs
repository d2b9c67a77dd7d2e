//! Preference persistence
//!
//! A small string-keyed store for session state (sync mode, enabled flag,
//! relay list). It behaves like browser local storage: every value is a
//! string, structured values are stored as JSON text, and the whole map is
//! written back on each change.
//!
//! Storage location: `<data_dir>/preferences.json`
//!
//! Writes are atomic (write to temp file, then rename) so a crash never
//! leaves a partially-written preference file behind.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::error::{StorageError, StorageResult};

/// String-keyed preference store
#[derive(Debug, Default)]
pub struct Preferences {
    /// Backing file; `None` keeps everything in memory
    path: Option<PathBuf>,
    values: BTreeMap<String, String>,
}

impl Preferences {
    /// Create an in-memory preference store (nothing touches disk)
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a preference file
    ///
    /// A missing file yields an empty store. An unreadable or malformed
    /// file is treated as absent: a warning is logged and defaults apply.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(values) => values,
                Err(e) => {
                    warn!("Ignoring malformed preference file {:?}: {}", path, e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Could not read preference file {:?}: {}", path, e);
                BTreeMap::new()
            }
        };

        Self {
            path: Some(path),
            values,
        }
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a raw string value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Set a raw string value and persist
    ///
    /// The in-memory value is updated even when the write fails, so the
    /// running session keeps the new value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> StorageResult<()> {
        self.values.insert(key.to_string(), value.into());
        self.flush()
    }

    /// Remove a value and persist
    pub fn remove(&mut self, key: &str) -> StorageResult<()> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    /// Get a JSON-encoded value
    ///
    /// Returns `None` when the key is absent or its text does not parse as `T`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring malformed preference '{}': {}", key, e);
                None
            }
        }
    }

    /// Store a value as JSON text
    pub fn set_json<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> StorageResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw)
    }

    fn flush(&self) -> StorageResult<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&self.values)?;
        atomic_write(path, &bytes)
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::from_io(e, parent.to_path_buf()))?;
    }

    // Temp file must live in the same directory for the rename to be atomic
    let temp_path = path.with_extension("tmp");

    let mut file =
        File::create(&temp_path).map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.write_all(data)
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.sync_all()
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|source| StorageError::AtomicWriteFailed {
        from: temp_path.clone(),
        to: path.to_path_buf(),
        source,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_roundtrip() {
        let mut prefs = Preferences::in_memory();
        assert!(prefs.get("mode").is_none());

        prefs.set("mode", "full").unwrap();
        assert_eq!(prefs.get("mode"), Some("full"));
        assert!(prefs.path().is_none());
    }

    #[test]
    fn test_persists_across_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("preferences.json");

        {
            let mut prefs = Preferences::open(&path);
            prefs.set("mode", "connected").unwrap();
            prefs
                .set_json("relays", &vec!["wss://relay1".to_string()])
                .unwrap();
        }

        let prefs = Preferences::open(&path);
        assert_eq!(prefs.get("mode"), Some("connected"));
        let relays: Vec<String> = prefs.get_json("relays").unwrap();
        assert_eq!(relays, vec!["wss://relay1"]);
    }

    #[test]
    fn test_malformed_file_is_treated_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("preferences.json");
        fs::write(&path, "{not json").unwrap();

        let prefs = Preferences::open(&path);
        assert!(prefs.get("mode").is_none());
    }

    #[test]
    fn test_malformed_json_value_is_none() {
        let mut prefs = Preferences::in_memory();
        prefs.set("relays", "[broken").unwrap();

        let relays: Option<Vec<String>> = prefs.get_json("relays");
        assert!(relays.is_none());
    }

    #[test]
    fn test_remove() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("preferences.json");

        let mut prefs = Preferences::open(&path);
        prefs.set("a", "1").unwrap();
        prefs.remove("a").unwrap();
        prefs.remove("missing").unwrap();

        let reopened = Preferences::open(&path);
        assert!(reopened.get("a").is_none());
    }

    #[test]
    fn test_atomic_write_creates_parent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("file.json");

        atomic_write(&path, b"[]").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
        assert!(!path.with_extension("tmp").exists());
    }
}
