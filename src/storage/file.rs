//! Configuration persistence for host (development) builds.
//!
//! Keeps the key/value map in a JSON file so the host node remembers what
//! was saved through its portal. Uses `~/.sensor-node-esp32/config.json`
//! by default.
//!
//! # Usage
//!
//! ```ignore
//! use sensor_node_esp32::storage::{ConfigStore, FileBackend};
//!
//! let store = ConfigStore::new(FileBackend::open_default()?);
//! let config = store.load_or_default();
//! ```

use super::{BackendError, KvBackend};
use log::{debug, warn};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the default config file path.
///
/// Returns `~/.sensor-node-esp32/config.json`
pub fn default_config_path() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home)
        .join(".sensor-node-esp32")
        .join("config.json"))
}

/// JSON-file [`KvBackend`].
///
/// Writes are buffered in memory; [`KvBackend::commit`] writes a temporary
/// file and renames it over the old one.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl FileBackend {
    /// Open (or start) the store at `path`.
    ///
    /// A missing file is an empty store. An unreadable or malformed file is
    /// logged and treated as empty too, so the node falls back to defaults.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Map<String, Value>>(&text) {
                Ok(map) => map,
                Err(e) => {
                    warn!("Ignoring malformed config file {:?}: {}", path, e);
                    Map::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No config file found at {:?}", path);
                Map::new()
            }
            Err(e) => return Err(e),
        };
        Ok(Self { path, entries })
    }

    /// Open the store at [`default_config_path`].
    pub fn open_default() -> io::Result<Self> {
        Self::open(default_config_path()?)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn io_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::new(e.to_string())
}

impl KvBackend for FileBackend {
    fn get_str(&self, key: &str) -> Result<Option<String>, BackendError> {
        match self.entries.get(key) {
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(BackendError::new(format!("{} is not a string", key))),
            None => Ok(None),
        }
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        self.entries
            .insert(key.to_string(), Value::String(value.to_string()));
        Ok(())
    }

    fn get_i32(&self, key: &str) -> Result<Option<i32>, BackendError> {
        match self.entries.get(key) {
            Some(value) => value
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| BackendError::new(format!("{} is not an i32", key))),
            None => Ok(None),
        }
    }

    fn set_i32(&mut self, key: &str, value: i32) -> Result<(), BackendError> {
        self.entries.insert(key.to_string(), Value::from(value));
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        self.entries.remove(key);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let text = serde_json::to_string_pretty(&self.entries).map_err(io_error)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(io_error)?;
        fs::rename(&tmp, &self.path).map_err(io_error)?;
        debug!("Config file written to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::storage::{ConfigStore, StoreError};
    use std::env;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Counter to ensure unique test files even in parallel execution
    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_config_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        env::temp_dir()
            .join(format!("sensor-node-test-{}-{}", pid, id))
            .join("config.json")
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let path = unique_config_path();
        let store = ConfigStore::new(FileBackend::open(&path).unwrap());
        assert_eq!(store.load(), Err(StoreError::NotFound));
    }

    #[test]
    fn test_persists_across_reopen() {
        let path = unique_config_path();
        let config = NetworkConfig::new("Home", "Secret1", 3, 500).unwrap();

        let mut store = ConfigStore::new(FileBackend::open(&path).unwrap());
        store.save(&config).unwrap();
        drop(store);

        let store = ConfigStore::new(FileBackend::open(&path).unwrap());
        assert_eq!(store.load().unwrap(), config);

        cleanup(&path);
    }

    #[test]
    fn test_uncommitted_writes_are_not_persisted() {
        let path = unique_config_path();
        let mut backend = FileBackend::open(&path).unwrap();
        backend.set_str("active", "a").unwrap();
        drop(backend);

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get_str("active").unwrap(), None);
    }

    #[test]
    fn test_malformed_file_treated_as_empty() {
        let path = unique_config_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();

        let store = ConfigStore::new(FileBackend::open(&path).unwrap());
        assert_eq!(store.load(), Err(StoreError::NotFound));
        assert_eq!(store.load_or_default(), NetworkConfig::default());

        cleanup(&path);
    }

    #[test]
    fn test_clear_persists() {
        let path = unique_config_path();
        let mut store = ConfigStore::new(FileBackend::open(&path).unwrap());
        store
            .save(&NetworkConfig::new("Home", "", 1, 10).unwrap())
            .unwrap();
        store.clear().unwrap();
        drop(store);

        let store = ConfigStore::new(FileBackend::open(&path).unwrap());
        assert_eq!(store.load(), Err(StoreError::NotFound));

        cleanup(&path);
    }
}
