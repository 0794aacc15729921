//! In-process key/value medium.
//!
//! Clones share the same map, so a clone handed to a [`super::ConfigStore`]
//! can be inspected (or "power-cut") from a test after the store took
//! ownership. Contents survive for as long as any clone is alive, which is
//! how simulated restarts keep their configuration.

use super::{BackendError, KvBackend};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Str(String),
    I32(i32),
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, Value>,
    // Remaining writes before every write fails; `None` means unlimited.
    write_budget: Option<usize>,
}

/// Shared in-memory [`KvBackend`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `count` more writes succeed, then fail every write until
    /// [`MemoryBackend::allow_writes`] is called.
    pub fn fail_writes_after(&self, count: usize) {
        self.lock().write_budget = Some(count);
    }

    /// Remove any write limit.
    pub fn allow_writes(&self) {
        self.lock().write_budget = None;
    }

    /// True if no key is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.lock().entries.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not poison the map for the others.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, key: &str, value: Option<Value>) -> Result<(), BackendError> {
        let mut inner = self.lock();
        match inner.write_budget {
            Some(0) => return Err(BackendError::new("simulated write failure")),
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        match value {
            Some(v) => {
                inner.entries.insert(key.to_string(), v);
            }
            None => {
                inner.entries.remove(key);
            }
        }
        Ok(())
    }
}

impl KvBackend for MemoryBackend {
    fn get_str(&self, key: &str) -> Result<Option<String>, BackendError> {
        match self.lock().entries.get(key) {
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(Value::I32(_)) => Err(BackendError::new(format!("{} is not a string", key))),
            None => Ok(None),
        }
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        self.write(key, Some(Value::Str(value.to_string())))
    }

    fn get_i32(&self, key: &str) -> Result<Option<i32>, BackendError> {
        match self.lock().entries.get(key) {
            Some(Value::I32(v)) => Ok(Some(*v)),
            Some(Value::Str(_)) => Err(BackendError::new(format!("{} is not an integer", key))),
            None => Ok(None),
        }
    }

    fn set_i32(&mut self, key: &str, value: i32) -> Result<(), BackendError> {
        self.write(key, Some(Value::I32(value)))
    }

    fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        self.write(key, None)
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_entries() {
        let mut a = MemoryBackend::new();
        let b = a.clone();
        a.set_str("k", "v").unwrap();
        assert_eq!(b.get_str("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let mut backend = MemoryBackend::new();
        backend.set_i32("n", 3).unwrap();
        assert!(backend.get_str("n").is_err());
        assert_eq!(backend.get_i32("n").unwrap(), Some(3));
    }

    #[test]
    fn test_write_budget() {
        let mut backend = MemoryBackend::new();
        backend.fail_writes_after(1);
        assert!(backend.set_str("a", "1").is_ok());
        assert!(backend.set_str("b", "2").is_err());
        assert!(backend.remove("a").is_err());
        backend.allow_writes();
        assert!(backend.set_str("b", "2").is_ok());
        assert_eq!(backend.keys(), vec!["a".to_string(), "b".to_string()]);
    }
}
