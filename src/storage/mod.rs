//! Persistent network configuration.
//!
//! [`ConfigStore`] keeps one [`NetworkConfig`] in a namespaced key/value
//! store so it survives restarts. The medium is abstracted by [`KvBackend`]:
//!
//! - [`NvsBackend`] - ESP32 Non-Volatile Storage (ESP32 only)
//! - [`FileBackend`] - JSON file in the user's home directory (host only)
//! - [`MemoryBackend`] - in-process map for tests and simulation
//!
//! # Layout
//!
//! ```text
//! active          "a" | "b"      committed slot
//! a/ssid          str
//! a/password      str
//! a/max_retries   i32            optional, default 5
//! a/retry_delay   i32            optional, default 1000 ms
//! b/...           same four fields
//! ```
//!
//! `save` writes the slot that is not active, then flips `active`. The
//! medium writes keys one by one, so a power loss before the flip leaves the
//! previously committed configuration in place.

use crate::config::{NetworkConfig, ConfigError, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};
use log::{info, warn};
use std::fmt;

mod memory;
pub use memory::MemoryBackend;

#[cfg(not(target_os = "espidf"))]
mod file;
#[cfg(not(target_os = "espidf"))]
pub use file::FileBackend;

#[cfg(feature = "esp32")]
mod nvs;
#[cfg(feature = "esp32")]
pub use nvs::NvsBackend;

/// NVS namespace (and file stem) holding the network configuration.
pub const NAMESPACE: &str = "wifi_config";

const ACTIVE_KEY: &str = "active";
const FIELD_SSID: &str = "ssid";
const FIELD_PASSWORD: &str = "password";
const FIELD_MAX_RETRIES: &str = "max_retries";
const FIELD_RETRY_DELAY: &str = "retry_delay";
const FIELDS: [&str; 4] = [FIELD_SSID, FIELD_PASSWORD, FIELD_MAX_RETRIES, FIELD_RETRY_DELAY];

/// Namespaced string/integer key-value medium.
///
/// Keys are at most 15 bytes (the NVS limit). Writes become durable no later
/// than the next [`KvBackend::commit`].
pub trait KvBackend {
    /// Read a string value. `Ok(None)` if the key does not exist.
    fn get_str(&self, key: &str) -> Result<Option<String>, BackendError>;
    /// Write a string value.
    fn set_str(&mut self, key: &str, value: &str) -> Result<(), BackendError>;
    /// Read an integer value. `Ok(None)` if the key does not exist.
    fn get_i32(&self, key: &str) -> Result<Option<i32>, BackendError>;
    /// Write an integer value.
    fn set_i32(&mut self, key: &str, value: i32) -> Result<(), BackendError>;
    /// Remove a key. Removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), BackendError>;
    /// Make all previous writes durable.
    fn commit(&mut self) -> Result<(), BackendError>;
}

/// Failure reported by a storage medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BackendError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    A,
    B,
}

impl Slot {
    fn name(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "a" => Some(Self::A),
            "b" => Some(Self::B),
            _ => None,
        }
    }

    fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    fn key(self, field: &str) -> String {
        format!("{}/{}", self.name(), field)
    }
}

/// Persistent holder for the network configuration.
pub struct ConfigStore<B: KvBackend> {
    backend: B,
}

impl<B: KvBackend> ConfigStore<B> {
    /// Wrap a storage medium.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Borrow the underlying medium.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Load the committed configuration.
    ///
    /// Returns [`StoreError::NotFound`] when nothing was ever saved (or after
    /// [`ConfigStore::clear`]). Missing retry fields fall back to their
    /// defaults independently of each other.
    pub fn load(&self) -> Result<NetworkConfig, StoreError> {
        let slot = match self.backend.get_str(ACTIVE_KEY)? {
            Some(name) => Slot::parse(&name)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown active slot '{}'", name)))?,
            None => return Err(StoreError::NotFound),
        };

        let ssid = self
            .backend
            .get_str(&slot.key(FIELD_SSID))?
            .ok_or_else(|| StoreError::Corrupt("missing ssid".into()))?;
        let password = self
            .backend
            .get_str(&slot.key(FIELD_PASSWORD))?
            .ok_or_else(|| StoreError::Corrupt("missing password".into()))?;

        let max_retries = match self.backend.get_i32(&slot.key(FIELD_MAX_RETRIES))? {
            Some(value) => non_negative(FIELD_MAX_RETRIES, value)?,
            None => {
                warn!("No stored max_retries, using default: {}", DEFAULT_MAX_RETRIES);
                DEFAULT_MAX_RETRIES
            }
        };
        let retry_delay_ms = match self.backend.get_i32(&slot.key(FIELD_RETRY_DELAY))? {
            Some(value) => non_negative(FIELD_RETRY_DELAY, value)?,
            None => {
                warn!("No stored retry_delay, using default: {} ms", DEFAULT_RETRY_DELAY_MS);
                DEFAULT_RETRY_DELAY_MS
            }
        };

        let config = NetworkConfig::new(ssid, password, max_retries, retry_delay_ms)?;
        info!(
            "Network config loaded: ssid={}, max_retries={}, retry_delay={} ms",
            config.ssid, config.max_retries, config.retry_delay_ms
        );
        Ok(config)
    }

    /// Load the committed configuration, or the compiled-in defaults if there
    /// is none or it cannot be read.
    pub fn load_or_default(&self) -> NetworkConfig {
        match self.load() {
            Ok(config) => config,
            Err(StoreError::NotFound) => {
                info!("No stored network config, using defaults");
                NetworkConfig::default()
            }
            Err(e) => {
                warn!("Stored network config unusable ({}), using defaults", e);
                NetworkConfig::default()
            }
        }
    }

    /// Persist all four fields as one unit.
    ///
    /// On error the previously committed configuration is still the one
    /// [`ConfigStore::load`] returns.
    pub fn save(&mut self, config: &NetworkConfig) -> Result<(), StoreError> {
        config.validate()?;

        let current = self
            .backend
            .get_str(ACTIVE_KEY)?
            .and_then(|name| Slot::parse(&name));
        let target = current.map(Slot::other).unwrap_or(Slot::A);

        self.backend.set_str(&target.key(FIELD_SSID), &config.ssid)?;
        self.backend
            .set_str(&target.key(FIELD_PASSWORD), &config.password)?;
        self.backend
            .set_i32(&target.key(FIELD_MAX_RETRIES), config.max_retries as i32)?;
        self.backend
            .set_i32(&target.key(FIELD_RETRY_DELAY), config.retry_delay_ms as i32)?;
        self.backend.commit()?;

        self.backend.set_str(ACTIVE_KEY, target.name())?;
        self.backend.commit()?;

        info!(
            "Network config saved: ssid={}, max_retries={}, retry_delay={} ms",
            config.ssid, config.max_retries, config.retry_delay_ms
        );
        Ok(())
    }

    /// Erase the persisted configuration.
    ///
    /// The caller is responsible for restoring in-memory defaults.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        // Drop the pointer first so a partial clear reads as "nothing saved".
        self.backend.remove(ACTIVE_KEY)?;
        self.backend.commit()?;
        for slot in [Slot::A, Slot::B] {
            for field in FIELDS {
                self.backend.remove(&slot.key(field))?;
            }
        }
        self.backend.commit()?;
        info!("Network config cleared");
        Ok(())
    }
}

fn non_negative(field: &'static str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{} is negative: {}", field, value)))
}

/// Errors that can occur while loading or saving the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Nothing has been saved yet.
    NotFound,
    /// Stored data exists but cannot be turned into a configuration.
    Corrupt(String),
    /// The configuration to save (or the one loaded) is out of bounds.
    Invalid(ConfigError),
    /// The storage medium failed.
    Backend(BackendError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no stored configuration"),
            Self::Corrupt(msg) => write!(f, "corrupt stored configuration: {}", msg),
            Self::Invalid(e) => write!(f, "invalid configuration: {}", e),
            Self::Backend(e) => write!(f, "storage error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invalid(e) => Some(e),
            Self::Backend(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BackendError> for StoreError {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}

impl From<ConfigError> for StoreError {
    fn from(e: ConfigError) -> Self {
        Self::Invalid(e)
    }
}
