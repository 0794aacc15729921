//! NVS persistence for the network configuration.
//!
//! Stores each field under its own key in ESP32 Non-Volatile Storage so the
//! configuration survives reboots.

use super::{BackendError, KvBackend, NAMESPACE};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_sys::EspError;

// Longest stored string is a 63-byte password plus NUL.
const STR_BUFFER_SIZE: usize = 64;

/// ESP32 NVS [`KvBackend`] on the `wifi_config` namespace.
pub struct NvsBackend {
    nvs: EspNvs<NvsDefault>,
}

impl NvsBackend {
    /// Open the namespace on the default NVS partition, creating it if needed.
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self, EspError> {
        let nvs = EspNvs::new(partition, NAMESPACE, true)?;
        Ok(Self { nvs })
    }
}

fn esp_error(e: EspError) -> BackendError {
    BackendError::new(format!("NVS: {}", e))
}

impl KvBackend for NvsBackend {
    fn get_str(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut buf = [0u8; STR_BUFFER_SIZE];
        let value = self.nvs.get_str(key, &mut buf).map_err(esp_error)?;
        Ok(value.map(str::to_string))
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        self.nvs.set_str(key, value).map_err(esp_error)
    }

    fn get_i32(&self, key: &str) -> Result<Option<i32>, BackendError> {
        self.nvs.get_i32(key).map_err(esp_error)
    }

    fn set_i32(&mut self, key: &str, value: i32) -> Result<(), BackendError> {
        self.nvs.set_i32(key, value).map_err(esp_error)
    }

    fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        self.nvs.remove(key).map(|_| ()).map_err(esp_error)
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        // EspNvs commits after every set/remove.
        Ok(())
    }
}
