//! Network join credentials and retry policy.
//!
//! This module contains platform-independent types for the station-mode
//! configuration that can be tested on the host machine.
//!
//! # Example
//!
//! ```
//! use sensor_node_esp32::config::NetworkConfig;
//!
//! let config = NetworkConfig::new("Home", "Secret1", 3, 500).unwrap();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.max_retries, 3);
//! ```

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length in bytes (the radio API reserves one byte for NUL).
pub const MAX_SSID_LEN: usize = 31;

/// Maximum password length in bytes (the radio API reserves one byte for NUL).
pub const MAX_PASSWORD_LEN: usize = 63;

/// Join attempts after the first failure before falling back to the portal.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Delay between join attempts.
pub const DEFAULT_RETRY_DELAY_MS: u32 = 1000;

/// Compiled-in SSID, overridable at build time with `SENSOR_NODE_WIFI_SSID`.
pub const DEFAULT_SSID: &str = match option_env!("SENSOR_NODE_WIFI_SSID") {
    Some(ssid) => ssid,
    None => "SBC",
};

/// Compiled-in password, overridable at build time with `SENSOR_NODE_WIFI_PASSWORD`.
pub const DEFAULT_PASSWORD: &str = match option_env!("SENSOR_NODE_WIFI_PASSWORD") {
    Some(password) => password,
    None => "SBCwifi$",
};

/// Station credentials plus the retry policy used while joining.
///
/// Owned by the config store; the connectivity manager keeps a read-only
/// copy loaded when it starts. The password is wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct NetworkConfig {
    /// Network SSID (1-31 bytes).
    pub ssid: String,
    /// Network password (0-63 bytes, empty for open networks).
    pub password: String,
    /// Join retries after a link-lost event before entering the portal.
    pub max_retries: u32,
    /// Wait between join retries, in milliseconds.
    pub retry_delay_ms: u32,
}

impl NetworkConfig {
    /// Create a new network configuration.
    ///
    /// Returns an error if any field is out of bounds.
    pub fn new(
        ssid: impl Into<String>,
        password: impl Into<String>,
        max_retries: u32,
        retry_delay_ms: u32,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            ssid: ssid.into(),
            password: password.into(),
            max_retries,
            retry_delay_ms,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate every field against the bounds the radio and the store accept.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ssid(&self.ssid)?;
        validate_password(&self.password)?;
        validate_counter("max_retries", self.max_retries)?;
        validate_counter("retry_delay_ms", self.retry_delay_ms)?;
        Ok(())
    }

    /// Check if this is an open network (no password).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }

    /// Retry delay as a [`std::time::Duration`].
    pub fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(u64::from(self.retry_delay_ms))
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: DEFAULT_SSID.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("ssid", &self.ssid)
            .field("password", &"****")
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .finish()
    }
}

/// Validate an SSID: non-empty, at most [`MAX_SSID_LEN`] bytes, no NUL.
pub fn validate_ssid(ssid: &str) -> Result<(), ConfigError> {
    if ssid.is_empty() {
        return Err(ConfigError::SsidEmpty);
    }
    if ssid.len() > MAX_SSID_LEN {
        return Err(ConfigError::SsidTooLong {
            len: ssid.len(),
            max: MAX_SSID_LEN,
        });
    }
    if ssid.contains('\0') {
        return Err(ConfigError::EmbeddedNul("ssid"));
    }
    Ok(())
}

/// Validate a password: at most [`MAX_PASSWORD_LEN`] bytes, no NUL.
pub fn validate_password(password: &str) -> Result<(), ConfigError> {
    if password.len() > MAX_PASSWORD_LEN {
        return Err(ConfigError::PasswordTooLong {
            len: password.len(),
            max: MAX_PASSWORD_LEN,
        });
    }
    if password.contains('\0') {
        return Err(ConfigError::EmbeddedNul("password"));
    }
    Ok(())
}

// Counters are persisted as i32.
fn validate_counter(field: &'static str, value: u32) -> Result<(), ConfigError> {
    if value > i32::MAX as u32 {
        return Err(ConfigError::OutOfRange { field, value });
    }
    Ok(())
}

/// Errors that can occur during configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Password exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
    /// A string field contains a NUL byte.
    EmbeddedNul(&'static str),
    /// A counter does not fit the persisted i32 representation.
    OutOfRange { field: &'static str, value: u32 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
            Self::EmbeddedNul(field) => write!(f, "{} contains a NUL byte", field),
            Self::OutOfRange { field, value } => {
                write!(f, "{} out of range: {}", field, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== NetworkConfig Tests ====================

    #[test]
    fn test_valid_config() {
        let config = NetworkConfig::new("Home", "Secret1", 3, 500).unwrap();
        assert_eq!(config.ssid, "Home");
        assert_eq!(config.password, "Secret1");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 500);
    }

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.ssid, DEFAULT_SSID);
        assert_eq!(config.password, DEFAULT_PASSWORD);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_open_network() {
        let config = NetworkConfig::new("Cafe", "", 5, 1000).unwrap();
        assert!(config.is_open());
    }

    #[test]
    fn test_empty_ssid() {
        let result = NetworkConfig::new("", "password", 5, 1000);
        assert_eq!(result, Err(ConfigError::SsidEmpty));
    }

    #[test]
    fn test_ssid_max_length() {
        let config = NetworkConfig::new("a".repeat(31), "", 5, 1000).unwrap();
        assert_eq!(config.ssid.len(), MAX_SSID_LEN);
    }

    #[test]
    fn test_ssid_too_long() {
        let result = NetworkConfig::new("a".repeat(32), "", 5, 1000);
        assert!(matches!(result, Err(ConfigError::SsidTooLong { len: 32, max: 31 })));
    }

    #[test]
    fn test_password_max_length() {
        assert!(NetworkConfig::new("Home", "p".repeat(63), 5, 1000).is_ok());
    }

    #[test]
    fn test_password_too_long() {
        let result = NetworkConfig::new("Home", "p".repeat(64), 5, 1000);
        assert!(matches!(result, Err(ConfigError::PasswordTooLong { .. })));
    }

    #[test]
    fn test_short_password_allowed() {
        // Portal accepts whatever the operator types; the radio decides.
        assert!(NetworkConfig::new("Home", "abc", 5, 1000).is_ok());
    }

    #[test]
    fn test_embedded_nul_rejected() {
        let result = NetworkConfig::new("Ho\0me", "", 5, 1000);
        assert_eq!(result, Err(ConfigError::EmbeddedNul("ssid")));
        let result = NetworkConfig::new("Home", "se\0cret", 5, 1000);
        assert_eq!(result, Err(ConfigError::EmbeddedNul("password")));
    }

    #[test]
    fn test_counter_out_of_i32_range() {
        let result = NetworkConfig::new("Home", "", u32::MAX, 1000);
        assert!(matches!(
            result,
            Err(ConfigError::OutOfRange { field: "max_retries", .. })
        ));
    }

    #[test]
    fn test_debug_hides_password() {
        let config = NetworkConfig::new("Home", "Secret1", 3, 500).unwrap();
        let debug_str = format!("{:?}", config);
        assert!(debug_str.contains("Home"));
        assert!(!debug_str.contains("Secret1"));
    }

    #[test]
    fn test_retry_delay_duration() {
        let config = NetworkConfig::new("Home", "", 3, 250).unwrap();
        assert_eq!(config.retry_delay(), std::time::Duration::from_millis(250));
    }
}
