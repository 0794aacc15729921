//! Node configuration.
//!
//! # Components
//!
//! - [`network`] - Station credentials and join retry policy (runtime-writable)
//! - [`device`] - Compiled-in device settings (sensor pin, broker, access point)

mod device;
mod network;

pub use device::{
    is_io_capable_gpio, AccessPointConfig, BrokerSettings, DeviceConfig, BROKER_READY_TIMEOUT,
    DEFAULT_AP_PASSWORD, IO_CAPABLE_GPIOS, JOIN_WATCHDOG, PORTAL_ADDRESS, PORTAL_PORT, READ_INTERVAL, RESTART_GRACE_DELAY,
    SENSOR_GPIO, SESSION_SETTLE_DELAY,
};
pub use network::{
    validate_password, validate_ssid, ConfigError, NetworkConfig, DEFAULT_MAX_RETRIES,
    DEFAULT_PASSWORD, DEFAULT_RETRY_DELAY_MS, DEFAULT_SSID, MAX_PASSWORD_LEN, MAX_SSID_LEN,
};
