//! ESP32 environmental sensor node firmware library.
//!
//! Reads a single-wire temperature/humidity sensor, joins a WiFi network
//! (falling back to a self-hosted provisioning portal), and publishes
//! readings to an MQTT broker. Everything except the `esp32`-gated drivers
//! builds and tests on the host machine.

pub mod app;
pub mod config;
pub mod connectivity;
pub mod platform;
pub mod portal;
pub mod sensor;
pub mod sim;
pub mod status;
pub mod storage;
pub mod telemetry;

// Re-export commonly used items
pub use app::App;
pub use config::{ConfigError, DeviceConfig, NetworkConfig};
pub use connectivity::{ConnectionState, ConnectivityManager, ConnectivityStatus, Supervisor};
pub use portal::{Portal, PortalService};
pub use sensor::{SensorProtocolDecoder, SensorReading};
pub use status::{LogRenderer, StatusRenderer};
pub use storage::{ConfigStore, StoreError};
pub use telemetry::{SharedPublisher, TelemetryPublisher};
