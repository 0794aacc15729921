//! Compiled-in device settings.
//!
//! Everything here is fixed at build time; only [`super::NetworkConfig`]
//! is writable at runtime (through the provisioning portal).

use std::net::Ipv4Addr;
use std::time::Duration;

/// GPIO carrying the single-wire sensor data line.
pub const SENSOR_GPIO: i32 = 4;

/// ESP32 GPIOs that can drive an open-drain line. Excludes the flash pins
/// (6-11) and the input-only pins (34-39).
pub const IO_CAPABLE_GPIOS: [i32; 20] = [
    0, 2, 4, 5, 12, 13, 14, 15, 16, 17, 18, 19, 21, 22, 23, 25, 26, 27, 32, 33,
];

pub fn is_io_capable_gpio(gpio: i32) -> bool {
    IO_CAPABLE_GPIOS.contains(&gpio)
}

/// Time between sensor reads.
pub const READ_INTERVAL: Duration = Duration::from_secs(5);

/// How long the publisher waits for the broker after joining.
pub const BROKER_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between stopping and restarting the broker session on join.
pub const SESSION_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Pause between answering a portal request and restarting.
pub const RESTART_GRACE_DELAY: Duration = Duration::from_secs(3);

/// Longest wait for any link event while joining before counting a failure.
pub const JOIN_WATCHDOG: Duration = Duration::from_secs(15);

/// Address of the device while it hosts its own access point.
pub const PORTAL_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

/// Port the provisioning portal listens on.
pub const PORTAL_PORT: u16 = 80;

/// Message broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Broker hostname or IP address.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// Device access token, sent as the MQTT username.
    pub access_token: String,
    /// MQTT client identifier.
    pub client_id: String,
    /// Topic readings are published to.
    pub topic: String,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Delay before the client library retries a dropped connection.
    pub reconnect_timeout: Duration,
}

impl BrokerSettings {
    /// Broker URL in `mqtt://host:port` form.
    pub fn url(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: option_env!("SENSOR_NODE_MQTT_HOST")
                .unwrap_or("demo.thingsboard.io")
                .to_string(),
            port: 1883,
            access_token: option_env!("SENSOR_NODE_MQTT_TOKEN")
                .unwrap_or("HGf7saV16hOPmVOmkTwb")
                .to_string(),
            client_id: "sensor-node-esp32".to_string(),
            topic: "v1/devices/me/telemetry".to_string(),
            keep_alive: Duration::from_secs(60),
            reconnect_timeout: Duration::from_secs(5),
        }
    }
}

/// Self-hosted access point used for provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointConfig {
    /// Advertised SSID.
    pub ssid: String,
    /// WPA2 passphrase.
    pub password: String,
    /// 2.4 GHz channel.
    pub channel: u8,
    /// Maximum simultaneously associated stations.
    pub max_connections: u16,
}

/// Default provisioning AP passphrase.
pub const DEFAULT_AP_PASSWORD: &str = "config123";

impl AccessPointConfig {
    /// Build the AP settings for a device, deriving the SSID from its AP MAC.
    ///
    /// The SSID is `ESP32_` followed by the last three MAC bytes in upper-case hex.
    pub fn from_mac(mac: [u8; 6]) -> Self {
        Self {
            ssid: format!("ESP32_{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]),
            password: DEFAULT_AP_PASSWORD.to_string(),
            channel: 1,
            max_connections: 4,
        }
    }
}

/// Everything the node needs besides the network credentials.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub sensor_gpio: i32,
    pub read_interval: Duration,
    pub broker: BrokerSettings,
    pub broker_ready_timeout: Duration,
    pub session_settle_delay: Duration,
    pub restart_grace_delay: Duration,
    pub join_watchdog: Duration,
    pub access_point: AccessPointConfig,
    pub portal_port: u16,
}

impl DeviceConfig {
    /// Device settings with the given access point identity.
    pub fn new(access_point: AccessPointConfig) -> Self {
        Self {
            sensor_gpio: SENSOR_GPIO,
            read_interval: READ_INTERVAL,
            broker: BrokerSettings::default(),
            broker_ready_timeout: BROKER_READY_TIMEOUT,
            session_settle_delay: SESSION_SETTLE_DELAY,
            restart_grace_delay: RESTART_GRACE_DELAY,
            join_watchdog: JOIN_WATCHDOG,
            access_point,
            portal_port: PORTAL_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ap_ssid_from_mac() {
        let ap = AccessPointConfig::from_mac([0x24, 0x6f, 0x28, 0x0a, 0xbc, 0x3d]);
        assert_eq!(ap.ssid, "ESP32_0ABC3D");
        assert_eq!(ap.password, DEFAULT_AP_PASSWORD);
        assert_eq!(ap.channel, 1);
        assert_eq!(ap.max_connections, 4);
    }

    #[test]
    fn test_broker_url() {
        let broker = BrokerSettings {
            host: "broker.local".to_string(),
            port: 1884,
            ..Default::default()
        };
        assert_eq!(broker.url(), "mqtt://broker.local:1884");
    }

    #[test]
    fn test_io_capable_gpios() {
        assert!(is_io_capable_gpio(SENSOR_GPIO));
        assert!(is_io_capable_gpio(0));
        assert!(is_io_capable_gpio(33));
        assert!(!is_io_capable_gpio(1));
        assert!(!is_io_capable_gpio(6));
        assert!(!is_io_capable_gpio(34));
        assert!(!is_io_capable_gpio(-1));
    }

    #[test]
    fn test_device_defaults() {
        let device = DeviceConfig::new(AccessPointConfig::from_mac([0; 6]));
        assert_eq!(device.sensor_gpio, 4);
        assert_eq!(device.read_interval, Duration::from_secs(5));
        assert_eq!(device.broker.topic, "v1/devices/me/telemetry");
        assert_eq!(device.broker_ready_timeout, Duration::from_secs(30));
        assert_eq!(device.portal_port, 80);
    }
}
