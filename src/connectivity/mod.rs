//! Network connectivity management.
//!
//! The node either joins an existing network as a station or, once join
//! attempts are exhausted, hosts its own access point with the provisioning
//! portal.
//!
//! # Components
//!
//! - [`ConnectivityManager`] - pure state machine: events in, [`Effect`]s out
//! - [`Supervisor`] - async task draining the link event queue and carrying
//!   out effects against the [`Radio`], [`SessionControl`] and
//!   [`PortalControl`] seams
//! - [`ConnectivityStatus`] - shared read-only view for the application loop
//!
//! Radio drivers post [`LinkEvent`]s into a single-consumer
//! [`tokio::sync::mpsc`] queue; the supervisor is the only consumer, so
//! transitions are totally ordered.

use crate::config::{AccessPointConfig, NetworkConfig};
use std::fmt;
use std::net::Ipv4Addr;

mod manager;
mod status;
mod supervisor;

#[cfg(not(target_os = "espidf"))]
mod host;

#[cfg(feature = "esp32")]
mod esp;

pub use manager::{ConnectionState, ConnectivityManager, Effect, RetryCounter};
pub use status::ConnectivityStatus;
pub use supervisor::Supervisor;

#[cfg(not(target_os = "espidf"))]
pub use host::HostRadio;

#[cfg(feature = "esp32")]
pub use esp::EspRadio;

/// Reason code used when a radio call fails locally rather than the
/// driver reporting a disconnect.
pub const LOCAL_FAILURE_REASON: u16 = 0;

/// Asynchronous link-layer notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The station obtained an IPv4 address.
    AddressAcquired { ip: Ipv4Addr },
    /// The station lost (or failed to establish) its link.
    LinkLost { reason: u16 },
    /// No event arrived within the join watchdog while joining.
    JoinTimedOut,
}

/// Wireless radio operations the supervisor needs.
///
/// Calls only request an operation; outcomes arrive later as [`LinkEvent`]s.
pub trait Radio {
    /// Configure station mode with `config` and start joining.
    fn start_station(&mut self, config: &NetworkConfig) -> Result<(), RadioError>;
    /// Issue another join request with the current station settings.
    fn reconnect(&mut self) -> Result<(), RadioError>;
    /// Switch to hosting an access point.
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), RadioError>;
}

/// Broker session lifecycle, driven by connectivity transitions.
///
/// Both calls must tolerate being issued redundantly.
pub trait SessionControl {
    fn start_session(&mut self) -> Result<(), crate::telemetry::BrokerError>;
    fn stop_session(&mut self);
}

/// Provisioning portal lifecycle.
pub trait PortalControl {
    fn start_portal(&mut self) -> Result<(), crate::portal::PortalError>;
    fn stop_portal(&mut self);
}

/// Errors reported by a radio driver.
#[derive(Debug)]
pub enum RadioError {
    /// SSID rejected by the driver.
    InvalidSsid,
    /// Password rejected by the driver.
    InvalidPassword,
    /// Driver call failed.
    Driver(String),
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "invalid SSID"),
            Self::InvalidPassword => write!(f, "invalid password"),
            Self::Driver(msg) => write!(f, "radio driver error: {}", msg),
        }
    }
}

impl std::error::Error for RadioError {}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for RadioError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Driver(format!("{:?}", e))
    }
}
