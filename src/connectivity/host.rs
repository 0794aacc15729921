//! Simulated radio for host builds.
//!
//! On host systems the OS handles networking, so joining "succeeds" by
//! reporting the machine's own address. A number of failed attempts can be
//! requested up front to walk the node into the provisioning portal.

use super::{LinkEvent, Radio, RadioError};
use crate::config::{AccessPointConfig, NetworkConfig};
use log::info;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tokio::sync::mpsc::UnboundedSender;

/// Reason code reported for simulated failures (no AP found).
const SIMULATED_FAILURE_REASON: u16 = 201;

/// Host radio posting simulated link events.
pub struct HostRadio {
    events: UnboundedSender<LinkEvent>,
    failures_left: u32,
}

impl HostRadio {
    /// Create a radio whose first `failures_before_join` join attempts fail.
    pub fn new(events: UnboundedSender<LinkEvent>, failures_before_join: u32) -> Self {
        Self {
            events,
            failures_left: failures_before_join,
        }
    }

    /// Get the primary local IPv4 address.
    ///
    /// "Connects" a UDP socket to a public address (nothing is sent) and
    /// reads back which local address the OS chose.
    fn detect_local_ip() -> Option<Ipv4Addr> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        }
    }

    fn attempt(&mut self) -> Result<(), RadioError> {
        let event = if self.failures_left > 0 {
            self.failures_left -= 1;
            LinkEvent::LinkLost {
                reason: SIMULATED_FAILURE_REASON,
            }
        } else {
            LinkEvent::AddressAcquired {
                ip: Self::detect_local_ip().unwrap_or(Ipv4Addr::LOCALHOST),
            }
        };
        self.events
            .send(event)
            .map_err(|_| RadioError::Driver("link event queue closed".into()))
    }
}

impl Radio for HostRadio {
    fn start_station(&mut self, config: &NetworkConfig) -> Result<(), RadioError> {
        info!("Host radio: joining '{}'", config.ssid);
        self.attempt()
    }

    fn reconnect(&mut self) -> Result<(), RadioError> {
        self.attempt()
    }

    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), RadioError> {
        info!(
            "Host radio: access point '{}' (simulated, no radio)",
            config.ssid
        );
        Ok(())
    }
}
