//! ESP32 WiFi radio.
//!
//! Wraps the non-blocking ESP-IDF WiFi driver. Join outcomes are not waited
//! for: system event loop subscriptions translate driver events into
//! [`LinkEvent`]s on the supervisor's queue.

use super::{LinkEvent, Radio, RadioError};
use crate::config::{AccessPointConfig, NetworkConfig, PORTAL_ADDRESS};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::ipv4::{self, Mask, RouterConfiguration, Subnet};
use esp_idf_svc::netif::{EspNetif, IpEvent, NetifConfiguration, NetifStack};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiDriver,
    WifiEvent,
};
use esp_idf_sys::EspError;
use log::{debug, info};
use std::net::Ipv4Addr;
use tokio::sync::mpsc::UnboundedSender;

/// ESP32 WiFi radio.
pub struct EspRadio {
    wifi: EspWifi<'static>,
    _wifi_events: EspSubscription<'static, System>,
    _ip_events: EspSubscription<'static, System>,
}

impl EspRadio {
    /// Create the WiFi driver and subscribe to link events.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
        events: UnboundedSender<LinkEvent>,
    ) -> Result<Self, EspError> {
        let driver = WifiDriver::new(modem, sysloop.clone(), nvs)?;

        // Provisioning clients expect the gateway on 192.168.4.0/24.
        let ap_netif = EspNetif::new_with_conf(&NetifConfiguration {
            ip_configuration: Some(ipv4::Configuration::Router(RouterConfiguration {
                subnet: Subnet {
                    gateway: PORTAL_ADDRESS,
                    mask: Mask(24),
                },
                ..Default::default()
            })),
            ..NetifConfiguration::wifi_default_router()
        })?;
        let wifi = EspWifi::wrap_all(driver, EspNetif::new(NetifStack::Sta)?, ap_netif)?;

        let link_events = events.clone();
        let wifi_events = sysloop.subscribe::<WifiEvent, _>(move |event| match event {
            WifiEvent::StaDisconnected(disconnected) => {
                let _ = link_events.send(LinkEvent::LinkLost {
                    reason: u16::from(disconnected.reason()),
                });
            }
            WifiEvent::StaConnected(_) => debug!("WiFi associated, waiting for address"),
            _ => {}
        })?;

        let ip_events = sysloop.subscribe::<IpEvent, _>(move |event| {
            if let IpEvent::DhcpIpAssigned(assignment) = event {
                let _ = events.send(LinkEvent::AddressAcquired {
                    ip: Ipv4Addr::from(assignment.ip().octets()),
                });
            }
        })?;

        info!("WiFi driver initialized");
        Ok(Self {
            wifi,
            _wifi_events: wifi_events,
            _ip_events: ip_events,
        })
    }

    /// MAC address of the access-point interface.
    pub fn ap_mac(&self) -> Result<[u8; 6], EspError> {
        self.wifi.ap_netif().get_mac()
    }

    fn ensure_started(&mut self) -> Result<(), EspError> {
        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }
        Ok(())
    }
}

impl Radio for EspRadio {
    fn start_station(&mut self, config: &NetworkConfig) -> Result<(), RadioError> {
        info!("Connecting to WiFi: {}", config.ssid);

        let auth_method = if config.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let wifi_config = Configuration::Client(ClientConfiguration {
            ssid: config
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| RadioError::InvalidSsid)?,
            password: config
                .password
                .as_str()
                .try_into()
                .map_err(|_| RadioError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        });

        self.wifi.set_configuration(&wifi_config)?;
        self.ensure_started()?;
        self.wifi.connect()?;
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), RadioError> {
        self.wifi.connect()?;
        Ok(())
    }

    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), RadioError> {
        // Not joined anyway; a failing disconnect is irrelevant.
        let _ = self.wifi.disconnect();

        let ap_config = Configuration::AccessPoint(AccessPointConfiguration {
            ssid: config
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| RadioError::InvalidSsid)?,
            password: config
                .password
                .as_str()
                .try_into()
                .map_err(|_| RadioError::InvalidPassword)?,
            channel: config.channel,
            auth_method: AuthMethod::WPA2Personal,
            max_connections: config.max_connections,
            ..Default::default()
        });

        self.wifi.set_configuration(&ap_config)?;
        self.ensure_started()?;
        info!(
            "Access point '{}' ready, portal at http://{}/",
            config.ssid, PORTAL_ADDRESS
        );
        Ok(())
    }
}
