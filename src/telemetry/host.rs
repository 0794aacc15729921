//! Host MQTT sessions over `rumqttc`.
//!
//! Each session owns a synchronous client plus a pump thread that drives
//! the connection and mirrors CONNACK / disconnects into the session's
//! [`SessionReporter`]. The client library reconnects on its own; the pump only
//! paces retries.

use super::{BrokerConnector, BrokerError, BrokerSession, SessionReporter};
use crate::config::BrokerSettings;
use log::{debug, info, warn};
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Outgoing request queue depth.
const REQUEST_CAPACITY: usize = 10;

/// Opens `rumqttc` sessions to the configured broker.
pub struct HostBrokerConnector {
    settings: BrokerSettings,
}

impl HostBrokerConnector {
    pub fn new(settings: BrokerSettings) -> Self {
        Self { settings }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.settings.client_id.as_str(),
            self.settings.host.as_str(),
            self.settings.port,
        );
        options.set_keep_alive(self.settings.keep_alive);
        options.set_credentials(self.settings.access_token.as_str(), "");
        options
    }
}

impl BrokerConnector for HostBrokerConnector {
    type Session = HostBrokerSession;

    fn connect(&mut self, reporter: SessionReporter) -> Result<HostBrokerSession, BrokerError> {
        info!("Connecting to broker {}", self.settings.url());
        let (client, connection) = Client::new(self.options(), REQUEST_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));

        let pump_stop = stop.clone();
        let retry_pause = self.settings.reconnect_timeout;
        thread::Builder::new()
            .name("mqtt-pump".into())
            .spawn(move || pump(connection, reporter, pump_stop, retry_pause))
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        Ok(HostBrokerSession { client, stop })
    }
}

// `stop` ends the loop; writes racing the stop are dropped by the reporter.
fn pump(
    mut connection: Connection,
    reporter: SessionReporter,
    stop: Arc<AtomicBool>,
    retry_pause: Duration,
) {
    for event in connection.iter() {
        if stop.load(Ordering::Relaxed) || !reporter.is_current() {
            break;
        }
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Broker connected");
                reporter.set_connected(true);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker disconnected");
                reporter.set_connected(false);
            }
            Ok(event) => debug!("MQTT event: {:?}", event),
            Err(e) => {
                if reporter.is_connected() {
                    warn!("Broker connection lost: {}", e);
                } else {
                    debug!("Broker connection failed: {}", e);
                }
                reporter.set_connected(false);
                thread::sleep(retry_pause);
            }
        }
    }
    debug!("MQTT pump stopped");
}

/// A live `rumqttc` session.
pub struct HostBrokerSession {
    client: Client,
    stop: Arc<AtomicBool>,
}

impl BrokerSession for HostBrokerSession {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }
}

impl Drop for HostBrokerSession {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Wakes the pump; fails harmlessly if the connection is already gone.
        let _ = self.client.try_disconnect();
    }
}
