//! ESP32 MQTT sessions over the ESP-IDF client.

use super::{BrokerConnector, BrokerError, BrokerSession, SessionReporter};
use crate::config::BrokerSettings;
use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration, QoS};
use log::{info, warn};

/// Opens ESP-IDF MQTT sessions to the configured broker.
pub struct EspBrokerConnector {
    settings: BrokerSettings,
}

impl EspBrokerConnector {
    pub fn new(settings: BrokerSettings) -> Self {
        Self { settings }
    }
}

impl BrokerConnector for EspBrokerConnector {
    type Session = EspBrokerSession;

    fn connect(&mut self, reporter: SessionReporter) -> Result<EspBrokerSession, BrokerError> {
        let url = self.settings.url();
        info!("Connecting to broker {}", url);

        let conf = MqttClientConfiguration {
            client_id: Some(self.settings.client_id.as_str()),
            username: Some(self.settings.access_token.as_str()),
            keep_alive_interval: Some(self.settings.keep_alive),
            reconnect_timeout: Some(self.settings.reconnect_timeout),
            ..Default::default()
        };

        let client = EspMqttClient::new_cb(&url, &conf, move |event| match event.payload() {
            EventPayload::Connected(_) => {
                info!("Broker connected");
                reporter.set_connected(true);
            }
            EventPayload::Disconnected => {
                warn!("Broker disconnected");
                reporter.set_connected(false);
            }
            EventPayload::Error(e) => {
                warn!("Broker error: {:?}", e);
                reporter.set_connected(false);
            }
            _ => {}
        })
        .map_err(|e| BrokerError::Connect(format!("{:?}", e)))?;

        Ok(EspBrokerSession { client })
    }
}

/// A live ESP-IDF MQTT session; dropping it destroys the client.
pub struct EspBrokerSession {
    client: EspMqttClient<'static>,
}

impl BrokerSession for EspBrokerSession {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .map(|_| ())
            .map_err(|e| BrokerError::Publish(format!("{:?}", e)))
    }
}
