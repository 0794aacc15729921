//! The read-publish-display loop.
//!
//! One cooperative task: decode a reading on a blocking worker, render it,
//! publish it if the node is joined and the broker connected, then sleep
//! until the next cycle. Connectivity changes happen in the supervisor; the
//! loop only samples [`ConnectivityStatus`] and the broker [`SessionFlag`].

use crate::config::DeviceConfig;
use crate::connectivity::ConnectivityStatus;
use crate::sensor::{BusError, DecodeError, SensorProtocolDecoder, SensorReading, SingleWireBus};
use crate::status::{StatusRenderer, StatusSnapshot};
use crate::telemetry::{BrokerConnector, PublishError, SessionFlag, SharedPublisher};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Application loop state.
pub struct App<B, C: BrokerConnector, R> {
    decoder: Arc<Mutex<SensorProtocolDecoder<B>>>,
    publisher: SharedPublisher<C>,
    session: SessionFlag,
    status: ConnectivityStatus,
    renderer: R,
    read_interval: Duration,
    broker_ready_timeout: Duration,
    reading: SensorReading,
    seen_generation: u32,
    // Start of the current joined-but-broker-down stretch.
    disconnected_since: Option<Instant>,
}

impl<B, C, R> App<B, C, R>
where
    B: SingleWireBus + Send + 'static,
    C: BrokerConnector,
    R: StatusRenderer,
{
    pub fn new(
        decoder: SensorProtocolDecoder<B>,
        publisher: SharedPublisher<C>,
        status: ConnectivityStatus,
        renderer: R,
        device: &DeviceConfig,
    ) -> Self {
        let session = publisher.lock().session_flag();
        Self {
            decoder: Arc::new(Mutex::new(decoder)),
            publisher,
            session,
            status,
            renderer,
            read_interval: device.read_interval,
            broker_ready_timeout: device.broker_ready_timeout,
            reading: SensorReading::default(),
            seen_generation: 0,
            disconnected_since: None,
        }
    }

    /// Latest good reading, or the placeholder before the first one.
    pub fn reading(&self) -> SensorReading {
        self.reading
    }

    /// Run cycles every read interval until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Application loop started, reading every {} s",
            self.read_interval.as_secs()
        );
        while self.cycle(&cancel).await {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.read_interval) => {}
            }
        }
        info!("Application loop stopped");
    }

    /// One read-publish-display cycle. Returns false if cancelled.
    pub async fn cycle(&mut self, cancel: &CancellationToken) -> bool {
        if !self.await_new_session(cancel).await {
            return false;
        }
        self.maintain_session();

        let fresh = match self.read().await {
            Ok(reading) => {
                self.reading = reading;
                true
            }
            Err(e) => {
                warn!("Sensor read failed: {}", e);
                false
            }
        };

        let snapshot = StatusSnapshot::sample(&self.status, &self.session);
        self.renderer.render(&self.reading, &snapshot);

        if fresh {
            self.publish();
        }
        true
    }

    // On each new entry into Joined, give the broker session time to come up.
    async fn await_new_session(&mut self, cancel: &CancellationToken) -> bool {
        let generation = self.status.joined_generation();
        if generation == self.seen_generation || !self.status.is_joined() {
            return true;
        }
        self.seen_generation = generation;
        info!("Network joined, waiting for broker");

        tokio::select! {
            _ = cancel.cancelled() => return false,
            ready = self.session.wait_until_connected(self.broker_ready_timeout) => {
                if ready {
                    info!("Broker ready");
                    self.disconnected_since = None;
                } else {
                    warn!(
                        "Broker not ready after {} s, readings will not be sent",
                        self.broker_ready_timeout.as_secs()
                    );
                    self.disconnected_since = Some(Instant::now());
                }
            }
        }
        true
    }

    // Degraded mode: joined but the broker is down. Make sure a session
    // exists, and replace it once it has been down for a full readiness
    // timeout.
    fn maintain_session(&mut self) {
        if !self.status.is_joined() || self.session.is_connected() {
            self.disconnected_since = None;
            return;
        }

        let since = *self.disconnected_since.get_or_insert_with(Instant::now);
        let mut publisher = self.publisher.lock();
        let result = if since.elapsed() >= self.broker_ready_timeout {
            warn!(
                "Broker unreachable for {} s, restarting session",
                since.elapsed().as_secs()
            );
            self.disconnected_since = Some(Instant::now());
            publisher.start_session()
        } else {
            publisher.ensure_session()
        };
        if let Err(e) = result {
            warn!("Broker session reconnect failed: {}", e);
        }
    }

    async fn read(&self) -> Result<SensorReading, DecodeError> {
        let decoder = self.decoder.clone();
        tokio::task::spawn_blocking(move || {
            decoder
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .decode()
        })
        .await
        .unwrap_or_else(|e| Err(DecodeError::Bus(BusError(format!("read task failed: {}", e)))))
    }

    fn publish(&mut self) {
        let mut publisher = self.publisher.lock();
        match publisher.publish(&self.reading, &self.status) {
            Ok(()) => info!(
                "Published to {}: temperature={} humidity={}",
                publisher.topic(),
                self.reading.temperature,
                self.reading.humidity
            ),
            Err(PublishError::SessionNotReady) => debug!("Broker not ready, reading not sent"),
            Err(e) => warn!("Publish failed: {}", e),
        }
    }
}
