//! Telemetry publication to the message broker.
//!
//! # Components
//!
//! - [`TelemetryPublisher`] - owns the broker session and gates publishing
//!   on both network and broker readiness
//! - [`SharedPublisher`] - handle shared by the application loop and the
//!   connectivity supervisor
//! - [`BrokerConnector`] / [`BrokerSession`] - MQTT client seam, implemented
//!   by [`EspBrokerConnector`] on the device and [`HostBrokerConnector`] on
//!   the host
//!
//! Delivery is at-most-once: no acknowledgement wait, no backlog.

use crate::sensor::SensorReading;
use log::info;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) mod publisher;
pub use publisher::{SharedPublisher, TelemetryPublisher};

#[cfg(not(target_os = "espidf"))]
mod host;
#[cfg(not(target_os = "espidf"))]
pub use host::HostBrokerConnector;

#[cfg(feature = "esp32")]
mod esp;
#[cfg(feature = "esp32")]
pub use esp::EspBrokerConnector;

/// Poll interval of [`SessionFlag::wait_until_connected`].
const READY_POLL: Duration = Duration::from_millis(100);

/// Progress log interval of [`SessionFlag::wait_until_connected`].
const READY_LOG_EVERY: Duration = Duration::from_secs(5);

/// Opens broker sessions.
pub trait BrokerConnector {
    type Session: BrokerSession;

    /// Start a session. The client connects in the background and reports
    /// its protocol-level state through `reporter`.
    fn connect(&mut self, reporter: SessionReporter) -> Result<Self::Session, BrokerError>;
}

/// A running broker session. Dropping it tears the session down.
pub trait BrokerSession {
    /// Send `payload` to `topic` at most once.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;
}

// Packed flag state: session generation in the upper bits, connected in bit 0.
fn pack(generation: u64, connected: bool) -> u64 {
    (generation << 1) | u64::from(connected)
}

/// Broker-level "connected" flag.
///
/// Written only through the [`SessionReporter`] of the current session.
/// Ending a session (or beginning the next one) clears the flag and makes
/// every older reporter inert.
#[derive(Debug, Clone, Default)]
pub struct SessionFlag(Arc<AtomicU64>);

impl SessionFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::Acquire) & 1 == 1
    }

    /// Clear the flag and hand out the writer for a new session.
    pub fn begin_session(&self) -> SessionReporter {
        let generation = self.advance();
        SessionReporter {
            state: self.0.clone(),
            generation,
        }
    }

    /// Clear the flag and disown the current session's reporter.
    pub fn end_session(&self) {
        self.advance();
    }

    fn advance(&self) -> u64 {
        let previous = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                Some(pack((state >> 1).wrapping_add(1), false))
            })
            .unwrap_or_else(|state| state);
        (previous >> 1).wrapping_add(1)
    }

    /// Wait for the broker connection, yielding between polls.
    ///
    /// Returns false if `timeout` elapsed first.
    pub async fn wait_until_connected(&self, timeout: Duration) -> bool {
        let mut waited = Duration::ZERO;
        while !self.is_connected() {
            if waited >= timeout {
                return false;
            }
            tokio::time::sleep(READY_POLL).await;
            waited += READY_POLL;
            if waited.as_millis() % READY_LOG_EVERY.as_millis() == 0 {
                info!(
                    "Waiting for broker... {}/{} ms",
                    waited.as_millis(),
                    timeout.as_millis()
                );
            }
        }
        true
    }
}

/// Write side of a [`SessionFlag`], owned by one session's event callback.
#[derive(Debug, Clone)]
pub struct SessionReporter {
    state: Arc<AtomicU64>,
    generation: u64,
}

impl SessionReporter {
    /// Record the session's state. Ignored once the session has been ended.
    pub fn set_connected(&self, connected: bool) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state >> 1 == self.generation).then(|| pack(self.generation, connected))
            });
    }

    /// True while this session is current and connected.
    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == pack(self.generation, true)
    }

    /// False once the session has been ended or replaced.
    pub fn is_current(&self) -> bool {
        self.state.load(Ordering::Acquire) >> 1 == self.generation
    }
}

/// Wire format of one reading.
#[derive(Debug, Serialize)]
struct TelemetryPayload {
    temperature: u8,
    humidity: u8,
}

/// Encode a reading as `{"temperature":<n>,"humidity":<n>}`.
pub fn encode_reading(reading: &SensorReading) -> Result<Vec<u8>, PublishError> {
    serde_json::to_vec(&TelemetryPayload {
        temperature: reading.temperature,
        humidity: reading.humidity,
    })
    .map_err(|e| PublishError::EncodingFailed(e.to_string()))
}

/// Errors reported by an MQTT client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The client could not be created or configured.
    Connect(String),
    /// The client refused the message.
    Publish(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(msg) => write!(f, "broker connect failed: {}", msg),
            Self::Publish(msg) => write!(f, "broker publish failed: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Why a reading was not published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Not joined, or no connected broker session.
    SessionNotReady,
    /// The session refused the message.
    BrokerRejected(BrokerError),
    /// The payload could not be encoded.
    EncodingFailed(String),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotReady => write!(f, "broker session not ready"),
            Self::BrokerRejected(e) => write!(f, "rejected: {}", e),
            Self::EncodingFailed(msg) => write!(f, "encoding failed: {}", msg),
        }
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BrokerRejected(e) => Some(e),
            _ => None,
        }
    }
}
