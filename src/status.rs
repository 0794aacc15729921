//! Status feedback for the operator.
//!
//! The node has no display driver; [`LogRenderer`] writes the latest reading
//! and a one-line connection summary to the log instead.

use crate::connectivity::{ConnectionState, ConnectivityStatus};
use crate::sensor::SensorReading;
use crate::telemetry::SessionFlag;
use log::info;

/// Connection state sampled for one render.
///
/// Each field is read independently; the pair is not a consistent snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    pub broker_connected: bool,
}

impl StatusSnapshot {
    pub fn sample(status: &ConnectivityStatus, session: &SessionFlag) -> Self {
        Self {
            state: status.state(),
            broker_connected: session.is_connected(),
        }
    }

    /// One-line summary shown under the reading.
    pub fn summary(&self) -> &'static str {
        match (self.state, self.broker_connected) {
            (ConnectionState::FallbackPortal, _) => "AP mode",
            (_, true) => "Broker: connected",
            (_, false) => "Broker: disconnected",
        }
    }
}

/// Consumer of the latest reading and connection state.
pub trait StatusRenderer {
    /// `reading` is the placeholder (`valid == false`) until the first
    /// successful decode.
    fn render(&mut self, reading: &SensorReading, snapshot: &StatusSnapshot);
}

/// Renders to the log.
#[derive(Debug, Default)]
pub struct LogRenderer;

impl StatusRenderer for LogRenderer {
    fn render(&mut self, reading: &SensorReading, snapshot: &StatusSnapshot) {
        if reading.valid {
            info!(
                "Temp: {} C  Hum: {} %  | {}",
                reading.temperature,
                reading.humidity,
                snapshot.summary()
            );
        } else {
            info!("No reading yet | {}", snapshot.summary());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: ConnectionState, broker_connected: bool) -> StatusSnapshot {
        StatusSnapshot {
            state,
            broker_connected,
        }
    }

    #[test]
    fn test_summary() {
        assert_eq!(snapshot(ConnectionState::Joined, true).summary(), "Broker: connected");
        assert_eq!(
            snapshot(ConnectionState::Joined, false).summary(),
            "Broker: disconnected"
        );
        assert_eq!(
            snapshot(ConnectionState::JoiningNetwork, false).summary(),
            "Broker: disconnected"
        );
        assert_eq!(snapshot(ConnectionState::FallbackPortal, false).summary(), "AP mode");
    }

    #[test]
    fn test_sample_reads_both_flags() {
        let status = ConnectivityStatus::new();
        let flag = SessionFlag::new();
        flag.begin_session().set_connected(true);
        let s = StatusSnapshot::sample(&status, &flag);
        assert_eq!(s.state, ConnectionState::Idle);
        assert!(s.broker_connected);
    }
}
