//! Broker session ownership and gated publishing.

use super::{encode_reading, BrokerConnector, BrokerError, BrokerSession, PublishError, SessionFlag};
use crate::connectivity::{ConnectivityStatus, SessionControl};
use crate::sensor::SensorReading;
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard};

/// Publishes readings over a broker session it owns.
///
/// The session exists only between [`TelemetryPublisher::start_session`]
/// and [`TelemetryPublisher::stop_session`], which connectivity issues on
/// entering and leaving `Joined`.
pub struct TelemetryPublisher<C: BrokerConnector> {
    connector: C,
    session: Option<C::Session>,
    flag: SessionFlag,
    topic: String,
}

impl<C: BrokerConnector> TelemetryPublisher<C> {
    pub fn new(connector: C, topic: impl Into<String>) -> Self {
        Self {
            connector,
            session: None,
            flag: SessionFlag::new(),
            topic: topic.into(),
        }
    }

    /// Broker-level connected flag of the current (or next) session.
    pub fn session_flag(&self) -> SessionFlag {
        self.flag.clone()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Start a session, replacing any running one.
    pub fn start_session(&mut self) -> Result<(), BrokerError> {
        self.stop_session();
        let session = self.connector.connect(self.flag.begin_session())?;
        self.session = Some(session);
        info!("Broker session started");
        Ok(())
    }

    /// Tear down the session. Stopping a stopped publisher is a no-op.
    pub fn stop_session(&mut self) {
        self.flag.end_session();
        if self.session.take().is_some() {
            info!("Broker session stopped");
        }
    }

    /// Start a session only if none is running.
    pub fn ensure_session(&mut self) -> Result<(), BrokerError> {
        if self.session.is_none() {
            self.start_session()?;
        }
        Ok(())
    }

    /// Publish one reading if the node is joined and the broker connected.
    ///
    /// Readiness is sampled here, at call time; a failed send is not retried.
    pub fn publish(
        &mut self,
        reading: &SensorReading,
        status: &ConnectivityStatus,
    ) -> Result<(), PublishError> {
        if !status.is_joined() || !self.flag.is_connected() {
            return Err(PublishError::SessionNotReady);
        }
        let session = self.session.as_mut().ok_or(PublishError::SessionNotReady)?;

        let payload = encode_reading(reading)?;
        session
            .publish(&self.topic, &payload)
            .map_err(PublishError::BrokerRejected)?;
        debug!(
            "Published to {}: {}",
            self.topic,
            String::from_utf8_lossy(&payload)
        );
        Ok(())
    }
}

/// [`TelemetryPublisher`] shared between the application loop and the
/// connectivity supervisor.
pub struct SharedPublisher<C: BrokerConnector>(Arc<Mutex<TelemetryPublisher<C>>>);

impl<C: BrokerConnector> SharedPublisher<C> {
    pub fn new(publisher: TelemetryPublisher<C>) -> Self {
        Self(Arc::new(Mutex::new(publisher)))
    }

    pub fn lock(&self) -> MutexGuard<'_, TelemetryPublisher<C>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<C: BrokerConnector> Clone for SharedPublisher<C> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<C: BrokerConnector> SessionControl for SharedPublisher<C> {
    fn start_session(&mut self) -> Result<(), BrokerError> {
        self.lock().start_session()
    }

    fn stop_session(&mut self) {
        self.lock().stop_session();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::connectivity::{ConnectivityManager, LinkEvent};
    use crate::telemetry::SessionReporter;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    /// Records what fake sessions see. Shared with the test body.
    #[derive(Debug, Default)]
    pub(crate) struct BrokerLog {
        pub connects: usize,
        pub published: Vec<(String, String)>,
        pub live_sessions: usize,
        /// Reporter handed to the latest session.
        pub reporter: Option<SessionReporter>,
    }

    /// Mark the latest fake session as connected, as a late CONNACK would.
    pub(crate) fn connect_latest(log: &SharedLog) {
        if let Some(reporter) = &log.lock().unwrap().reporter {
            reporter.set_connected(true);
        }
    }

    pub(crate) type SharedLog = Arc<Mutex<BrokerLog>>;

    /// Fake connector whose sessions connect instantly (unless told not to).
    pub(crate) struct FakeConnector {
        pub log: SharedLog,
        pub auto_connect: bool,
        pub reject_publish: bool,
        pub fail_connect: bool,
    }

    impl FakeConnector {
        pub(crate) fn new(log: SharedLog) -> Self {
            Self {
                log,
                auto_connect: true,
                reject_publish: false,
                fail_connect: false,
            }
        }
    }

    pub(crate) struct FakeSession {
        log: SharedLog,
        reject: bool,
    }

    impl BrokerConnector for FakeConnector {
        type Session = FakeSession;

        fn connect(&mut self, reporter: SessionReporter) -> Result<FakeSession, BrokerError> {
            if self.fail_connect {
                return Err(BrokerError::Connect("refused".into()));
            }
            let mut log = self.log.lock().unwrap();
            log.connects += 1;
            log.live_sessions += 1;
            reporter.set_connected(self.auto_connect);
            log.reporter = Some(reporter);
            Ok(FakeSession {
                log: self.log.clone(),
                reject: self.reject_publish,
            })
        }
    }

    impl BrokerSession for FakeSession {
        fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
            if self.reject {
                return Err(BrokerError::Publish("queue full".into()));
            }
            self.log.lock().unwrap().published.push((
                topic.to_string(),
                String::from_utf8(payload.to_vec()).unwrap(),
            ));
            Ok(())
        }
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.log.lock().unwrap().live_sessions -= 1;
        }
    }

    fn joined_status() -> ConnectivityStatus {
        let status = ConnectivityStatus::new();
        let config = NetworkConfig::new("Home", "", 1, 10).unwrap();
        let mut manager = ConnectivityManager::new(config, Duration::ZERO, status.clone());
        manager.start();
        manager.handle(LinkEvent::AddressAcquired {
            ip: Ipv4Addr::new(10, 0, 0, 2),
        });
        status
    }

    fn publisher(connector: FakeConnector) -> TelemetryPublisher<FakeConnector> {
        TelemetryPublisher::new(connector, "v1/devices/me/telemetry")
    }

    // ==================== Gating Tests ====================

    #[test]
    fn test_publish_requires_join() {
        let log = SharedLog::default();
        let mut p = publisher(FakeConnector::new(log.clone()));
        p.start_session().unwrap();

        let idle = ConnectivityStatus::new();
        assert_eq!(
            p.publish(&SensorReading::new(20, 50), &idle),
            Err(PublishError::SessionNotReady)
        );
        assert!(log.lock().unwrap().published.is_empty());
    }

    #[test]
    fn test_publish_requires_session() {
        let log = SharedLog::default();
        let mut p = publisher(FakeConnector::new(log));
        assert_eq!(
            p.publish(&SensorReading::new(20, 50), &joined_status()),
            Err(PublishError::SessionNotReady)
        );
    }

    #[test]
    fn test_publish_requires_broker_connected() {
        let log = SharedLog::default();
        let mut connector = FakeConnector::new(log.clone());
        connector.auto_connect = false;
        let mut p = publisher(connector);
        p.start_session().unwrap();
        assert_eq!(
            p.publish(&SensorReading::new(20, 50), &joined_status()),
            Err(PublishError::SessionNotReady)
        );

        connect_latest(&log);
        assert!(p.publish(&SensorReading::new(20, 50), &joined_status()).is_ok());
    }

    #[test]
    fn test_publish_sends_payload() {
        let log = SharedLog::default();
        let mut p = publisher(FakeConnector::new(log.clone()));
        p.start_session().unwrap();
        p.publish(&SensorReading::new(23, 55), &joined_status())
            .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            log.published,
            vec![(
                "v1/devices/me/telemetry".to_string(),
                r#"{"temperature":23,"humidity":55}"#.to_string()
            )]
        );
    }

    #[test]
    fn test_rejected_publish_reported() {
        let log = SharedLog::default();
        let mut connector = FakeConnector::new(log);
        connector.reject_publish = true;
        let mut p = publisher(connector);
        p.start_session().unwrap();
        assert!(matches!(
            p.publish(&SensorReading::new(1, 2), &joined_status()),
            Err(PublishError::BrokerRejected(_))
        ));
    }

    // ==================== Session Lifecycle Tests ====================

    #[test]
    fn test_start_replaces_running_session() {
        let log = SharedLog::default();
        let mut p = publisher(FakeConnector::new(log.clone()));
        p.start_session().unwrap();
        p.start_session().unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.connects, 2);
        assert_eq!(log.live_sessions, 1);
    }

    #[test]
    fn test_stop_is_idempotent_and_clears_flag() {
        let log = SharedLog::default();
        let mut p = publisher(FakeConnector::new(log.clone()));
        p.stop_session();
        p.start_session().unwrap();
        assert!(p.session_flag().is_connected());
        p.stop_session();
        p.stop_session();
        assert!(!p.has_session());
        assert!(!p.session_flag().is_connected());
        assert_eq!(log.lock().unwrap().live_sessions, 0);
    }

    #[test]
    fn test_stopped_session_cannot_reconnect_flag() {
        let log = SharedLog::default();
        let mut p = publisher(FakeConnector::new(log.clone()));
        p.start_session().unwrap();
        p.stop_session();

        // The torn-down client reports a connection after the stop.
        connect_latest(&log);
        assert!(!p.session_flag().is_connected());
        assert_eq!(
            p.publish(&SensorReading::new(20, 50), &joined_status()),
            Err(PublishError::SessionNotReady)
        );
    }

    #[test]
    fn test_failed_start_leaves_no_session() {
        let log = SharedLog::default();
        let mut connector = FakeConnector::new(log);
        connector.fail_connect = true;
        let mut p = publisher(connector);
        assert!(p.start_session().is_err());
        assert!(!p.has_session());
        assert!(p.ensure_session().is_err());
    }

    #[test]
    fn test_ensure_session_keeps_running_session() {
        let log = SharedLog::default();
        let mut p = publisher(FakeConnector::new(log.clone()));
        p.ensure_session().unwrap();
        p.ensure_session().unwrap();
        assert_eq!(log.lock().unwrap().connects, 1);
    }

    #[test]
    fn test_shared_publisher_session_control() {
        let log = SharedLog::default();
        let shared = SharedPublisher::new(publisher(FakeConnector::new(log.clone())));
        let mut control = shared.clone();
        control.start_session().unwrap();
        assert!(shared.lock().has_session());
        control.stop_session();
        assert!(!shared.lock().has_session());
    }
}
