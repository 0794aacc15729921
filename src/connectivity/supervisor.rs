//! Async driver for the connectivity state machine.
//!
//! The supervisor is the single consumer of the link event queue. It feeds
//! each event to [`ConnectivityManager::handle`] and carries out the
//! returned effects one by one. Retry backoff and the session settle delay
//! are cooperative sleeps: events arriving meanwhile wait in the queue.

use super::{
    ConnectionState, ConnectivityManager, ConnectivityStatus, Effect, LinkEvent, PortalControl,
    Radio, RadioError, SessionControl, LOCAL_FAILURE_REASON,
};
use crate::config::AccessPointConfig;
use log::{error, info, warn};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

/// Owns the state machine and its I/O seams.
pub struct Supervisor<R, S, P> {
    manager: ConnectivityManager,
    radio: R,
    session: S,
    portal: P,
    access_point: AccessPointConfig,
    join_watchdog: Duration,
    events: UnboundedReceiver<LinkEvent>,
    // Locally generated events, handled before the queue.
    pending: VecDeque<LinkEvent>,
}

impl<R: Radio, S: SessionControl, P: PortalControl> Supervisor<R, S, P> {
    pub fn new(
        manager: ConnectivityManager,
        radio: R,
        session: S,
        portal: P,
        access_point: AccessPointConfig,
        join_watchdog: Duration,
        events: UnboundedReceiver<LinkEvent>,
    ) -> Self {
        Self {
            manager,
            radio,
            session,
            portal,
            access_point,
            join_watchdog,
            events,
            pending: VecDeque::new(),
        }
    }

    /// Shared status view.
    pub fn status(&self) -> ConnectivityStatus {
        self.manager.status().clone()
    }

    /// Start joining and process events until cancelled or every event
    /// sender is gone. Stops the session and the portal on the way out.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Connectivity supervisor started");

        let effects = self.manager.start();
        if self.execute(effects, &cancel).await {
            loop {
                let event = match self.pending.pop_front() {
                    Some(event) => event,
                    None => match self.next_event(&cancel).await {
                        Some(event) => event,
                        None => break,
                    },
                };
                let effects = self.manager.handle(event);
                if !self.execute(effects, &cancel).await {
                    break;
                }
            }
        }

        self.session.stop_session();
        self.portal.stop_portal();
        info!("Connectivity supervisor stopped");
    }

    async fn next_event(&mut self, cancel: &CancellationToken) -> Option<LinkEvent> {
        let joining = self.manager.state() == ConnectionState::JoiningNetwork;
        let watchdog = self.join_watchdog;
        let events = &mut self.events;

        let recv = async move {
            if joining {
                match tokio::time::timeout(watchdog, events.recv()).await {
                    Ok(event) => event,
                    Err(_) => Some(LinkEvent::JoinTimedOut),
                }
            } else {
                events.recv().await
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => None,
            event = recv => {
                if event.is_none() {
                    warn!("Link event queue closed");
                }
                event
            }
        }
    }

    // Returns false if cancelled midway.
    async fn execute(&mut self, effects: Vec<Effect>, cancel: &CancellationToken) -> bool {
        for effect in effects {
            match effect {
                Effect::ConnectStation => {
                    if let Err(e) = self.radio.start_station(self.manager.config()) {
                        self.radio_failed("station start", e);
                    }
                }
                Effect::Rejoin { after } => {
                    info!("Rejoining in {} ms", after.as_millis());
                    if !sleep_or_cancel(after, cancel).await {
                        return false;
                    }
                    if let Err(e) = self.radio.reconnect() {
                        self.radio_failed("reconnect", e);
                    }
                }
                Effect::StopSession => self.session.stop_session(),
                Effect::StartSession { settle } => {
                    self.session.stop_session();
                    if !sleep_or_cancel(settle, cancel).await {
                        return false;
                    }
                    if let Err(e) = self.session.start_session() {
                        warn!("Broker session start failed: {}", e);
                    }
                }
                Effect::StartAccessPoint => {
                    match self.radio.start_access_point(&self.access_point) {
                        Ok(()) => info!(
                            "Access point '{}' up on channel {}",
                            self.access_point.ssid, self.access_point.channel
                        ),
                        Err(e) => error!("Failed to start access point: {}", e),
                    }
                }
                Effect::StartPortal => {
                    if let Err(e) = self.portal.start_portal() {
                        error!("Failed to start provisioning portal: {}", e);
                    }
                }
                Effect::StopPortal => self.portal.stop_portal(),
            }
        }
        true
    }

    fn radio_failed(&mut self, what: &str, e: RadioError) {
        warn!("Radio {} failed: {}", what, e);
        self.pending.push_back(LinkEvent::LinkLost {
            reason: LOCAL_FAILURE_REASON,
        });
    }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
