//! Connectivity state machine.
//!
//! ```text
//!            start
//!   Idle ───────────► JoiningNetwork ◄──────────────┐
//!                      │   ▲    │                   │ link lost
//!          link lost,  │   │    │ address acquired  │ (retries reset)
//!          retries     └───┘    ▼                   │
//!          left                Joined ──────────────┘
//!                      │          ▲
//!   retries exhausted  ▼          │ address acquired
//!                   FallbackPortal┘
//! ```
//!
//! The machine does no I/O. Every transition returns the [`Effect`]s the
//! [`super::Supervisor`] must carry out, in order.

use super::{ConnectivityStatus, LinkEvent};
use crate::config::NetworkConfig;
use log::{debug, info, warn};
use std::fmt;
use std::time::Duration;

/// Connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Idle = 0,
    JoiningNetwork = 1,
    Joined = 2,
    FallbackPortal = 3,
}

impl ConnectionState {
    pub(super) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::JoiningNetwork,
            2 => Self::Joined,
            3 => Self::FallbackPortal,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::JoiningNetwork => "joining",
            Self::Joined => "joined",
            Self::FallbackPortal => "fallback-portal",
        };
        f.write_str(name)
    }
}

/// Join attempt counter bounded by `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounter {
    count: u32,
    max: u32,
}

impl RetryCounter {
    pub fn new(max: u32) -> Self {
        Self { count: 0, max }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Count one more retry. Returns false, leaving the count unchanged, if
    /// the bound was already reached.
    pub fn try_increment(&mut self) -> bool {
        if self.count < self.max {
            self.count += 1;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Configure station mode with the loaded config and join.
    ConnectStation,
    /// Wait, then issue another join request.
    Rejoin { after: Duration },
    /// Tear down the broker session.
    StopSession,
    /// Stop the broker session, wait `settle`, start it again.
    StartSession { settle: Duration },
    /// Switch the radio to access-point mode.
    StartAccessPoint,
    /// Start the provisioning HTTP listener.
    StartPortal,
    /// Stop the provisioning HTTP listener.
    StopPortal,
}

/// The connectivity state machine.
pub struct ConnectivityManager {
    state: ConnectionState,
    retries: RetryCounter,
    config: NetworkConfig,
    settle: Duration,
    status: ConnectivityStatus,
}

impl ConnectivityManager {
    /// Create a manager in `Idle` with a working copy of `config`.
    ///
    /// `settle` is the pause between stopping and restarting the broker
    /// session on entry into `Joined`.
    pub fn new(config: NetworkConfig, settle: Duration, status: ConnectivityStatus) -> Self {
        status.set_state(ConnectionState::Idle);
        status.set_retry_count(0);
        Self {
            state: ConnectionState::Idle,
            retries: RetryCounter::new(config.max_retries),
            config,
            settle,
            status,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retries(&self) -> RetryCounter {
        self.retries
    }

    /// The working copy of the network configuration.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Shared status view updated by this machine.
    pub fn status(&self) -> &ConnectivityStatus {
        &self.status
    }

    /// Leave `Idle` and begin joining.
    pub fn start(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Idle {
            warn!("Connectivity already started ({})", self.state);
            return Vec::new();
        }
        info!(
            "Joining network '{}' (max_retries={}, retry_delay={} ms)",
            self.config.ssid, self.config.max_retries, self.config.retry_delay_ms
        );
        self.retries.reset();
        self.transition(ConnectionState::JoiningNetwork);
        vec![Effect::ConnectStation]
    }

    /// Apply one link event.
    pub fn handle(&mut self, event: LinkEvent) -> Vec<Effect> {
        use ConnectionState::*;

        match (self.state, event) {
            (JoiningNetwork, LinkEvent::AddressAcquired { ip }) => {
                info!("Joined network, address {}", ip);
                self.enter_joined();
                vec![Effect::StartSession { settle: self.settle }]
            }
            (JoiningNetwork, LinkEvent::LinkLost { .. } | LinkEvent::JoinTimedOut) => {
                self.log_failure(event);
                if self.retries.try_increment() {
                    info!(
                        "Join retry {}/{}",
                        self.retries.count(),
                        self.retries.max()
                    );
                    self.status.set_retry_count(self.retries.count());
                    vec![Effect::Rejoin {
                        after: self.config.retry_delay(),
                    }]
                } else {
                    warn!(
                        "Join failed after {} retries, starting provisioning portal",
                        self.retries.max()
                    );
                    self.transition(FallbackPortal);
                    vec![
                        Effect::StopSession,
                        Effect::StartAccessPoint,
                        Effect::StartPortal,
                    ]
                }
            }
            (Joined, LinkEvent::AddressAcquired { ip }) => {
                info!("Address renewed: {}", ip);
                self.status.bump_generation();
                vec![Effect::StartSession { settle: self.settle }]
            }
            (Joined, LinkEvent::LinkLost { .. }) => {
                self.log_failure(event);
                self.retries.reset();
                self.transition(JoiningNetwork);
                vec![
                    Effect::StopSession,
                    Effect::Rejoin {
                        after: self.config.retry_delay(),
                    },
                ]
            }
            (FallbackPortal, LinkEvent::AddressAcquired { ip }) => {
                info!("Joined network from portal mode, address {}", ip);
                self.enter_joined();
                vec![
                    Effect::StopPortal,
                    Effect::StartSession { settle: self.settle },
                ]
            }
            (state, event) => {
                debug!("Ignoring {:?} in state {}", event, state);
                Vec::new()
            }
        }
    }

    fn enter_joined(&mut self) {
        self.retries.reset();
        self.transition(ConnectionState::Joined);
        self.status.bump_generation();
    }

    fn transition(&mut self, to: ConnectionState) {
        info!(
            "Connectivity: {} -> {} (retry {}/{})",
            self.state,
            to,
            self.retries.count(),
            self.retries.max()
        );
        self.state = to;
        self.status.set_retry_count(self.retries.count());
        self.status.set_state(to);
    }

    fn log_failure(&self, event: LinkEvent) {
        match event {
            LinkEvent::LinkLost { reason } => {
                warn!("Link lost in state {}, reason {}", self.state, reason)
            }
            LinkEvent::JoinTimedOut => warn!("Join attempt timed out"),
            LinkEvent::AddressAcquired { .. } => {}
        }
    }
}
