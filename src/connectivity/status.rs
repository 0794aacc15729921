//! Shared read-only view of the connectivity state.
//!
//! Written only by [`super::ConnectivityManager`] transitions, read by the
//! application loop and the portal. Each accessor samples one word on its
//! own: two reads are never a consistent snapshot, so callers re-check
//! rather than combine them.

use super::ConnectionState;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    state: AtomicU8,
    retry_count: AtomicU32,
    joined_generation: AtomicU32,
}

/// Cloneable handle to the connectivity status.
#[derive(Debug, Clone, Default)]
pub struct ConnectivityStatus {
    inner: Arc<Inner>,
}

impl ConnectivityStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, possibly stale by the time the caller acts on it.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Consecutive failed join attempts in the current cycle.
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count.load(Ordering::Acquire)
    }

    pub fn is_joined(&self) -> bool {
        self.state() == ConnectionState::Joined
    }

    /// Incremented on every entry into (or address renewal within) `Joined`.
    pub fn joined_generation(&self) -> u32 {
        self.inner.joined_generation.load(Ordering::Acquire)
    }

    pub(super) fn set_state(&self, state: ConnectionState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    pub(super) fn set_retry_count(&self, count: u32) {
        self.inner.retry_count.store(count, Ordering::Release);
    }

    pub(super) fn bump_generation(&self) {
        self.inner.joined_generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        let status = ConnectivityStatus::new();
        assert_eq!(status.state(), ConnectionState::Idle);
        assert_eq!(status.retry_count(), 0);
        assert_eq!(status.joined_generation(), 0);
        assert!(!status.is_joined());
    }

    #[test]
    fn test_clones_share_state() {
        let status = ConnectivityStatus::new();
        let view = status.clone();
        status.set_state(ConnectionState::Joined);
        status.bump_generation();
        assert!(view.is_joined());
        assert_eq!(view.joined_generation(), 1);
    }
}
