//! Platform glue: logger initialization and node restart.

use crate::portal::RestartHandle;
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// ESP32: initialize ESP-IDF and route `log` to the IDF logger.
#[cfg(feature = "esp32")]
pub fn init() {
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

/// Host: `env_logger` at `info` unless `RUST_LOG` says otherwise.
#[cfg(not(feature = "esp32"))]
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Reboots the chip.
#[cfg(feature = "esp32")]
pub struct ChipRestart;

#[cfg(feature = "esp32")]
impl RestartHandle for ChipRestart {
    fn restart(&self) {
        info!("Restarting device");
        esp_idf_hal::reset::restart();
    }
}

/// Ends the current node run so the host binary starts over from `Idle`.
#[derive(Debug, Clone)]
pub struct RunRestart {
    cancel: CancellationToken,
    requested: Arc<AtomicBool>,
}

impl RunRestart {
    /// Restart handle for the run stopped by `cancel`.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True once a restart was asked for (as opposed to a plain shutdown).
    pub fn was_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

impl RestartHandle for RunRestart {
    fn restart(&self) {
        info!("Restarting node run");
        self.requested.store(true, Ordering::Release);
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_restart_cancels_run() {
        let cancel = CancellationToken::new();
        let restart = RunRestart::new(cancel.clone());
        assert!(!restart.was_requested());

        restart.clone().restart();
        assert!(cancel.is_cancelled());
        assert!(restart.was_requested());
    }

    #[test]
    fn test_plain_cancel_is_not_a_restart() {
        let cancel = CancellationToken::new();
        let restart = RunRestart::new(cancel.clone());
        cancel.cancel();
        assert!(!restart.was_requested());
    }
}
