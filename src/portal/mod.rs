//! Provisioning portal served while the node hosts its own access point.
//!
//! # Components
//!
//! - [`form`] - `application/x-www-form-urlencoded` decoder for the settings form
//! - [`Portal`] - request router over the config store; pure, no sockets
//! - [`PortalServer`] - `tiny_http` listener thread feeding the router
//! - [`PortalService`] - starts and stops the server for the connectivity
//!   supervisor
//!
//! A successful save or reset answers the request first, then asks the
//! [`RestartHandle`] for a restart after the grace delay so connectivity
//! re-evaluates from scratch.

use crate::config::NetworkConfig;
use crate::connectivity::PortalControl;
use crate::storage::{ConfigStore, KvBackend};
use log::{error, info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tiny_http::Method;

pub mod form;
mod pages;
mod server;

pub use form::{decode_form, FormError};
pub use server::PortalServer;

/// Largest accepted request body.
pub const MAX_BODY_LEN: usize = 512;

/// Restarts the node. Called from the portal thread after the grace delay.
pub trait RestartHandle: Send + Sync {
    fn restart(&self);
}

/// Outcome of one portal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalResponse {
    pub status: u16,
    pub body: String,
    /// Value of the `Allow` header on 405 responses.
    pub allow: Option<&'static str>,
    /// Restart the node once the response is sent.
    pub restart: bool,
}

impl PortalResponse {
    fn page(status: u16, body: String) -> Self {
        Self {
            status,
            body,
            allow: None,
            restart: false,
        }
    }

    fn restarting(body: String) -> Self {
        Self {
            restart: true,
            ..Self::page(200, body)
        }
    }

    fn method_not_allowed(allow: &'static str) -> Self {
        Self {
            allow: Some(allow),
            ..Self::page(405, "Method Not Allowed".to_string())
        }
    }
}

/// Request router for the provisioning portal.
pub struct Portal<B: KvBackend> {
    device_name: String,
    store: Mutex<ConfigStore<B>>,
    current: Mutex<NetworkConfig>,
}

impl<B: KvBackend> Portal<B> {
    /// Serve `store`, showing `current` as the running configuration.
    pub fn new(device_name: impl Into<String>, store: ConfigStore<B>, current: NetworkConfig) -> Self {
        Self {
            device_name: device_name.into(),
            store: Mutex::new(store),
            current: Mutex::new(current),
        }
    }

    /// In-memory configuration (what the form shows).
    pub fn current(&self) -> NetworkConfig {
        lock(&self.current).clone()
    }

    pub fn store(&self) -> MutexGuard<'_, ConfigStore<B>> {
        lock(&self.store)
    }

    /// Route one request. `url` may carry a query string, which is ignored.
    pub fn handle(&self, method: &Method, url: &str, body: &[u8]) -> PortalResponse {
        let path = url.split('?').next().unwrap_or(url);
        let response = match (path, method) {
            ("/", Method::Get) => PortalResponse::page(
                200,
                pages::form_page(&self.device_name, &self.current()),
            ),
            ("/", _) => PortalResponse::method_not_allowed("GET"),
            ("/save", Method::Post) => self.save(body),
            ("/reset", Method::Post) => self.reset(),
            ("/save", _) | ("/reset", _) => PortalResponse::method_not_allowed("POST"),
            _ => PortalResponse::page(404, "Not Found".to_string()),
        };
        info!("Portal: {} {} -> {}", method, path, response.status);
        response
    }

    fn save(&self, body: &[u8]) -> PortalResponse {
        if body.len() > MAX_BODY_LEN {
            return PortalResponse::page(413, pages::error_page("Request too large"));
        }
        let config = match decode_form(body) {
            Ok(config) => config,
            Err(e) => {
                warn!("Portal: rejected form: {}", e);
                return PortalResponse::page(400, pages::error_page(&e.to_string()));
            }
        };
        if let Err(e) = self.store().save(&config) {
            error!("Portal: failed to save configuration: {}", e);
            return PortalResponse::page(500, pages::error_page("Could not save configuration"));
        }
        info!(
            "Portal: saved ssid={} password_len={} retries={} delay={}ms",
            config.ssid,
            config.password.len(),
            config.max_retries,
            config.retry_delay_ms
        );
        *lock(&self.current) = config;
        PortalResponse::restarting(pages::success_page(
            "Configuration saved. The node restarts now.",
        ))
    }

    fn reset(&self) -> PortalResponse {
        if let Err(e) = self.store().clear() {
            error!("Portal: failed to clear configuration: {}", e);
            return PortalResponse::page(500, pages::error_page("Could not reset configuration"));
        }
        info!("Portal: configuration cleared, defaults restored");
        *lock(&self.current) = NetworkConfig::default();
        PortalResponse::restarting(pages::success_page(
            "Defaults restored. The node restarts now.",
        ))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Starts the portal server on [`PortalControl::start_portal`] and stops it
/// on [`PortalControl::stop_portal`].
pub struct PortalService<B: KvBackend> {
    portal: Arc<Portal<B>>,
    bind: SocketAddr,
    restart: Arc<dyn RestartHandle>,
    grace: Duration,
    server: Option<PortalServer>,
}

impl<B: KvBackend + Send + 'static> PortalService<B> {
    pub fn new(
        portal: Arc<Portal<B>>,
        bind: SocketAddr,
        restart: Arc<dyn RestartHandle>,
        grace: Duration,
    ) -> Self {
        Self {
            portal,
            bind,
            restart,
            grace,
            server: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }

    /// Address the running server is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(PortalServer::local_addr)
    }
}

impl<B: KvBackend + Send + 'static> PortalControl for PortalService<B> {
    fn start_portal(&mut self) -> Result<(), PortalError> {
        if self.server.is_none() {
            self.server = Some(PortalServer::start(
                self.bind,
                self.portal.clone(),
                self.restart.clone(),
                self.grace,
            )?);
        }
        Ok(())
    }

    fn stop_portal(&mut self) {
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
    }
}

/// Errors starting the portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalError {
    /// The listener could not be bound.
    Bind(String),
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind(msg) => write!(f, "portal bind failed: {}", msg),
        }
    }
}

impl std::error::Error for PortalError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBackend, StoreError};

    fn portal(backend: MemoryBackend) -> Portal<MemoryBackend> {
        Portal::new("ESP32_0ABC3D", ConfigStore::new(backend), NetworkConfig::default())
    }

    fn post(portal: &Portal<MemoryBackend>, url: &str, body: &str) -> PortalResponse {
        portal.handle(&Method::Post, url, body.as_bytes())
    }

    // ==================== Routing Tests ====================

    #[test]
    fn test_get_form() {
        let p = portal(MemoryBackend::new());
        let response = p.handle(&Method::Get, "/", b"");
        assert_eq!(response.status, 200);
        assert!(response.body.contains("action=\"/save\""));
        assert!(!response.restart);
    }

    #[test]
    fn test_query_string_ignored() {
        let p = portal(MemoryBackend::new());
        assert_eq!(p.handle(&Method::Get, "/?x=1", b"").status, 200);
    }

    #[test]
    fn test_unknown_path() {
        let p = portal(MemoryBackend::new());
        assert_eq!(p.handle(&Method::Get, "/stats", b"").status, 404);
    }

    #[test]
    fn test_wrong_methods() {
        let p = portal(MemoryBackend::new());
        let response = p.handle(&Method::Get, "/save", b"");
        assert_eq!(response.status, 405);
        assert_eq!(response.allow, Some("POST"));
        let response = p.handle(&Method::Post, "/", b"");
        assert_eq!(response.status, 405);
        assert_eq!(response.allow, Some("GET"));
    }

    // ==================== Save Tests ====================

    #[test]
    fn test_save_persists_and_requests_restart() {
        let backend = MemoryBackend::new();
        let p = portal(backend.clone());
        let response = post(&p, "/save", "ssid=Home&password=Secret1&retries=3&delay=500");
        assert_eq!(response.status, 200);
        assert!(response.restart);

        let expected = NetworkConfig::new("Home", "Secret1", 3, 500).unwrap();
        assert_eq!(ConfigStore::new(backend).load().unwrap(), expected);
        assert_eq!(p.current(), expected);
    }

    #[test]
    fn test_invalid_form_is_400_without_restart() {
        let backend = MemoryBackend::new();
        let p = portal(backend.clone());
        let response = post(&p, "/save", "ssid=&password=&retries=3&delay=500");
        assert_eq!(response.status, 400);
        assert!(!response.restart);
        assert!(matches!(
            ConfigStore::new(backend).load(),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_store_failure_is_500_without_restart() {
        let backend = MemoryBackend::new();
        backend.fail_writes_after(0);
        let p = portal(backend);
        let response = post(&p, "/save", "ssid=Home&password=&retries=3&delay=500");
        assert_eq!(response.status, 500);
        assert!(!response.restart);
        assert_eq!(p.current(), NetworkConfig::default());
    }

    #[test]
    fn test_oversized_body_rejected() {
        let p = portal(MemoryBackend::new());
        let body = format!("ssid=Home&password=&retries=3&delay=500&pad={}", "x".repeat(512));
        let response = post(&p, "/save", &body);
        assert_eq!(response.status, 413);
        assert!(!response.restart);
    }

    // ==================== Reset Tests ====================

    #[test]
    fn test_reset_clears_and_restores_defaults() {
        let backend = MemoryBackend::new();
        let p = portal(backend.clone());
        post(&p, "/save", "ssid=Home&password=Secret1&retries=3&delay=500");

        let response = post(&p, "/reset", "");
        assert_eq!(response.status, 200);
        assert!(response.restart);
        assert_eq!(p.current(), NetworkConfig::default());
        assert!(backend.is_empty());
    }

    #[test]
    fn test_reset_failure_is_500() {
        let backend = MemoryBackend::new();
        let p = portal(backend.clone());
        post(&p, "/save", "ssid=Home&password=Secret1&retries=3&delay=500");
        backend.fail_writes_after(0);
        let response = post(&p, "/reset", "");
        assert_eq!(response.status, 500);
        assert!(!response.restart);
    }

    // ==================== Service Tests ====================

    struct NoRestart;

    impl RestartHandle for NoRestart {
        fn restart(&self) {}
    }

    fn service(bind: SocketAddr) -> PortalService<MemoryBackend> {
        PortalService::new(
            Arc::new(portal(MemoryBackend::new())),
            bind,
            Arc::new(NoRestart),
            Duration::from_millis(10),
        )
    }

    fn loopback() -> SocketAddr {
        SocketAddr::from((std::net::Ipv4Addr::LOCALHOST, 0))
    }

    #[test]
    fn test_service_start_stop() {
        use std::io::{Read, Write};

        let mut svc = service(loopback());
        assert!(!svc.is_running());
        assert_eq!(svc.local_addr(), None);

        svc.start_portal().unwrap();
        assert!(svc.is_running());
        let addr = svc.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        // Starting again keeps the same listener.
        svc.start_portal().unwrap();
        assert_eq!(svc.local_addr(), Some(addr));

        let mut stream = std::net::TcpStream::connect(addr).unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: 192.168.4.1\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));

        svc.stop_portal();
        assert!(!svc.is_running());
        assert_eq!(svc.local_addr(), None);
        svc.stop_portal();
    }

    #[test]
    fn test_service_bind_failure_leaves_it_stopped() {
        let mut first = service(loopback());
        first.start_portal().unwrap();
        let taken = first.local_addr().unwrap();

        let mut second = service(taken);
        assert!(matches!(second.start_portal(), Err(PortalError::Bind(_))));
        assert!(!second.is_running());
        assert_eq!(second.local_addr(), None);
    }
}
