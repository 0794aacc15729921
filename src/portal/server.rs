//! `tiny_http` listener for the provisioning portal.
//!
//! Runs on a background thread and polls a shutdown flag between requests.
//! Works on both host and ESP32 (via std::net).

use super::{Portal, PortalError, PortalResponse, RestartHandle, MAX_BODY_LEN};
use crate::storage::KvBackend;
use log::{error, info, warn};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server};

/// Shutdown flag poll interval.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Running portal listener. Drop it to stop the server.
pub struct PortalServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl PortalServer {
    /// Bind `addr` and start serving `portal`.
    ///
    /// After a response that asks for a restart, the thread waits `grace`
    /// and then calls `restart`.
    pub fn start<B: KvBackend + Send + 'static>(
        addr: SocketAddr,
        portal: Arc<Portal<B>>,
        restart: Arc<dyn RestartHandle>,
        grace: Duration,
    ) -> Result<Self, PortalError> {
        let server = Server::http(addr).map_err(|e| PortalError::Bind(e.to_string()))?;
        let local_addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| PortalError::Bind("not an IP listener".to_string()))?;

        info!("Provisioning portal listening on http://{}/", local_addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name("portal".into())
            .spawn(move || run_server(server, portal, restart, grace, shutdown_clone))
            .map_err(|e| PortalError::Bind(e.to_string()))?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the server.
    ///
    /// May take up to the poll interval, or the grace delay if a restart
    /// is pending.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            info!("Provisioning portal stopped");
        }
    }
}

impl Drop for PortalServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_server<B: KvBackend>(
    server: Server,
    portal: Arc<Portal<B>>,
    restart: Arc<dyn RestartHandle>,
    grace: Duration,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Acquire) {
        match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(request)) => {
                if serve(&portal, request) {
                    info!("Restarting in {} ms", grace.as_millis());
                    thread::sleep(grace);
                    restart.restart();
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("Portal server error: {}", e);
                break;
            }
        }
    }
}

/// Answer one request. Returns true if a restart was requested.
fn serve<B: KvBackend>(portal: &Portal<B>, mut request: Request) -> bool {
    let mut body = Vec::new();
    // One byte past the limit is enough for the router to reject the body.
    let limit = MAX_BODY_LEN as u64 + 1;
    if let Err(e) = request.as_reader().take(limit).read_to_end(&mut body) {
        warn!("Portal: failed to read request body: {}", e);
        return false;
    }

    let outcome = portal.handle(request.method(), request.url(), &body);
    let restart = outcome.restart;
    if let Err(e) = request.respond(into_response(outcome)) {
        warn!("Failed to send response: {}", e);
    }
    restart
}

fn into_response(outcome: PortalResponse) -> Response<std::io::Cursor<Vec<u8>>> {
    let mut response = Response::from_string(outcome.body).with_status_code(outcome.status);
    if let Ok(content_type) = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]) {
        response.add_header(content_type);
    }
    if let Some(allow) = outcome.allow {
        if let Ok(header) = Header::from_bytes(&b"Allow"[..], allow.as_bytes()) {
            response.add_header(header);
        }
    }
    response
}
