//! Sensor node firmware binary.
//!
//! Runs on both ESP32 and host platforms:
//! - **Host**: `cargo run --bin node`
//! - **ESP32**: `cargo espflash flash --bin node --features esp32 --release`
//!
//! On the host the sensor line and the radio are simulated; readings go to
//! the real broker. Set `SENSOR_NODE_SIM_FAILURES=<n>` to make the first
//! `n` join attempts fail, which walks the node into the provisioning
//! portal (served on port 8080 instead of 80).
//!
//! ## Endpoints (portal mode only)
//!
//! - Settings form: http://192.168.4.1/ (host: http://localhost:8080/)

use log::info;
use sensor_node_esp32::config::DeviceConfig;
use sensor_node_esp32::connectivity::{LinkEvent, Radio};
use sensor_node_esp32::portal::RestartHandle;
use sensor_node_esp32::sensor::SingleWireBus;
use sensor_node_esp32::storage::KvBackend;
use sensor_node_esp32::telemetry::BrokerConnector;
use sensor_node_esp32::{
    platform, App, ConfigStore, ConnectivityManager, ConnectivityStatus, LogRenderer, Portal,
    PortalService, SensorProtocolDecoder, SharedPublisher, Supervisor, TelemetryPublisher,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform::init();

    info!("=== Sensor node starting ===");

    #[cfg(feature = "esp32")]
    {
        info!("Platform: ESP32");
        run_device().await;
    }

    #[cfg(not(feature = "esp32"))]
    {
        info!("Platform: Host");
        run_host().await;
    }
}

/// Wire the components together and run until `cancel` fires.
#[allow(clippy::too_many_arguments)]
async fn run_node<R, B, C, K>(
    device: &DeviceConfig,
    store: ConfigStore<K>,
    radio: R,
    events: UnboundedReceiver<LinkEvent>,
    line: B,
    connector: C,
    restart: Arc<dyn RestartHandle>,
    cancel: CancellationToken,
) where
    R: Radio,
    B: SingleWireBus + Send + 'static,
    C: BrokerConnector,
    K: KvBackend + Send + 'static,
{
    let network = store.load_or_default();
    info!(
        "Network config: ssid={}, max_retries={}, retry_delay={} ms",
        network.ssid, network.max_retries, network.retry_delay_ms
    );

    let status = ConnectivityStatus::new();
    let manager =
        ConnectivityManager::new(network.clone(), device.session_settle_delay, status.clone());
    let publisher = SharedPublisher::new(TelemetryPublisher::new(
        connector,
        device.broker.topic.clone(),
    ));

    let portal = Arc::new(Portal::new(device.access_point.ssid.clone(), store, network));
    let portal_bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, device.portal_port));
    let portal = PortalService::new(portal, portal_bind, restart, device.restart_grace_delay);

    let supervisor = Supervisor::new(
        manager,
        radio,
        publisher.clone(),
        portal,
        device.access_point.clone(),
        device.join_watchdog,
        events,
    );
    let app = App::new(
        SensorProtocolDecoder::new(line),
        publisher,
        status,
        LogRenderer,
        device,
    );

    tokio::join!(supervisor.run(cancel.clone()), app.run(cancel));
}

#[cfg(feature = "esp32")]
async fn run_device() {
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use sensor_node_esp32::config::AccessPointConfig;
    use sensor_node_esp32::connectivity::EspRadio;
    use sensor_node_esp32::platform::ChipRestart;
    use sensor_node_esp32::sensor::{sensor_pin, EspSingleWire};
    use sensor_node_esp32::storage::NvsBackend;
    use sensor_node_esp32::telemetry::EspBrokerConnector;

    let peripherals = Peripherals::take().expect("Failed to take peripherals");
    let sysloop = EspSystemEventLoop::take().expect("Failed to take system event loop");
    let nvs_partition = EspDefaultNvsPartition::take().expect("Failed to initialize NVS");

    let store = ConfigStore::new(
        NvsBackend::new(nvs_partition.clone()).expect("Failed to open NVS namespace"),
    );

    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let radio = EspRadio::new(peripherals.modem, sysloop, Some(nvs_partition), events_tx)
        .expect("Failed to initialize WiFi");
    let ap_mac = radio.ap_mac().expect("Failed to read access point MAC");
    let device = DeviceConfig::new(AccessPointConfig::from_mac(ap_mac));

    let pin = sensor_pin(peripherals.pins, device.sensor_gpio)
        .unwrap_or_else(|| panic!("GPIO{} cannot carry the sensor line", device.sensor_gpio));
    let line = EspSingleWire::new(pin).expect("Failed to configure sensor GPIO");

    let connector = EspBrokerConnector::new(device.broker.clone());

    // The chip restarts from the portal; nothing cancels this run.
    run_node(
        &device,
        store,
        radio,
        events_rx,
        line,
        connector,
        Arc::new(ChipRestart),
        CancellationToken::new(),
    )
    .await;
}

/// Portal port on the host, where port 80 needs privileges.
#[cfg(not(feature = "esp32"))]
const HOST_PORTAL_PORT: u16 = 8080;

#[cfg(not(feature = "esp32"))]
async fn run_host() {
    use sensor_node_esp32::config::AccessPointConfig;
    use sensor_node_esp32::connectivity::HostRadio;
    use sensor_node_esp32::platform::RunRestart;
    use sensor_node_esp32::sim::SimulatedLine;
    use sensor_node_esp32::storage::FileBackend;
    use sensor_node_esp32::telemetry::HostBrokerConnector;

    let mut device = DeviceConfig::new(AccessPointConfig::from_mac([0x02, 0, 0, 0x53, 0x4e, 0x01]));
    device.portal_port = HOST_PORTAL_PORT;

    // Only the first run fails on purpose; a provisioned restart should join.
    let mut simulated_failures = std::env::var("SENSOR_NODE_SIM_FAILURES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);

    loop {
        let backend = match FileBackend::open_default() {
            Ok(backend) => backend,
            Err(e) => {
                log::error!("Failed to open config file: {}", e);
                return;
            }
        };
        info!("Config file: {}", backend.path().display());

        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let radio = HostRadio::new(events_tx, simulated_failures);
        simulated_failures = 0;

        let cancel = CancellationToken::new();
        let restart = RunRestart::new(cancel.clone());

        tokio::join!(
            run_node(
                &device,
                ConfigStore::new(backend),
                radio,
                events_rx,
                SimulatedLine::drifting(),
                HostBrokerConnector::new(device.broker.clone()),
                Arc::new(restart.clone()),
                cancel.clone(),
            ),
            async {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            }
        );

        if !restart.was_requested() {
            break;
        }
        info!("=== Restarting node ===");
    }

    info!("Node stopped");
}
