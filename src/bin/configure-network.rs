//! Network configuration utility for ESP32.
//!
//! Stores network credentials and the join retry policy to NVS, bypassing
//! the provisioning portal.
//!
//! Usage:
//!   WIFI_SSID="MyNetwork" WIFI_PASSWORD="secret" cargo configure-network
//!
//! Optional retry policy (defaults: 5 retries, 1000 ms apart):
//!   WIFI_MAX_RETRIES=3 WIFI_RETRY_DELAY_MS=500
//!
//! For open networks (no password):
//!   WIFI_SSID="OpenNetwork" WIFI_PASSWORD="" cargo configure-network
//!
//! After running this once, the node joins with these credentials on every boot.

/// Network SSID - set via WIFI_SSID environment variable at compile time.
#[cfg(feature = "esp32")]
const WIFI_SSID: Option<&str> = option_env!("WIFI_SSID");

/// Network password - set via WIFI_PASSWORD environment variable at compile time.
/// Empty string for open networks.
#[cfg(feature = "esp32")]
const WIFI_PASSWORD: Option<&str> = option_env!("WIFI_PASSWORD");

#[cfg(feature = "esp32")]
const WIFI_MAX_RETRIES: Option<&str> = option_env!("WIFI_MAX_RETRIES");

#[cfg(feature = "esp32")]
const WIFI_RETRY_DELAY_MS: Option<&str> = option_env!("WIFI_RETRY_DELAY_MS");

/// Print error message and halt. The pause lets the serial monitor show
/// the output before the process exits.
#[cfg(feature = "esp32")]
fn halt_with_error(msg: &str) -> ! {
    eprintln!("\n{}", msg);
    eprintln!("\n=== Configuration failed ===\n");
    std::thread::sleep(std::time::Duration::from_secs(2));
    std::process::exit(1);
}

#[cfg(feature = "esp32")]
fn parse_count(name: &str, value: Option<&str>, default: u32) -> u32 {
    match value {
        None | Some("") => default,
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            halt_with_error(&format!(
                "Error: {} must be a non-negative integer, got '{}'",
                name, v
            ))
        }),
    }
}

#[cfg(feature = "esp32")]
fn main() {
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use sensor_node_esp32::config::{NetworkConfig, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};
    use sensor_node_esp32::storage::{ConfigStore, NvsBackend};

    sensor_node_esp32::platform::init();

    println!("\n=== Network Configuration Utility ===\n");

    let ssid = match WIFI_SSID {
        Some(s) if !s.is_empty() => s,
        _ => {
            halt_with_error(
                "Error: WIFI_SSID environment variable not set at compile time.\n\n\
                 Usage:\n  \
                 WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" cargo configure-network\n\n\
                 For open networks:\n  \
                 WIFI_SSID=\"OpenNetwork\" WIFI_PASSWORD=\"\" cargo configure-network",
            );
        }
    };
    let password = WIFI_PASSWORD.unwrap_or("");
    let max_retries = parse_count("WIFI_MAX_RETRIES", WIFI_MAX_RETRIES, DEFAULT_MAX_RETRIES);
    let retry_delay_ms = parse_count(
        "WIFI_RETRY_DELAY_MS",
        WIFI_RETRY_DELAY_MS,
        DEFAULT_RETRY_DELAY_MS,
    );

    println!("SSID: {}", ssid);
    println!(
        "Password: {} ({} chars)",
        if password.is_empty() { "(none)" } else { "****" },
        password.len()
    );
    println!("Retries: {} ({} ms apart)", max_retries, retry_delay_ms);

    let config = NetworkConfig::new(ssid, password, max_retries, retry_delay_ms)
        .unwrap_or_else(|e| halt_with_error(&format!("Error: {}", e)));

    let partition = EspDefaultNvsPartition::take()
        .unwrap_or_else(|e| halt_with_error(&format!("Error initializing NVS: {:?}", e)));
    let backend = NvsBackend::new(partition)
        .unwrap_or_else(|e| halt_with_error(&format!("Error opening NVS namespace: {:?}", e)));

    match ConfigStore::new(backend).save(&config) {
        Ok(()) => {
            println!("\n=== Network configuration saved to NVS ===");
            println!("\nCredentials persist across reboots.");
        }
        Err(e) => halt_with_error(&format!("Error saving to NVS: {}", e)),
    }

    println!("\n=== Done - you can disconnect the device ===\n");
    std::thread::sleep(std::time::Duration::from_secs(2));
}

#[cfg(not(feature = "esp32"))]
fn main() {
    eprintln!("This binary must be built for ESP32.");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" cargo configure-network");
    std::process::exit(1);
}
