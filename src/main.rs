use std::time::Duration;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde_json::json;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use weathernode::config::NodeConfig;
use weathernode::wireless::{
    DiscoveryDescriptor, DiscoveryPublisher, GeoLocationResolver, HostNetworkDriver,
    TomlCredentialStore, WirelessHandle,
};

/// How long to wait for WiFi and MQTT to come up
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between telemetry state publishes
const REPORT_INTERVAL: Duration = Duration::from_secs(120);

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = NodeConfig::load(&NodeConfig::default_path())?;

    // the host shell has no radio; derive a stable fake MAC for topics
    let driver = Box::new(HostNetworkDriver::new([0x02, 0x00, 0x00, 0x57, 0x4e, 0x01]));
    let store = Box::new(TomlCredentialStore::new(TomlCredentialStore::default_path()));

    let mut node = WirelessHandle::spawn(driver, store, &config)
        .await
        .map_err(|e| eyre!("Failed to start connectivity: {}", e))?;

    info!("Waiting for connectivity...");
    node.wait_for_connect(CONNECT_TIMEOUT).await?;

    if let Err(e) = node
        .synchronize_time(
            &config.sntp.server,
            Duration::from_secs(config.sntp.timeout_secs),
        )
        .await
    {
        warn!("Time synchronization failed, continuing unsynced: {}", e);
    }

    let location = match GeoLocationResolver::new(
        config.location.locate_url.clone(),
        config.location.elevation_url.clone(),
    ) {
        Ok(resolver) => match resolver.resolve().await {
            Ok(location) => Some(location),
            Err(e) => {
                warn!("Geolocation failed: {}", e);
                None
            }
        },
        Err(e) => {
            warn!("Could not build HTTP client: {}", e);
            None
        }
    };

    let publisher = DiscoveryPublisher::new(
        node.session(),
        node.identity().clone(),
        config.discovery.clone(),
    );

    let descriptor = DiscoveryDescriptor {
        entity_name: "Signal Strength".to_string(),
        value_template: "{{ value_json.rssi }}".to_string(),
        device_class: Some("signal_strength".to_string()),
        icon: None,
        unit_of_measurement: Some("dBm".to_string()),
        force_update: false,
    };
    publisher.publish_discovery("radio", &descriptor)?;
    let result = node.wait_for_publish(PUBLISH_TIMEOUT).await?;
    info!("Discovery announcement acknowledged ({:?})", result.outcome);

    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                let rssi = node.rssi().await;
                let mut state = json!({ "rssi": rssi });
                if let Some(location) = &location {
                    state["elevation_m"] = json!(location.elevation_m);
                }
                match publisher.publish_state("radio", &state) {
                    Ok(_) => {
                        info!("Telemetry queued");
                        if let Err(e) = node.wait_for_publish(PUBLISH_TIMEOUT).await {
                            warn!("Publish not acknowledged: {}", e);
                        }
                    }
                    Err(e) => warn!("Telemetry publish failed: {}", e),
                }
            }
        }
    }

    node.stop(Duration::from_secs(10)).await?;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
