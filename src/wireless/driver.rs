//! Typed network events and the driver seams the supervisor plugs into
//!
//! The hardware transports (WiFi association, credential storage) sit behind
//! narrow traits so the connectivity core is host-testable. Drivers never run
//! waiter logic themselves: they push typed events onto the dispatch channel
//! and the coordinator task does the rest.

use std::fs;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::WirelessError;

/// WiFi station credentials, resolved once per start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

/// Why an association was lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The access point rejected the credentials
    AuthFailure,
    /// Caller-initiated disconnect; suppresses the automatic retry
    LeftIntentionally,
    /// Any other transport loss; retried unconditionally
    Other(u16),
}

/// Association lifecycle events emitted by a [`WifiDriver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiEvent {
    /// Station mode is up; the supervisor should begin association
    StationStarted,
    /// Association was lost
    Disconnected { reason: DisconnectReason },
    /// The network layer assigned an address; transport exists now
    IpAssigned(Ipv4Addr),
    /// The provisioning flow produced a fresh credential pair
    CredentialsProvisioned(Credentials),
}

/// Session events translated from the MQTT transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttEvent {
    Connected,
    Disconnected,
    /// A qos>0 publish was acknowledged by the broker
    Published { message_id: u16 },
    /// The transport reported a failure for an in-flight publish
    PublishFailed { message_id: u16 },
}

/// Everything the single dispatch channel carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Wifi(WifiEvent),
    Mqtt(MqttEvent),
    /// One-shot wall-clock synchronization completed
    SntpSynchronized { unix_secs: i64 },
}

/// Association transport seam
///
/// Commands are issued synchronously; outcomes arrive later as [`WifiEvent`]s
/// on the sender registered through [`WifiDriver::attach`].
pub trait WifiDriver: Send + 'static {
    /// Register the event channel. Called once, before any other command.
    fn attach(&mut self, events: mpsc::Sender<NetworkEvent>);

    /// Enter station mode with the given credentials
    fn start_station(&mut self, credentials: &Credentials) -> Result<(), WirelessError>;

    /// Begin (or re-attempt) association
    fn connect(&mut self) -> Result<(), WirelessError>;

    /// Intentionally drop the association
    fn disconnect(&mut self) -> Result<(), WirelessError>;

    /// Enter the out-of-band credential-entry flow
    fn begin_provisioning(&mut self) -> Result<(), WirelessError>;

    /// Signal strength of the current association, in dBm
    fn rssi(&self) -> i8;

    /// Hardware MAC address, stable for the process lifetime
    fn mac(&self) -> [u8; 6];
}

/// Persistent credential storage seam
pub trait CredentialStore: Send + Sync + 'static {
    fn load(&self) -> Result<Option<Credentials>, WirelessError>;
    fn store(&mut self, credentials: &Credentials) -> Result<(), WirelessError>;
}

/// Resolve the credentials to associate with
///
/// A stored pair exactly matching the supplied pair is reused. A differing
/// non-empty supplied pair overwrites the store. An empty supplied ssid
/// never clobbers stored credentials; with nothing stored either, the empty
/// pair is returned as-is and the caller falls into the provisioning flow.
pub fn resolve_credentials(
    store: &mut dyn CredentialStore,
    supplied: &Credentials,
) -> Result<Credentials, WirelessError> {
    match store.load()? {
        Some(saved) if saved == *supplied => {
            info!("Found stored credentials for SSID \"{}\"", saved.ssid);
            Ok(saved)
        }
        Some(saved) if supplied.ssid.is_empty() => {
            info!("Using stored credentials for SSID \"{}\"", saved.ssid);
            Ok(saved)
        }
        None if supplied.ssid.is_empty() => Ok(supplied.clone()),
        _ => {
            info!("Storing new WiFi credentials for SSID \"{}\"", supplied.ssid);
            store.store(supplied)?;
            Ok(supplied.clone())
        }
    }
}

/// File-backed credential store (TOML)
pub struct TomlCredentialStore {
    path: PathBuf,
}

impl TomlCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default location under the platform config directory
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("weathernode")
            .join("credentials.toml")
    }
}

impl CredentialStore for TomlCredentialStore {
    fn load(&self) -> Result<Option<Credentials>, WirelessError> {
        if !self.path.exists() {
            debug!("No credential file at {}", self.path.display());
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let credentials = toml::from_str(&raw)
            .map_err(|e| WirelessError::CredentialStore(e.to_string()))?;
        Ok(Some(credentials))
    }

    fn store(&mut self, credentials: &Credentials) -> Result<(), WirelessError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(credentials)
            .map_err(|e| WirelessError::CredentialStore(e.to_string()))?;
        fs::write(&self.path, raw)?;
        debug!("Credentials written to {}", self.path.display());
        Ok(())
    }
}

/// Development-host driver
///
/// Treats the host's existing network stack as the associated station:
/// `start_station` reports the station up, `connect` discovers the outbound
/// interface address and reports it assigned. Provisioning has no host
/// equivalent and is rejected.
pub struct HostNetworkDriver {
    mac: [u8; 6],
    events: Option<mpsc::Sender<NetworkEvent>>,
}

impl HostNetworkDriver {
    pub fn new(mac: [u8; 6]) -> Self {
        Self { mac, events: None }
    }

    fn emit(&self, event: WifiEvent) {
        let Some(events) = &self.events else {
            warn!("Host driver has no event channel attached");
            return;
        };
        if let Err(e) = events.try_send(NetworkEvent::Wifi(event)) {
            warn!("Failed to deliver host driver event: {}", e);
        }
    }

    /// Outbound interface address, discovered without sending traffic
    fn outbound_address() -> Ipv4Addr {
        let probe = || -> std::io::Result<Ipv4Addr> {
            let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
            socket.connect("8.8.8.8:53")?;
            match socket.local_addr()? {
                std::net::SocketAddr::V4(addr) => Ok(*addr.ip()),
                std::net::SocketAddr::V6(_) => Ok(Ipv4Addr::LOCALHOST),
            }
        };
        probe().unwrap_or(Ipv4Addr::LOCALHOST)
    }
}

impl WifiDriver for HostNetworkDriver {
    fn attach(&mut self, events: mpsc::Sender<NetworkEvent>) {
        self.events = Some(events);
    }

    fn start_station(&mut self, credentials: &Credentials) -> Result<(), WirelessError> {
        if credentials.ssid.is_empty() {
            return Err(WirelessError::EmptySsid);
        }
        info!(
            "Host driver entering station mode for SSID \"{}\"",
            credentials.ssid
        );
        self.emit(WifiEvent::StationStarted);
        Ok(())
    }

    fn connect(&mut self) -> Result<(), WirelessError> {
        let addr = Self::outbound_address();
        info!("Host driver associated, address {}", addr);
        self.emit(WifiEvent::IpAssigned(addr));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), WirelessError> {
        info!("Host driver disconnecting");
        self.emit(WifiEvent::Disconnected {
            reason: DisconnectReason::LeftIntentionally,
        });
        Ok(())
    }

    fn begin_provisioning(&mut self) -> Result<(), WirelessError> {
        Err(WirelessError::Driver(
            "provisioning flow is not available on the host driver".to_string(),
        ))
    }

    fn rssi(&self) -> i8 {
        // No antenna on the host shell
        0
    }

    fn mac(&self) -> [u8; 6] {
        self.mac
    }
}
