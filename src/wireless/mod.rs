//! Connectivity and telemetry for a battery-powered sensor node
//!
//! Everything network-facing lives here: WiFi association supervision,
//! the lazily-created MQTT session, publish completion tracking, SNTP
//! wall-clock synchronization, HTTP geolocation and home-automation
//! discovery announcements. [`WirelessHandle::spawn`] wires it all up.

pub mod discovery;
pub mod driver;
pub mod error;
pub mod geolocate;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod timesync;
pub mod tracker;

pub use discovery::{legal_name, DiscoveryDescriptor, DiscoveryPublisher};
pub use driver::{
    CredentialStore, Credentials, DisconnectReason, HostNetworkDriver, MqttEvent, NetworkEvent,
    TomlCredentialStore, WifiDriver, WifiEvent,
};
pub use error::WirelessError;
pub use geolocate::{GeoError, GeoLocation, GeoLocationResolver};
pub use session::MqttSessionManager;
pub use state::{ConnectivityState, Domain, LinkStatus};
pub use supervisor::WirelessHandle;
pub use timesync::TimeSyncCoordinator;
pub use tracker::{PublishOutcome, PublishResult};

// callers pass delivery guarantees straight through to the transport
pub use rumqttc::QoS;
