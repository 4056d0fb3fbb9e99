//! Error definitions for the wireless subsystem

use std::time::Duration;

use thiserror::Error;

use super::state::Domain;

/// Error types for the connectivity and telemetry-publishing subsystem
///
/// None of these abort the process; every failure is returned to the caller,
/// who decides whether it is fatal.
#[derive(Debug, Error)]
pub enum WirelessError {
    /// The underlying network driver rejected a command
    #[error("Driver error: {0}")]
    Driver(String),

    /// A bounded connect wait elapsed; names the domain still missing
    #[error("Timed out waiting for {domain} to connect")]
    ConnectTimeout { domain: Domain },

    /// The driver did not acknowledge an intentional disconnect in time
    #[error("Timed out waiting for WiFi to disconnect")]
    DisconnectTimeout,

    /// Time synchronization did not complete within the bounded wait
    #[error("Timed out waiting for time synchronization")]
    SntpTimeout,

    /// No publish completion arrived within the bounded wait
    #[error("No publish confirmation within {0:?}")]
    PublishTimeout(Duration),

    /// The publish completion queue stayed full past the producer bound
    #[error("Publish completion queue is full, result dropped")]
    QueueFull,

    /// Publish was attempted before the MQTT client exists
    #[error("MQTT client has not been started yet")]
    ClientNotReady,

    /// The MQTT request queue rejected the message
    #[error("MQTT request rejected: {0}")]
    Mqtt(String),

    /// A caller-supplied argument was empty or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Association requires a non-empty ssid
    #[error("WiFi ssid must not be empty")]
    EmptySsid,

    /// Credential store or socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Credential file contents could not be read or written
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    /// An SNTP response was too short or otherwise unusable
    #[error("Malformed SNTP response: {0}")]
    MalformedSntp(String),

    /// JSON payload serialization failure
    #[error("Payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
