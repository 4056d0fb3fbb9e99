//! Shared connectivity state for the WiFi / MQTT / SNTP domains
//!
//! Replaces raw bitmask signaling with one `watch` channel per domain: the
//! coordinator task is the only writer, waiters subscribe to the channels
//! instead of spinning on bits. Each domain holds exactly one value at a
//! time, so the "never Connected and Disconnected at once" invariant is
//! enforced by construction.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use super::error::WirelessError;

/// Tracked connection aspect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Wifi,
    Mqtt,
    Sntp,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Wifi => write!(f, "WiFi"),
            Domain::Mqtt => write!(f, "MQTT"),
            Domain::Sntp => write!(f, "SNTP"),
        }
    }
}

/// Connection status of a single domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Connected,
}

struct StateInner {
    wifi: watch::Sender<LinkStatus>,
    mqtt: watch::Sender<LinkStatus>,
    // One-shot flag, cleared automatically when a waiter consumes it
    sntp_synced: watch::Sender<bool>,
}

/// Shared flag record for the {WiFi, MQTT, SNTP} domains
///
/// Cheap to clone; all clones observe the same underlying channels.
/// Mutation is reserved to the coordinator task that drains the network
/// event channel.
#[derive(Clone)]
pub struct ConnectivityState {
    inner: Arc<StateInner>,
}

impl ConnectivityState {
    pub fn new() -> Self {
        let (wifi, _) = watch::channel(LinkStatus::Disconnected);
        let (mqtt, _) = watch::channel(LinkStatus::Disconnected);
        let (sntp_synced, _) = watch::channel(false);
        Self {
            inner: Arc::new(StateInner {
                wifi,
                mqtt,
                sntp_synced,
            }),
        }
    }

    /// Record a transport-driven transition for the WiFi or MQTT domain
    pub(crate) fn set(&self, domain: Domain, status: LinkStatus) {
        debug!("Connectivity transition: {} -> {:?}", domain, status);
        match domain {
            Domain::Wifi => self.inner.wifi.send_replace(status),
            Domain::Mqtt => self.inner.mqtt.send_replace(status),
            Domain::Sntp => return,
        };
    }

    pub fn status(&self, domain: Domain) -> LinkStatus {
        match domain {
            Domain::Wifi => *self.inner.wifi.borrow(),
            Domain::Mqtt => *self.inner.mqtt.borrow(),
            Domain::Sntp => LinkStatus::Disconnected,
        }
    }

    /// Set the one-shot SNTP synchronized flag
    pub(crate) fn mark_sntp_synced(&self) {
        debug!("Connectivity transition: SNTP synchronized");
        self.inner.sntp_synced.send_replace(true);
    }

    /// Block until the SNTP flag is set, consuming (clearing) it on success
    pub async fn wait_sntp_synced(&self, timeout: Duration) -> Result<(), WirelessError> {
        let mut rx = self.inner.sntp_synced.subscribe();
        let wait = rx.wait_for(|synced| *synced);
        let outcome = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(_)) => {
                // auto-clear on consumption
                self.inner.sntp_synced.send_replace(false);
                Ok(())
            }
            Ok(Err(_)) => Err(WirelessError::Driver(
                "connectivity state channel closed".to_string(),
            )),
            Err(_) => Err(WirelessError::SntpTimeout),
        };
        outcome
    }

    /// Block until both the WiFi and MQTT domains report Connected
    ///
    /// On timeout the returned error names the domain still missing, WiFi
    /// checked first.
    pub async fn wait_for_connect(&self, timeout: Duration) -> Result<(), WirelessError> {
        let mut wifi = self.inner.wifi.subscribe();
        let mut mqtt = self.inner.mqtt.subscribe();
        let both = async {
            let _ = wifi.wait_for(|s| *s == LinkStatus::Connected).await;
            let _ = mqtt.wait_for(|s| *s == LinkStatus::Connected).await;
        };
        match tokio::time::timeout(timeout, both).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let domain = if self.status(Domain::Wifi) != LinkStatus::Connected {
                    Domain::Wifi
                } else {
                    Domain::Mqtt
                };
                Err(WirelessError::ConnectTimeout { domain })
            }
        }
    }

    /// Block until the WiFi domain reports Disconnected
    pub async fn wait_wifi_disconnected(&self, timeout: Duration) -> Result<(), WirelessError> {
        let mut wifi = self.inner.wifi.subscribe();
        let wait = wifi.wait_for(|s| *s == LinkStatus::Disconnected);
        let outcome = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(WirelessError::Driver(
                "connectivity state channel closed".to_string(),
            )),
            Err(_) => Err(WirelessError::DisconnectTimeout),
        };
        outcome
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::new()
    }
}
