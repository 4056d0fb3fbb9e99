//! Association lifecycle supervision and the public wireless handle
//!
//! One coordinator task owns every connectivity decision: it drains the
//! typed event channel, drives the WiFi link state machine, lazily activates
//! the MQTT session on the first address assignment, and feeds publish
//! completions to the tracker. Drivers and the MQTT pump only produce
//! events; nothing blocking ever runs in their context.
//!
//! # Link state machine
//!
//! ```text
//! Idle ──► Connecting ──► Connected
//!  ▲           ▲  │           │
//!  │           │  └───────────┘ (loss, non-auth reason: retry, no backoff)
//!  │           │
//!  │      Provisioning ◄── (loss, auth failure / empty ssid)
//!  │
//!  └── (intentional disconnect suppresses the retry)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use serde_json::Value;
use statum::{machine, state, transition};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::identity::DeviceIdentity;

use super::driver::{
    resolve_credentials, CredentialStore, Credentials, DisconnectReason, MqttEvent, NetworkEvent,
    WifiDriver, WifiEvent,
};
use super::error::WirelessError;
use super::session::MqttSessionManager;
use super::state::{ConnectivityState, Domain, LinkStatus};
use super::timesync::TimeSyncCoordinator;
use super::tracker::{PublishOutcome, PublishResult, PublishTracker, ENQUEUE_WAIT};

/// Capacity of the typed event dispatch channel
const EVENT_CHANNEL_CAPACITY: usize = 32;

type SharedDriver = Arc<Mutex<Box<dyn WifiDriver>>>;

/// Runtime phase of the WiFi link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkPhase {
    Idle,
    Connecting,
    Connected,
    Provisioning,
}

/// Supervisor lifecycle states using statum
#[state]
#[derive(Debug, Clone)]
pub enum SupervisorState {
    Initializing,
    Supervising,
}

/// WiFi association supervisor with compile-time lifecycle safety
#[machine]
pub struct WifiSupervisor<SupervisorState> {
    driver: SharedDriver,
    store: Box<dyn CredentialStore>,
    credentials: Credentials,
    events_rx: mpsc::Receiver<NetworkEvent>,
    events_tx: mpsc::Sender<NetworkEvent>,
    state: ConnectivityState,
    tracker: Arc<PublishTracker>,
    session: Arc<MqttSessionManager>,
    shutdown: CancellationToken,
    link: LinkPhase,
}

impl WifiSupervisor<Initializing> {
    /// Resolve credentials and assemble the supervisor
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        driver: SharedDriver,
        mut store: Box<dyn CredentialStore>,
        supplied: &Credentials,
        events_rx: mpsc::Receiver<NetworkEvent>,
        events_tx: mpsc::Sender<NetworkEvent>,
        state: ConnectivityState,
        tracker: Arc<PublishTracker>,
        session: Arc<MqttSessionManager>,
        shutdown: CancellationToken,
    ) -> Result<Self, WirelessError> {
        let credentials = resolve_credentials(store.as_mut(), supplied)?;
        Ok(Self::builder()
            .driver(driver)
            .store(store)
            .credentials(credentials)
            .events_rx(events_rx)
            .events_tx(events_tx)
            .state(state)
            .tracker(tracker)
            .session(session)
            .shutdown(shutdown)
            .link(LinkPhase::Idle)
            .build())
    }
}

#[transition]
impl WifiSupervisor<Initializing> {
    /// Enter station mode (or the provisioning flow when no ssid is known)
    /// and transition to Supervising
    pub async fn begin(
        mut self,
    ) -> ::core::result::Result<WifiSupervisor<Supervising>, WirelessError> {
        {
            let mut driver = self.driver.lock().await;
            if self.credentials.ssid.is_empty() {
                warn!("No SSID available, entering provisioning flow");
                driver.begin_provisioning()?;
                self.link = LinkPhase::Provisioning;
            } else {
                info!("Setting station mode for SSID \"{}\"", self.credentials.ssid);
                driver.start_station(&self.credentials)?;
            }
        }
        Ok(self.transition())
    }
}

impl WifiSupervisor<Supervising> {
    /// Drain the event channel until shutdown
    pub async fn run(mut self) {
        info!("Connectivity coordinator started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Connectivity coordinator shutting down");
                    break;
                }
                received = self.events_rx.recv() => {
                    let Some(event) = received else {
                        warn!("Event channel closed, coordinator exiting");
                        break;
                    };
                    self.apply(event).await;
                }
            }
        }
    }

    async fn apply(&mut self, event: NetworkEvent) {
        debug!("Applying network event: {:?}", event);
        match event {
            NetworkEvent::Wifi(wifi_event) => self.apply_wifi(wifi_event).await,
            NetworkEvent::Mqtt(mqtt_event) => self.apply_mqtt(mqtt_event).await,
            NetworkEvent::SntpSynchronized { unix_secs } => {
                match DateTime::from_timestamp(unix_secs, 0) {
                    Some(stamp) => info!("Synchronized time with SNTP server ({})", stamp),
                    None => info!("Synchronized time with SNTP server"),
                }
                self.state.mark_sntp_synced();
            }
        }
    }

    async fn apply_wifi(&mut self, event: WifiEvent) {
        match event {
            WifiEvent::StationStarted => {
                info!("Connecting to WiFi...");
                self.link = LinkPhase::Connecting;
                if let Err(e) = self.driver.lock().await.connect() {
                    error!("WiFi driver refused to connect: {}", e);
                }
            }
            WifiEvent::IpAssigned(addr) => {
                info!("WiFi connected! ({})", addr);
                self.link = LinkPhase::Connected;
                self.state.set(Domain::Wifi, LinkStatus::Connected);
                // transport exists now; the one MQTT client comes up here
                self.session
                    .activate(self.events_tx.clone(), self.shutdown.child_token());
            }
            WifiEvent::Disconnected { reason } => {
                self.state.set(Domain::Wifi, LinkStatus::Disconnected);
                match reason {
                    DisconnectReason::AuthFailure => {
                        warn!("WiFi credentials rejected, starting provisioning flow");
                        self.link = LinkPhase::Provisioning;
                        if let Err(e) = self.driver.lock().await.begin_provisioning() {
                            error!("Failed to start provisioning: {}", e);
                        }
                    }
                    DisconnectReason::LeftIntentionally => {
                        info!("WiFi disconnected");
                        self.link = LinkPhase::Idle;
                    }
                    DisconnectReason::Other(code) => {
                        if self.link == LinkPhase::Idle {
                            // retry suppressed after an intentional stop
                            return;
                        }
                        warn!("WiFi disconnected (reason: {})", code);
                        info!("Attempting to reconnect to WiFi...");
                        self.link = LinkPhase::Connecting;
                        if let Err(e) = self.driver.lock().await.connect() {
                            error!("WiFi driver refused to reconnect: {}", e);
                        }
                    }
                }
            }
            WifiEvent::CredentialsProvisioned(credentials) => {
                info!(
                    "Provisioning produced credentials for SSID \"{}\"",
                    credentials.ssid
                );
                if let Err(e) = self.store.store(&credentials) {
                    error!("Failed to persist provisioned credentials: {}", e);
                }
                self.credentials = credentials;
                self.link = LinkPhase::Idle;
                if let Err(e) = self.driver.lock().await.start_station(&self.credentials) {
                    error!("Failed to restart station mode: {}", e);
                }
            }
        }
    }

    async fn apply_mqtt(&mut self, event: MqttEvent) {
        match event {
            MqttEvent::Connected => {
                info!("MQTT connected!");
                self.state.set(Domain::Mqtt, LinkStatus::Connected);
            }
            MqttEvent::Disconnected => {
                warn!("MQTT disconnected!");
                self.state.set(Domain::Mqtt, LinkStatus::Disconnected);
            }
            MqttEvent::Published { message_id } => {
                info!("MQTT message {} published!", message_id);
                self.record(PublishResult {
                    message_id,
                    outcome: PublishOutcome::Success,
                })
                .await;
            }
            MqttEvent::PublishFailed { message_id } => {
                error!("MQTT message {} failed!", message_id);
                self.record(PublishResult {
                    message_id,
                    outcome: PublishOutcome::Failure,
                })
                .await;
            }
        }
    }

    async fn record(&self, result: PublishResult) {
        // bounded wait; a full queue past the bound drops the result
        if let Err(e) = self.tracker.record(result, ENQUEUE_WAIT).await {
            warn!("Publish completion dropped: {}", e);
        }
    }
}

/// Long-lived service handle owning connectivity state, the MQTT session
/// and the publish tracker
///
/// Spawning builds one independent service: there are no process-wide
/// statics, and the event infrastructure (dispatch channel, coordinator,
/// lazily-created MQTT client) belongs to this handle for its lifetime.
pub struct WirelessHandle {
    identity: DeviceIdentity,
    state: ConnectivityState,
    tracker: Arc<PublishTracker>,
    session: Arc<MqttSessionManager>,
    driver: SharedDriver,
    events_tx: mpsc::Sender<NetworkEvent>,
    timezone: String,
    shutdown: CancellationToken,
    coordinator: Option<JoinHandle<()>>,
}

impl WirelessHandle {
    /// Resolve credentials, begin association and spawn the coordinator
    pub async fn spawn(
        mut driver: Box<dyn WifiDriver>,
        store: Box<dyn CredentialStore>,
        config: &NodeConfig,
    ) -> Result<Self, WirelessError> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        driver.attach(events_tx.clone());

        let identity = DeviceIdentity::from_mac(driver.mac());
        info!("Device identity: {}", identity);

        let driver: SharedDriver = Arc::new(Mutex::new(driver));
        let state = ConnectivityState::new();
        let tracker = Arc::new(PublishTracker::new());
        let session = Arc::new(MqttSessionManager::new(
            config.mqtt.broker_host.clone(),
            config.mqtt.broker_port,
            config.mqtt.client_id.clone(),
        ));
        let shutdown = CancellationToken::new();

        let supplied = Credentials {
            ssid: config.wifi.ssid.clone(),
            password: config.wifi.password.clone(),
        };
        let supervisor = WifiSupervisor::create(
            driver.clone(),
            store,
            &supplied,
            events_rx,
            events_tx.clone(),
            state.clone(),
            tracker.clone(),
            session.clone(),
            shutdown.clone(),
        )?;
        let supervising = supervisor.begin().await?;
        let coordinator = tokio::spawn(supervising.run());

        Ok(Self {
            identity,
            state,
            tracker,
            session,
            driver,
            events_tx,
            timezone: config.sntp.timezone.clone(),
            shutdown,
            coordinator: Some(coordinator),
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Shared view of the connectivity domains
    pub fn connectivity(&self) -> ConnectivityState {
        self.state.clone()
    }

    /// The session manager, for wiring up a [`DiscoveryPublisher`]
    ///
    /// [`DiscoveryPublisher`]: super::discovery::DiscoveryPublisher
    pub fn session(&self) -> Arc<MqttSessionManager> {
        self.session.clone()
    }

    /// Block until both WiFi and MQTT report Connected
    pub async fn wait_for_connect(&self, timeout: Duration) -> Result<(), WirelessError> {
        self.state.wait_for_connect(timeout).await
    }

    /// Hand a message to the transport; completion arrives via
    /// [`wait_for_publish`](Self::wait_for_publish)
    ///
    /// The returned id and `PublishResult::message_id` live in different id
    /// spaces; correlate by arrival order, not by id.
    pub fn publish(
        &self,
        topic: &str,
        payload: Option<&Value>,
        qos: rumqttc::QoS,
        retain: bool,
    ) -> Result<u16, WirelessError> {
        self.session.publish(topic, payload, qos, retain)
    }

    /// Dequeue the next publish completion (arrival order, not message id)
    pub async fn wait_for_publish(&self, timeout: Duration) -> Result<PublishResult, WirelessError> {
        self.tracker.wait_for_publish(timeout).await
    }

    /// Signal strength of the current association, in dBm
    pub async fn rssi(&self) -> i8 {
        self.driver.lock().await.rssi()
    }

    /// One-shot wall-clock synchronization against `server`
    pub async fn synchronize_time(
        &self,
        server: &str,
        timeout: Duration,
    ) -> Result<(), WirelessError> {
        let coordinator = TimeSyncCoordinator::new(
            self.state.clone(),
            self.events_tx.clone(),
            self.timezone.clone(),
        );
        coordinator.synchronize(server, timeout).await
    }

    /// Intentional disconnect: stop MQTT, drop the association, wait for
    /// the WiFi domain to acknowledge, then release the coordinator
    pub async fn stop(&mut self, timeout: Duration) -> Result<(), WirelessError> {
        self.session.deactivate();
        self.state.set(Domain::Mqtt, LinkStatus::Disconnected);

        info!("Stopping WiFi...");
        let result = match self.driver.lock().await.disconnect() {
            Ok(()) => self.state.wait_wifi_disconnected(timeout).await,
            Err(e) => Err(e),
        };

        // the coordinator is released even when the driver never acknowledged
        self.shutdown.cancel();
        if let Some(coordinator) = self.coordinator.take() {
            if let Err(e) = coordinator.await {
                error!("Coordinator task panicked: {}", e);
            }
        }
        result
    }
}
