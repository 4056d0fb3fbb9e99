//! MQTT session ownership: one lazily-created client, never reconstructed
//!
//! The client comes into existence on the first address-assignment event and
//! lives for the rest of the process; WiFi drops only interrupt the
//! transport underneath it. A pump task polls the rumqttc event loop and
//! translates protocol events onto the typed dispatch channel, so session
//! state changes flow through the same coordinator as everything else.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::driver::{MqttEvent, NetworkEvent};
use super::error::WirelessError;

/// Broker keep-alive interval
const KEEP_ALIVE: Duration = Duration::from_secs(45);

/// Request-queue capacity handed to rumqttc
const REQUEST_QUEUE_CAPACITY: usize = 10;

/// Pause between reconnect attempts after an event-loop error
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// Owns the single MQTT client and hands out message ids
pub struct MqttSessionManager {
    broker_host: String,
    broker_port: u16,
    client_id: String,
    client: OnceLock<AsyncClient>,
    pump_shutdown: OnceLock<CancellationToken>,
    next_message_id: AtomicU16,
}

impl MqttSessionManager {
    pub fn new(broker_host: String, broker_port: u16, client_id: String) -> Self {
        Self {
            broker_host,
            broker_port,
            client_id,
            client: OnceLock::new(),
            pump_shutdown: OnceLock::new(),
            next_message_id: AtomicU16::new(1),
        }
    }

    /// Whether the client has been constructed yet
    pub fn is_ready(&self) -> bool {
        self.client.get().is_some()
    }

    /// Construct the client and start the event pump
    ///
    /// Called by the coordinator on the first address assignment; later
    /// calls are no-ops, the same client instance serves the whole process.
    pub(crate) fn activate(&self, events: mpsc::Sender<NetworkEvent>, shutdown: CancellationToken) {
        if self.client.get().is_some() {
            debug!("MQTT client already exists, transport restored underneath it");
            return;
        }

        info!(
            "Starting MQTT client for broker {}:{}",
            self.broker_host, self.broker_port
        );
        let mut options = MqttOptions::new(
            self.client_id.clone(),
            self.broker_host.clone(),
            self.broker_port,
        );
        options.set_keep_alive(KEEP_ALIVE);

        let (client, event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);
        if self.client.set(client).is_ok() {
            let _ = self.pump_shutdown.set(shutdown.clone());
            tokio::spawn(run_event_pump(event_loop, events, shutdown));
        }
    }

    /// Stop the event pump; the client is not reconstructed afterwards
    pub(crate) fn deactivate(&self) {
        if let Some(token) = self.pump_shutdown.get() {
            info!("Stopping MQTT...");
            token.cancel();
        }
    }

    /// Hand a message to the transport without blocking
    ///
    /// Returns the assigned message id immediately; completion is reported
    /// later through the publish tracker. The returned id comes from a local
    /// counter and is unrelated to the wire packet id completions carry, so
    /// it cannot be compared against `PublishResult::message_id`; completions
    /// correlate by arrival order only. Fails with `ClientNotReady` before
    /// the first address assignment has created the client.
    pub fn publish(
        &self,
        topic: &str,
        payload: Option<&serde_json::Value>,
        qos: QoS,
        retain: bool,
    ) -> Result<u16, WirelessError> {
        let client = self.client.get().ok_or(WirelessError::ClientNotReady)?;
        let bytes = match payload {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };
        client
            .try_publish(topic, qos, retain, bytes)
            .map_err(|e| WirelessError::Mqtt(e.to_string()))?;

        let message_id = self.allocate_message_id();
        debug!("Publish {} queued for topic {}", message_id, topic);
        Ok(message_id)
    }

    fn allocate_message_id(&self) -> u16 {
        // skip 0, the original transport's "no id" value
        loop {
            let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

/// Poll the rumqttc event loop and translate protocol events
///
/// Runs until shutdown. Connection errors are reported as MQTT
/// disconnection and polling continues after a short pause, which is what
/// drives rumqttc's reconnect.
async fn run_event_pump(
    mut event_loop: EventLoop,
    events: mpsc::Sender<NetworkEvent>,
    shutdown: CancellationToken,
) {
    info!("MQTT event pump started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("MQTT event pump shutting down");
                break;
            }
            polled = event_loop.poll() => {
                let event = match polled {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("MQTT connection error: {}", e);
                        if events
                            .send(NetworkEvent::Mqtt(MqttEvent::Disconnected))
                            .await
                            .is_err()
                        {
                            break;
                        }
                        tokio::time::sleep(RECONNECT_PAUSE).await;
                        continue;
                    }
                };

                let translated = match event {
                    Event::Incoming(Packet::ConnAck(_)) => Some(MqttEvent::Connected),
                    Event::Incoming(Packet::Disconnect) => Some(MqttEvent::Disconnected),
                    Event::Incoming(Packet::PubAck(ack)) => Some(MqttEvent::Published {
                        message_id: ack.pkid,
                    }),
                    Event::Incoming(Packet::PubComp(comp)) => Some(MqttEvent::Published {
                        message_id: comp.pkid,
                    }),
                    _ => None,
                };

                if let Some(mqtt_event) = translated {
                    if events.send(NetworkEvent::Mqtt(mqtt_event)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_before_the_client_exists_is_rejected() {
        let session = MqttSessionManager::new("127.0.0.1".to_string(), 1883, "node".to_string());
        let err = session
            .publish("some/topic", None, QoS::AtMostOnce, false)
            .unwrap_err();
        assert!(matches!(err, WirelessError::ClientNotReady));
        assert!(!session.is_ready());
    }

    #[tokio::test]
    async fn message_ids_are_monotonic_and_never_zero() {
        let session = MqttSessionManager::new("127.0.0.1".to_string(), 1883, "node".to_string());
        // force the counter to the wrap point
        session.next_message_id.store(u16::MAX, Ordering::Relaxed);
        assert_eq!(session.allocate_message_id(), u16::MAX);
        // wraps past 0 straight to 1
        assert_eq!(session.allocate_message_id(), 1);
        assert_eq!(session.allocate_message_id(), 2);
    }

    #[tokio::test]
    async fn activation_is_one_shot() {
        let session = MqttSessionManager::new("127.0.0.1".to_string(), 1883, "node".to_string());
        let (tx, _rx) = mpsc::channel(8);
        session.activate(tx.clone(), CancellationToken::new());
        assert!(session.is_ready());
        // second activation keeps the original client
        session.activate(tx, CancellationToken::new());
        assert!(session.is_ready());
        session.deactivate();
    }
}
