//! Auto-discovery and state announcements for a home-automation hub
//!
//! Topic names and payload shapes are deterministic: given the same device
//! identity and sensor/entity names, repeated calls always produce the same
//! topics, so a hub restart re-learns exactly the same entities.

use std::sync::Arc;

use rumqttc::QoS;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::DiscoveryConfig;
use crate::identity::DeviceIdentity;

use super::error::WirelessError;
use super::session::MqttSessionManager;

/// Firmware version advertised in the device object
const SW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Seconds after which the hub marks a silent entity unavailable
const EXPIRE_AFTER_SECS: u32 = 360;

/// Describes one sensor entity for a discovery announcement
///
/// Built once by the sensor-reporting caller, consumed once to emit the
/// retained config message.
#[derive(Debug, Clone)]
pub struct DiscoveryDescriptor {
    pub entity_name: String,
    pub value_template: String,
    pub device_class: Option<String>,
    pub icon: Option<String>,
    pub unit_of_measurement: Option<String>,
    pub force_update: bool,
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`
///
/// Idempotent and length-preserving; used to keep entity names legal inside
/// topic segments.
pub fn legal_name(entity_name: &str) -> String {
    entity_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Builds topics and payloads for sensor discovery/state messages
pub struct DiscoveryPublisher {
    session: Arc<MqttSessionManager>,
    identity: DeviceIdentity,
    config: DiscoveryConfig,
}

impl DiscoveryPublisher {
    pub fn new(
        session: Arc<MqttSessionManager>,
        identity: DeviceIdentity,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            session,
            identity,
            config,
        }
    }

    /// `<discover_prefix>/sensor/<mac_hex>/<sensor_name>-<legal_name>/config`
    pub fn discover_topic(&self, sensor_name: &str, entity_name: &str) -> String {
        format!(
            "{}/sensor/{}/{}-{}/config",
            self.config.discover_prefix,
            self.identity.hex(),
            sensor_name,
            legal_name(entity_name)
        )
    }

    /// `<state_prefix>/<mac_hex>/<sensor_name>/state`
    pub fn state_topic(&self, sensor_name: &str) -> String {
        format!(
            "{}/{}/{}/state",
            self.config.state_prefix,
            self.identity.hex(),
            sensor_name
        )
    }

    /// Announce one sensor entity; retained, qos 1
    pub fn publish_discovery(
        &self,
        sensor_name: &str,
        descriptor: &DiscoveryDescriptor,
    ) -> Result<u16, WirelessError> {
        if sensor_name.is_empty() {
            return Err(WirelessError::InvalidArgument(
                "sensor name must not be empty".to_string(),
            ));
        }
        if descriptor.entity_name.is_empty() {
            return Err(WirelessError::InvalidArgument(
                "entity name must not be empty".to_string(),
            ));
        }

        let payload = self.discovery_payload(sensor_name, descriptor);
        let topic = self.discover_topic(sensor_name, &descriptor.entity_name);
        debug!("Publishing discovery for {} to {}", sensor_name, topic);
        self.session
            .publish(&topic, Some(&payload), QoS::AtLeastOnce, true)
    }

    /// Publish a telemetry payload for an announced sensor; qos 2
    pub fn publish_state(&self, sensor_name: &str, payload: &Value) -> Result<u16, WirelessError> {
        if sensor_name.is_empty() {
            return Err(WirelessError::InvalidArgument(
                "sensor name must not be empty".to_string(),
            ));
        }
        if payload.is_null() {
            return Err(WirelessError::InvalidArgument(
                "state payload must not be null".to_string(),
            ));
        }

        let topic = self.state_topic(sensor_name);
        self.session
            .publish(&topic, Some(payload), QoS::ExactlyOnce, false)
    }

    fn discovery_payload(&self, sensor_name: &str, descriptor: &DiscoveryDescriptor) -> Value {
        let mut payload = Map::new();

        // required parameters
        payload.insert("force_update".to_string(), json!(descriptor.force_update));
        payload.insert("name".to_string(), json!(descriptor.entity_name));
        payload.insert(
            "value_template".to_string(),
            json!(descriptor.value_template),
        );

        // optional parameters, included only when present
        if let Some(device_class) = &descriptor.device_class {
            payload.insert("device_class".to_string(), json!(device_class));
        }
        if let Some(icon) = &descriptor.icon {
            payload.insert("icon".to_string(), json!(icon));
        }
        if let Some(unit) = &descriptor.unit_of_measurement {
            payload.insert("unit_of_measurement".to_string(), json!(unit));
        }

        // preset parameters
        payload.insert("expire_after".to_string(), json!(EXPIRE_AFTER_SECS));
        payload.insert("qos".to_string(), json!(2));
        payload.insert("state_topic".to_string(), json!(self.state_topic(sensor_name)));
        payload.insert(
            "unique_id".to_string(),
            json!(self.identity.unique_entity_id(&descriptor.entity_name)),
        );

        payload.insert(
            "device".to_string(),
            json!({
                "manufacturer": self.config.manufacturer,
                "sw_version": SW_VERSION,
                "name": self.config.device_name,
                "model": self.config.model,
                "identifiers": self.identity.hex(),
            }),
        );

        Value::Object(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher() -> DiscoveryPublisher {
        let session = Arc::new(MqttSessionManager::new(
            "127.0.0.1".to_string(),
            1883,
            "node".to_string(),
        ));
        let identity = DeviceIdentity::from_mac([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        DiscoveryPublisher::new(session, identity, DiscoveryConfig::default())
    }

    fn descriptor(entity_name: &str) -> DiscoveryDescriptor {
        DiscoveryDescriptor {
            entity_name: entity_name.to_string(),
            value_template: "{{ value_json.value }}".to_string(),
            device_class: Some("temperature".to_string()),
            icon: None,
            unit_of_measurement: Some("°C".to_string()),
            force_update: true,
        }
    }

    #[test]
    fn legal_name_replaces_illegal_characters() {
        assert_eq!(legal_name("PM2.5"), "PM2_5");
        assert_eq!(legal_name("Dew Point"), "Dew_Point");
        assert_eq!(legal_name("already-legal_name9"), "already-legal_name9");
    }

    #[test]
    fn legal_name_is_idempotent_and_length_preserving() {
        for input in ["PM2.5", "a b.c/d", "ünïcode", "", "Temp"] {
            let once = legal_name(input);
            assert_eq!(legal_name(&once), once);
            assert_eq!(once.chars().count(), input.chars().count());
        }
    }

    #[test]
    fn topics_are_deterministic() {
        let publisher = publisher();
        let first = publisher.discover_topic("bme280", "PM2.5");
        let second = publisher.discover_topic("bme280", "PM2.5");
        assert_eq!(first, second);
        assert_eq!(
            first,
            "homeassistant/sensor/aabbccddeeff/bme280-PM2_5/config"
        );
        assert_eq!(
            publisher.state_topic("bme280"),
            "weather-station/aabbccddeeff/bme280/state"
        );
    }

    #[test]
    fn payload_includes_required_optional_and_preset_fields() {
        let publisher = publisher();
        let payload = publisher.discovery_payload("bme280", &descriptor("Temp"));

        assert_eq!(payload["force_update"], json!(true));
        assert_eq!(payload["name"], json!("Temp"));
        assert_eq!(payload["value_template"], json!("{{ value_json.value }}"));
        assert_eq!(payload["device_class"], json!("temperature"));
        assert_eq!(payload["unit_of_measurement"], json!("°C"));
        // icon omitted entirely when not set
        assert!(payload.get("icon").is_none());
        assert_eq!(payload["expire_after"], json!(360));
        assert_eq!(payload["qos"], json!(2));
        assert_eq!(
            payload["state_topic"],
            json!("weather-station/aabbccddeeff/bme280/state")
        );
        assert_eq!(payload["unique_id"], json!("Temp-aabbccddeeff"));
        assert_eq!(payload["device"]["identifiers"], json!("aabbccddeeff"));
        assert_eq!(payload["device"]["sw_version"], json!(SW_VERSION));
    }

    #[test]
    fn publish_before_client_exists_fails_fast() {
        let publisher = publisher();
        let err = publisher
            .publish_discovery("bme280", &descriptor("Temp"))
            .unwrap_err();
        assert!(matches!(err, WirelessError::ClientNotReady));

        let err = publisher
            .publish_state("bme280", &json!({"value": 21.5}))
            .unwrap_err();
        assert!(matches!(err, WirelessError::ClientNotReady));
    }

    #[test]
    fn empty_arguments_are_rejected_before_any_publish() {
        let publisher = publisher();
        assert!(matches!(
            publisher.publish_discovery("", &descriptor("Temp")),
            Err(WirelessError::InvalidArgument(_))
        ));
        assert!(matches!(
            publisher.publish_discovery("bme280", &descriptor("")),
            Err(WirelessError::InvalidArgument(_))
        ));
        assert!(matches!(
            publisher.publish_state("bme280", &Value::Null),
            Err(WirelessError::InvalidArgument(_))
        ));
    }
}
