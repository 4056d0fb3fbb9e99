//! Stable device identity derived from the hardware MAC address

use std::fmt;

/// Device identity, derived once and immutable for the process lifetime
///
/// The lowercase hex form of the MAC (no separators) namespaces every MQTT
/// topic and unique entity id this node emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    mac: [u8; 6],
    hex: String,
}

impl DeviceIdentity {
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let hex = mac.iter().map(|b| format!("{b:02x}")).collect();
        Self { mac, hex }
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    /// Lowercase hex device id, e.g. `aabbccddeeff`
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Unique id for a discovered entity: `<entity_name>-<mac_hex>`
    pub fn unique_entity_id(&self, entity_name: &str) -> String {
        format!("{}-{}", entity_name, self.hex)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_renders_as_lowercase_hex() {
        let identity = DeviceIdentity::from_mac([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(identity.hex(), "aabbccddeeff");
    }

    #[test]
    fn unique_entity_id_appends_device_id() {
        let identity = DeviceIdentity::from_mac([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(identity.unique_entity_id("Temp"), "Temp-aabbccddeeff");
    }

    #[test]
    fn leading_zero_bytes_are_preserved() {
        let identity = DeviceIdentity::from_mac([0x00, 0x01, 0x02, 0x0A, 0x0B, 0x0C]);
        assert_eq!(identity.hex(), "0001020a0b0c");
    }
}
