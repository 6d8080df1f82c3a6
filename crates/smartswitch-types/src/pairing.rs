//! Pairing payloads scanned from a QR code or entered manually.
//!
//! The scanner itself is external; this module only parses the JSON it
//! produces. Two payload kinds exist: peer-to-peer pairing (carries the
//! group SSID and passphrase) and local-network pairing (carries a
//! directly reachable endpoint). Unknown `type` tags are rejected.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::DeviceDescriptor;

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("unrecognized or malformed pairing payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A parsed pairing payload, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PairingPayload {
    /// Join the sender's Wi-Fi Direct group using the embedded credentials.
    #[serde(rename = "SMARTSWITCH_P2P")]
    PeerToPeer {
        device_name: String,
        connection_type: String,
        ssid: String,
        password: String,
        port: u16,
        timestamp: i64,
    },
    /// Connect to the sender over the shared local network.
    #[serde(rename = "SMARTSWITCH_LOCAL")]
    LocalNetwork {
        device_name: String,
        ip_address: String,
        port: u16,
        network_name: String,
        timestamp: i64,
    },
}

impl PairingPayload {
    pub fn from_json(json: &str) -> Result<Self, PairingError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> String {
        // Serialization of these flat variants cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// A local-network payload is already an addressable peer.
    pub fn as_descriptor(&self) -> Option<DeviceDescriptor> {
        match self {
            Self::LocalNetwork { device_name, ip_address, port, timestamp, .. } => {
                Some(DeviceDescriptor {
                    name: device_name.clone(),
                    ip_address: ip_address.clone(),
                    port: *port,
                    timestamp: *timestamp,
                })
            }
            Self::PeerToPeer { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_local_payload() {
        let json = r#"{
            "type": "SMARTSWITCH_LOCAL",
            "device_name": "Galaxy S24",
            "ip_address": "192.168.1.7",
            "port": 8080,
            "network_name": "HomeWifi",
            "timestamp": 1700000000000
        }"#;
        let payload = PairingPayload::from_json(json).unwrap();
        let desc = payload.as_descriptor().unwrap();
        assert_eq!(desc.ip_address, "192.168.1.7");
        assert_eq!(desc.port, 8080);
    }

    #[test]
    fn parses_p2p_payload() {
        let json = r#"{
            "type": "SMARTSWITCH_P2P",
            "device_name": "Galaxy S24",
            "connection_type": "wifi_direct",
            "ssid": "DIRECT-xy-Galaxy",
            "password": "s3cr3tpass",
            "port": 8988,
            "timestamp": 1700000000000
        }"#;
        let payload = PairingPayload::from_json(json).unwrap();
        assert!(payload.as_descriptor().is_none());
        match payload {
            PairingPayload::PeerToPeer { ssid, .. } => assert_eq!(ssid, "DIRECT-xy-Galaxy"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_unknown_type() {
        let json = r#"{"type": "SOMETHING_ELSE", "device_name": "x"}"#;
        assert!(PairingPayload::from_json(json).is_err());
    }

    #[test]
    fn rejects_non_json() {
        assert!(PairingPayload::from_json("not json at all").is_err());
    }
}
