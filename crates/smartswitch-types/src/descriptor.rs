//! Discovered-device descriptors and the UDP announce frame codec.
//!
//! Announce frames are pipe-delimited text:
//!
//! ```text
//! SMARTSWITCH_DEVICE|<name>|<ip>|<port>|<timestamp_millis>
//! ```
//!
//! Receivers tolerate extra trailing fields (future protocol growth) and
//! reject frames whose leading tag does not match.

use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Leading tag of every announce frame.
pub const DISCOVERY_TAG: &str = "SMARTSWITCH_DEVICE";

/// Minimal addressable identity of a discovered peer.
///
/// Equality and hashing go by `ip_address` only — the discoverer dedups
/// repeated announcements from the same host regardless of timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub timestamp: i64,
}

impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.ip_address == other.ip_address
    }
}

impl Eq for DeviceDescriptor {}

impl Hash for DeviceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip_address.hash(state);
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryFrameError {
    #[error("frame tag mismatch")]
    BadTag,
    #[error("frame has too few fields")]
    Truncated,
    #[error("invalid port field: {0}")]
    BadPort(String),
    #[error("invalid timestamp field: {0}")]
    BadTimestamp(String),
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, ip_address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            ip_address: ip_address.into(),
            port,
            timestamp: now_millis(),
        }
    }

    /// Serialize into an announce frame.
    pub fn to_frame(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            DISCOVERY_TAG, self.name, self.ip_address, self.port, self.timestamp
        )
    }

    /// Parse an announce frame. Trailing fields beyond the fifth are
    /// ignored so newer peers can extend the format.
    pub fn from_frame(frame: &str) -> Result<Self, DiscoveryFrameError> {
        let mut fields = frame.trim_end_matches(['\r', '\n']).split('|');
        match fields.next() {
            Some(DISCOVERY_TAG) => {}
            _ => return Err(DiscoveryFrameError::BadTag),
        }
        let name = fields.next().ok_or(DiscoveryFrameError::Truncated)?;
        let ip = fields.next().ok_or(DiscoveryFrameError::Truncated)?;
        let port = fields.next().ok_or(DiscoveryFrameError::Truncated)?;
        let ts = fields.next().ok_or(DiscoveryFrameError::Truncated)?;

        let port: u16 = port
            .parse()
            .map_err(|_| DiscoveryFrameError::BadPort(port.to_string()))?;
        let timestamp: i64 = ts
            .parse()
            .map_err(|_| DiscoveryFrameError::BadTimestamp(ts.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            ip_address: ip.to_string(),
            port,
            timestamp,
        })
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
