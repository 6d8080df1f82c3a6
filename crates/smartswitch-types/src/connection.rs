use serde::{Deserialize, Serialize};

/// State of the single connection owned by the orchestrator.
///
/// Exactly one value is current at any time; transitions are serialized
/// by the orchestrator's mutex and published on its event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected {
        device_name: String,
        network_name: String,
        passphrase: String,
        ip_address: String,
        port: u16,
    },
    Error {
        message: String,
    },
}

impl ConnectionState {
    /// True for the two terminal outcomes of a connection attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Connected { .. } | Self::Error { .. })
    }
}

/// Transport strategy chosen by the caller before a connection attempt.
///
/// `Automatic` sequences `PeerToPeer` then `LocalNetwork` internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    Automatic,
    PeerToPeer,
    LocalNetwork,
}

/// Wi-Fi frequency band hint for group creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrequencyBand {
    Band2_4GHz,
    Band5GHz,
    Band6GHz,
}

/// What bands the local radio can actually form a group on.
///
/// 2.4 GHz is assumed universal; the others are opt-in.
#[derive(Debug, Clone, Copy, Default)]
pub struct BandCapabilities {
    pub supports_5ghz: bool,
    pub supports_6ghz: bool,
}

impl FrequencyBand {
    /// Downgrade an unsupported request to 2.4 GHz. Silent by contract:
    /// callers asking for a band the device lacks still get a group.
    pub fn effective(self, caps: BandCapabilities) -> FrequencyBand {
        match self {
            Self::Band5GHz if !caps.supports_5ghz => Self::Band2_4GHz,
            Self::Band6GHz if !caps.supports_6ghz => Self::Band2_4GHz,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_band_downgrades_to_2_4() {
        let caps = BandCapabilities::default();
        assert_eq!(FrequencyBand::Band5GHz.effective(caps), FrequencyBand::Band2_4GHz);
        assert_eq!(FrequencyBand::Band6GHz.effective(caps), FrequencyBand::Band2_4GHz);
        assert_eq!(FrequencyBand::Band2_4GHz.effective(caps), FrequencyBand::Band2_4GHz);
    }

    #[test]
    fn supported_band_is_kept() {
        let caps = BandCapabilities { supports_5ghz: true, supports_6ghz: false };
        assert_eq!(FrequencyBand::Band5GHz.effective(caps), FrequencyBand::Band5GHz);
        assert_eq!(FrequencyBand::Band6GHz.effective(caps), FrequencyBand::Band2_4GHz);
    }

    #[test]
    fn terminal_states() {
        assert!(ConnectionState::Error { message: "x".into() }.is_terminal());
        assert!(!ConnectionState::Connecting.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
    }
}
