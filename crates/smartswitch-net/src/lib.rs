//! SmartSwitch transport negotiation.
//!
//! Establishes a socket-level link between two nearby devices, either
//! by forming a Wi-Fi Direct group with this device as owner or by
//! using an already-shared local network, with automatic mode
//! selection and fallback. Peers find each other through periodic UDP
//! broadcast announcements.
//!
//! The file protocol itself lives in `smartswitch-transfer`; this
//! crate only produces a reachable `(ip, port)` endpoint and the
//! connection state stream.

pub mod broadcast;
pub mod error;
pub mod iface;
pub mod local_network;
pub mod orchestrator;
pub mod port;
pub mod wifi_direct;

pub use broadcast::{DeviceBroadcaster, DiscoveryEvent, ANNOUNCE_INTERVAL, DISCOVERY_PORT, DISCOVERY_WINDOW};
pub use error::NetError;
pub use local_network::{LocalEndpoint, LocalNetworkController, ProbeResult, DEFAULT_PORT};
pub use orchestrator::ConnectionOrchestrator;
pub use port::find_available_port;
pub use wifi_direct::{
    GroupInfo, GroupPhase, GroupTimings, P2pEvent, WifiDirectController, WifiP2pPlatform,
    MAX_RETRIES,
};
