//! Shared data model for the SmartSwitch transfer engine.
//!
//! Everything the network and transfer crates exchange lives here:
//! connection and transfer state enums, discovered-device descriptors,
//! the on-wire file metadata record, and the pairing payload parsed
//! from a QR code or manual entry.

pub mod connection;
pub mod descriptor;
pub mod pairing;
pub mod transfer;

pub use connection::{BandCapabilities, ConnectionState, FrequencyBand, TransportMode};
pub use descriptor::{DeviceDescriptor, DiscoveryFrameError, DISCOVERY_TAG};
pub use pairing::{PairingError, PairingPayload};
pub use transfer::{percent, FileTransferInfo, ReceiveState, SendState};
