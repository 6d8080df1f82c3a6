//! File transfer engine: a length-framed metadata + raw-bytes protocol
//! over one TCP connection per batch.
//!
//! [`TransferServer`] is the receiving side (listener with explicit
//! lifecycle), [`TransferClient`] the sending side. Both report
//! progress on `mpsc` event streams using the state enums from
//! `smartswitch-types`.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::{FileRef, TransferClient};
pub use error::TransferError;
pub use protocol::{CHUNK_SIZE, MAX_METADATA_LEN};
pub use server::TransferServer;
