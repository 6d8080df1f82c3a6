use thiserror::Error;

/// Errors surfaced by the transport-negotiation layer.
///
/// Background loops never propagate these across task boundaries; they
/// end up as terminal `ConnectionState::Error` values on the event
/// stream instead.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("no free port near {preferred} after {attempts} attempts")]
    PortsExhausted { preferred: u16, attempts: u32 },

    #[error("no usable local IPv4 address")]
    NoLocalAddress,

    #[error("peer-to-peer is not supported on this platform")]
    P2pUnsupported,

    #[error("group creation failed: {0}")]
    GroupCreation(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
