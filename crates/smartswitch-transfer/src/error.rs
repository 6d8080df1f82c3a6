use thiserror::Error;

/// Errors inside the transfer engine. These never cross the component
/// boundary raw; callers see terminal `SendState`/`ReceiveState`
/// values built from them.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("no bindable port in {start}..={end}")]
    NoListenPort { start: u16, end: u16 },

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("socket operation timed out")]
    OperationTimeout,

    #[error("metadata record length {0} out of bounds")]
    MetadataTooLarge(u32),

    #[error("metadata encoding: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("transfer stopped")]
    Stopped,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
