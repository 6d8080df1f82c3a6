//! Transfer-side state enums and the on-wire file metadata record.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata header preceding each file's byte stream on the wire.
///
/// `file_size` is trusted only for progress computation; the receiver
/// never pre-allocates from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferInfo {
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub timestamp: i64,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("negative file size {0}")]
    NegativeSize(i64),
}

impl FileTransferInfo {
    pub fn new(file_name: impl Into<String>, file_size: i64, file_type: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
            file_type: file_type.into(),
            timestamp: crate::descriptor::now_millis(),
        }
    }

    /// Validate the invariants a record must hold after deserialization.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.file_size < 0 {
            return Err(MetadataError::NegativeSize(self.file_size));
        }
        Ok(())
    }
}

/// Sender-side transfer state, published on the send event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SendState {
    Idle,
    Connecting,
    Connected,
    Transferring {
        file_name: String,
        file_index: usize,
        total_files: usize,
        progress: u8,
    },
    Success {
        sent: usize,
        total: usize,
    },
    PartialSuccess {
        sent: usize,
        total: usize,
    },
    Failed {
        reason: String,
    },
    Stopped,
}

/// Receiver-side transfer state, published on the receive event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ReceiveState {
    Idle,
    Connecting,
    Receiving,
    Progress {
        percent: u8,
        bytes_received: u64,
    },
    Success {
        saved_path: String,
    },
    Failed {
        error: String,
    },
    Stopped,
}

/// Progress percentage for `bytes` of `total`, clamped to 100.
/// A zero-byte file reports 0 until completion logic declares it done.
pub fn percent(bytes: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (bytes.saturating_mul(100) / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_of_zero_total_is_zero() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(500, 0), 0);
    }

    #[test]
    fn percent_clamps_at_100() {
        assert_eq!(percent(11, 11), 100);
        assert_eq!(percent(20, 11), 100);
    }

    #[test]
    fn percent_is_monotonic_over_chunked_send() {
        let total: u64 = 10 * 1024 * 1024 + 37;
        let chunk: u64 = 1024 * 1024;
        let mut sent = 0u64;
        let mut last = 0u8;
        while sent < total {
            sent = (sent + chunk).min(total);
            let p = percent(sent, total);
            assert!(p >= last, "progress went backwards: {} -> {}", last, p);
            last = p;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn metadata_rejects_negative_size() {
        let info = FileTransferInfo {
            file_name: "a.txt".into(),
            file_size: -1,
            file_type: "text/plain".into(),
            timestamp: 0,
        };
        assert!(info.validate().is_err());
    }
}
