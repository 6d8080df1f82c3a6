//! Sending side of the transfer engine.
//!
//! Files go out sequentially over one TCP connection. Per file the
//! client writes a metadata record and then the bytes in 1 MiB
//! chunks, emitting a progress event after each chunk. One bad file
//! is skipped, not fatal; the batch terminal state reflects how many
//! made it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use smartswitch_types::{percent, FileTransferInfo, SendState};

use crate::error::TransferError;
use crate::protocol::{self, CHUNK_SIZE};

/// Bound on establishing the transfer connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on any single chunk write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the state event channel.
const EVENT_BUFFER: usize = 64;

/// One file queued for sending.
///
/// `display_name` overrides the on-disk name in the metadata record.
/// `declared_size` overrides the stat size; when the stream yields
/// fewer bytes than declared the file counts as failed, which is how
/// a source that shrinks mid-transfer surfaces.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub path: PathBuf,
    pub display_name: Option<String>,
    pub declared_size: Option<i64>,
}

impl FileRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            display_name: None,
            declared_size: None,
        }
    }
}

/// Outbound batch sender with a cooperative stop.
pub struct TransferClient {
    stop: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
}

impl TransferClient {
    pub fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(Notify::new()),
        }
    }

    /// Request a stop. The in-flight chunk finishes (or its write is
    /// abandoned mid-select); the batch then terminates with
    /// `SendState::Stopped`.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
    }

    /// Send a batch to `ip:port`. Returns immediately with the state
    /// stream; the transfer runs in a background task. The final event
    /// is always terminal: `Success`, `PartialSuccess`, `Failed` or
    /// `Stopped`.
    pub fn send_files(
        &self,
        ip: impl Into<String>,
        port: u16,
        files: Vec<FileRef>,
    ) -> mpsc::Receiver<SendState> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let ip = ip.into();
        self.stop.store(false, Ordering::SeqCst);
        let stop = self.stop.clone();
        let stop_signal = self.stop_signal.clone();

        tokio::spawn(async move {
            let terminal = match run_batch(&ip, port, files, &stop, &stop_signal, &tx).await {
                Ok(state) => state,
                Err(TransferError::Stopped) => SendState::Stopped,
                Err(e) => SendState::Failed { reason: e.to_string() },
            };
            let _ = tx.send(terminal).await;
        });

        rx
    }
}

impl Default for TransferClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_batch(
    ip: &str,
    port: u16,
    files: Vec<FileRef>,
    stop: &AtomicBool,
    stop_signal: &Notify,
    events: &mpsc::Sender<SendState>,
) -> Result<SendState, TransferError> {
    let _ = events.send(SendState::Connecting).await;
    let addr = format!("{ip}:{port}");
    let mut stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return Err(TransferError::Io(e)),
        Err(_) => return Err(TransferError::ConnectTimeout(addr)),
    };
    info!(%addr, files = files.len(), "transfer connection open");
    let _ = events.send(SendState::Connected).await;

    let total = files.len();
    let mut sent = 0usize;
    for (index, file) in files.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            return Err(TransferError::Stopped);
        }
        match send_one(&mut stream, file, index, total, stop, stop_signal, events).await {
            Ok(()) => sent += 1,
            // Nothing hit the wire; skip this file, keep the batch going.
            Err(FileSendError::Skip(e)) => {
                warn!(file = %file.path.display(), "file skipped: {}", e);
            }
            Err(FileSendError::Fatal(TransferError::Stopped)) => {
                return Err(TransferError::Stopped);
            }
            // Metadata or body bytes already went out; the stream is
            // desynchronized and cannot carry the remaining files.
            Err(FileSendError::Fatal(e)) => {
                warn!(file = %file.path.display(), "batch aborted: {}", e);
                if sent > 0 {
                    return Ok(SendState::PartialSuccess { sent, total });
                }
                return Err(e);
            }
        }
    }

    stream.shutdown().await?;

    Ok(if sent == total {
        SendState::Success { sent, total }
    } else if sent > 0 {
        SendState::PartialSuccess { sent, total }
    } else {
        SendState::Failed {
            reason: "no file could be sent".into(),
        }
    })
}

/// Whether a per-file failure left the stream usable for the rest of
/// the batch.
enum FileSendError {
    /// Failed before anything was written; the next file can proceed.
    Skip(TransferError),
    /// Failed with bytes already on the wire.
    Fatal(TransferError),
}

/// Send one file: metadata record, then the body in chunks.
async fn send_one(
    stream: &mut TcpStream,
    file_ref: &FileRef,
    index: usize,
    total: usize,
    stop: &AtomicBool,
    stop_signal: &Notify,
    events: &mpsc::Sender<SendState>,
) -> Result<(), FileSendError> {
    let name = match &file_ref.display_name {
        Some(name) => name.clone(),
        None => file_ref
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file.bin")
            .to_string(),
    };

    // Open before writing metadata so an unreadable file is skipped
    // without touching the wire.
    let mut file = File::open(&file_ref.path)
        .await
        .map_err(|e| FileSendError::Skip(TransferError::Io(e)))?;
    let stat_size = file
        .metadata()
        .await
        .map_err(|e| FileSendError::Skip(TransferError::Io(e)))?
        .len() as i64;
    let declared = file_ref.declared_size.unwrap_or(stat_size);

    let ext = file_ref
        .path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let info = FileTransferInfo::new(&name, declared, protocol::mime_for_extension(ext));
    info.validate().map_err(|e| {
        FileSendError::Skip(TransferError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e,
        )))
    })?;
    protocol::write_metadata(stream, &info)
        .await
        .map_err(FileSendError::Fatal)?;
    debug!(file = %name, size = declared, "metadata sent");

    let declared = declared as u64;
    let mut written: u64 = 0;
    let mut buf = vec![0u8; CHUNK_SIZE];
    while written < declared {
        // Register the stop waiter before reading the flag; a stop
        // landing between the two must still wake the select below.
        let stopped = stop_signal.notified();
        tokio::pin!(stopped);
        stopped.as_mut().enable();
        if stop.load(Ordering::SeqCst) {
            return Err(FileSendError::Fatal(TransferError::Stopped));
        }
        let want = CHUNK_SIZE.min((declared - written) as usize);
        let n = file
            .read(&mut buf[..want])
            .await
            .map_err(|e| FileSendError::Fatal(TransferError::Io(e)))?;
        if n == 0 {
            // Source ran dry below the declared size. The receiver
            // bounds its copy at the declared size, so the stream is
            // desynchronized; closing it is the only safe exit.
            return Err(FileSendError::Fatal(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{name}: source ended at {written} of {declared} bytes"),
            ))));
        }

        let write = timeout(WRITE_TIMEOUT, stream.write_all(&buf[..n]));
        tokio::select! {
            res = write => match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(FileSendError::Fatal(TransferError::Io(e))),
                Err(_) => return Err(FileSendError::Fatal(TransferError::OperationTimeout)),
            },
            _ = &mut stopped => {
                return Err(FileSendError::Fatal(TransferError::Stopped));
            }
        }

        written += n as u64;
        let _ = events
            .send(SendState::Transferring {
                file_name: name.clone(),
                file_index: index,
                total_files: total,
                progress: percent(written, declared),
            })
            .await;
    }

    stream
        .flush()
        .await
        .map_err(|e| FileSendError::Fatal(TransferError::Io(e)))?;
    Ok(())
}
