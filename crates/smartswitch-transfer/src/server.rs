//! Receiving side of the transfer engine.
//!
//! One listener accepts transfer connections and processes them
//! sequentially: per file, a metadata record then the byte stream,
//! copied to the save directory in 1 MiB chunks with a progress event
//! after each chunk. A failed connection aborts only itself; the
//! listener keeps accepting until stopped.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use smartswitch_types::{percent, ReceiveState};

use crate::error::TransferError;
use crate::protocol::{self, CHUNK_SIZE};

/// Ports probed forward from the requested one on bind conflict.
const BIND_PORT_RANGE: u16 = 10;

/// Bound on any single socket read.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace delay in `cleanup` before the port may be rebound.
const CLEANUP_GRACE: Duration = Duration::from_millis(250);

/// Fallback name for metadata with an unusable file name.
const FALLBACK_NAME: &str = "received.bin";

/// Inbound file listener with an explicit start/stop lifecycle.
pub struct TransferServer {
    save_dir: PathBuf,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
    bound_port: Option<u16>,
}

impl TransferServer {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            task: None,
            bound_port: None,
        }
    }

    /// Port actually bound, once the listener is running.
    pub fn bound_port(&self) -> Option<u16> {
        self.bound_port
    }

    /// Bind and start the accept loop, probing forward through a
    /// bounded port range on conflict. `port` 0 asks the OS for an
    /// ephemeral port. Returns the bound port.
    pub async fn start_listener(
        &mut self,
        port: u16,
        events: mpsc::Sender<ReceiveState>,
    ) -> Result<u16, TransferError> {
        tokio::fs::create_dir_all(&self.save_dir).await?;

        let listener = bind_listener(port)?;
        let bound = listener.local_addr()?.port();
        info!(port = bound, dir = %self.save_dir.display(), "transfer listener started");

        self.running.store(true, Ordering::SeqCst);
        self.bound_port = Some(bound);

        let running = self.running.clone();
        let shutdown = self.shutdown.clone();
        let save_dir = self.save_dir.clone();
        self.task = Some(tokio::spawn(async move {
            let _ = events.send(ReceiveState::Idle).await;
            while running.load(Ordering::SeqCst) {
                let accepted = tokio::select! {
                    _ = shutdown.notified() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "transfer connection accepted");
                        // Sequential by design: one connection at a time
                        // per listener.
                        match handle_connection(stream, &save_dir, &running, &events).await {
                            Ok(()) => {}
                            Err(TransferError::Stopped) => {
                                let _ = events.send(ReceiveState::Stopped).await;
                                break;
                            }
                            Err(e) => {
                                // Aborts this connection only.
                                warn!(%peer, "receive failed: {}", e);
                                let _ = events
                                    .send(ReceiveState::Failed { error: e.to_string() })
                                    .await;
                            }
                        }
                    }
                    Err(e) => {
                        if running.load(Ordering::SeqCst) {
                            warn!("accept error: {}", e);
                        }
                    }
                }
            }
            debug!("transfer listener stopped");
        }));

        Ok(bound)
    }

    /// Flip the running flag and wake the blocked accept.
    pub async fn stop_listener(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.bound_port = None;
    }

    /// Stop plus a short grace delay before the port may be reused.
    pub async fn cleanup(&mut self) {
        self.stop_listener().await;
        tokio::time::sleep(CLEANUP_GRACE).await;
    }
}

impl Drop for TransferServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Bind a reusable listener, probing forward on address conflicts.
fn bind_listener(port: u16) -> Result<TcpListener, TransferError> {
    let range_end = port.saturating_add(if port == 0 { 0 } else { BIND_PORT_RANGE - 1 });
    let mut candidate = port;
    loop {
        match try_bind(candidate) {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && candidate < range_end => {
                candidate += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                return Err(TransferError::NoListenPort { start: port, end: range_end });
            }
            Err(e) => return Err(TransferError::Io(e)),
        }
    }
}

fn try_bind(port: u16) -> io::Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(8)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

/// Process one transfer connection: metadata + bytes, repeated until
/// the peer closes the stream.
async fn handle_connection(
    mut stream: TcpStream,
    save_dir: &Path,
    running: &AtomicBool,
    events: &mpsc::Sender<ReceiveState>,
) -> Result<(), TransferError> {
    let _ = events.send(ReceiveState::Receiving).await;

    loop {
        let info = match timeout(READ_TIMEOUT, protocol::read_metadata(&mut stream)).await {
            Ok(Ok(Some(info))) => info,
            // Clean close at a record boundary: batch complete.
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(TransferError::OperationTimeout),
        };

        let file_size = info.file_size as u64;
        let dest = save_dir.join(sanitize_name(&info.file_name));
        info!(file = %dest.display(), size = file_size, "receiving file");
        let mut file = File::create(&dest).await?;

        let mut received: u64 = 0;
        let mut buf = vec![0u8; CHUNK_SIZE];
        while received < file_size {
            if !running.load(Ordering::SeqCst) {
                return Err(TransferError::Stopped);
            }
            let want = CHUNK_SIZE.min((file_size - received) as usize);
            let n = match timeout(READ_TIMEOUT, stream.read(&mut buf[..want])).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(TransferError::Io(e)),
                Err(_) => return Err(TransferError::OperationTimeout),
            };
            if n == 0 {
                // Early end-of-stream concludes this file with what we
                // have; the declared size was only a progress hint.
                debug!(got = received, declared = file_size, "stream ended early");
                break;
            }
            file.write_all(&buf[..n]).await?;
            received += n as u64;
            let _ = events
                .send(ReceiveState::Progress {
                    percent: percent(received, file_size),
                    bytes_received: received,
                })
                .await;
        }

        file.flush().await?;
        let _ = events
            .send(ReceiveState::Success { saved_path: dest.display().to_string() })
            .await;

        if received < file_size {
            // The stream is gone; nothing more can follow.
            return Ok(());
        }
    }
}

/// Strip any path components a peer smuggled into the file name.
fn sanitize_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .unwrap_or(FALLBACK_NAME)
        .to_string()
}
