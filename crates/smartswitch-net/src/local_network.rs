//! Shared-local-network transport.
//!
//! The receiver side binds a greeting listener on the best local IPv4
//! and announces itself over UDP while the listener is alive. The
//! greeting exchange is a link-layer handshake only — the real file
//! protocol runs on the separate transfer connection opened later.
//!
//! The client side wraps the discovery window and a cheap reachability
//! probe against a discovered or scanned peer.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use smartswitch_types::DeviceDescriptor;

use crate::broadcast::{self, DeviceBroadcaster, DiscoveryEvent, DISCOVERY_PORT};
use crate::error::NetError;
use crate::iface;
use crate::port;

/// Default greeting-listener port.
pub const DEFAULT_PORT: u16 = 8080;

/// How many ports the allocator probes past the default.
pub const PORT_ATTEMPTS: u32 = 10;

/// Connect timeout for the reachability probe.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the probe waits for any reply byte.
const PROBE_REPLY_TIMEOUT: Duration = Duration::from_secs(3);

/// The 5-byte probe payload.
const PROBE: &[u8] = b"SWTCH";

/// Greeting line the listener answers with.
const GREETING_REPLY: &str = "SMARTSWITCH_OK\n";

/// Bound for a greeting line read.
const GREETING_TIMEOUT: Duration = Duration::from_secs(3);

/// A reachable endpoint on the shared network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEndpoint {
    pub ip_address: String,
    pub port: u16,
}

/// Outcome of a reachability probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub reachable: bool,
    pub detail: String,
}

/// Receiver-side local-network host: greeting listener + announcer.
///
/// Lifecycle is explicit: `start_as_receiver` then `stop`. Dropping
/// without `stop` aborts the background tasks but skips the graceful
/// announce shutdown.
pub struct LocalNetworkController {
    shutdown: Arc<Notify>,
    accept_task: Option<JoinHandle<()>>,
    broadcaster: Option<DeviceBroadcaster>,
    endpoint: Option<LocalEndpoint>,
    discovery_port: u16,
}

impl LocalNetworkController {
    pub fn new() -> Self {
        Self::with_discovery_port(DISCOVERY_PORT)
    }

    /// Use a non-default discovery port for both announcing and
    /// discovering.
    pub fn with_discovery_port(discovery_port: u16) -> Self {
        Self {
            shutdown: Arc::new(Notify::new()),
            accept_task: None,
            broadcaster: None,
            endpoint: None,
            discovery_port,
        }
    }

    pub fn endpoint(&self) -> Option<&LocalEndpoint> {
        self.endpoint.as_ref()
    }

    /// Bind the greeting listener and start announcing.
    ///
    /// The returned endpoint is real and verified by the successful
    /// bind; there is no fabricated fallback address.
    pub async fn start_as_receiver(
        &mut self,
        device_name: &str,
    ) -> Result<LocalEndpoint, NetError> {
        let ip = iface::best_local_ipv4()?;
        let port = port::find_available_port(DEFAULT_PORT, PORT_ATTEMPTS)?;

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        let endpoint = LocalEndpoint {
            ip_address: ip.to_string(),
            port,
        };
        info!(ip = %endpoint.ip_address, port, "local-network receiver listening");

        let shutdown = self.shutdown.clone();
        self.accept_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "greeting connection");
                            if let Err(e) = handle_greeting(stream).await {
                                // Per-connection failure; the listener lives on.
                                debug!(%peer, "greeting failed: {}", e);
                            }
                        }
                        Err(e) => {
                            warn!("greeting accept error: {}", e);
                        }
                    }
                }
            }
            debug!("greeting listener stopped");
        }));

        let descriptor = DeviceDescriptor::new(device_name, endpoint.ip_address.clone(), port);
        self.broadcaster = Some(DeviceBroadcaster::start(descriptor, self.discovery_port).await?);

        self.endpoint = Some(endpoint.clone());
        Ok(endpoint)
    }

    /// Run one discovery window, reporting descriptors as they arrive.
    pub fn discover_devices(
        &self,
        window: Duration,
        events: mpsc::Sender<DiscoveryEvent>,
    ) -> JoinHandle<Result<(), NetError>> {
        broadcast::discover(self.discovery_port, window, events)
    }

    /// Reachability probe: connect, send 5 bytes, expect any reply.
    ///
    /// Independent of the real transfer connection; this only answers
    /// "is that endpoint alive right now".
    pub async fn connect_to_device(&self, descriptor: &DeviceDescriptor) -> ProbeResult {
        let addr = format!("{}:{}", descriptor.ip_address, descriptor.port);
        let target: SocketAddr = match addr.parse() {
            Ok(a) => a,
            Err(_) => {
                return ProbeResult {
                    reachable: false,
                    detail: format!("invalid endpoint {addr}"),
                };
            }
        };

        let mut stream = match timeout(PROBE_CONNECT_TIMEOUT, TcpStream::connect(target)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return ProbeResult {
                    reachable: false,
                    detail: format!("connect failed: {e}"),
                };
            }
            Err(_) => {
                return ProbeResult {
                    reachable: false,
                    detail: "connect timed out".into(),
                };
            }
        };

        if let Err(e) = stream.write_all(PROBE).await {
            return ProbeResult {
                reachable: false,
                detail: format!("probe write failed: {e}"),
            };
        }
        // The greeting listener replies line-wise; newline flushes it.
        if let Err(e) = stream.write_all(b"\n").await {
            return ProbeResult {
                reachable: false,
                detail: format!("probe write failed: {e}"),
            };
        }

        let mut reply = [0u8; 64];
        match timeout(PROBE_REPLY_TIMEOUT, stream.peek(&mut reply)).await {
            Ok(Ok(n)) if n > 0 => ProbeResult {
                reachable: true,
                detail: format!("device {} reachable", descriptor.name),
            },
            Ok(Ok(_)) => ProbeResult {
                reachable: false,
                detail: "peer closed without replying".into(),
            },
            Ok(Err(e)) => ProbeResult {
                reachable: false,
                detail: format!("probe read failed: {e}"),
            },
            Err(_) => ProbeResult {
                reachable: false,
                detail: "no reply within timeout".into(),
            },
        }
    }

    /// Stop the listener and announcer and forget the endpoint.
    pub async fn stop(&mut self) {
        self.shutdown.notify_waiters();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        if let Some(broadcaster) = self.broadcaster.take() {
            broadcaster.stop().await;
        }
        self.endpoint = None;
    }
}

impl Default for LocalNetworkController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalNetworkController {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        // The broadcaster aborts its own task on drop.
    }
}

/// Read one greeting line, reply, close. Bounded so a silent peer
/// cannot pin the accept loop.
async fn handle_greeting(stream: TcpStream) -> Result<(), NetError> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    timeout(GREETING_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| NetError::Timeout("greeting line"))??;
    debug!(greeting = %line.trim_end(), "greeting received");

    let mut stream = reader.into_inner();
    stream.write_all(GREETING_REPLY.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
