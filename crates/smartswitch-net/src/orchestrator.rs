//! Connection orchestration: mode selection, fallback, and the single
//! connection state machine.
//!
//! One orchestrator owns one [`ConnectionState`]. All transitions are
//! serialized by the instance mutex; a `start` while another attempt
//! is in flight cancels and cleans it first. Results reach the caller
//! only through the state event stream — `start` never blocks on the
//! network itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use smartswitch_types::{ConnectionState, FrequencyBand, TransportMode};

use crate::local_network::LocalNetworkController;
use crate::wifi_direct::{GroupTimings, WifiDirectController, WifiP2pPlatform};

/// Settling delay after tearing down a superseded attempt.
const SETTLE: Duration = Duration::from_millis(500);

/// Network name reported for local-network connections, where no
/// group credentials exist.
const LOCAL_NETWORK_NAME: &str = "local";

struct Inner {
    state: ConnectionState,
    events: Option<mpsc::Sender<ConnectionState>>,
    attempt: Option<JoinHandle<()>>,
    p2p: Option<WifiDirectController>,
    local: Option<LocalNetworkController>,
}

impl Inner {
    async fn set_state(&mut self, state: ConnectionState) {
        self.state = state.clone();
        if let Some(tx) = &self.events {
            let _ = tx.send(state).await;
        }
    }
}

/// Owns the connection lifecycle for one device pairing session.
pub struct ConnectionOrchestrator {
    inner: Arc<Mutex<Inner>>,
    platform: Arc<dyn WifiP2pPlatform>,
    device_name: String,
    timings: GroupTimings,
}

impl ConnectionOrchestrator {
    pub fn new(platform: Arc<dyn WifiP2pPlatform>, device_name: impl Into<String>) -> Self {
        Self::with_timings(platform, device_name, GroupTimings::default())
    }

    pub fn with_timings(
        platform: Arc<dyn WifiP2pPlatform>,
        device_name: impl Into<String>,
        timings: GroupTimings,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                events: None,
                attempt: None,
                p2p: None,
                local: None,
            })),
            platform,
            device_name: device_name.into(),
            timings,
        }
    }

    pub async fn current_state(&self) -> ConnectionState {
        self.inner.lock().await.state.clone()
    }

    /// Begin a connection attempt and return its state stream.
    ///
    /// Any in-flight attempt is cancelled and its transport state torn
    /// down before the new one begins, with a short settling delay so
    /// sockets and half-formed groups release cleanly.
    pub async fn start(
        &self,
        mode: TransportMode,
        band: FrequencyBand,
    ) -> mpsc::Receiver<ConnectionState> {
        let (tx, rx) = mpsc::channel(16);

        let mut inner = self.inner.lock().await;
        Self::cancel_and_teardown(&mut inner).await;

        // Best-effort cleanup of platform group state from earlier
        // runs, then let things settle before rebinding.
        let mut sweeper = WifiDirectController::with_timings(self.platform.clone(), self.timings);
        sweeper.teardown().await;
        tokio::time::sleep(SETTLE).await;

        inner.events = Some(tx);
        inner.set_state(ConnectionState::Connecting).await;

        // Spawned and recorded under the same lock: a concurrent start
        // or stop can never observe the events channel replaced while
        // the attempt handle is still missing.
        let task = tokio::spawn(Self::run_attempt(
            self.inner.clone(),
            self.platform.clone(),
            self.device_name.clone(),
            self.timings,
            mode,
            band,
        ));
        inner.attempt = Some(task);

        rx
    }

    /// Tear everything down and report `Disconnected`.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        Self::cancel_and_teardown(&mut inner).await;
        inner.set_state(ConnectionState::Disconnected).await;
        inner.events = None;
    }

    async fn cancel_and_teardown(inner: &mut Inner) {
        if let Some(handle) = inner.attempt.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(mut p2p) = inner.p2p.take() {
            p2p.teardown().await;
        }
        if let Some(mut local) = inner.local.take() {
            local.stop().await;
        }
    }

    async fn run_attempt(
        inner: Arc<Mutex<Inner>>,
        platform: Arc<dyn WifiP2pPlatform>,
        device_name: String,
        timings: GroupTimings,
        mode: TransportMode,
        band: FrequencyBand,
    ) {
        match mode {
            TransportMode::PeerToPeer => {
                match Self::connect_p2p(&platform, &device_name, timings, band).await {
                    Ok((state, controller)) => {
                        let mut guard = inner.lock().await;
                        guard.p2p = Some(controller);
                        guard.set_state(state).await;
                    }
                    Err(message) => {
                        // The caller pinned peer-to-peer: failure is
                        // surfaced, never substituted.
                        let mut guard = inner.lock().await;
                        guard.set_state(ConnectionState::Error { message }).await;
                    }
                }
            }
            TransportMode::LocalNetwork => {
                Self::finish_with_local(&inner, &device_name).await;
            }
            TransportMode::Automatic => {
                match Self::connect_p2p(&platform, &device_name, timings, band).await {
                    Ok((state, controller)) => {
                        let mut guard = inner.lock().await;
                        guard.p2p = Some(controller);
                        guard.set_state(state).await;
                    }
                    Err(reason) => {
                        // Silent fallback: the intermediate failure is
                        // logged, not reported.
                        info!("peer-to-peer failed ({reason}), falling back to local network");
                        Self::finish_with_local(&inner, &device_name).await;
                    }
                }
            }
        }
    }

    async fn connect_p2p(
        platform: &Arc<dyn WifiP2pPlatform>,
        device_name: &str,
        timings: GroupTimings,
        band: FrequencyBand,
    ) -> Result<(ConnectionState, WifiDirectController), String> {
        let mut controller = WifiDirectController::with_timings(platform.clone(), timings);
        match controller.create_group(band).await {
            Ok(info) => Ok((
                ConnectionState::Connected {
                    device_name: device_name.to_string(),
                    network_name: info.network_name,
                    passphrase: info.passphrase,
                    ip_address: info.owner_address,
                    port: crate::local_network::DEFAULT_PORT,
                },
                controller,
            )),
            Err(e) => {
                controller.teardown().await;
                Err(e.to_string())
            }
        }
    }

    /// Local-network path: the endpoint comes from a real bind, never
    /// a fabricated address — no resolvable interface is an error.
    async fn finish_with_local(inner: &Arc<Mutex<Inner>>, device_name: &str) {
        let mut local = LocalNetworkController::new();
        match local.start_as_receiver(device_name).await {
            Ok(endpoint) => {
                let mut guard = inner.lock().await;
                guard.local = Some(local);
                guard
                    .set_state(ConnectionState::Connected {
                        device_name: device_name.to_string(),
                        network_name: LOCAL_NETWORK_NAME.to_string(),
                        passphrase: String::new(),
                        ip_address: endpoint.ip_address,
                        port: endpoint.port,
                    })
                    .await;
            }
            Err(e) => {
                warn!("local network transport failed: {}", e);
                let mut guard = inner.lock().await;
                guard
                    .set_state(ConnectionState::Error {
                        message: format!("local network unavailable: {e}"),
                    })
                    .await;
            }
        }
    }
}
