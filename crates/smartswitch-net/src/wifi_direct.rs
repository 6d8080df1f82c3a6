//! Wi-Fi Direct group formation state machine.
//!
//! The platform P2P stack is callback-driven and OS-specific, so it
//! sits behind the [`WifiP2pPlatform`] trait: the controller hands the
//! platform an event channel and consumes notifications from a single
//! task, which keeps the state machine single-threaded no matter how
//! many producer threads the platform uses.
//!
//! ```text
//! Idle -> Initializing -> CreatingGroup -> GroupFormed -> Idle
//!                              |                ^
//!                              v                | (retry, bounded)
//!                            Failed ------------+
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use smartswitch_types::{BandCapabilities, FrequencyBand};

use crate::error::NetError;

/// Credentials and owner endpoint of a formed group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub network_name: String,
    pub passphrase: String,
    pub owner_address: String,
}

/// Notifications the platform delivers while the channel is held.
#[derive(Debug, Clone)]
pub enum P2pEvent {
    /// The asynchronous result of a `create_group` request.
    GroupCreateSucceeded,
    GroupCreateFailed { reason: String },
    /// Connectivity changed; group details may now be queryable.
    ConnectionChanged { group_formed: bool, is_owner: bool },
    /// Peer list or own-device changes. Informational only.
    PeersChanged,
    ThisDeviceChanged,
}

/// Seam to the OS Wi-Fi P2P stack.
#[async_trait]
pub trait WifiP2pPlatform: Send + Sync {
    /// Acquire the platform channel and register for change
    /// notifications, delivered on `events` until [`Self::release`].
    async fn acquire(&self, events: mpsc::Sender<P2pEvent>) -> Result<(), NetError>;

    /// Unregister notifications and drop the channel. Always succeeds.
    async fn release(&self);

    /// Request group creation with this device forced as owner. The
    /// band hint is best-effort; platforms without explicit band
    /// selection ignore it.
    async fn create_group(&self, band: FrequencyBand) -> Result<(), NetError>;

    /// Request removal of the current group, formed or half-formed.
    async fn remove_group(&self) -> Result<(), NetError>;

    /// Current group details. `Ok(None)` means "not available yet",
    /// which is transient right after formation.
    async fn group_info(&self) -> Result<Option<GroupInfo>, NetError>;

    fn p2p_supported(&self) -> bool {
        true
    }

    fn band_capabilities(&self) -> BandCapabilities;
}

/// Phase of the group state machine, for observers and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupPhase {
    Idle,
    Initializing,
    CreatingGroup,
    GroupFormed,
    Failed,
}

/// All the bounded waits of the state machine in one place. Tests
/// shrink these; production uses the defaults.
#[derive(Debug, Clone, Copy)]
pub struct GroupTimings {
    /// Wait for the async create-group success/failure signal.
    pub create_signal: Duration,
    /// Wall-clock bound from create request to a formed group.
    pub group_formed: Duration,
    /// Fixed delay between retry attempts.
    pub retry_delay: Duration,
    /// Settling delay after removing a half-torn-down group.
    pub remove_settle: Duration,
    /// Delay before the single group-info re-query.
    pub info_retry_delay: Duration,
    /// Bounded wait for the async removal result during teardown.
    pub remove_wait: Duration,
}

impl Default for GroupTimings {
    fn default() -> Self {
        Self {
            create_signal: Duration::from_secs(5),
            group_formed: Duration::from_secs(12),
            retry_delay: Duration::from_secs(3),
            remove_settle: Duration::from_secs(1),
            info_retry_delay: Duration::from_secs(2),
            remove_wait: Duration::from_secs(3),
        }
    }
}

/// Additional attempts after the first group-creation failure.
pub const MAX_RETRIES: u32 = 2;

/// Drives the platform through group formation with this device as
/// owner, with bounded retries and a hard wall-clock timeout.
pub struct WifiDirectController {
    platform: Arc<dyn WifiP2pPlatform>,
    timings: GroupTimings,
    phase: GroupPhase,
}

impl WifiDirectController {
    pub fn new(platform: Arc<dyn WifiP2pPlatform>) -> Self {
        Self::with_timings(platform, GroupTimings::default())
    }

    pub fn with_timings(platform: Arc<dyn WifiP2pPlatform>, timings: GroupTimings) -> Self {
        Self {
            platform,
            timings,
            phase: GroupPhase::Idle,
        }
    }

    pub fn phase(&self) -> &GroupPhase {
        &self.phase
    }

    /// Form a group and return its credentials.
    ///
    /// Runs the full retry policy; the caller only sees the terminal
    /// outcome. On failure the controller has already torn down.
    pub async fn create_group(&mut self, band: FrequencyBand) -> Result<GroupInfo, NetError> {
        if !self.platform.p2p_supported() {
            self.phase = GroupPhase::Failed;
            return Err(NetError::P2pUnsupported);
        }

        self.phase = GroupPhase::Initializing;
        let (tx, mut rx) = mpsc::channel::<P2pEvent>(32);
        if let Err(e) = self.platform.acquire(tx).await {
            // Channel acquisition failure is terminal for the attempt.
            self.phase = GroupPhase::Failed;
            return Err(e);
        }

        let band = band.effective(self.platform.band_capabilities());
        let mut last_failure = String::from("group never formed");

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                // Clear any half-torn-down group before colliding with it.
                if let Err(e) = self.platform.remove_group().await {
                    debug!("pre-retry group removal failed: {}", e);
                }
                tokio::time::sleep(self.timings.remove_settle).await;
                tokio::time::sleep(self.timings.retry_delay).await;
                info!(attempt, "retrying group creation");
            }

            self.phase = GroupPhase::CreatingGroup;
            match self.try_form_group(band, &mut rx).await {
                Ok(info) => {
                    self.phase = GroupPhase::GroupFormed;
                    info!(network = %info.network_name, "group formed, this device is owner");
                    return Ok(info);
                }
                Err(e) => {
                    warn!(attempt, "group creation attempt failed: {}", e);
                    last_failure = e.to_string();
                }
            }
        }

        self.phase = GroupPhase::Failed;
        self.teardown().await;
        Err(NetError::GroupCreation(last_failure))
    }

    /// One formation attempt: request creation, wait for the async
    /// signal, then wait for connectivity to report a formed group we
    /// own, then fetch the details.
    async fn try_form_group(
        &self,
        band: FrequencyBand,
        rx: &mut mpsc::Receiver<P2pEvent>,
    ) -> Result<GroupInfo, NetError> {
        let deadline = Instant::now() + self.timings.group_formed;

        self.platform.create_group(band).await?;

        // Phase 1: the platform acknowledges the create request.
        let signal_deadline = Instant::now() + self.timings.create_signal;
        loop {
            let remaining = signal_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NetError::Timeout("group creation signal"));
            }
            match timeout(remaining, rx.recv()).await {
                Ok(Some(P2pEvent::GroupCreateSucceeded)) => break,
                Ok(Some(P2pEvent::GroupCreateFailed { reason })) => {
                    return Err(NetError::GroupCreation(reason));
                }
                Ok(Some(_)) => continue,
                Ok(None) => return Err(NetError::GroupCreation("platform channel closed".into())),
                Err(_) => return Err(NetError::Timeout("group creation signal")),
            }
        }

        // Phase 2: connectivity reports the formed group with us as owner.
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NetError::Timeout("group formation"));
            }
            match timeout(remaining, rx.recv()).await {
                Ok(Some(P2pEvent::ConnectionChanged { group_formed: true, is_owner: true })) => {
                    return self.fetch_group_info().await;
                }
                Ok(Some(P2pEvent::ConnectionChanged { group_formed: true, is_owner: false })) => {
                    // We forced owner intent; ending up as a client means
                    // the attempt went sideways.
                    return Err(NetError::GroupCreation(
                        "group formed with this device as client".into(),
                    ));
                }
                Ok(Some(_)) => continue,
                Ok(None) => return Err(NetError::GroupCreation("platform channel closed".into())),
                Err(_) => return Err(NetError::Timeout("group formation")),
            }
        }
    }

    /// Group details can lag formation; re-query once after a short
    /// delay before declaring failure.
    async fn fetch_group_info(&self) -> Result<GroupInfo, NetError> {
        if let Some(info) = self.platform.group_info().await? {
            return Ok(info);
        }
        debug!("group info not yet available, re-querying");
        tokio::time::sleep(self.timings.info_retry_delay).await;
        self.platform
            .group_info()
            .await?
            .ok_or(NetError::GroupCreation("group details unavailable".into()))
    }

    /// Tear down whatever exists. Removal failure is non-fatal: local
    /// state resets regardless so a later attempt starts clean.
    pub async fn teardown(&mut self) {
        match timeout(self.timings.remove_wait, self.platform.remove_group()).await {
            Ok(Ok(())) => debug!("group removed"),
            Ok(Err(e)) => warn!("group removal failed (ignored): {}", e),
            Err(_) => warn!("group removal timed out (ignored)"),
        }
        self.platform.release().await;
        self.phase = GroupPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted platform: the configured events are emitted after each
    /// create_group call.
    struct ScriptedPlatform {
        create_events: Vec<P2pEvent>,
        info: Mutex<Vec<Option<GroupInfo>>>,
        events_tx: Mutex<Option<mpsc::Sender<P2pEvent>>>,
        supported: bool,
    }

    impl ScriptedPlatform {
        fn new(create_events: Vec<P2pEvent>, info: Vec<Option<GroupInfo>>) -> Self {
            Self {
                create_events,
                info: Mutex::new(info),
                events_tx: Mutex::new(None),
                supported: true,
            }
        }

        fn group_info_fixture() -> GroupInfo {
            GroupInfo {
                network_name: "DIRECT-ab-test".into(),
                passphrase: "hunter22".into(),
                owner_address: "192.168.49.1".into(),
            }
        }
    }

    #[async_trait]
    impl WifiP2pPlatform for ScriptedPlatform {
        async fn acquire(&self, events: mpsc::Sender<P2pEvent>) -> Result<(), NetError> {
            *self.events_tx.lock().unwrap() = Some(events);
            Ok(())
        }

        async fn release(&self) {
            *self.events_tx.lock().unwrap() = None;
        }

        async fn create_group(&self, _band: FrequencyBand) -> Result<(), NetError> {
            let tx = self.events_tx.lock().unwrap().clone();
            if let Some(tx) = tx {
                for event in self.create_events.clone() {
                    let _ = tx.send(event).await;
                }
            }
            Ok(())
        }

        async fn remove_group(&self) -> Result<(), NetError> {
            Ok(())
        }

        async fn group_info(&self) -> Result<Option<GroupInfo>, NetError> {
            let mut infos = self.info.lock().unwrap();
            if infos.is_empty() {
                Ok(Some(Self::group_info_fixture()))
            } else {
                Ok(infos.remove(0))
            }
        }

        fn p2p_supported(&self) -> bool {
            self.supported
        }

        fn band_capabilities(&self) -> BandCapabilities {
            BandCapabilities::default()
        }
    }

    fn fast_timings() -> GroupTimings {
        GroupTimings {
            create_signal: Duration::from_millis(200),
            group_formed: Duration::from_millis(400),
            retry_delay: Duration::from_millis(10),
            remove_settle: Duration::from_millis(10),
            info_retry_delay: Duration::from_millis(20),
            remove_wait: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn forms_group_on_happy_path() {
        let platform = Arc::new(ScriptedPlatform::new(
            vec![
                P2pEvent::GroupCreateSucceeded,
                P2pEvent::ConnectionChanged { group_formed: true, is_owner: true },
            ],
            vec![Some(ScriptedPlatform::group_info_fixture())],
        ));
        let mut controller = WifiDirectController::with_timings(platform, fast_timings());

        let info = controller.create_group(FrequencyBand::Band2_4GHz).await.unwrap();
        assert_eq!(info.network_name, "DIRECT-ab-test");
        assert_eq!(*controller.phase(), GroupPhase::GroupFormed);
    }

    #[tokio::test]
    async fn retries_transiently_unavailable_group_info() {
        // First query returns None; the delayed re-query succeeds.
        let platform = Arc::new(ScriptedPlatform::new(
            vec![
                P2pEvent::GroupCreateSucceeded,
                P2pEvent::ConnectionChanged { group_formed: true, is_owner: true },
            ],
            vec![None, Some(ScriptedPlatform::group_info_fixture())],
        ));
        let mut controller = WifiDirectController::with_timings(platform, fast_timings());

        let info = controller.create_group(FrequencyBand::Band5GHz).await.unwrap();
        assert_eq!(info.owner_address, "192.168.49.1");
    }

    #[tokio::test]
    async fn fails_after_retries_when_group_never_forms() {
        // Create is acknowledged but connectivity never reports a group.
        let platform = Arc::new(ScriptedPlatform::new(
            vec![P2pEvent::GroupCreateSucceeded],
            vec![],
        ));
        let mut controller = WifiDirectController::with_timings(platform, fast_timings());

        let err = controller.create_group(FrequencyBand::Band2_4GHz).await.unwrap_err();
        assert!(matches!(err, NetError::GroupCreation(_)));
        assert_eq!(*controller.phase(), GroupPhase::Idle); // torn down
    }

    #[tokio::test]
    async fn unsupported_platform_is_mode_fatal() {
        let mut platform = ScriptedPlatform::new(vec![], vec![]);
        platform.supported = false;
        let mut controller =
            WifiDirectController::with_timings(Arc::new(platform), fast_timings());

        let err = controller.create_group(FrequencyBand::Band2_4GHz).await.unwrap_err();
        assert!(matches!(err, NetError::P2pUnsupported));
    }

    #[tokio::test]
    async fn explicit_create_failure_is_retried_then_surfaced() {
        let platform = Arc::new(ScriptedPlatform::new(
            vec![P2pEvent::GroupCreateFailed { reason: "busy".into() }],
            vec![],
        ));
        let mut controller = WifiDirectController::with_timings(platform, fast_timings());

        let err = controller.create_group(FrequencyBand::Band2_4GHz).await.unwrap_err();
        match err {
            NetError::GroupCreation(reason) => assert!(reason.contains("busy")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
