//! Integration tests for the connection orchestrator: mode selection,
//! automatic fallback, pinned-mode failure, and supersession.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use smartswitch_net::{
    ConnectionOrchestrator, GroupTimings, NetError, P2pEvent, WifiP2pPlatform,
};
use smartswitch_types::{BandCapabilities, ConnectionState, FrequencyBand, TransportMode};

/// A platform whose group creation always fails fast.
struct BrokenPlatform;

#[async_trait]
impl WifiP2pPlatform for BrokenPlatform {
    async fn acquire(&self, _events: mpsc::Sender<P2pEvent>) -> Result<(), NetError> {
        Ok(())
    }

    async fn release(&self) {}

    async fn create_group(&self, _band: FrequencyBand) -> Result<(), NetError> {
        Err(NetError::GroupCreation("radio unavailable".into()))
    }

    async fn remove_group(&self) -> Result<(), NetError> {
        Ok(())
    }

    async fn group_info(&self) -> Result<Option<smartswitch_net::GroupInfo>, NetError> {
        Ok(None)
    }

    fn band_capabilities(&self) -> BandCapabilities {
        BandCapabilities::default()
    }
}

/// A platform that reports no P2P capability at all.
struct NoP2pPlatform;

#[async_trait]
impl WifiP2pPlatform for NoP2pPlatform {
    async fn acquire(&self, _events: mpsc::Sender<P2pEvent>) -> Result<(), NetError> {
        Err(NetError::P2pUnsupported)
    }

    async fn release(&self) {}

    async fn create_group(&self, _band: FrequencyBand) -> Result<(), NetError> {
        Err(NetError::P2pUnsupported)
    }

    async fn remove_group(&self) -> Result<(), NetError> {
        Ok(())
    }

    async fn group_info(&self) -> Result<Option<smartswitch_net::GroupInfo>, NetError> {
        Ok(None)
    }

    fn p2p_supported(&self) -> bool {
        false
    }

    fn band_capabilities(&self) -> BandCapabilities {
        BandCapabilities::default()
    }
}

fn fast_timings() -> GroupTimings {
    GroupTimings {
        create_signal: Duration::from_millis(100),
        group_formed: Duration::from_millis(200),
        retry_delay: Duration::from_millis(10),
        remove_settle: Duration::from_millis(10),
        info_retry_delay: Duration::from_millis(10),
        remove_wait: Duration::from_millis(50),
    }
}

/// Drain the stream until a terminal state or the deadline.
async fn wait_terminal(rx: &mut mpsc::Receiver<ConnectionState>) -> ConnectionState {
    timeout(Duration::from_secs(15), async {
        while let Some(state) = rx.recv().await {
            if state.is_terminal() {
                return state;
            }
        }
        panic!("event stream closed before a terminal state");
    })
    .await
    .expect("no terminal state within deadline")
}

#[tokio::test]
async fn automatic_mode_falls_back_to_local_network() {
    let orchestrator =
        ConnectionOrchestrator::with_timings(Arc::new(BrokenPlatform), "TestDevice", fast_timings());

    let mut rx = orchestrator
        .start(TransportMode::Automatic, FrequencyBand::Band2_4GHz)
        .await;
    let terminal = wait_terminal(&mut rx).await;

    match terminal {
        ConnectionState::Connected { ip_address, port, network_name, .. } => {
            assert!(!ip_address.is_empty());
            assert_ne!(ip_address, "127.0.0.1");
            assert!(port > 0);
            assert_eq!(network_name, "local");
        }
        other => panic!("automatic mode must not surface the p2p failure, got {other:?}"),
    }

    orchestrator.stop().await;
    assert_eq!(orchestrator.current_state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn pinned_peer_to_peer_surfaces_the_error() {
    let orchestrator =
        ConnectionOrchestrator::with_timings(Arc::new(BrokenPlatform), "TestDevice", fast_timings());

    let mut rx = orchestrator
        .start(TransportMode::PeerToPeer, FrequencyBand::Band2_4GHz)
        .await;
    let terminal = wait_terminal(&mut rx).await;

    match terminal {
        ConnectionState::Error { message } => {
            assert!(message.contains("radio unavailable"), "message: {message}");
        }
        other => panic!("pinned mode must report the failure, got {other:?}"),
    }
    orchestrator.stop().await;
}

#[tokio::test]
async fn unsupported_platform_still_connects_in_automatic_mode() {
    let orchestrator =
        ConnectionOrchestrator::with_timings(Arc::new(NoP2pPlatform), "TestDevice", fast_timings());

    let mut rx = orchestrator
        .start(TransportMode::Automatic, FrequencyBand::Band5GHz)
        .await;
    let terminal = wait_terminal(&mut rx).await;

    assert!(
        matches!(terminal, ConnectionState::Connected { .. }),
        "expected fallback connection, got {terminal:?}"
    );
    orchestrator.stop().await;
}

#[tokio::test]
async fn concurrent_starts_never_share_an_event_stream() {
    let orchestrator =
        ConnectionOrchestrator::with_timings(Arc::new(BrokenPlatform), "TestDevice", fast_timings());

    // Race two starts on the same instance. Whatever the interleaving,
    // a superseded attempt must never publish onto the surviving
    // attempt's stream.
    let (mut rx1, mut rx2) = tokio::join!(
        orchestrator.start(TransportMode::Automatic, FrequencyBand::Band2_4GHz),
        orchestrator.start(TransportMode::Automatic, FrequencyBand::Band2_4GHz),
    );

    let mut total_terminals = 0;
    for (label, rx) in [("first", &mut rx1), ("second", &mut rx2)] {
        let mut terminals = 0;
        // Generous wait for the first terminal, short lookout for any
        // extra one after it.
        let mut deadline = Duration::from_secs(10);
        loop {
            match timeout(deadline, rx.recv()).await {
                Ok(Some(state)) if state.is_terminal() => {
                    terminals += 1;
                    deadline = Duration::from_millis(500);
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => break,
            }
        }
        assert!(
            terminals <= 1,
            "{label} stream saw {terminals} terminal states"
        );
        total_terminals += terminals;
    }
    assert!(total_terminals >= 1, "no attempt reached a terminal state");

    orchestrator.stop().await;
    assert_eq!(orchestrator.current_state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn a_second_start_supersedes_the_first() {
    let orchestrator =
        ConnectionOrchestrator::with_timings(Arc::new(BrokenPlatform), "TestDevice", fast_timings());

    // First attempt; do not wait for it to finish.
    let _rx1 = orchestrator
        .start(TransportMode::Automatic, FrequencyBand::Band2_4GHz)
        .await;

    // Superseding attempt must still reach a terminal state cleanly.
    let mut rx2 = orchestrator
        .start(TransportMode::LocalNetwork, FrequencyBand::Band2_4GHz)
        .await;
    let terminal = wait_terminal(&mut rx2).await;
    assert!(matches!(terminal, ConnectionState::Connected { .. }));

    orchestrator.stop().await;
}
