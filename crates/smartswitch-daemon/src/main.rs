//! Standalone receiver daemon.
//!
//! Runs the local-network receiver role end to end: announces this
//! device over UDP, answers greeting probes, and accepts file
//! transfers into a save directory. Configuration comes from the
//! environment (a `.env` file is honored):
//!
//!   SMARTSWITCH_DEVICE_NAME     announced device name (default: hostname)
//!   SMARTSWITCH_PORT            transfer listener port (default: 8081)
//!   SMARTSWITCH_SAVE_DIR        where received files land (default: ./received)
//!   SMARTSWITCH_DISCOVERY_PORT  UDP announce port (default: 8888)

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::info;

use smartswitch_net::LocalNetworkController;
use smartswitch_transfer::TransferServer;
use smartswitch_types::ReceiveState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smartswitch_daemon=info,smartswitch_net=info,smartswitch_transfer=info".into()),
        )
        .init();

    // Config
    let device_name = std::env::var("SMARTSWITCH_DEVICE_NAME")
        .ok()
        .or_else(hostname)
        .unwrap_or_else(|| "smartswitch-receiver".into());
    let transfer_port: u16 = std::env::var("SMARTSWITCH_PORT")
        .unwrap_or_else(|_| "8081".into())
        .parse()?;
    let save_dir: PathBuf = std::env::var("SMARTSWITCH_SAVE_DIR")
        .unwrap_or_else(|_| "./received".into())
        .into();
    let discovery_port: u16 = std::env::var("SMARTSWITCH_DISCOVERY_PORT")
        .unwrap_or_else(|_| smartswitch_net::DISCOVERY_PORT.to_string())
        .parse()?;

    // Greeting listener + UDP announcer. The announced endpoint is
    // whatever actually bound, never a guess.
    let mut local = LocalNetworkController::with_discovery_port(discovery_port);
    let endpoint = local.start_as_receiver(&device_name).await?;
    info!(
        device = %device_name,
        ip = %endpoint.ip_address,
        port = endpoint.port,
        "announcing on the local network"
    );

    // File listener.
    let (events, mut receive_events) = mpsc::channel::<ReceiveState>(256);
    let mut server = TransferServer::new(&save_dir);
    let bound = server.start_listener(transfer_port, events).await?;
    info!(port = bound, dir = %save_dir.display(), "ready to receive files");

    let event_log = tokio::spawn(async move {
        while let Some(state) = receive_events.recv().await {
            match state {
                ReceiveState::Receiving => info!("incoming transfer"),
                ReceiveState::Progress { percent, bytes_received } => {
                    info!(percent, bytes = bytes_received, "receiving");
                }
                ReceiveState::Success { saved_path } => info!(path = %saved_path, "file saved"),
                ReceiveState::Failed { error } => tracing::warn!("transfer failed: {error}"),
                ReceiveState::Stopped => info!("transfer stopped"),
                _ => {}
            }
        }
    });

    shutdown_signal().await;

    server.cleanup().await;
    local.stop().await;
    event_log.abort();
    info!("receiver stopped");
    Ok(())
}

fn hostname() -> Option<String> {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
