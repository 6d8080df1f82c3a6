//! UDP device announcement and discovery.
//!
//! The broadcaster sends one announce frame (see
//! `smartswitch_types::descriptor`) to the subnet broadcast address
//! every 5 seconds while the host endpoint is active. The discoverer
//! binds the discovery port (falling back through the next five ports
//! if occupied) and accumulates unique descriptors for a bounded
//! window, reporting each new device as it appears and the full list
//! once the window closes. Malformed datagrams are dropped without
//! aborting the loop.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use smartswitch_types::DeviceDescriptor;

use crate::error::NetError;
use crate::iface;

/// Fixed discovery port announce frames are sent to.
pub const DISCOVERY_PORT: u16 = 8888;

/// How many ports past `DISCOVERY_PORT` the discoverer will try.
pub const DISCOVERY_PORT_FALLBACKS: u16 = 5;

/// Interval between announce frames.
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5);

/// Default length of a discovery window.
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(45);

/// Per-receive timeout inside the discovery loop. Timeouts mean "keep
/// waiting"; they only exist so the loop can observe its deadline.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Largest announce frame we will parse.
const MAX_FRAME: usize = 512;

/// Events published by a discovery window.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A device not seen before in this window.
    Found(DeviceDescriptor),
    /// The window elapsed; carries every unique device seen.
    WindowClosed(Vec<DeviceDescriptor>),
}

/// Periodic announcer for a live host endpoint.
///
/// Runs on a background task from `start` until `stop`; the socket is
/// closed when the task ends.
pub struct DeviceBroadcaster {
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl DeviceBroadcaster {
    /// Start announcing `descriptor` to `discovery_port` every
    /// [`ANNOUNCE_INTERVAL`].
    pub async fn start(
        descriptor: DeviceDescriptor,
        discovery_port: u16,
    ) -> Result<Self, NetError> {
        let local_ip: Ipv4Addr = descriptor
            .ip_address
            .parse()
            .map_err(|_| NetError::NoLocalAddress)?;
        let broadcast_addr =
            SocketAddr::from((iface::subnet_broadcast(local_ip), discovery_port));

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;

        let shutdown = Arc::new(Notify::new());
        let frame = descriptor.to_frame();
        info!(device = %descriptor.name, to = %broadcast_addr, "announce loop started");

        let shutdown_rx = shutdown.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ANNOUNCE_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown_rx.notified() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = socket.send_to(frame.as_bytes(), broadcast_addr).await {
                            // Transient (e.g. interface flap); keep announcing.
                            warn!("announce send failed: {}", e);
                        }
                    }
                }
            }
            debug!("announce loop stopped");
        });

        Ok(Self { shutdown, task: Some(task) })
    }

    /// Stop the announce loop and wait for it to finish.
    pub async fn stop(mut self) {
        self.shutdown.notify_waiters();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for DeviceBroadcaster {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Bind the discovery socket, falling back through
/// `DISCOVERY_PORT+1..=+DISCOVERY_PORT_FALLBACKS` when occupied.
async fn bind_discovery_socket(base_port: u16) -> Result<UdpSocket, NetError> {
    let mut last_err = None;
    for offset in 0..=DISCOVERY_PORT_FALLBACKS {
        // The probe stops at the port ceiling for bases near u16::MAX.
        let Some(port) = base_port.checked_add(offset) else {
            break;
        };
        match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(socket) => {
                if offset > 0 {
                    info!(port, "discovery port occupied, bound fallback");
                }
                return Ok(socket);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.map(NetError::Io).unwrap_or(NetError::NoLocalAddress))
}

/// Run one discovery window on a background task.
///
/// Every new unique device (deduplicated by IP, first seen wins) is
/// reported as [`DiscoveryEvent::Found`]; when the window closes the
/// accumulated list goes out as [`DiscoveryEvent::WindowClosed`] and
/// the task ends.
pub fn discover(
    base_port: u16,
    window: Duration,
    events: mpsc::Sender<DiscoveryEvent>,
) -> JoinHandle<Result<(), NetError>> {
    tokio::spawn(async move {
        let socket = bind_discovery_socket(base_port).await?;
        debug!(addr = ?socket.local_addr().ok(), "discovery window open");

        let deadline = Instant::now() + window;
        let mut seen: HashSet<String> = HashSet::new();
        let mut found: Vec<DeviceDescriptor> = Vec::new();
        let mut buf = [0u8; MAX_FRAME];

        while Instant::now() < deadline {
            let (len, from) = match timeout(RECV_TIMEOUT, socket.recv_from(&mut buf)).await {
                Ok(Ok(recv)) => recv,
                Ok(Err(e)) => {
                    warn!("discovery recv error: {}", e);
                    continue;
                }
                // Receive timeout: keep waiting out the window.
                Err(_) => continue,
            };

            let text = match std::str::from_utf8(&buf[..len]) {
                Ok(t) => t,
                Err(_) => {
                    debug!(%from, "dropping non-utf8 datagram");
                    continue;
                }
            };
            let descriptor = match DeviceDescriptor::from_frame(text) {
                Ok(d) => d,
                Err(e) => {
                    debug!(%from, "dropping malformed frame: {}", e);
                    continue;
                }
            };

            if seen.insert(descriptor.ip_address.clone()) {
                info!(device = %descriptor.name, ip = %descriptor.ip_address, "device discovered");
                found.push(descriptor.clone());
                if events.send(DiscoveryEvent::Found(descriptor)).await.is_err() {
                    // Listener went away; no point finishing the window.
                    return Ok(());
                }
            }
        }

        let _ = events.send(DiscoveryEvent::WindowClosed(found)).await;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovery_bind_stops_at_the_port_ceiling() {
        // A base at the top of the range leaves no room for fallbacks;
        // the probe must end cleanly instead of wrapping.
        match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, u16::MAX)).await {
            Ok(_hold) => {
                // The only candidate port is held, so the bind fails.
                assert!(bind_discovery_socket(u16::MAX).await.is_err());
            }
            Err(_) => {
                // Someone else owns the top port; the probe still has
                // nowhere to fall back to and must not panic.
                let _ = bind_discovery_socket(u16::MAX).await;
            }
        }
    }

    #[tokio::test]
    async fn dedups_by_ip_and_reports_final_list() {
        // Use a scratch base port away from the real discovery port.
        let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let base_port = probe.local_addr().unwrap().port();
        drop(probe);

        let (tx, mut rx) = mpsc::channel(16);
        let handle = discover(base_port, Duration::from_millis(1500), tx);

        // Give the discoverer a moment to bind.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let target = (Ipv4Addr::LOCALHOST, base_port);
        // Same IP, different timestamps: must collapse to one entry.
        let a = "SMARTSWITCH_DEVICE|phone|192.168.1.9|8080|111";
        let b = "SMARTSWITCH_DEVICE|phone|192.168.1.9|8080|222";
        let junk = "garbage|not|a|frame";
        let other = "SMARTSWITCH_DEVICE|tablet|192.168.1.10|8080|333";
        for frame in [a, junk, b, other] {
            sender.send_to(frame.as_bytes(), target).await.unwrap();
        }

        let mut found = Vec::new();
        let mut final_list = None;
        while let Some(event) = rx.recv().await {
            match event {
                DiscoveryEvent::Found(d) => found.push(d),
                DiscoveryEvent::WindowClosed(list) => {
                    final_list = Some(list);
                    break;
                }
            }
        }

        assert_eq!(found.len(), 2);
        let list = final_list.expect("window should close with a list");
        assert_eq!(list.len(), 2);
        assert_eq!(
            list.iter().filter(|d| d.ip_address == "192.168.1.9").count(),
            1
        );
        // First-seen wins for duplicate IPs.
        let phone = list.iter().find(|d| d.ip_address == "192.168.1.9").unwrap();
        assert_eq!(phone.timestamp, 111);

        handle.await.unwrap().unwrap();
    }
}
