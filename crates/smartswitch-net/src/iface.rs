//! Best-guess local IPv4 address and subnet broadcast derivation.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use tracing::warn;

use crate::error::NetError;

/// The local IPv4 address other devices on this network can reach.
///
/// Uses the UDP-connect trick: connecting a datagram socket to a
/// well-known address selects the default-route interface without
/// sending a single packet. Loopback results are rejected — a device
/// with no real interface must surface that, never a fabricated
/// address.
pub fn best_local_ipv4() -> Result<Ipv4Addr, NetError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect("8.8.8.8:80")?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => {
            if !is_private(ip) {
                // Subnet broadcast discovery assumes a home/hotspot
                // network; a public address still works for direct
                // connections, so it is not an error.
                warn!(%ip, "local address is outside the private ranges");
            }
            Ok(ip)
        }
        _ => Err(NetError::NoLocalAddress),
    }
}

/// True for the RFC 1918 ranges we expect on a home or hotspot subnet.
pub fn is_private(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    match o {
        [192, 168, ..] => true,
        [10, ..] => true,
        [172, b, ..] => (16..=31).contains(&b),
        _ => false,
    }
}

/// Subnet broadcast address for announcing, assuming a /24.
///
/// Consumer Wi-Fi and phone-hotspot networks are /24 in practice; a
/// wrong guess only costs discovery, not correctness.
pub fn subnet_broadcast(ip: Ipv4Addr) -> Ipv4Addr {
    let o = ip.octets();
    Ipv4Addr::new(o[0], o[1], o[2], 255)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges() {
        assert!(is_private(Ipv4Addr::new(192, 168, 1, 7)));
        assert!(is_private(Ipv4Addr::new(10, 0, 0, 2)));
        assert!(is_private(Ipv4Addr::new(172, 16, 0, 1)));
        assert!(is_private(Ipv4Addr::new(172, 31, 255, 1)));
        assert!(!is_private(Ipv4Addr::new(172, 32, 0, 1)));
        assert!(!is_private(Ipv4Addr::new(8, 8, 8, 8)));
        assert!(!is_private(Ipv4Addr::new(127, 0, 0, 1)));
    }

    #[test]
    fn broadcast_is_last_host_of_the_slash_24() {
        assert_eq!(
            subnet_broadcast(Ipv4Addr::new(192, 168, 1, 7)),
            Ipv4Addr::new(192, 168, 1, 255)
        );
        assert_eq!(
            subnet_broadcast(Ipv4Addr::new(10, 20, 30, 40)),
            Ipv4Addr::new(10, 20, 30, 255)
        );
    }
}
