//! Listening-port allocation by linear probing.

use std::io;
use std::net::{Ipv4Addr, TcpListener};

use crate::error::NetError;

/// Find a free listening port at or after `preferred`.
///
/// Probes `preferred, preferred+1, ...` by binding a transient listener
/// and releasing it immediately; the first successful bind wins. Ports
/// that fail with "address in use" count against `max_attempts`; any
/// other bind failure is surfaced as-is instead of being retried
/// forever.
pub fn find_available_port(preferred: u16, max_attempts: u32) -> Result<u16, NetError> {
    let mut port = preferred;
    for _ in 0..max_attempts {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
            Ok(listener) => {
                drop(listener);
                return Ok(port);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                port = match port.checked_add(1) {
                    Some(p) => p,
                    None => break,
                };
            }
            Err(e) => return Err(NetError::Io(e)),
        }
    }
    Err(NetError::PortsExhausted {
        preferred,
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_preferred_port_when_free() {
        // Grab an OS-assigned port, release it, and ask for it back.
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let found = find_available_port(port, 1).unwrap();
        assert_eq!(found, port);
    }

    #[test]
    fn probes_past_an_occupied_port() {
        let busy = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let busy_port = busy.local_addr().unwrap().port();

        let found = find_available_port(busy_port, 5).unwrap();
        assert_ne!(found, busy_port);
        assert!(found > busy_port);
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let a = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = a.local_addr().unwrap().port();
        // Occupy the next port too so two probes both collide. The second
        // bind can race with other tests; skip the assertion if it does.
        let Ok(_b) = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port.wrapping_add(1))) else {
            return;
        };

        match find_available_port(port, 2) {
            Err(NetError::PortsExhausted { preferred, attempts }) => {
                assert_eq!(preferred, port);
                assert_eq!(attempts, 2);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }
}
