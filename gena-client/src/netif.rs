//! Local address selection for callback URLs.

use std::net::{IpAddr, SocketAddr, UdpSocket};

/// Picks the local address on the interface that reaches a destination.
pub trait InterfaceResolver: Send + Sync {
    /// Returns the local address packets to `dest` would be sent from, or
    /// `None` when no route exists.
    fn local_addr_for(&self, dest: SocketAddr) -> Option<IpAddr>;
}

/// Default resolver using a connected UDP socket.
///
/// Connecting a datagram socket performs the routing decision without
/// sending any data; the socket's local address is the one the kernel
/// would use for the destination.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpProbeResolver;

impl InterfaceResolver for UdpProbeResolver {
    fn local_addr_for(&self, dest: SocketAddr) -> Option<IpAddr> {
        let bind_addr = if dest.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind_addr).ok()?;
        socket.connect(dest).ok()?;
        Some(socket.local_addr().ok()?.ip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_destination_yields_loopback_source() {
        let resolver = UdpProbeResolver;
        let local = resolver
            .local_addr_for("127.0.0.1:1400".parse().unwrap())
            .expect("loopback is always routable");
        assert!(local.is_loopback());
    }
}
