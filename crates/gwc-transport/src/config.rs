use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use crate::{PortRole, DISCOVERY_PORT, GROUP_PORT, PRIVATE_PORT};

/// Configuration for a [`LanNode`](crate::LanNode).
///
/// All fields have LAN-friendly defaults. Use the builder pattern:
///
/// ```rust
/// use gwc_transport::TransportConfig;
///
/// let config = TransportConfig::new()
///     .max_message_size(2 * 1024 * 1024)
///     .recv_buffer(512);
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Interface address the three endpoints bind to.
    pub(crate) bind_ip: Ipv4Addr,
    /// Destination for discovery broadcasts.
    pub(crate) broadcast_ip: Ipv4Addr,
    /// UDP discovery port (local bind and broadcast destination).
    pub(crate) discovery_port: u16,
    /// TCP port for private 1:1 sessions.
    pub(crate) private_port: u16,
    /// TCP port for group-mesh links.
    pub(crate) group_port: u16,
    /// Outbound TCP connect timeout.
    pub(crate) connect_timeout: Duration,
    /// Maximum accepted frame size in bytes (header included).
    pub(crate) max_message_size: usize,
    /// Channel buffer size for inbound events.
    pub(crate) recv_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    /// Create a new config with defaults.
    ///
    /// If `GWC_BROADCAST_IP` is set in the environment it replaces the
    /// limited broadcast address. [`.broadcast_ip()`](Self::broadcast_ip)
    /// still wins over it.
    pub fn new() -> Self {
        let broadcast_ip = std::env::var("GWC_BROADCAST_IP")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(Ipv4Addr::BROADCAST);

        Self {
            bind_ip: Ipv4Addr::UNSPECIFIED,
            broadcast_ip,
            discovery_port: DISCOVERY_PORT,
            private_port: PRIVATE_PORT,
            group_port: GROUP_PORT,
            connect_timeout: Duration::from_secs(2),
            max_message_size: 1024 * 1024, // 1 MB
            recv_buffer: 256,
        }
    }

    /// Bind every endpoint to this interface (default: `0.0.0.0`).
    pub fn bind_ip(mut self, ip: Ipv4Addr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Send discovery broadcasts to this address (default: `255.255.255.255`).
    pub fn broadcast_ip(mut self, ip: Ipv4Addr) -> Self {
        self.broadcast_ip = ip;
        self
    }

    /// Override all three ports.
    ///
    /// Every daemon on a segment must agree on them, so this is meant for
    /// tests that run several nodes on one host (port `0` picks a free one).
    pub fn ports(mut self, discovery: u16, private: u16, group: u16) -> Self {
        self.discovery_port = discovery;
        self.private_port = private;
        self.group_port = group;
        self
    }

    /// Set the outbound connect timeout (default: 2 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set maximum frame size (default: 1 MB).
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Set the channel buffer size for inbound events (default: 256).
    pub fn recv_buffer(mut self, capacity: usize) -> Self {
        self.recv_buffer = capacity;
        self
    }

    /// Remote TCP address for `ip` on the port serving `role`.
    pub fn remote_addr(&self, ip: Ipv4Addr, role: PortRole) -> SocketAddr {
        let port = match role {
            PortRole::Private => self.private_port,
            PortRole::Group => self.group_port,
        };
        SocketAddr::V4(SocketAddrV4::new(ip, port))
    }

    pub(crate) fn broadcast_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.broadcast_ip, self.discovery_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_well_known_ports() {
        let config = TransportConfig::new().broadcast_ip(Ipv4Addr::BROADCAST);
        assert_eq!(config.discovery_port, 44495);
        assert_eq!(config.private_port, 44494);
        assert_eq!(config.group_port, 44496);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(
            config.broadcast_addr(),
            "255.255.255.255:44495".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn remote_addr_selects_port_by_role() {
        let config = TransportConfig::new();
        let ip = Ipv4Addr::new(192, 168, 1, 20);
        assert_eq!(config.remote_addr(ip, PortRole::Private).port(), 44494);
        assert_eq!(config.remote_addr(ip, PortRole::Group).port(), 44496);
    }
}
