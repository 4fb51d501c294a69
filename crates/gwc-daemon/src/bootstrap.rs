//! First-start identity and local address discovery.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use gwc_protocol::{ConfigStore, Identity, Settings};
use tracing::{info, warn};

/// Load settings, generating and persisting a uid on the very first start.
///
/// `nick` overrides the stored nick and is persisted too.
pub fn ensure_identity(config: &dyn ConfigStore, nick: Option<&str>) -> Settings {
    let mut settings = config.load_settings();
    let mut changed = false;

    if settings.user.uid.is_empty() {
        settings.user.uid = Identity::generate_uid();
        info!("generated identity {}", settings.user.uid);
        changed = true;
    }
    if let Some(nick) = nick.map(str::trim).filter(|n| !n.is_empty()) {
        if settings.user.nick != nick {
            settings.user.nick = nick.to_string();
            changed = true;
        }
    }

    if changed {
        if let Err(e) = config.save_settings(&settings) {
            warn!("could not save settings, identity is in memory only: {e}");
        }
    }
    settings
}

/// The address peers should use to reach us.
///
/// An explicit bind address wins. Otherwise a UDP socket is "connected"
/// towards a private-range address (no packet leaves) and the kernel's
/// choice of source interface is read back.
pub fn detect_local_ip(bind_ip: Ipv4Addr) -> Ipv4Addr {
    if !bind_ip.is_unspecified() {
        return bind_ip;
    }
    let routed = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).and_then(|socket| {
        socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
        socket.local_addr()
    });
    match routed {
        Ok(SocketAddr::V4(addr)) if !addr.ip().is_unspecified() => *addr.ip(),
        Ok(other) => {
            warn!("unexpected source address {other}, falling back to loopback");
            Ipv4Addr::LOCALHOST
        }
        Err(e) => {
            warn!("no route to a LAN, falling back to loopback: {e}");
            Ipv4Addr::LOCALHOST
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwc_protocol::MemoryConfigStore;

    #[test]
    fn uid_is_generated_once() {
        let config = MemoryConfigStore::new();
        let first = ensure_identity(&config, None);
        assert!(!first.user.uid.is_empty());

        let second = ensure_identity(&config, None);
        assert_eq!(first.user.uid, second.user.uid);
    }

    #[test]
    fn nick_flag_is_persisted() {
        let config = MemoryConfigStore::new();
        ensure_identity(&config, Some("  omar "));
        assert_eq!(config.load_settings().user.nick, "omar");

        // blank overrides are ignored
        ensure_identity(&config, Some("   "));
        assert_eq!(config.load_settings().user.nick, "omar");
    }

    #[test]
    fn explicit_bind_address_wins() {
        let ip = Ipv4Addr::new(192, 168, 4, 20);
        assert_eq!(detect_local_ip(ip), ip);
    }

    #[test]
    fn detected_address_is_concrete() {
        assert!(!detect_local_ip(Ipv4Addr::UNSPECIFIED).is_unspecified());
    }
}
