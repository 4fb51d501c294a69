//! GhostWhisperChat transport layer.
//!
//! Owns the three LAN endpoints every daemon binds: a UDP socket for
//! discovery broadcast/unicast, a TCP listener for private 1:1 sessions and
//! a TCP listener for group-mesh links. Payloads are opaque length-prefixed
//! frames; the protocol crate decides what is inside.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use gwc_transport::{frame, LanNode, PortRole, TransportConfig, TransportEvent};
//!
//! # async fn example() -> Result<(), gwc_transport::TransportError> {
//! let mut node = LanNode::bind(TransportConfig::new()).await?;
//!
//! node.broadcast_udp(&frame(b"{\"hello\":true}")).await?;
//! let peer = node.config().remote_addr("192.168.1.20".parse().unwrap(), PortRole::Private);
//! node.send_tcp(peer, PortRole::Private, &frame(b"hi")).await?;
//!
//! match node.recv().await? {
//!     TransportEvent::Datagram { from, data } => println!("udp from {from}: {} bytes", data.len()),
//!     TransportEvent::Frame { conn, from, .. } => println!("tcp frame on {conn} from {from}"),
//!     TransportEvent::Closed { conn, .. } => println!("{conn} closed"),
//! }
//! node.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod error;
mod node;
mod protocol;

use std::fmt;
use std::net::SocketAddr;

pub use config::TransportConfig;
pub use error::{FrameError, TransportError};
pub use node::{LanNode, LanSender, LocalAddrs};
pub use protocol::{frame, unframe, FRAME_HEADER_LEN};

/// TCP port for private 1:1 sessions.
pub const PRIVATE_PORT: u16 = 44494;
/// UDP port for discovery broadcast and replies.
pub const DISCOVERY_PORT: u16 = 44495;
/// TCP port for group-mesh links.
pub const GROUP_PORT: u16 = 44496;

/// Which listener a TCP connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRole {
    Private,
    Group,
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRole::Private => f.write_str("private"),
            PortRole::Group => f.write_str("group"),
        }
    }
}

/// Opaque handle for one live TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl ConnectionId {
    /// Build a handle from a raw number. Only meaningful for simulated
    /// networks in tests; real handles come from [`LanNode`].
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Something the node received.
#[derive(Debug)]
pub enum TransportEvent {
    /// A discovery datagram (one frame).
    Datagram { from: SocketAddr, data: Vec<u8> },
    /// One frame read from a TCP connection.
    Frame {
        conn: ConnectionId,
        from: SocketAddr,
        role: PortRole,
        data: Vec<u8>,
    },
    /// The remote side closed the connection, or it failed.
    Closed { conn: ConnectionId, from: SocketAddr },
}
