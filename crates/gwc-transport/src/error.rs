use std::net::SocketAddr;

use crate::{ConnectionId, PortRole};

/// Errors returned by the GhostWhisperChat transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {what} on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("peer unreachable at {addr} ({role}): {source}")]
    Unreachable {
        addr: SocketAddr,
        role: PortRole,
        #[source]
        source: anyhow::Error,
    },

    #[error("send to {addr} failed: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: anyhow::Error,
    },

    #[error("receive failed: {0}")]
    Receive(#[source] anyhow::Error),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("transport is shut down")]
    Shutdown,

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Framing violations detected while splitting a buffer into a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame shorter than its {0}-byte header")]
    Truncated(usize),

    #[error("length prefix says {declared} bytes but {actual} follow")]
    LengthMismatch { declared: usize, actual: usize },
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Receive(e.into())
    }
}
