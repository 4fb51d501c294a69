use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use gwc_transport::{DISCOVERY_PORT, GROUP_PORT, PRIVATE_PORT};

/// Wire protocol version. Envelopes carrying any other `ver` are rejected.
pub const PROTOCOL_VERSION: u32 = 2;

/// Daemon version reported by `--info`.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// `destino` value for broadcasts.
pub const DEST_ALL: &str = "ALL";

/// Envelope kind, carried on the wire as the `tipo` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Kind {
    // Discovery (UDP)
    Search,
    Found,
    Discover,
    WhoName,
    Iam,
    // Group mesh (TCP group port)
    JoinReq,
    Welcome,
    SyncReq,
    Sync,
    Announce,
    Msg,
    Leave,
    // Private sessions (TCP private port)
    Invite,
    ChatReq,
    ChatAck,
    ChatNo,
    ChatBye,
}

impl Kind {
    pub const ALL: [Kind; 17] = [
        Kind::Search,
        Kind::Found,
        Kind::Discover,
        Kind::WhoName,
        Kind::Iam,
        Kind::JoinReq,
        Kind::Welcome,
        Kind::SyncReq,
        Kind::Sync,
        Kind::Announce,
        Kind::Msg,
        Kind::Leave,
        Kind::Invite,
        Kind::ChatReq,
        Kind::ChatAck,
        Kind::ChatNo,
        Kind::ChatBye,
    ];

    /// The `tipo` string on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Search => "SEARCH",
            Kind::Found => "FOUND",
            Kind::Discover => "DISCOVER",
            Kind::WhoName => "WHO_NAME",
            Kind::Iam => "IAM",
            Kind::JoinReq => "JOIN_REQ",
            Kind::Welcome => "WELCOME",
            Kind::SyncReq => "SYNC_REQ",
            Kind::Sync => "SYNC",
            Kind::Announce => "ANNOUNCE",
            Kind::Msg => "MSG",
            Kind::Leave => "LEAVE",
            Kind::Invite => "INVITE",
            Kind::ChatReq => "CHAT_REQ",
            Kind::ChatAck => "CHAT_ACK",
            Kind::ChatNo => "CHAT_NO",
            Kind::ChatBye => "CHAT_BYE",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL.iter().copied().find(|k| k.as_str() == s).ok_or(())
    }
}

/// Liveness of a known peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PeerStatus {
    Online,
    Offline,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerStatus::Online => f.write_str("ONLINE"),
            PeerStatus::Offline => f.write_str("OFFLINE"),
        }
    }
}

/// Group identifier: hex SHA-256 of the normalized group name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex chars, for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for GroupId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Current Unix time in seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names_roundtrip() {
        for kind in Kind::ALL {
            let json = serde_json::to_string(&kind).expect("serialize");
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let decoded: Kind = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(kind, decoded);
            assert_eq!(kind.as_str().parse::<Kind>(), Ok(kind));
        }
    }

    #[test]
    fn test_kind_unknown_rejected() {
        assert!("FILE_OFFER".parse::<Kind>().is_err());
        assert!("msg".parse::<Kind>().is_err());
    }

    #[test]
    fn test_group_id_transparent() {
        let gid = GroupId::from("abcdef0123456789");
        assert_eq!(serde_json::to_string(&gid).unwrap(), "\"abcdef0123456789\"");
        assert_eq!(gid.short(), "abcdef01");
    }
}
