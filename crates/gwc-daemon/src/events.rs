use std::io::Write;
use std::process::Stdio;

use gwc_protocol::ProtocolEvent;
use serde::Serialize;
use tokio::process::Command;
use tracing::{info, warn};

/// What the daemon does with runtime events besides logging them.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    /// Program launched as `<open_cmd> <KIND> <chat_id> <title>` for new chats.
    pub open_cmd: Option<String>,
    /// Mirror every event as one JSON line on stdout.
    pub jsonl: bool,
}

impl EventSink {
    pub fn handle(&self, event: &ProtocolEvent) {
        match event {
            ProtocolEvent::OpenChat {
                kind,
                chat_id,
                title,
            } => {
                info!("chat '{title}' is ready: gwc attach {kind} {chat_id}");
                if let Some(program) = &self.open_cmd {
                    open_window(program, &kind.to_string(), chat_id, title);
                }
            }
            ProtocolEvent::MemberJoined { gid, nick, .. } => {
                info!("{nick} joined group {}", gid.short());
            }
            ProtocolEvent::MemberLeft { gid, nick, .. } => {
                info!("{nick} left group {}", gid.short());
            }
            ProtocolEvent::PeerExpired { uid } => info!("forgot silent peer {uid}"),
        }
        if self.jsonl {
            emit(&EventRecord::from(event));
        }
    }
}

fn open_window(program: &str, kind: &str, chat_id: &str, title: &str) {
    let spawned = Command::new(program)
        .arg(kind)
        .arg(chat_id)
        .arg(title)
        .stdin(Stdio::null())
        .spawn();
    match spawned {
        Ok(mut child) => {
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }
        Err(e) => warn!("open command '{program}' failed: {e}"),
    }
}

/// Emit a JSONL event to stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

/// RFC 3339 timestamp for JSONL events.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ── Lifecycle ───────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub uid: String,
    pub nick: String,
    pub ip: String,
    pub socket: String,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct EventStopped {
    pub event: &'static str,
    pub timestamp: String,
}

impl EventStopped {
    pub fn new() -> Self {
        Self {
            event: "stopped",
            timestamp: now_iso(),
        }
    }
}

// ── Runtime events ──────────────────────────────────────────────

#[derive(Debug, Serialize, PartialEq)]
pub struct EventRecord {
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
    pub timestamp: String,
}

impl EventRecord {
    fn named(event: &'static str) -> Self {
        Self {
            event,
            kind: None,
            chat_id: None,
            title: None,
            uid: None,
            nick: None,
            timestamp: now_iso(),
        }
    }
}

impl From<&ProtocolEvent> for EventRecord {
    fn from(event: &ProtocolEvent) -> Self {
        match event {
            ProtocolEvent::OpenChat {
                kind,
                chat_id,
                title,
            } => Self {
                kind: Some(kind.to_string()),
                chat_id: Some(chat_id.clone()),
                title: Some(title.clone()),
                ..Self::named("open_chat")
            },
            ProtocolEvent::MemberJoined { gid, uid, nick } => Self {
                chat_id: Some(gid.to_string()),
                uid: Some(uid.clone()),
                nick: Some(nick.clone()),
                ..Self::named("member_joined")
            },
            ProtocolEvent::MemberLeft { gid, uid, nick } => Self {
                chat_id: Some(gid.to_string()),
                uid: Some(uid.clone()),
                nick: Some(nick.clone()),
                ..Self::named("member_left")
            },
            ProtocolEvent::PeerExpired { uid } => Self {
                uid: Some(uid.clone()),
                ..Self::named("peer_expired")
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwc_protocol::{ChatKind, GroupId};

    #[test]
    fn open_chat_record_keeps_chat_fields() {
        let record = EventRecord::from(&ProtocolEvent::OpenChat {
            kind: ChatKind::Group,
            chat_id: "abc".into(),
            title: "Sala".into(),
        });
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "open_chat");
        assert_eq!(json["kind"], "GROUP");
        assert_eq!(json["title"], "Sala");
        assert!(json.get("uid").is_none());
    }

    #[test]
    fn member_records_carry_the_group() {
        let record = EventRecord::from(&ProtocolEvent::MemberLeft {
            gid: GroupId::from("ff00"),
            uid: "u2".into(),
            nick: "bob".into(),
        });
        assert_eq!(record.event, "member_left");
        assert_eq!(record.chat_id.as_deref(), Some("ff00"));
        assert_eq!(record.nick.as_deref(), Some("bob"));
    }
}
