/// Protocol runtime: the daemon's reactor.
///
/// The runtime owns a `LanNode` (transport) and all protocol state (store,
/// pending correlations, sessions, attached UIs). It exposes a channel-based
/// API so the control channel and the daemon binary never touch raw frames.
mod commands;
mod discovery;
mod effect;
mod executor;
mod r#loop;
mod mesh;
mod outbound;
mod private;
mod state;
mod transport;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use gwc_transport::LanNode;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::ProtocolError;
use crate::prompt::{AutoPrompter, LogNotifier, Notifier, Prompter};
use crate::transcript::Transcript;
use crate::types::GroupId;

pub use commands::{split_command_line, SplitError};
pub(crate) use commands::is_command;
pub use effect::{RuntimeEffect, SendFailure};
pub use state::{PromptContinuation, RuntimeState};
pub use transport::Transport;

/// Marker that opens a UI session on the control channel.
pub const REGISTER_UI: &str = "__REGISTER_UI__";
/// Legacy prefix some clients put before chat text.
pub const MSG_PREFIX: &str = "__MSG__ ";
/// Line asking the attached client to close its window.
pub const CLOSE_UI: &str = "__CLOSE_UI__";
/// Prefix of message lines that mention the local nick.
pub const MENTION_PREFIX: &str = "__MENTION__ ";

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for the protocol runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Interval between `DISCOVER{PING}` broadcasts.
    pub heartbeat_interval: Duration,
    /// Interval for the peer/pending expiry sweep.
    pub sweep_interval: Duration,
    /// Peers silent this long are deleted.
    pub peer_timeout: Duration,
    /// Peers silent this long are shown OFFLINE.
    pub offline_after: Duration,
    /// Lifetime of a pending correlation.
    pub pending_ttl: Duration,
    /// How long a confirmation prompt may stay open.
    pub prompt_timeout: Duration,
    /// Minimum gap between two mention notifications for one chat.
    pub mention_cooldown: Duration,
    /// On shutdown, how long queued TCP sends (LEAVE, BYE) may still take.
    pub shutdown_grace: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(30),
            peer_timeout: Duration::from_secs(24 * 60 * 60),
            offline_after: Duration::from_secs(60),
            pending_ttl: Duration::from_secs(30),
            prompt_timeout: Duration::from_secs(20),
            mention_cooldown: Duration::from_secs(40),
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

/// External collaborators the executor calls out to.
pub struct Collaborators {
    pub prompter: Arc<dyn Prompter>,
    pub notifier: Arc<dyn Notifier>,
    pub transcript: Option<Transcript>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            prompter: Arc::new(AutoPrompter::default()),
            notifier: Arc::new(LogNotifier),
            transcript: None,
        }
    }
}

// ── Identifiers ───────────────────────────────────────────────────────

/// Kind of conversation a UI session shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatKind {
    Private,
    Group,
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatKind::Private => f.write_str("PRIVATE"),
            ChatKind::Group => f.write_str("GROUP"),
        }
    }
}

impl FromStr for ChatKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PRIVATE" | "PRIVADO" => Ok(ChatKind::Private),
            "GROUP" | "GRUPO" => Ok(ChatKind::Group),
            other => Err(ProtocolError::Control(format!("unknown chat type `{other}`"))),
        }
    }
}

/// One attached UI connection. A re-attach of the same chat gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UiSessionId(pub u64);

impl fmt::Display for UiSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ui#{}", self.0)
    }
}

// ── Commands (control channel → runtime) ──────────────────────────────

/// Commands the control channel sends to the runtime event loop.
pub enum RuntimeCommand {
    /// Run one transient command line; exactly one reply.
    Execute {
        line: String,
        reply: oneshot::Sender<String>,
    },
    /// Promote a control connection to a UI session.
    AttachUi {
        kind: ChatKind,
        chat_id: String,
        lines: mpsc::Sender<String>,
        reply: oneshot::Sender<UiSessionId>,
    },
    /// A line typed into an attached UI.
    UiInput { session: UiSessionId, line: String },
    /// The UI connection went away.
    UiDetached { session: UiSessionId },
    /// Graceful shutdown.
    Shutdown,
}

// ── Events (runtime → app) ────────────────────────────────────────────

/// Events emitted by the runtime to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// A chat became active and no UI is attached for it.
    OpenChat {
        kind: ChatKind,
        chat_id: String,
        title: String,
    },
    /// Someone completed a join into one of our groups.
    MemberJoined {
        gid: GroupId,
        uid: String,
        nick: String,
    },
    /// A member left one of our groups.
    MemberLeft {
        gid: GroupId,
        uid: String,
        nick: String,
    },
    /// A peer stayed silent past the timeout and was forgotten.
    PeerExpired { uid: String },
}

// ── RuntimeHandle (app-facing API) ───────────────────────────────────

/// Handle to communicate with a running ProtocolRuntime.
///
/// Cheap to clone. All methods are channel sends.
#[derive(Clone)]
pub struct RuntimeHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
}

impl RuntimeHandle {
    /// Run a transient command and wait for its reply.
    pub async fn execute(&self, line: impl Into<String>) -> Result<String, ProtocolError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(RuntimeCommand::Execute {
                line: line.into(),
                reply: tx,
            })
            .await
            .map_err(|_| ProtocolError::RuntimeClosed)?;
        rx.await.map_err(|_| ProtocolError::RuntimeClosed)
    }

    /// Attach a UI session; lines for it arrive on `lines`.
    pub async fn attach_ui(
        &self,
        kind: ChatKind,
        chat_id: impl Into<String>,
        lines: mpsc::Sender<String>,
    ) -> Result<UiSessionId, ProtocolError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(RuntimeCommand::AttachUi {
                kind,
                chat_id: chat_id.into(),
                lines,
                reply: tx,
            })
            .await
            .map_err(|_| ProtocolError::RuntimeClosed)?;
        rx.await.map_err(|_| ProtocolError::RuntimeClosed)
    }

    /// Forward a line typed into an attached UI.
    pub async fn ui_input(
        &self,
        session: UiSessionId,
        line: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        self.cmd_tx
            .send(RuntimeCommand::UiInput {
                session,
                line: line.into(),
            })
            .await
            .map_err(|_| ProtocolError::RuntimeClosed)
    }

    /// Report that a UI connection closed.
    pub async fn ui_detached(&self, session: UiSessionId) {
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::UiDetached { session })
            .await;
    }

    /// Graceful shutdown.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RuntimeCommand::Shutdown).await;
    }

    /// True once the event loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

// ── RuntimeChannels ──────────────────────────────────────────────────

/// Channels returned to the application when the runtime starts.
pub struct RuntimeChannels {
    /// Handle to send commands to the runtime.
    pub handle: RuntimeHandle,
    /// Receive protocol-level events.
    pub events: mpsc::Receiver<ProtocolEvent>,
    /// The event loop task; finishes after shutdown.
    pub task: JoinHandle<()>,
}

// ── ProtocolRuntime ──────────────────────────────────────────────────

/// The protocol runtime. Spawn it and talk to it through channels.
pub struct ProtocolRuntime;

impl ProtocolRuntime {
    /// Start the event loop as a tokio task.
    ///
    /// Takes ownership of the bound `LanNode` and the initial state.
    pub fn spawn(
        node: LanNode,
        state: RuntimeState,
        collaborators: Collaborators,
    ) -> RuntimeChannels {
        // Command channel (app → runtime)
        let (cmd_tx, cmd_rx) = mpsc::channel::<RuntimeCommand>(64);
        // Event channel (runtime → app)
        let (event_tx, event_rx) = mpsc::channel::<ProtocolEvent>(64);

        let task = tokio::spawn(r#loop::runtime_loop(
            node,
            state,
            collaborators,
            cmd_rx,
            event_tx,
        ));

        RuntimeChannels {
            handle: RuntimeHandle { cmd_tx },
            events: event_rx,
            task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_kind_parses_both_spellings() {
        assert_eq!("GROUP".parse::<ChatKind>().unwrap(), ChatKind::Group);
        assert_eq!("privado".parse::<ChatKind>().unwrap(), ChatKind::Private);
        assert!("CHANNEL".parse::<ChatKind>().is_err());
        assert_eq!(ChatKind::Private.to_string(), "PRIVATE");
    }

    #[test]
    fn default_tunables() {
        let config = RuntimeConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.peer_timeout, Duration::from_secs(86_400));
        assert_eq!(config.pending_ttl, Duration::from_secs(30));
        assert_eq!(config.prompt_timeout, Duration::from_secs(20));
        assert!(config.shutdown_grace > Duration::from_secs(2));
    }
}
