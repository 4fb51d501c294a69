//! GhostWhisperChat protocol layer.
//!
//! Everything between the sockets and the user: the JSON envelope codec,
//! the peer/group/contact store, pending discovery correlations, private
//! sessions, the group mesh and the local control channel. Built on
//! `gwc-transport` (UDP broadcast discovery + framed TCP).
//!
//! Protocol decisions live in [`runtime::RuntimeState`] as pure functions
//! returning effects; [`runtime::ProtocolRuntime`] is the async loop that
//! performs them.

pub mod config;
pub mod control;
pub mod envelope;
pub mod error;
pub mod normalize;
pub mod pending;
pub mod prompt;
pub mod runtime;
pub mod session;
pub mod store;
pub mod transcript;
pub mod types;

pub use config::{
    default_base_dir, ConfigStore, Contact, Contacts, JsonConfigStore, MemoryConfigStore,
    Settings,
};
pub use control::{ControlServer, SOCKET_NAME};
pub use envelope::{Body, DiscoverFilter, Envelope, Found, Member, Origin};
pub use error::{DecodeError, ProtocolError};
pub use pending::{Continuation, CorrelationId, PendingTable};
pub use prompt::{
    AutoPrompter, CommandNotifier, CommandPrompter, LogNotifier, Notifier, PromptAnswer, PromptId,
    PromptOutcome, Prompter,
};
pub use runtime::{
    ChatKind, Collaborators, ProtocolEvent, ProtocolRuntime, RuntimeChannels, RuntimeConfig,
    RuntimeEffect, RuntimeHandle, RuntimeState, UiSessionId, CLOSE_UI, MENTION_PREFIX,
    REGISTER_UI,
};
pub use session::{SessionState, SessionTable};
pub use store::{Group, Identity, Peer, ScanEntry, Store};
pub use transcript::Transcript;
pub use types::{now_secs, GroupId, Kind, PeerStatus, APP_VERSION, PROTOCOL_VERSION};
