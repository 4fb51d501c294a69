use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use gwc_transport::{ConnectionId, PortRole};
use tracing::{debug, info};

use crate::config::Settings;
use crate::envelope::{Body, DiscoverFilter, Envelope, Origin};
use crate::pending::PendingTable;
use crate::prompt::{PromptAnswer, PromptId};
use crate::session::SessionTable;
use crate::store::{Identity, Store};
use crate::types::{GroupId, Kind, GROUP_PORT, PRIVATE_PORT};

use super::effect::{RuntimeEffect, SendFailure};
use super::{ChatKind, ProtocolEvent, RuntimeConfig, UiSessionId, CLOSE_UI};

/// What to resume once the local user answers a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptContinuation {
    AcceptPrivate {
        peer: Origin,
    },
    AcceptInvite {
        gid: GroupId,
        name: String,
        password_hash: Option<String>,
        inviter: Origin,
    },
}

#[derive(Debug, Clone, Copy)]
struct UiBinding {
    session: UiSessionId,
    kind: ChatKind,
}

/// Etat complet du protocole: logique pure, zero async, zero reseau.
///
/// Chaque methode handle_* / tick_* retourne Vec<RuntimeEffect>.
/// Aucune methode ne touche au reseau ni aux channels. Les horodatages
/// (`now`, secondes Unix) sont fournis par l'appelant.
pub struct RuntimeState {
    pub(crate) identity: Identity,
    pub(crate) settings: Settings,
    pub(crate) store: Store,
    pub(crate) config: RuntimeConfig,

    pub(crate) pending: PendingTable,
    pub(crate) sessions: SessionTable,
    pub(crate) prompts: HashMap<PromptId, PromptContinuation>,

    /// JOIN_REQ sent, waiting for WELCOME: gid -> (password hash, expiry).
    pub(crate) joining: HashMap<GroupId, (Option<String>, u64)>,
    /// WELCOME received, waiting for SYNC.
    pub(crate) syncing: HashSet<GroupId>,

    ui_by_chat: HashMap<String, UiBinding>,
    ui_chats: HashMap<UiSessionId, String>,
    last_mention: HashMap<String, u64>,

    next_prompt: u64,
    next_ui: u64,
    stopping: bool,
}

impl RuntimeState {
    /// Creer un nouvel etat de protocole.
    pub fn new(identity: Identity, settings: Settings, store: Store, config: RuntimeConfig) -> Self {
        Self {
            identity,
            settings,
            store,
            config,
            pending: PendingTable::new(),
            sessions: SessionTable::new(),
            prompts: HashMap::new(),
            joining: HashMap::new(),
            syncing: HashSet::new(),
            ui_by_chat: HashMap::new(),
            ui_chats: HashMap::new(),
            last_mention: HashMap::new(),
            next_prompt: 0,
            next_ui: 0,
            stopping: false,
        }
    }

    /// Build the identity from persisted settings plus the current address.
    pub fn from_settings(
        settings: Settings,
        ip: Ipv4Addr,
        store: Store,
        config: RuntimeConfig,
    ) -> Self {
        let mut identity = Identity::new(
            settings.user.uid.clone(),
            settings.user.nick.clone(),
            ip,
        );
        if !settings.user.status_msg.is_empty() {
            identity.status_msg = Some(settings.user.status_msg.clone());
        }
        Self::new(identity, settings, store, config)
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn open_prompts(&self) -> usize {
        self.prompts.len()
    }

    pub fn attached_session(&self, chat_id: &str) -> Option<UiSessionId> {
        self.ui_by_chat.get(chat_id).map(|b| b.session)
    }

    pub fn attached_chat(&self, session: UiSessionId) -> Option<(ChatKind, &str)> {
        let chat_id = self.ui_chats.get(&session)?;
        let binding = self.ui_by_chat.get(chat_id)?;
        Some((binding.kind, chat_id.as_str()))
    }

    /// Set by `--exit` on a transient connection.
    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    // ── Inbound: TCP frames ─────────────────────────────────────────────

    /// Decode and dispatch one frame from a TCP connection.
    ///
    /// Only TCP-observed `origen` blocks create or refresh peers.
    pub fn handle_frame(
        &mut self,
        conn: ConnectionId,
        role: PortRole,
        data: &[u8],
        now: u64,
    ) -> Vec<RuntimeEffect> {
        let envelope = match Envelope::decode(data) {
            Ok(e) => e,
            Err(e) => {
                debug!("dropping frame on {conn} ({role}): {e}");
                return Vec::new();
            }
        };
        if envelope.origin.uid == self.identity.uid {
            return Vec::new();
        }
        let kind = envelope.kind();
        debug!("{kind} from {} on {conn}", envelope.origin.nick);
        self.store.upsert_peer(&envelope.origin, now);

        let Envelope { origin, body, .. } = envelope;
        match body {
            Body::JoinReq { gid, password_hash } => {
                self.handle_join_req(conn, &origin, gid, password_hash)
            }
            Body::Welcome { gid, name } => self.handle_welcome(conn, &origin, gid, name, now),
            Body::SyncReq { gid } => self.handle_sync_req(conn, &origin, gid),
            Body::Sync { gid, members } => self.handle_sync(&origin, gid, members),
            Body::Announce { gid, user } => self.handle_announce(&origin, gid, user),
            Body::Msg { text, gid } => self.handle_msg(&origin, text, gid, now),
            Body::Leave { gid } => self.handle_leave(&origin, gid),
            Body::Invite {
                gid,
                name,
                password_hash,
            } => self.handle_invite(origin, gid, name, password_hash),
            Body::ChatReq {} => self.handle_chat_req(origin),
            Body::ChatAck {} => self.handle_chat_ack(&origin),
            Body::ChatNo { reason } => self.handle_chat_no(&origin, &reason),
            Body::ChatBye {} => self.handle_chat_bye(&origin),
            Body::Search { .. }
            | Body::Found(_)
            | Body::Discover { .. }
            | Body::WhoName { .. }
            | Body::Iam {} => {
                debug!("{kind} is a discovery kind, ignored on tcp");
                Vec::new()
            }
        }
    }

    /// A TCP connection went away. Nothing in the protocol depends on it.
    pub fn handle_closed(&mut self, conn: ConnectionId) -> Vec<RuntimeEffect> {
        debug!("{conn} closed");
        Vec::new()
    }

    // ── Tick: heartbeat ─────────────────────────────────────────────────

    /// `DISCOVER{PING}` broadcast, unless invisible.
    pub fn tick_heartbeat(&mut self) -> Vec<RuntimeEffect> {
        if self.settings.preferences.invisible {
            return Vec::new();
        }
        vec![RuntimeEffect::Broadcast(self.envelope(
            crate::types::DEST_ALL,
            Body::Discover {
                filter: DiscoverFilter::Ping,
            },
        ))]
    }

    // ── Tick: sweep ─────────────────────────────────────────────────────

    /// Expire quiet peers, stale correlations and abandoned joins.
    pub fn tick_sweep(&mut self, now: u64) -> Vec<RuntimeEffect> {
        let report =
            self.store
                .sweep_expired(self.config.offline_after, self.config.peer_timeout, now);
        let effects: Vec<RuntimeEffect> = report
            .removed
            .into_iter()
            .map(|uid| RuntimeEffect::Emit(ProtocolEvent::PeerExpired { uid }))
            .collect();

        for (id, continuation) in self.pending.sweep(now) {
            info!("{id} expired without an answer: {continuation:?}");
        }

        let before = self.joining.len();
        self.joining.retain(|_, (_, expires_at)| *expires_at > now);
        if self.joining.len() < before {
            debug!("{} join attempt(s) got no WELCOME", before - self.joining.len());
        }

        if !report.went_offline.is_empty() {
            self.store.persist_contacts();
        }
        effects
    }

    // ── Prompts ─────────────────────────────────────────────────────────

    pub(crate) fn open_prompt(
        &mut self,
        continuation: PromptContinuation,
        title: String,
        text: String,
    ) -> RuntimeEffect {
        self.next_prompt += 1;
        let id = PromptId(self.next_prompt);
        self.prompts.insert(id, continuation);
        RuntimeEffect::Prompt { id, title, text }
    }

    /// Resume the continuation stored for an answered prompt.
    pub fn handle_prompt_answer(&mut self, answer: PromptAnswer, now: u64) -> Vec<RuntimeEffect> {
        let Some(continuation) = self.prompts.remove(&answer.id) else {
            debug!("answer for unknown {}", answer.id);
            return Vec::new();
        };
        let accepted = answer.outcome.accepted();
        debug!("{} answered: {:?}", answer.id, answer.outcome);
        match continuation {
            PromptContinuation::AcceptPrivate { peer } => self.resume_private(peer, accepted),
            PromptContinuation::AcceptInvite {
                gid,
                name,
                password_hash,
                inviter,
            } => self.resume_invite(gid, name, password_hash, inviter, accepted, now),
        }
    }

    // ── Send failures ───────────────────────────────────────────────────

    /// Roll back state that assumed a TCP send would arrive.
    pub fn handle_send_failure(&mut self, failure: &SendFailure) -> Vec<RuntimeEffect> {
        let ip = failure.addr.ip().to_string();
        match failure.kind {
            Kind::ChatReq => {
                let uid = self.store.peer_by_ip(&ip).map(|p| p.uid.clone());
                self.sessions.cancel_request(uid.as_deref(), &ip);
            }
            // a lost JOIN_REQ expires with the joining entry
            _ => {}
        }
        Vec::new()
    }

    // ── UI sessions ─────────────────────────────────────────────────────

    /// Register a UI for `chat_id`. A previous UI for the same chat is told
    /// to close and forgotten without LEAVE/BYE.
    pub fn attach_ui(&mut self, kind: ChatKind, chat_id: &str) -> (UiSessionId, Vec<RuntimeEffect>) {
        self.next_ui += 1;
        let session = UiSessionId(self.next_ui);
        let mut effects = Vec::new();

        let binding = UiBinding { session, kind };
        if let Some(old) = self.ui_by_chat.insert(chat_id.to_string(), binding) {
            info!("{chat_id} re-attached, {} replaces {}", session, old.session);
            self.ui_chats.remove(&old.session);
            effects.push(RuntimeEffect::UiLine {
                session: old.session,
                line: CLOSE_UI.to_string(),
            });
            effects.push(RuntimeEffect::DropUi(old.session));
        }
        self.ui_chats.insert(session, chat_id.to_string());

        effects.push(RuntimeEffect::UiLine {
            session,
            line: format!("[*] Connected to daemon. ID: {chat_id}"),
        });
        (session, effects)
    }

    /// The UI connection closed: LEAVE the group or BYE the peer, once.
    pub fn detach_ui(&mut self, session: UiSessionId) -> Vec<RuntimeEffect> {
        let Some(chat_id) = self.ui_chats.remove(&session) else {
            return Vec::new();
        };
        let Some(binding) = self.ui_by_chat.remove(&chat_id) else {
            return Vec::new();
        };
        info!("{session} detached from {chat_id}");

        let mut effects = vec![RuntimeEffect::DropUi(session)];
        match binding.kind {
            ChatKind::Group => effects.extend(self.leave_group(&GroupId::from(chat_id))),
            ChatKind::Private => effects.extend(self.close_private(&chat_id)),
        }
        effects
    }

    /// Close every UI with its detach semantics.
    pub fn shutdown(&mut self) -> Vec<RuntimeEffect> {
        self.stopping = true;
        let sessions: Vec<UiSessionId> = self.ui_chats.keys().copied().collect();
        let mut effects = Vec::new();
        for session in sessions {
            effects.push(RuntimeEffect::UiLine {
                session,
                line: CLOSE_UI.to_string(),
            });
            effects.extend(self.detach_ui(session));
        }
        effects
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    pub(crate) fn envelope(&self, destination: impl Into<String>, body: Body) -> Envelope {
        Envelope::new(self.identity.to_origin(), destination, body)
    }

    /// `SendTcp` to `ip`'s `role` listener. Port `0` means the well-known one.
    pub(crate) fn send_tcp(
        &self,
        ip: &str,
        port: u16,
        role: PortRole,
        envelope: Envelope,
    ) -> Option<RuntimeEffect> {
        let Ok(ip) = ip.parse::<Ipv4Addr>() else {
            debug!("cannot send {} to non-IPv4 address {ip:?}", envelope.kind());
            return None;
        };
        let port = match (port, role) {
            (0, PortRole::Private) => PRIVATE_PORT,
            (0, PortRole::Group) => GROUP_PORT,
            (p, _) => p,
        };
        Some(RuntimeEffect::SendTcp {
            addr: SocketAddr::V4(SocketAddrV4::new(ip, port)),
            role,
            envelope,
        })
    }

    /// Best known group port for a uid.
    pub(crate) fn group_port_of(&self, uid: &str, hint: u16) -> u16 {
        if hint != 0 {
            return hint;
        }
        self.store
            .peer_by_uid(uid)
            .map(|p| p.port_group)
            .unwrap_or(GROUP_PORT)
    }

    /// Best known private port for a uid.
    pub(crate) fn private_port_of(&self, uid: &str, hint: u16) -> u16 {
        if hint != 0 {
            return hint;
        }
        self.store
            .peer_by_uid(uid)
            .map(|p| p.port_priv)
            .unwrap_or(PRIVATE_PORT)
    }

    pub(crate) fn push_ui(&self, effects: &mut Vec<RuntimeEffect>, chat_id: &str, line: String) {
        if let Some(binding) = self.ui_by_chat.get(chat_id) {
            effects.push(RuntimeEffect::UiLine {
                session: binding.session,
                line,
            });
        }
    }

    pub(crate) fn push_system(&self, effects: &mut Vec<RuntimeEffect>, chat_id: &str, text: &str) {
        self.push_ui(effects, chat_id, format!("[SYSTEM] {text}"));
    }

    pub(crate) fn push_transcript(
        &self,
        effects: &mut Vec<RuntimeEffect>,
        chat_id: &str,
        line: &str,
    ) {
        if self.settings.preferences.log_chat {
            effects.push(RuntimeEffect::Transcript {
                chat_id: chat_id.to_string(),
                line: line.to_string(),
            });
        }
    }

    /// Tell an attached UI, or ask the app to open one.
    pub(crate) fn open_chat(
        &self,
        effects: &mut Vec<RuntimeEffect>,
        kind: ChatKind,
        chat_id: &str,
        title: &str,
        notice: &str,
    ) {
        if self.ui_by_chat.contains_key(chat_id) {
            self.push_system(effects, chat_id, notice);
        } else {
            effects.push(RuntimeEffect::Emit(ProtocolEvent::OpenChat {
                kind,
                chat_id: chat_id.to_string(),
                title: title.to_string(),
            }));
        }
    }

    /// True if a mention notification for `chat_id` is allowed now.
    pub(crate) fn mention_due(&mut self, chat_id: &str, now: u64) -> bool {
        let cooldown = self.config.mention_cooldown.as_secs();
        match self.last_mention.get(chat_id) {
            Some(last) if now.saturating_sub(*last) < cooldown => false,
            _ => {
                self.last_mention.insert(chat_id.to_string(), now);
                true
            }
        }
    }

    pub(crate) fn save_settings(&mut self) {
        self.settings.user.nick = self.identity.nick.clone();
        self.settings.user.uid = self.identity.uid.clone();
        self.settings.user.status_msg = self.identity.status_msg.clone().unwrap_or_default();
        if let Err(e) = self.store.config().save_settings(&self.settings) {
            tracing::warn!("could not save settings, continuing in memory: {e}");
        }
    }

    pub(crate) fn stop(&mut self) {
        self.stopping = true;
    }
}
