//! Private 1:1 sessions: CHAT_REQ / CHAT_ACK / CHAT_NO / CHAT_BYE.

use gwc_transport::PortRole;
use tracing::{debug, info};

use crate::envelope::{Body, Origin};
use crate::session::SessionState;

use super::effect::RuntimeEffect;
use super::state::{PromptContinuation, RuntimeState};
use super::ChatKind;

impl RuntimeState {
    pub(crate) fn handle_chat_req(&mut self, origin: Origin) -> Vec<RuntimeEffect> {
        if self.store.is_blocked(&origin.uid) {
            debug!("chat request from blocked {} dropped", origin.nick);
            return Vec::new();
        }
        if self.settings.preferences.do_not_disturb {
            info!("auto-rejecting {} (do not disturb)", origin.nick);
            return self.send_private(&origin.uid, &origin.ip, origin.port_priv, Body::ChatNo {
                reason: "Busy".to_string(),
            });
        }
        if !self.sessions.on_incoming_request(&origin.uid) {
            debug!("{} asked again while the prompt is open", origin.nick);
            return Vec::new();
        }

        let title = "Private chat".to_string();
        let text = format!("{} ({}) wants to chat privately. Accept?", origin.nick, origin.ip);
        vec![self.open_prompt(PromptContinuation::AcceptPrivate { peer: origin }, title, text)]
    }

    pub(crate) fn handle_chat_ack(&mut self, origin: &Origin) -> Vec<RuntimeEffect> {
        if !self.sessions.on_ack(&origin.uid, &origin.ip) {
            debug!("CHAT_ACK from {} without a request", origin.nick);
            return Vec::new();
        }
        let mut effects = Vec::new();
        self.open_chat(
            &mut effects,
            ChatKind::Private,
            &origin.uid,
            &origin.nick,
            &format!("[*] {} accepted the chat.", origin.nick),
        );
        effects
    }

    pub(crate) fn handle_chat_no(&mut self, origin: &Origin, reason: &str) -> Vec<RuntimeEffect> {
        // also the answer to an INVITE, which has no session behind it
        self.sessions.on_no(&origin.uid, &origin.ip, reason);

        let reason = if reason.is_empty() { "no reason" } else { reason };
        let text = format!("{} declined: {reason}", origin.nick);
        let mut effects = Vec::new();
        if self.attached_session(&origin.uid).is_some() {
            self.push_system(&mut effects, &origin.uid, &format!("[-] {text}"));
        } else {
            effects.push(RuntimeEffect::Notify {
                title: "GhostWhisperChat".to_string(),
                text,
            });
        }
        effects
    }

    pub(crate) fn handle_chat_bye(&mut self, origin: &Origin) -> Vec<RuntimeEffect> {
        self.sessions.close(&origin.uid);
        let mut effects = Vec::new();
        let text = format!("[-] {} closed the chat.", origin.nick);
        self.push_system(&mut effects, &origin.uid, &text);
        self.push_transcript(&mut effects, &origin.uid, &text);
        effects
    }

    /// Resume a `CHAT_REQ` prompt.
    pub(crate) fn resume_private(&mut self, peer: Origin, accepted: bool) -> Vec<RuntimeEffect> {
        self.sessions.on_prompt_answer(&peer.uid, accepted);
        if !accepted {
            return self.send_private(&peer.uid, &peer.ip, peer.port_priv, Body::ChatNo {
                reason: "Rejected".to_string(),
            });
        }

        info!("private chat with {} accepted", peer.nick);
        let mut effects = self.send_private(&peer.uid, &peer.ip, peer.port_priv, Body::ChatAck {});
        self.open_chat(
            &mut effects,
            ChatKind::Private,
            &peer.uid,
            &peer.nick,
            &format!("[*] Chat with {} accepted.", peer.nick),
        );
        effects
    }

    /// Send `CHAT_REQ` and remember we asked. `uid` is empty for `--dm <ip>`.
    pub(crate) fn request_private(&mut self, uid: &str, ip: &str, port_priv: u16) -> Vec<RuntimeEffect> {
        let known_uid = (!uid.is_empty()).then_some(uid);
        self.sessions.request(known_uid, ip);
        self.send_private(uid, ip, port_priv, Body::ChatReq {})
    }

    /// `MSG` without gid to a peer. `None` if the peer was never seen.
    pub(crate) fn send_private_message(&mut self, uid: &str, text: &str) -> Option<Vec<RuntimeEffect>> {
        let (ip, port) = match self.store.peer_by_uid(uid) {
            Some(peer) => (peer.ip.clone(), peer.port_priv),
            None => (self.store.contacts().get(uid)?.last_ip.clone(), 0),
        };
        if self.sessions.state_by_uid(uid) == SessionState::Idle {
            // both ends already consider the chat open
            self.sessions.activate(uid);
        }
        Some(self.send_private(
            uid,
            &ip,
            port,
            Body::Msg {
                text: text.to_string(),
                gid: None,
            },
        ))
    }

    /// `CHAT_BYE` for an active session, then forget it.
    pub(crate) fn close_private(&mut self, uid: &str) -> Vec<RuntimeEffect> {
        if !self.sessions.close(uid) {
            return Vec::new();
        }
        let target = self
            .store
            .peer_by_uid(uid)
            .map(|p| (p.ip.clone(), p.port_priv))
            .or_else(|| self.store.contacts().get(uid).map(|c| (c.last_ip.clone(), 0)));
        match target {
            Some((ip, port)) => self.send_private(uid, &ip, port, Body::ChatBye {}),
            None => Vec::new(),
        }
    }

    fn send_private(&self, uid: &str, ip: &str, port_priv: u16, body: Body) -> Vec<RuntimeEffect> {
        let port = self.private_port_of(uid, port_priv);
        let destination = if uid.is_empty() { ip } else { uid };
        let envelope = self.envelope(destination, body);
        self.send_tcp(ip, port, PortRole::Private, envelope)
            .into_iter()
            .collect()
    }
}
