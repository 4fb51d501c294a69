//! Group mesh: join handshake, member sync, announces, messages and leave.
//!
//! ```text
//! joiner                     member (owner)
//!   │── JOIN_REQ{gid,hash} ──▶│  hash checked, joiner added
//!   │◀────── WELCOME ─────────│
//!   │── SYNC_REQ ────────────▶│
//!   │◀────── SYNC{members} ───│
//!   │── ANNOUNCE ──▶ every other member
//! ```

use gwc_transport::{ConnectionId, PortRole};
use tracing::{debug, info};

use crate::envelope::{Body, Member, Origin};
use crate::normalize::mentions;
use crate::types::GroupId;

use super::effect::RuntimeEffect;
use super::state::RuntimeState;
use super::{ChatKind, ProtocolEvent, MENTION_PREFIX};

impl RuntimeState {
    pub(crate) fn handle_join_req(
        &mut self,
        conn: ConnectionId,
        origin: &Origin,
        gid: GroupId,
        password_hash: Option<String>,
    ) -> Vec<RuntimeEffect> {
        let Some(group) = self.store.group(&gid) else {
            debug!("JOIN_REQ for unknown group {} from {}", gid.short(), origin.nick);
            return Vec::new();
        };
        if !group.accepts(password_hash.as_deref()) {
            info!("{} gave a wrong password for {}", origin.nick, group.name);
            return Vec::new();
        }
        let name = group.name.clone();
        self.store.add_member(&gid, Member::from(origin));
        info!("{} is joining {name}", origin.nick);

        vec![RuntimeEffect::Reply {
            conn,
            envelope: self.envelope(&origin.uid, Body::Welcome { gid, name }),
        }]
    }

    pub(crate) fn handle_welcome(
        &mut self,
        conn: ConnectionId,
        origin: &Origin,
        gid: GroupId,
        name: String,
        now: u64,
    ) -> Vec<RuntimeEffect> {
        let password_hash = match self.joining.remove(&gid) {
            Some((hash, expires_at)) if expires_at > now => hash,
            _ => {
                debug!("unsolicited WELCOME for {} from {}", gid.short(), origin.nick);
                return Vec::new();
            }
        };
        self.store.create_group(gid.clone(), name.as_str(), password_hash);
        self.store.add_member(&gid, self.identity.to_member());
        self.store.add_member(&gid, Member::from(origin));
        self.syncing.insert(gid.clone());
        info!("joined {name} via {}", origin.nick);

        let mut effects = vec![RuntimeEffect::Reply {
            conn,
            envelope: self.envelope(gid.as_str(), Body::SyncReq { gid: gid.clone() }),
        }];
        self.open_chat(
            &mut effects,
            ChatKind::Group,
            gid.as_str(),
            &name,
            &format!("[*] Joined group '{name}'."),
        );
        effects
    }

    pub(crate) fn handle_sync_req(
        &self,
        conn: ConnectionId,
        origin: &Origin,
        gid: GroupId,
    ) -> Vec<RuntimeEffect> {
        let Some(group) = self.store.group(&gid) else {
            return Vec::new();
        };
        if !group.members.contains_key(&origin.uid) {
            debug!("SYNC_REQ for {} from non-member {}", group.name, origin.nick);
            return Vec::new();
        }
        let members = group.members.values().cloned().collect();
        vec![RuntimeEffect::Reply {
            conn,
            envelope: self.envelope(gid.as_str().to_owned(), Body::Sync { gid, members }),
        }]
    }

    pub(crate) fn handle_sync(
        &mut self,
        origin: &Origin,
        gid: GroupId,
        members: Vec<Member>,
    ) -> Vec<RuntimeEffect> {
        if !self.syncing.remove(&gid) || self.store.group(&gid).is_none() {
            debug!("unsolicited SYNC for {} from {}", gid.short(), origin.nick);
            return Vec::new();
        }

        let me = self.identity.to_origin();
        let mut effects = Vec::new();
        for member in members {
            if member.uid == self.identity.uid {
                continue;
            }
            let port = self.group_port_of(&member.uid, member.port_group);
            let envelope = self.envelope(
                gid.as_str(),
                Body::Announce {
                    gid: gid.clone(),
                    user: me.clone(),
                },
            );
            effects.extend(self.send_tcp(&member.ip, port, PortRole::Group, envelope));
            self.store.add_member(&gid, member);
        }

        if let Some(group) = self.store.group(&gid) {
            let text = format!("[*] {} member(s) in '{}'.", group.members.len(), group.name);
            self.push_system(&mut effects, gid.as_str(), &text);
        }
        effects
    }

    /// A joiner announces itself right after its own `SYNC`; an existing
    /// member may also announce someone else. Anything else is ignored.
    pub(crate) fn handle_announce(&mut self, origin: &Origin, gid: GroupId, user: Origin) -> Vec<RuntimeEffect> {
        if user.uid == self.identity.uid {
            return Vec::new();
        }
        let Some(group) = self.store.group(&gid) else {
            debug!("ANNOUNCE for unknown group {}", gid.short());
            return Vec::new();
        };
        if user.uid != origin.uid && !group.members.contains_key(&origin.uid) {
            debug!("ANNOUNCE of {} by non-member {} ignored", user.nick, origin.nick);
            return Vec::new();
        }
        self.store.add_member(&gid, Member::from(&user));

        let mut effects = Vec::new();
        let text = format!("[+] {} joined the group.", user.nick);
        self.push_system(&mut effects, gid.as_str(), &text);
        self.push_transcript(&mut effects, gid.as_str(), &text);
        effects.push(RuntimeEffect::Emit(ProtocolEvent::MemberJoined {
            gid,
            uid: user.uid,
            nick: user.nick,
        }));
        effects
    }

    pub(crate) fn handle_leave(&mut self, origin: &Origin, gid: GroupId) -> Vec<RuntimeEffect> {
        let Some(member) = self.store.remove_member(&gid, &origin.uid) else {
            return Vec::new();
        };

        let mut effects = Vec::new();
        let text = format!("[-] {} left the group.", member.nick);
        self.push_system(&mut effects, gid.as_str(), &text);
        self.push_transcript(&mut effects, gid.as_str(), &text);
        effects.push(RuntimeEffect::Emit(ProtocolEvent::MemberLeft {
            gid,
            uid: member.uid,
            nick: member.nick,
        }));
        effects
    }

    /// Incoming `MSG`, for a group when `gid` is set, private otherwise.
    pub(crate) fn handle_msg(
        &mut self,
        origin: &Origin,
        text: String,
        gid: Option<GroupId>,
        now: u64,
    ) -> Vec<RuntimeEffect> {
        if self.store.is_blocked(&origin.uid) {
            debug!("message from blocked {} dropped", origin.nick);
            return Vec::new();
        }

        let (chat_id, title) = match gid {
            Some(gid) => match self.store.group(&gid) {
                Some(group) if group.members.contains_key(&origin.uid) => {
                    (gid.0.clone(), group.name.clone())
                }
                Some(group) => {
                    debug!("MSG for {} from non-member {} dropped", group.name, origin.nick);
                    return Vec::new();
                }
                None => {
                    debug!("MSG for unknown group {}", gid.short());
                    return Vec::new();
                }
            },
            None => (origin.uid.clone(), origin.nick.clone()),
        };

        let mut effects = Vec::new();
        let line = format!("({}): {}", origin.nick, text);
        let mentioned = mentions(&text, &self.identity.nick);

        if self.attached_session(&chat_id).is_some() {
            let shown = if mentioned {
                format!("{MENTION_PREFIX}{line}")
            } else {
                line.clone()
            };
            self.push_ui(&mut effects, &chat_id, shown);
            if mentioned && self.mention_due(&chat_id, now) {
                effects.push(RuntimeEffect::Notify {
                    title: format!("Mention in {title}"),
                    text: format!("{}: {}", origin.nick, text),
                });
            }
        } else {
            effects.push(RuntimeEffect::Notify {
                title,
                text: format!("{}: {}", origin.nick, text),
            });
        }
        self.push_transcript(&mut effects, &chat_id, &line);
        effects
    }

    // ── Local actions ───────────────────────────────────────────────────

    /// Create a group owned by this daemon.
    pub(crate) fn create_local_group(
        &mut self,
        gid: GroupId,
        name: &str,
        password_hash: Option<String>,
    ) -> bool {
        if !self.store.create_group(gid.clone(), name, password_hash) {
            return false;
        }
        self.store.add_member(&gid, self.identity.to_member());
        true
    }

    /// `INVITE` a peer into one of our groups.
    pub(crate) fn invite(&self, gid: &GroupId, uid: &str, ip: &str, port_priv: u16) -> Vec<RuntimeEffect> {
        let Some(group) = self.store.group(gid) else {
            return Vec::new();
        };
        let port = self.private_port_of(uid, port_priv);
        let envelope = self.envelope(
            uid,
            Body::Invite {
                gid: gid.clone(),
                name: group.name.clone(),
                password_hash: group.password_hash.clone(),
            },
        );
        self.send_tcp(ip, port, PortRole::Private, envelope)
            .into_iter()
            .collect()
    }

    /// Send `MSG` to every other member.
    pub(crate) fn send_group_message(&self, gid: &GroupId, text: &str) -> Option<Vec<RuntimeEffect>> {
        let group = self.store.group(gid)?;
        let mut effects = Vec::new();
        for member in group.members.values() {
            if member.uid == self.identity.uid {
                continue;
            }
            let port = self.group_port_of(&member.uid, member.port_group);
            let envelope = self.envelope(
                gid.as_str(),
                Body::Msg {
                    text: text.to_string(),
                    gid: Some(gid.clone()),
                },
            );
            effects.extend(self.send_tcp(&member.ip, port, PortRole::Group, envelope));
        }
        Some(effects)
    }

    /// `LEAVE` to every other member, then forget the group.
    pub(crate) fn leave_group(&mut self, gid: &GroupId) -> Vec<RuntimeEffect> {
        self.joining.remove(gid);
        self.syncing.remove(gid);
        let Some(group) = self.store.delete_group(gid) else {
            return Vec::new();
        };
        info!("leaving {}", group.name);

        let mut effects = Vec::new();
        for member in group.members.values() {
            if member.uid == self.identity.uid {
                continue;
            }
            let port = self.group_port_of(&member.uid, member.port_group);
            let envelope = self.envelope(gid.as_str(), Body::Leave { gid: gid.clone() });
            effects.extend(self.send_tcp(&member.ip, port, PortRole::Group, envelope));
        }
        effects
    }

    /// Resume an `INVITE` prompt.
    pub(crate) fn resume_invite(
        &mut self,
        gid: GroupId,
        name: String,
        password_hash: Option<String>,
        inviter: Origin,
        accepted: bool,
        now: u64,
    ) -> Vec<RuntimeEffect> {
        if !accepted {
            let port = self.private_port_of(&inviter.uid, inviter.port_priv);
            let envelope = self.envelope(
                &inviter.uid,
                Body::ChatNo {
                    reason: "Rejected".to_string(),
                },
            );
            return self
                .send_tcp(&inviter.ip, port, PortRole::Private, envelope)
                .into_iter()
                .collect();
        }

        info!("accepted invitation to {name} from {}", inviter.nick);
        let expires_at = now + self.config.pending_ttl.as_secs();
        self.joining.insert(gid.clone(), (password_hash.clone(), expires_at));
        let port = self.group_port_of(&inviter.uid, inviter.port_group);
        let envelope = self.envelope(gid.as_str().to_owned(), Body::JoinReq { gid, password_hash });
        self.send_tcp(&inviter.ip, port, PortRole::Group, envelope)
            .into_iter()
            .collect()
    }

    pub(crate) fn handle_invite(
        &mut self,
        origin: Origin,
        gid: GroupId,
        name: String,
        password_hash: Option<String>,
    ) -> Vec<RuntimeEffect> {
        if self.store.is_blocked(&origin.uid) {
            return Vec::new();
        }
        if self.store.group(&gid).is_some() {
            debug!("invited to {name}, already a member");
            return Vec::new();
        }
        if self.settings.preferences.do_not_disturb {
            let port = self.private_port_of(&origin.uid, origin.port_priv);
            let envelope = self.envelope(
                &origin.uid,
                Body::ChatNo {
                    reason: "Busy/DND".to_string(),
                },
            );
            return self
                .send_tcp(&origin.ip, port, PortRole::Private, envelope)
                .into_iter()
                .collect();
        }

        let title = "Group invitation".to_string();
        let text = format!("{} invites you to join '{name}'. Accept?", origin.nick);
        vec![self.open_prompt(
            super::PromptContinuation::AcceptInvite {
                gid,
                name,
                password_hash,
                inviter: origin,
            },
            title,
            text,
        )]
    }
}
