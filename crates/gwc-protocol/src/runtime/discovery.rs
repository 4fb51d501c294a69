//! UDP discovery: SEARCH / DISCOVER / WHO_NAME requests and the FOUND / IAM
//! replies that resolve pending correlations.
//!
//! Nothing here creates a peer entry. Replies land in the scan buffer, and
//! heartbeats only refresh peers already confirmed over TCP.

use std::net::SocketAddr;

use gwc_transport::PortRole;
use tracing::debug;

use crate::envelope::{Body, DiscoverFilter, Envelope, Found, Origin};
use crate::normalize::normalize;
use crate::pending::Continuation;
use crate::store::ScanEntry;
use crate::types::{GroupId, DEST_ALL};

use super::effect::RuntimeEffect;
use super::state::RuntimeState;

impl RuntimeState {
    /// Decode and dispatch one UDP datagram received from `from`.
    pub fn handle_datagram(&mut self, from: SocketAddr, data: &[u8], now: u64) -> Vec<RuntimeEffect> {
        let envelope = match Envelope::decode(data) {
            Ok(e) => e,
            Err(e) => {
                debug!("dropping datagram from {from}: {e}");
                return Vec::new();
            }
        };
        if envelope.origin.uid == self.identity.uid {
            return Vec::new();
        }

        let kind = envelope.kind();
        let Envelope { origin, body, .. } = envelope;
        match body {
            Body::Search { group_name } => self.handle_search(from, &group_name),
            Body::Discover { filter } => self.handle_discover(from, &origin, filter, now),
            Body::WhoName { nick } => self.handle_who_name(from, &nick),
            Body::Found(found) => self.handle_found(&origin, found, now),
            Body::Iam {} => self.handle_iam(&origin, now),
            _ => {
                debug!("{kind} from {} is a tcp kind, ignored on udp", origin.nick);
                Vec::new()
            }
        }
    }

    fn handle_search(&self, from: SocketAddr, group_name: &str) -> Vec<RuntimeEffect> {
        let Some(group) = self.store.group_by_name(group_name) else {
            return Vec::new();
        };
        let found = Found::Group {
            name: group.name.clone(),
            gid: group.gid.clone(),
        };
        vec![RuntimeEffect::SendTo {
            addr: from,
            envelope: self.envelope(DEST_ALL, Body::Found(found)),
        }]
    }

    fn handle_discover(
        &mut self,
        from: SocketAddr,
        origin: &Origin,
        filter: DiscoverFilter,
        now: u64,
    ) -> Vec<RuntimeEffect> {
        if filter == DiscoverFilter::Ping {
            self.store.touch_peer(&origin.uid, now);
            return Vec::new();
        }

        let mut effects = Vec::new();
        if matches!(filter, DiscoverFilter::Peers | DiscoverFilter::All)
            && !self.settings.preferences.invisible
        {
            let status = self.identity.status_msg.clone().unwrap_or_default();
            effects.push(RuntimeEffect::SendTo {
                addr: from,
                envelope: self.envelope(&origin.uid, Body::Found(Found::Peer { status })),
            });
        }
        if matches!(filter, DiscoverFilter::Groups | DiscoverFilter::All) {
            for group in self.store.groups().filter(|g| g.is_public) {
                let found = Found::Group {
                    name: group.name.clone(),
                    gid: group.gid.clone(),
                };
                effects.push(RuntimeEffect::SendTo {
                    addr: from,
                    envelope: self.envelope(&origin.uid, Body::Found(found)),
                });
            }
        }
        effects
    }

    fn handle_who_name(&self, from: SocketAddr, nick: &str) -> Vec<RuntimeEffect> {
        if self.settings.preferences.invisible || normalize(nick) != normalize(&self.identity.nick) {
            return Vec::new();
        }
        vec![RuntimeEffect::SendTo {
            addr: from,
            envelope: self.envelope(DEST_ALL, Body::Iam {}),
        }]
    }

    fn handle_found(&mut self, origin: &Origin, found: Found, now: u64) -> Vec<RuntimeEffect> {
        match found {
            Found::Peer { status } => {
                let status_msg = (!status.is_empty()).then_some(status);
                self.store.record_scan(ScanEntry::Peer {
                    uid: origin.uid.clone(),
                    nick: origin.nick.clone(),
                    ip: origin.ip.clone(),
                    status_msg,
                });
                Vec::new()
            }
            Found::Group { name, gid } => {
                self.store.record_scan(ScanEntry::Group {
                    gid: gid.clone(),
                    name: name.clone(),
                    ip: origin.ip.clone(),
                });
                self.resolve_join(origin, &name, gid, now)
            }
        }
    }

    /// A group we were searching for answered: JOIN_REQ its owner.
    fn resolve_join(&mut self, origin: &Origin, name: &str, gid: GroupId, now: u64) -> Vec<RuntimeEffect> {
        let wanted = normalize(name);
        let matched = self.pending.take_first(now, |c| {
            matches!(c, Continuation::JoinGroup { name_norm, .. } if *name_norm == wanted)
        });
        let Some((id, Continuation::JoinGroup { password_hash, .. })) = matched else {
            return Vec::new();
        };
        if self.store.group(&gid).is_some() {
            debug!("{id}: already in {}", gid.short());
            return Vec::new();
        }
        debug!("{id} resolved: joining {name} via {}", origin.nick);

        let expires_at = now + self.config.pending_ttl.as_secs();
        self.joining.insert(gid.clone(), (password_hash.clone(), expires_at));
        let port = self.group_port_of(&origin.uid, origin.port_group);
        let envelope = self.envelope(gid.as_str().to_owned(), Body::JoinReq { gid, password_hash });
        self.send_tcp(&origin.ip, port, PortRole::Group, envelope)
            .into_iter()
            .collect()
    }

    /// A nick we asked for answered: run every continuation waiting on it.
    fn handle_iam(&mut self, origin: &Origin, now: u64) -> Vec<RuntimeEffect> {
        let wanted = normalize(&origin.nick);
        let matched = self.pending.take_matching(now, |c| match c {
            Continuation::InviteToGroup { nick_norm, .. } | Continuation::OpenPrivate { nick_norm } => {
                *nick_norm == wanted
            }
            Continuation::JoinGroup { .. } => false,
        });

        let mut effects = Vec::new();
        for (id, continuation) in matched {
            debug!("{id} resolved by IAM from {} ({})", origin.nick, origin.ip);
            match continuation {
                Continuation::OpenPrivate { .. } => {
                    effects.extend(self.request_private(&origin.uid, &origin.ip, origin.port_priv));
                }
                Continuation::InviteToGroup { gid, .. } => {
                    effects.extend(self.invite(&gid, &origin.uid, &origin.ip, origin.port_priv));
                }
                Continuation::JoinGroup { .. } => {}
            }
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfigStore, Settings};
    use crate::normalize::group_id;
    use crate::runtime::RuntimeConfig;
    use crate::store::Store;
    use crate::types::Kind;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn default_state() -> RuntimeState {
        let mut settings = Settings::default();
        settings.user.uid = "me".into();
        settings.user.nick = "Omar".into();
        settings.user.status_msg = "Coding".into();
        let store = Store::new(Arc::new(MemoryConfigStore::new()));
        RuntimeState::from_settings(settings, Ipv4Addr::new(10, 0, 0, 1), store, RuntimeConfig::default())
    }

    fn remote(uid: &str, nick: &str, ip: &str) -> Origin {
        Origin {
            uid: uid.into(),
            nick: nick.into(),
            ip: ip.into(),
            status_msg: None,
            port_priv: 0,
            port_group: 0,
        }
    }

    fn datagram(origin: Origin, body: Body) -> Vec<u8> {
        Envelope::new(origin, DEST_ALL, body).encode()
    }

    fn from() -> SocketAddr {
        "10.0.0.2:44495".parse().unwrap()
    }

    #[test]
    fn discover_peers_answers_with_status() {
        let mut state = default_state();
        let data = datagram(remote("u2", "ana", "10.0.0.2"), Body::Discover { filter: DiscoverFilter::Peers });
        let effects = state.handle_datagram(from(), &data, 5);
        assert!(
            matches!(
                effects.as_slice(),
                [RuntimeEffect::SendTo { addr, envelope }]
                    if *addr == from() && envelope.body == Body::Found(Found::Peer { status: "Coding".into() })
            ),
            "got: {effects:?}"
        );
    }

    #[test]
    fn invisible_does_not_answer_peer_discovery() {
        let mut state = default_state();
        state.settings.preferences.invisible = true;
        let data = datagram(remote("u2", "ana", "10.0.0.2"), Body::Discover { filter: DiscoverFilter::Peers });
        assert!(state.handle_datagram(from(), &data, 5).is_empty());
        let data = datagram(remote("u2", "ana", "10.0.0.2"), Body::WhoName { nick: "omar".into() });
        assert!(state.handle_datagram(from(), &data, 5).is_empty());
    }

    #[test]
    fn discover_groups_lists_public_only() {
        let mut state = default_state();
        state.store.create_group(group_id("Sala"), "Sala", None);
        state.store.create_group(group_id("Secreta"), "Secreta", Some("h".into()));
        let data = datagram(remote("u2", "ana", "10.0.0.2"), Body::Discover { filter: DiscoverFilter::Groups });
        let effects = state.handle_datagram(from(), &data, 5);
        assert_eq!(effects.len(), 1);
        let RuntimeEffect::SendTo { envelope, .. } = &effects[0] else {
            panic!("expected SendTo, got: {effects:?}");
        };
        assert!(matches!(&envelope.body, Body::Found(Found::Group { name, .. }) if name == "Sala"));
    }

    #[test]
    fn ping_does_not_create_peers() {
        let mut state = default_state();
        let data = datagram(remote("u2", "ana", "10.0.0.2"), Body::Discover { filter: DiscoverFilter::Ping });
        assert!(state.handle_datagram(from(), &data, 5).is_empty());
        assert_eq!(state.store.peer_count(), 0);
    }

    #[test]
    fn who_name_matches_normalized_nick() {
        let mut state = default_state();
        let data = datagram(remote("u2", "ana", "10.0.0.2"), Body::WhoName { nick: "ÓMAR ".into() });
        let effects = state.handle_datagram(from(), &data, 5);
        assert!(matches!(
            effects.as_slice(),
            [RuntimeEffect::SendTo { envelope, .. }] if envelope.kind() == Kind::Iam
        ));
    }

    #[test]
    fn found_group_resolves_join() {
        let mut state = default_state();
        state.pending.insert(
            Continuation::JoinGroup {
                name_norm: "salax".into(),
                password_hash: None,
            },
            100,
        );
        let gid = group_id("Sala X");
        let data = datagram(
            remote("u2", "ana", "10.0.0.2"),
            Body::Found(Found::Group { name: "Sala X".into(), gid: gid.clone() }),
        );
        let effects = state.handle_datagram(from(), &data, 5);

        let [RuntimeEffect::SendTcp { addr, role, envelope }] = effects.as_slice() else {
            panic!("expected JOIN_REQ, got: {effects:?}");
        };
        assert_eq!(*addr, "10.0.0.2:44496".parse().unwrap());
        assert_eq!(*role, PortRole::Group);
        assert_eq!(envelope.body, Body::JoinReq { gid: gid.clone(), password_hash: None });
        assert!(state.pending.is_empty());
        assert!(state.joining.contains_key(&gid));
        assert_eq!(state.store.take_scan_results().len(), 1);
    }

    #[test]
    fn found_group_resolves_one_live_join_only() {
        let mut state = default_state();
        let join = |hash: &str| Continuation::JoinGroup {
            name_norm: "salax".into(),
            password_hash: Some(hash.into()),
        };
        state.pending.insert(join("stale"), 4);
        state.pending.insert(join("first"), 100);
        state.pending.insert(join("second"), 100);

        let gid = group_id("Sala X");
        let data = datagram(
            remote("u2", "ana", "10.0.0.2"),
            Body::Found(Found::Group { name: "Sala X".into(), gid: gid.clone() }),
        );
        let effects = state.handle_datagram(from(), &data, 5);
        let [RuntimeEffect::SendTcp { envelope, .. }] = effects.as_slice() else {
            panic!("expected one JOIN_REQ, got: {effects:?}");
        };
        assert_eq!(
            envelope.body,
            Body::JoinReq { gid, password_hash: Some("first".into()) }
        );
        // the expired entry waits for the sweep, the newer one stays pending
        assert_eq!(state.pending.len(), 2);
        assert_eq!(state.pending.sweep(5).len(), 1);
    }

    #[test]
    fn unrelated_found_keeps_pending() {
        let mut state = default_state();
        state.pending.insert(
            Continuation::JoinGroup {
                name_norm: "otra".into(),
                password_hash: None,
            },
            100,
        );
        let data = datagram(
            remote("u2", "ana", "10.0.0.2"),
            Body::Found(Found::Group { name: "Sala".into(), gid: group_id("Sala") }),
        );
        assert!(state.handle_datagram(from(), &data, 5).is_empty());
        assert_eq!(state.pending.len(), 1);
    }

    #[test]
    fn iam_resolves_open_private() {
        let mut state = default_state();
        state.pending.insert(Continuation::OpenPrivate { nick_norm: "ana".into() }, 100);
        let data = datagram(remote("u2", "Ana", "10.0.0.2"), Body::Iam {});
        let effects = state.handle_datagram(from(), &data, 5);
        assert!(matches!(
            effects.as_slice(),
            [RuntimeEffect::SendTcp { role: PortRole::Private, envelope, .. }] if envelope.kind() == Kind::ChatReq
        ));
        assert!(state.sessions.is_requested_ip("10.0.0.2"));
    }

    #[test]
    fn tcp_kinds_over_udp_are_dropped() {
        let mut state = default_state();
        let data = datagram(remote("u2", "ana", "10.0.0.2"), Body::ChatReq {});
        assert!(state.handle_datagram(from(), &data, 5).is_empty());
        assert_eq!(state.open_prompts(), 0);
    }
}
