//! Peer and group tables.
//!
//! The [`Store`] is constructed once at daemon start and owned by the
//! runtime state machine. All timestamps are passed in by the caller so the
//! tables stay deterministic under test.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{ConfigStore, Contact, Contacts};
use crate::envelope::{Member, Origin};
use crate::normalize::{normalize, sha256_hex, similarity};
use crate::types::{GroupId, PeerStatus, GROUP_PORT, PRIVATE_PORT};

/// Minimum similarity ratio for the last fuzzy tier.
pub const FUZZY_THRESHOLD: f64 = 0.6;

// ── Identity ──────────────────────────────────────────────────────────

/// This daemon's own identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub nick: String,
    pub ip: Ipv4Addr,
    pub status_msg: Option<String>,
    pub port_priv: u16,
    pub port_group: u16,
}

impl Identity {
    pub fn new(uid: impl Into<String>, nick: impl Into<String>, ip: Ipv4Addr) -> Self {
        Self {
            uid: uid.into(),
            nick: nick.into(),
            ip,
            status_msg: None,
            port_priv: PRIVATE_PORT,
            port_group: GROUP_PORT,
        }
    }

    /// Fresh uid: 16 hex chars of SHA-256 over a random uuid and the clock.
    pub fn generate_uid() -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seed = format!("{}{nanos}", uuid::Uuid::new_v4());
        sha256_hex(&seed)[..16].to_string()
    }

    /// The `origen` block for outgoing envelopes.
    pub fn to_origin(&self) -> Origin {
        Origin {
            uid: self.uid.clone(),
            nick: self.nick.clone(),
            ip: self.ip.to_string(),
            status_msg: self.status_msg.clone(),
            port_priv: self.port_priv,
            port_group: self.port_group,
        }
    }

    pub fn to_member(&self) -> Member {
        Member::from(&self.to_origin())
    }
}

// ── Tables ────────────────────────────────────────────────────────────

/// A remote daemon seen over TCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub uid: String,
    pub nick: String,
    pub ip: String,
    pub status: PeerStatus,
    pub last_seen: u64,
    pub port_priv: u16,
    pub port_group: u16,
    pub status_msg: Option<String>,
    pub sys_user: Option<String>,
}

/// A group this daemon belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub gid: GroupId,
    pub name: String,
    pub is_public: bool,
    pub password_hash: Option<String>,
    pub members: BTreeMap<String, Member>,
}

impl Group {
    /// Public groups accept any hash; private ones need an exact match.
    pub fn accepts(&self, password_hash: Option<&str>) -> bool {
        match &self.password_hash {
            None => true,
            Some(expected) => password_hash == Some(expected.as_str()),
        }
    }
}

/// One discovery reply kept for `--scan-results`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEntry {
    Peer {
        uid: String,
        nick: String,
        ip: String,
        status_msg: Option<String>,
    },
    Group {
        gid: GroupId,
        name: String,
        ip: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Peer,
    Contact,
}

/// Ranked result of [`Store::fuzzy_find`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub uid: String,
    pub nick: String,
    pub ip: String,
    pub last_seen: u64,
    pub source: CandidateSource,
}

/// Outcome of [`Store::sweep_expired`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub went_offline: Vec<String>,
    pub removed: Vec<String>,
}

// ── Store ─────────────────────────────────────────────────────────────

pub struct Store {
    peers: HashMap<String, Peer>,
    groups: HashMap<GroupId, Group>,
    scan: Vec<ScanEntry>,
    contacts: Contacts,
    config: Arc<dyn ConfigStore>,
}

impl Store {
    /// Build the tables, loading contacts from the config collaborator.
    pub fn new(config: Arc<dyn ConfigStore>) -> Self {
        let contacts = config.load_contacts();
        Self {
            peers: HashMap::new(),
            groups: HashMap::new(),
            scan: Vec::new(),
            contacts,
            config,
        }
    }

    pub fn config(&self) -> &Arc<dyn ConfigStore> {
        &self.config
    }

    // ── Peers ─────────────────────────────────────────────

    /// Insert or refresh a peer from an observed `origen`.
    ///
    /// The same uid seen with a new nick or ip overwrites both. The contact
    /// book follows; it is persisted only when something other than
    /// `last_seen` changed. Returns `true` for a previously unknown uid.
    pub fn upsert_peer(&mut self, origin: &Origin, now: u64) -> bool {
        let is_new = !self.peers.contains_key(&origin.uid);
        let peer = self
            .peers
            .entry(origin.uid.clone())
            .or_insert_with(|| Peer {
                uid: origin.uid.clone(),
                nick: origin.nick.clone(),
                ip: origin.ip.clone(),
                status: PeerStatus::Online,
                last_seen: now,
                port_priv: PRIVATE_PORT,
                port_group: GROUP_PORT,
                status_msg: None,
                sys_user: None,
            });
        peer.nick = origin.nick.clone();
        peer.ip = origin.ip.clone();
        peer.status = PeerStatus::Online;
        peer.last_seen = now;
        if origin.port_priv != 0 {
            peer.port_priv = origin.port_priv;
        }
        if origin.port_group != 0 {
            peer.port_group = origin.port_group;
        }
        if origin.status_msg.is_some() {
            peer.status_msg = origin.status_msg.clone();
        }

        let contact = self.contacts.entry(origin.uid.clone()).or_default();
        let changed = contact.nick != origin.nick || contact.last_ip != origin.ip;
        contact.nick = origin.nick.clone();
        contact.last_ip = origin.ip.clone();
        contact.last_seen = now;
        if changed {
            self.persist_contacts();
        }
        is_new
    }

    /// Refresh `last_seen` of an already known peer. Unknown uids are ignored.
    pub fn touch_peer(&mut self, uid: &str, now: u64) -> bool {
        match self.peers.get_mut(uid) {
            Some(peer) => {
                peer.last_seen = now;
                peer.status = PeerStatus::Online;
                true
            }
            None => false,
        }
    }

    pub fn peer_by_uid(&self, uid: &str) -> Option<&Peer> {
        self.peers.get(uid)
    }

    /// Most recently seen peer whose normalized nick equals the query.
    pub fn peer_by_nick(&self, query: &str) -> Option<&Peer> {
        let wanted = normalize(query);
        self.peers
            .values()
            .filter(|p| normalize(&p.nick) == wanted)
            .max_by_key(|p| p.last_seen)
    }

    /// Most recently seen peer at `ip`.
    pub fn peer_by_ip(&self, ip: &str) -> Option<&Peer> {
        self.peers
            .values()
            .filter(|p| p.ip == ip)
            .max_by_key(|p| p.last_seen)
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Mark quiet peers OFFLINE and delete the ones past `timeout`.
    pub fn sweep_expired(
        &mut self,
        offline_after: Duration,
        timeout: Duration,
        now: u64,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        let offline_after = offline_after.as_secs();
        let timeout = timeout.as_secs();

        self.peers.retain(|uid, peer| {
            let idle = now.saturating_sub(peer.last_seen);
            if idle > timeout {
                report.removed.push(uid.clone());
                return false;
            }
            if idle > offline_after && peer.status == PeerStatus::Online {
                peer.status = PeerStatus::Offline;
                report.went_offline.push(uid.clone());
            }
            true
        });

        for group in self.groups.values_mut() {
            for uid in &report.went_offline {
                if let Some(member) = group.members.get_mut(uid) {
                    member.status = PeerStatus::Offline;
                }
            }
        }
        if !report.removed.is_empty() {
            debug!("expired {} peer(s)", report.removed.len());
        }
        report
    }

    // ── Groups ────────────────────────────────────────────

    /// Register a group. An existing entry with the same gid is kept as is.
    pub fn create_group(
        &mut self,
        gid: GroupId,
        name: impl Into<String>,
        password_hash: Option<String>,
    ) -> bool {
        if self.groups.contains_key(&gid) {
            return false;
        }
        let group = Group {
            gid: gid.clone(),
            name: name.into(),
            is_public: password_hash.is_none(),
            password_hash,
            members: BTreeMap::new(),
        };
        self.groups.insert(gid, group);
        true
    }

    /// Add or refresh a member. Returns `false` if the group is unknown.
    pub fn add_member(&mut self, gid: &GroupId, member: Member) -> bool {
        match self.groups.get_mut(gid) {
            Some(group) => {
                group.members.insert(member.uid.clone(), member);
                true
            }
            None => false,
        }
    }

    pub fn remove_member(&mut self, gid: &GroupId, uid: &str) -> Option<Member> {
        self.groups.get_mut(gid)?.members.remove(uid)
    }

    pub fn delete_group(&mut self, gid: &GroupId) -> Option<Group> {
        self.groups.remove(gid)
    }

    pub fn group(&self, gid: &GroupId) -> Option<&Group> {
        self.groups.get(gid)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Group whose normalized name matches.
    pub fn group_by_name(&self, name: &str) -> Option<&Group> {
        let wanted = normalize(name);
        self.groups.values().find(|g| normalize(&g.name) == wanted)
    }

    // ── Fuzzy lookup ──────────────────────────────────────

    /// Ranked candidates across live peers and persisted contacts.
    ///
    /// Exact normalized match first, then substring, then similarity at or
    /// above [`FUZZY_THRESHOLD`]. Within a tier the most recently seen wins.
    /// A uid appears once, preferring the live peer entry.
    pub fn fuzzy_find(&self, query: &str) -> Vec<Candidate> {
        let wanted = normalize(query);
        if wanted.is_empty() {
            return Vec::new();
        }

        let peers = self.peers.values().map(|p| Candidate {
            uid: p.uid.clone(),
            nick: p.nick.clone(),
            ip: p.ip.clone(),
            last_seen: p.last_seen,
            source: CandidateSource::Peer,
        });
        let contacts = self
            .contacts
            .iter()
            .filter(|(uid, _)| !self.peers.contains_key(*uid))
            .map(|(uid, c)| Candidate {
                uid: uid.clone(),
                nick: c.nick.clone(),
                ip: c.last_ip.clone(),
                last_seen: c.last_seen,
                source: CandidateSource::Contact,
            });

        let mut ranked: Vec<(u8, Candidate)> = peers
            .chain(contacts)
            .filter_map(|c| {
                let nick = normalize(&c.nick);
                let tier = if nick == wanted {
                    0
                } else if nick.contains(&wanted) {
                    1
                } else if similarity(&nick, &wanted) >= FUZZY_THRESHOLD {
                    2
                } else {
                    return None;
                };
                Some((tier, c))
            })
            .collect();

        ranked.sort_by(|(ta, a), (tb, b)| {
            (ta, Reverse(a.last_seen), &a.nick).cmp(&(tb, Reverse(b.last_seen), &b.nick))
        });
        ranked.into_iter().map(|(_, c)| c).collect()
    }

    // ── Scan buffer ───────────────────────────────────────

    /// Keep a discovery reply unless one for the same ip (peer) or gid
    /// (group) is already buffered.
    pub fn record_scan(&mut self, entry: ScanEntry) -> bool {
        let duplicate = self.scan.iter().any(|e| match (e, &entry) {
            (ScanEntry::Peer { ip: a, .. }, ScanEntry::Peer { ip: b, .. }) => a == b,
            (ScanEntry::Group { gid: a, .. }, ScanEntry::Group { gid: b, .. }) => a == b,
            _ => false,
        });
        if duplicate {
            return false;
        }
        self.scan.push(entry);
        true
    }

    pub fn clear_scan(&mut self) {
        self.scan.clear();
    }

    /// Drain the buffer.
    pub fn take_scan_results(&mut self) -> Vec<ScanEntry> {
        std::mem::take(&mut self.scan)
    }

    // ── Contacts ──────────────────────────────────────────

    pub fn contacts(&self) -> &Contacts {
        &self.contacts
    }

    /// uid of a contact by normalized nick, live peers first.
    pub fn uid_by_nick(&self, nick: &str) -> Option<String> {
        if let Some(peer) = self.peer_by_nick(nick) {
            return Some(peer.uid.clone());
        }
        let wanted = normalize(nick);
        self.contacts
            .iter()
            .filter(|(_, c)| normalize(&c.nick) == wanted)
            .max_by_key(|(_, c)| c.last_seen)
            .map(|(uid, _)| uid.clone())
    }

    pub fn set_blocked(&mut self, uid: &str, blocked: bool) -> bool {
        let Some(contact) = self.contacts.get_mut(uid) else {
            return false;
        };
        contact.blocked = blocked;
        self.persist_contacts();
        true
    }

    pub fn is_blocked(&self, uid: &str) -> bool {
        self.contacts.get(uid).is_some_and(|c| c.blocked)
    }

    /// Insert a contact directly (e.g. restored from elsewhere).
    pub fn insert_contact(&mut self, uid: impl Into<String>, contact: Contact) {
        self.contacts.insert(uid.into(), contact);
    }

    /// Save contacts; failure is logged and otherwise ignored.
    pub fn persist_contacts(&self) {
        if let Err(e) = self.config.save_contacts(&self.contacts) {
            warn!("could not save contacts, continuing in memory: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigStore;
    use crate::normalize::group_id;

    fn store() -> Store {
        Store::new(Arc::new(MemoryConfigStore::new()))
    }

    fn origin(uid: &str, nick: &str, ip: &str) -> Origin {
        Origin {
            uid: uid.into(),
            nick: nick.into(),
            ip: ip.into(),
            status_msg: None,
            port_priv: 0,
            port_group: 0,
        }
    }

    #[test]
    fn generated_uid_is_16_hex() {
        let a = Identity::generate_uid();
        let b = Identity::generate_uid();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn upsert_overwrites_nick_and_ip() {
        let mut s = store();
        assert!(s.upsert_peer(&origin("u1", "bob", "10.0.0.2"), 10));
        assert!(!s.upsert_peer(&origin("u1", "bobby", "10.0.0.9"), 20));
        let peer = s.peer_by_uid("u1").unwrap();
        assert_eq!(peer.uid, "u1");
        assert_eq!(peer.nick, "bobby");
        assert_eq!(peer.ip, "10.0.0.9");
        assert_eq!(peer.port_priv, PRIVATE_PORT);
        assert_eq!(s.peer_count(), 1);
        assert_eq!(s.contacts()["u1"].last_ip, "10.0.0.9");
    }

    #[test]
    fn upsert_persists_contact_changes() {
        let config = Arc::new(MemoryConfigStore::new());
        let mut s = Store::new(config.clone());
        s.upsert_peer(&origin("u1", "bob", "10.0.0.2"), 10);
        assert_eq!(config.load_contacts()["u1"].nick, "bob");
    }

    #[test]
    fn touch_ignores_unknown() {
        let mut s = store();
        assert!(!s.touch_peer("ghost", 5));
        assert!(s.peer_by_uid("ghost").is_none());
    }

    #[test]
    fn peer_by_nick_prefers_most_recent() {
        let mut s = store();
        s.upsert_peer(&origin("u1", "Omar", "10.0.0.2"), 10);
        s.upsert_peer(&origin("u2", "ómar", "10.0.0.3"), 30);
        assert_eq!(s.peer_by_nick("OMAR").unwrap().uid, "u2");
        assert!(s.peer_by_nick("nadie").is_none());
    }

    #[test]
    fn sweep_marks_offline_then_removes() {
        let mut s = store();
        s.upsert_peer(&origin("u1", "bob", "10.0.0.2"), 100);
        let offline = Duration::from_secs(60);
        let timeout = Duration::from_secs(600);

        let report = s.sweep_expired(offline, timeout, 150);
        assert_eq!(report, SweepReport::default());

        let report = s.sweep_expired(offline, timeout, 200);
        assert_eq!(report.went_offline, vec!["u1".to_string()]);
        assert_eq!(s.peer_by_uid("u1").unwrap().status, PeerStatus::Offline);

        assert!(s.peer_by_uid("u1").is_some());
        let report = s.sweep_expired(offline, timeout, 701);
        assert_eq!(report.removed, vec!["u1".to_string()]);
        assert!(s.peer_by_uid("u1").is_none());
    }

    #[test]
    fn group_lifecycle() {
        let mut s = store();
        let gid = group_id("Sala X");
        assert!(s.create_group(gid.clone(), "Sala X", None));
        assert!(!s.create_group(gid.clone(), "other", None));
        let me = Identity::new("me", "ana", Ipv4Addr::new(10, 0, 0, 1));
        assert!(s.add_member(&gid, me.to_member()));
        assert!(s.group(&gid).unwrap().is_public);
        assert_eq!(s.group_by_name("sala x").unwrap().gid, gid);

        assert!(s.remove_member(&gid, "me").is_some());
        assert!(s.delete_group(&gid).is_some());
        assert!(!s.add_member(&gid, me.to_member()));
    }

    #[test]
    fn password_acceptance() {
        let mut s = store();
        let gid = group_id("secret");
        s.create_group(gid.clone(), "secret", Some("h1".into()));
        let group = s.group(&gid).unwrap();
        assert!(!group.is_public);
        assert!(group.accepts(Some("h1")));
        assert!(!group.accepts(Some("h2")));
        assert!(!group.accepts(None));
    }

    #[test]
    fn fuzzy_ranking_tiers_and_recency() {
        let mut s = store();
        s.upsert_peer(&origin("u1", "Mariana", "10.0.0.2"), 50);
        s.upsert_peer(&origin("u2", "maria", "10.0.0.3"), 10);
        s.upsert_peer(&origin("u3", "Marta", "10.0.0.4"), 40);
        s.upsert_peer(&origin("u4", "MARIA", "10.0.0.5"), 20);
        s.upsert_peer(&origin("u5", "zzz", "10.0.0.6"), 99);

        let found: Vec<String> = s.fuzzy_find("María").into_iter().map(|c| c.uid).collect();
        // Exact (recent first), then substring, then similar.
        assert_eq!(found, vec!["u4", "u2", "u1", "u3"]);
    }

    #[test]
    fn fuzzy_includes_contacts_once() {
        let mut s = store();
        s.insert_contact(
            "c1",
            Contact {
                nick: "pedro".into(),
                last_ip: "10.0.0.8".into(),
                last_seen: 5,
                ..Contact::default()
            },
        );
        s.upsert_peer(&origin("c1", "pedro", "10.0.0.9"), 50);
        let found = s.fuzzy_find("pedro");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, CandidateSource::Peer);
        assert_eq!(found[0].ip, "10.0.0.9");
    }

    #[test]
    fn scan_dedup_by_ip_and_gid() {
        let mut s = store();
        let peer = |uid: &str, ip: &str| ScanEntry::Peer {
            uid: uid.into(),
            nick: "x".into(),
            ip: ip.into(),
            status_msg: None,
        };
        assert!(s.record_scan(peer("a", "10.0.0.2")));
        assert!(!s.record_scan(peer("a", "10.0.0.2")));
        assert!(s.record_scan(peer("b", "10.0.0.3")));
        let group = ScanEntry::Group {
            gid: GroupId::from("g"),
            name: "G".into(),
            ip: "10.0.0.2".into(),
        };
        assert!(s.record_scan(group.clone()));
        assert!(!s.record_scan(group));
        assert_eq!(s.take_scan_results().len(), 3);
        assert!(s.take_scan_results().is_empty());
    }

    #[test]
    fn block_requires_known_contact() {
        let mut s = store();
        assert!(!s.set_blocked("u1", true));
        s.upsert_peer(&origin("u1", "bob", "10.0.0.2"), 1);
        assert!(s.set_blocked("u1", true));
        assert!(s.is_blocked("u1"));
        assert_eq!(s.uid_by_nick("Bob").as_deref(), Some("u1"));
        s.set_blocked("u1", false);
        assert!(!s.is_blocked("u1"));
    }
}
