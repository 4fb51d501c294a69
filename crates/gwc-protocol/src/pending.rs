//! Pending correlations: user actions waiting on a discovery reply.
//!
//! Each entry has its own id and expiry, so two `--join` commands for
//! different rooms are both kept and resolved independently.

use std::collections::BTreeMap;
use std::fmt;

use crate::types::GroupId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "corr#{}", self.0)
    }
}

/// What to do once the awaited reply arrives. Names are normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Waiting for `FOUND(GROUP)` matching this room name.
    JoinGroup {
        name_norm: String,
        password_hash: Option<String>,
    },
    /// Waiting for `IAM` from this nick, then `INVITE` it to `gid`.
    InviteToGroup { nick_norm: String, gid: GroupId },
    /// Waiting for `IAM` from this nick, then `CHAT_REQ` it.
    OpenPrivate { nick_norm: String },
}

#[derive(Debug, Clone)]
struct Entry {
    expires_at: u64,
    continuation: Continuation,
}

#[derive(Debug, Default)]
pub struct PendingTable {
    next_id: u64,
    entries: BTreeMap<CorrelationId, Entry>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, continuation: Continuation, expires_at: u64) -> CorrelationId {
        self.next_id += 1;
        let id = CorrelationId(self.next_id);
        self.entries.insert(
            id,
            Entry {
                expires_at,
                continuation,
            },
        );
        id
    }

    /// Remove and return every live entry the predicate accepts, oldest first.
    ///
    /// Entries whose expiry is at or before `now` are left for [`sweep`](Self::sweep).
    pub fn take_matching<F>(&mut self, now: u64, mut accept: F) -> Vec<(CorrelationId, Continuation)>
    where
        F: FnMut(&Continuation) -> bool,
    {
        let ids: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at > now && accept(&e.continuation))
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|e| (id, e.continuation)))
            .collect()
    }

    /// Remove only the oldest live entry the predicate accepts.
    pub fn take_first<F>(&mut self, now: u64, mut accept: F) -> Option<(CorrelationId, Continuation)>
    where
        F: FnMut(&Continuation) -> bool,
    {
        let id = self
            .entries
            .iter()
            .find(|(_, e)| e.expires_at > now && accept(&e.continuation))
            .map(|(id, _)| *id)?;
        self.entries.remove(&id).map(|e| (id, e.continuation))
    }

    /// Drop entries past their expiry.
    pub fn sweep(&mut self, now: u64) -> Vec<(CorrelationId, Continuation)> {
        let expired: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|e| (id, e.continuation)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CorrelationId, &Continuation)> {
        self.entries.iter().map(|(id, e)| (*id, &e.continuation))
    }
}
