//! Private 1:1 session state machine.
//!
//! ```text
//! Idle ──CHAT_REQ sent──▶ Requested ──CHAT_ACK──▶ Active ──CHAT_BYE──▶ Closed
//!                              └──────CHAT_NO──▶ Rejected
//! Idle ──CHAT_REQ recv──▶ Prompting ──accept──▶ Active
//!                              └──reject/timeout──▶ Rejected
//! ```
//!
//! Outbound requests are tracked by IP because `--dm <ip>` does not know the
//! remote uid until the answer arrives.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// We sent `CHAT_REQ` and wait for the answer.
    Requested,
    /// A `CHAT_REQ` arrived and the local user is being asked.
    Prompting,
    Active,
    Rejected { reason: String },
    Closed,
}

#[derive(Debug, Default)]
pub struct SessionTable {
    by_uid: HashMap<String, SessionState>,
    requested_ips: HashSet<String>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for a peer, looking at outbound requests by IP as well.
    pub fn state(&self, uid: &str, ip: &str) -> SessionState {
        match self.by_uid.get(uid) {
            Some(state) => state.clone(),
            None if self.requested_ips.contains(ip) => SessionState::Requested,
            None => SessionState::Idle,
        }
    }

    pub fn state_by_uid(&self, uid: &str) -> SessionState {
        self.by_uid.get(uid).cloned().unwrap_or(SessionState::Idle)
    }

    pub fn is_requested_ip(&self, ip: &str) -> bool {
        self.requested_ips.contains(ip)
    }

    /// `CHAT_REQ` sent to `ip` (and to `uid`, when known).
    pub fn request(&mut self, uid: Option<&str>, ip: &str) {
        self.requested_ips.insert(ip.to_string());
        if let Some(uid) = uid {
            self.by_uid.insert(uid.to_string(), SessionState::Requested);
        }
    }

    /// The `CHAT_REQ` could not be delivered.
    pub fn cancel_request(&mut self, uid: Option<&str>, ip: &str) {
        self.requested_ips.remove(ip);
        if let Some(uid) = uid {
            if self.by_uid.get(uid) == Some(&SessionState::Requested) {
                self.by_uid.remove(uid);
            }
        }
    }

    /// `CHAT_ACK` received. Only honored for a request we made.
    pub fn on_ack(&mut self, uid: &str, ip: &str) -> bool {
        let by_ip = self.requested_ips.remove(ip);
        let by_uid = self.by_uid.get(uid) == Some(&SessionState::Requested);
        if !(by_ip || by_uid) {
            return false;
        }
        self.by_uid.insert(uid.to_string(), SessionState::Active);
        true
    }

    /// `CHAT_NO` received for a request we made.
    pub fn on_no(&mut self, uid: &str, ip: &str, reason: &str) -> bool {
        let by_ip = self.requested_ips.remove(ip);
        let by_uid = self.by_uid.get(uid) == Some(&SessionState::Requested);
        if !(by_ip || by_uid) {
            return false;
        }
        self.by_uid.insert(
            uid.to_string(),
            SessionState::Rejected {
                reason: reason.to_string(),
            },
        );
        true
    }

    /// Incoming `CHAT_REQ`. Returns `false` if a prompt is already open for
    /// this peer, so the request must not be prompted again.
    pub fn on_incoming_request(&mut self, uid: &str) -> bool {
        if self.by_uid.get(uid) == Some(&SessionState::Prompting) {
            return false;
        }
        self.by_uid.insert(uid.to_string(), SessionState::Prompting);
        true
    }

    /// The local user answered the prompt.
    pub fn on_prompt_answer(&mut self, uid: &str, accepted: bool) {
        let next = if accepted {
            SessionState::Active
        } else {
            SessionState::Rejected {
                reason: "Rejected".to_string(),
            }
        };
        self.by_uid.insert(uid.to_string(), next);
    }

    /// Mark the session open without a handshake (a message arrived on a
    /// chat both sides already consider open).
    pub fn activate(&mut self, uid: &str) {
        self.by_uid.insert(uid.to_string(), SessionState::Active);
    }

    /// `CHAT_BYE` sent or received. Returns whether the session was active.
    pub fn close(&mut self, uid: &str) -> bool {
        let was_active = self.by_uid.get(uid) == Some(&SessionState::Active);
        self.by_uid.insert(uid.to_string(), SessionState::Closed);
        was_active
    }
}
