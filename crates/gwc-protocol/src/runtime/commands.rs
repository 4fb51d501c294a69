//! `--command` surface shared by transient control connections and attached
//! UIs, plus plain chat input from UIs.

use std::fmt::Write as _;
use std::net::Ipv4Addr;

use tracing::{debug, info};

use crate::envelope::{Body, DiscoverFilter};
use crate::normalize::{group_id, hash_password, normalize};
use crate::pending::Continuation;
use crate::store::ScanEntry;
use crate::types::{GroupId, APP_VERSION, DEST_ALL, PROTOCOL_VERSION};

use super::effect::RuntimeEffect;
use super::state::RuntimeState;
use super::{ChatKind, UiSessionId, CLOSE_UI, MSG_PREFIX};

/// Why a command line could not be split into arguments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SplitError {
    #[error("unbalanced quotes")]
    UnbalancedQuotes,
}

/// Split on whitespace, keeping `"double"` and `'single'` quoted runs
/// together. Quotes may appear inside a word (`name="Sala X"`).
pub fn split_command_line(line: &str) -> Result<Vec<String>, SplitError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        return Err(SplitError::UnbalancedQuotes);
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

struct CommandInfo {
    name: &'static str,
    aliases: &'static [&'static str],
    usage: &'static str,
    about: &'static str,
}

const COMMANDS: &[CommandInfo] = &[
    CommandInfo {
        name: "--help",
        aliases: &["-?", "--ayuda"],
        usage: "--help [command]",
        about: "List commands, or explain one.",
    },
    CommandInfo {
        name: "--scan",
        aliases: &["-s", "--enlinea", "--radar"],
        usage: "--scan",
        about: "Ask the network who is online.",
    },
    CommandInfo {
        name: "--scan-results",
        aliases: &["-sr", "--resultados-scan"],
        usage: "--scan-results",
        about: "Show the answers collected since the last scan.",
    },
    CommandInfo {
        name: "--groups",
        aliases: &["-g", "--grupos", "--salas"],
        usage: "--groups",
        about: "Ask the network for public groups.",
    },
    CommandInfo {
        name: "--join",
        aliases: &["-u", "--unirse", "--entrar"],
        usage: "--join <name> [password]",
        about: "Find a group by name and join it.",
    },
    CommandInfo {
        name: "--create-public",
        aliases: &["-o", "--crearpublico", "--sala"],
        usage: "--create-public <name>",
        about: "Create an open group.",
    },
    CommandInfo {
        name: "--create-private",
        aliases: &["-p", "--crearprivado"],
        usage: "--create-private <name> <password>",
        about: "Create a password protected group.",
    },
    CommandInfo {
        name: "--invite",
        aliases: &["--add", "-a", "--agregar", "--invitar"],
        usage: "--invite [group] <nick>",
        about: "Invite someone into a group (the current one inside a group window).",
    },
    CommandInfo {
        name: "--dm",
        aliases: &["-d", "--susurrar"],
        usage: "--dm <nick|ip>",
        about: "Ask someone for a private chat.",
    },
    CommandInfo {
        name: "--status",
        aliases: &["-e", "--estado"],
        usage: "--status <text>",
        about: "Set the status message others see.",
    },
    CommandInfo {
        name: "--info",
        aliases: &["-i", "--config"],
        usage: "--info",
        about: "Show identity and daemon state.",
    },
    CommandInfo {
        name: "--contacts",
        aliases: &["-c", "--contactos", "--agenda"],
        usage: "--contacts",
        about: "List live peers and saved contacts.",
    },
    CommandInfo {
        name: "--block",
        aliases: &["-b"],
        usage: "--block <nick>",
        about: "Silently drop everything from a contact.",
    },
    CommandInfo {
        name: "--unblock",
        aliases: &["-ub"],
        usage: "--unblock <nick>",
        about: "Undo --block.",
    },
    CommandInfo {
        name: "--nick",
        aliases: &["-n", "--apodo"],
        usage: "--nick <new nick>",
        about: "Change your nick.",
    },
    CommandInfo {
        name: "--dnd",
        aliases: &["-m", "--silenciar", "--mute"],
        usage: "--dnd",
        about: "Toggle do-not-disturb (chat requests are auto-rejected).",
    },
    CommandInfo {
        name: "--invisible",
        aliases: &["-v", "--fantasma"],
        usage: "--invisible",
        about: "Toggle answering discovery and sending heartbeats.",
    },
    CommandInfo {
        name: "--log",
        aliases: &["-r"],
        usage: "--log",
        about: "Toggle writing chat transcripts.",
    },
    CommandInfo {
        name: "--ls",
        aliases: &["-l", "--gente"],
        usage: "--ls",
        about: "Inside a window: list group members or show the peer.",
    },
    CommandInfo {
        name: "--exit",
        aliases: &["-x", "--salir"],
        usage: "--exit",
        about: "Close this window, or stop the daemon from a terminal.",
    },
];

fn lookup(word: &str) -> Option<&'static CommandInfo> {
    COMMANDS
        .iter()
        .find(|c| c.name == word || c.aliases.contains(&word))
}

/// True if a control connection opens with a command, short aliases included.
pub(crate) fn is_command(line: &str) -> bool {
    let first = line.split_whitespace().next().unwrap_or_default();
    first.starts_with("--") || lookup(first).is_some()
}

/// Chat windows only treat `--` lines as commands; "-n hola" is chat.
fn is_ui_command(line: &str) -> bool {
    line.starts_with("--")
}

impl RuntimeState {
    /// Run a transient control-channel command. Exactly one reply.
    pub fn execute(&mut self, line: &str, now: u64) -> (String, Vec<RuntimeEffect>) {
        self.run_command(line.trim(), None, now)
    }

    /// A line typed into an attached UI: chat text or a command.
    pub fn handle_ui_input(&mut self, session: UiSessionId, line: &str, now: u64) -> Vec<RuntimeEffect> {
        let Some((kind, chat_id)) = self.attached_chat(session) else {
            debug!("input for unknown {session}");
            return Vec::new();
        };
        let chat_id = chat_id.to_string();
        let line = line.strip_prefix(MSG_PREFIX).unwrap_or(line).trim();
        if line.is_empty() {
            return Vec::new();
        }

        if is_ui_command(line) {
            let (reply, mut effects) = self.run_command(line, Some((kind, chat_id.as_str())), now);
            for reply_line in reply.lines() {
                let line = if reply_line == CLOSE_UI {
                    reply_line.to_string()
                } else {
                    format!("[SYSTEM] {reply_line}")
                };
                effects.push(RuntimeEffect::UiLine { session, line });
            }
            return effects;
        }

        let sent = match kind {
            ChatKind::Group => self.send_group_message(&GroupId::from(chat_id.as_str()), line),
            ChatKind::Private => self.send_private_message(&chat_id, line),
        };
        let Some(mut effects) = sent else {
            let text = match kind {
                ChatKind::Group => "[SYSTEM] [X] You are not in this group.",
                ChatKind::Private => "[SYSTEM] [X] Unknown peer.",
            };
            return vec![RuntimeEffect::UiLine {
                session,
                line: text.to_string(),
            }];
        };
        let own = format!("({}): {line}", self.identity.nick);
        self.push_transcript(&mut effects, &chat_id, &own);
        effects
    }

    fn run_command(
        &mut self,
        line: &str,
        chat: Option<(ChatKind, &str)>,
        now: u64,
    ) -> (String, Vec<RuntimeEffect>) {
        let args = match split_command_line(line) {
            Ok(args) => args,
            Err(e) => return (format!("[X] Syntax error: {e}"), Vec::new()),
        };
        let Some((word, rest)) = args.split_first() else {
            return (String::new(), Vec::new());
        };
        let Some(info) = lookup(word) else {
            return (format!("[?] Unknown command: {word}. Try --help."), Vec::new());
        };
        debug!("command {} {:?}", info.name, rest);

        let mut effects = Vec::new();
        let reply = match info.name {
            "--help" => help(rest.first().map(String::as_str)),
            "--scan" => self.cmd_scan(&mut effects),
            "--scan-results" => self.cmd_scan_results(),
            "--groups" => self.cmd_groups(&mut effects),
            "--join" => self.cmd_join(rest, now, &mut effects),
            "--create-public" => self.cmd_create(rest.first(), None, chat, &mut effects),
            "--create-private" => match rest.get(1) {
                Some(password) => self.cmd_create(rest.first(), Some(password), chat, &mut effects),
                None => usage(info),
            },
            "--invite" => self.cmd_invite(rest, chat, now, &mut effects),
            "--dm" => self.cmd_dm(rest.first(), now, &mut effects),
            "--status" => self.cmd_status(rest),
            "--info" => self.cmd_info(),
            "--contacts" => self.cmd_contacts(),
            "--block" => self.cmd_block(rest.first(), true),
            "--unblock" => self.cmd_block(rest.first(), false),
            "--nick" => self.cmd_nick(rest),
            "--dnd" => {
                let on = !self.settings.preferences.do_not_disturb;
                self.settings.preferences.do_not_disturb = on;
                self.save_settings();
                format!("[*] Do not disturb: {}", on_off(on))
            }
            "--invisible" => {
                let on = !self.settings.preferences.invisible;
                self.settings.preferences.invisible = on;
                self.save_settings();
                format!("[*] Invisible: {}", on_off(on))
            }
            "--log" => {
                let on = !self.settings.preferences.log_chat;
                self.settings.preferences.log_chat = on;
                self.save_settings();
                format!("[*] Chat log: {}", on_off(on))
            }
            "--ls" => self.cmd_ls(chat),
            "--exit" => match chat {
                Some(_) => CLOSE_UI.to_string(),
                None => {
                    info!("exit requested over the control channel");
                    self.stop();
                    "[*] Daemon shutting down.".to_string()
                }
            },
            _ => usage(info),
        };
        (reply, effects)
    }

    fn cmd_scan(&mut self, effects: &mut Vec<RuntimeEffect>) -> String {
        self.store.clear_scan();
        effects.push(RuntimeEffect::Broadcast(self.envelope(
            DEST_ALL,
            Body::Discover {
                filter: DiscoverFilter::Peers,
            },
        )));
        "[*] Scanning the network... use --scan-results to see who answered.".to_string()
    }

    fn cmd_groups(&mut self, effects: &mut Vec<RuntimeEffect>) -> String {
        self.store.clear_scan();
        effects.push(RuntimeEffect::Broadcast(self.envelope(
            DEST_ALL,
            Body::Discover {
                filter: DiscoverFilter::Groups,
            },
        )));
        "[*] Looking for public groups... use --scan-results to list them.".to_string()
    }

    fn cmd_scan_results(&mut self) -> String {
        let entries = self.store.take_scan_results();
        if entries.is_empty() {
            return "[*] Nothing found yet. Try --scan or --groups first.".to_string();
        }
        let mut out = format!("[*] {} result(s):", entries.len());
        for entry in entries {
            match entry {
                ScanEntry::Peer {
                    nick,
                    ip,
                    status_msg,
                    ..
                } => {
                    let status = status_msg.unwrap_or_default();
                    let _ = write!(out, "\n  [PEER]  {nick} ({ip}) {status}");
                }
                ScanEntry::Group { gid, name, ip } => {
                    let _ = write!(out, "\n  [GROUP] {name} ({ip}) id {}", gid.short());
                }
            }
        }
        out
    }

    fn cmd_join(&mut self, rest: &[String], now: u64, effects: &mut Vec<RuntimeEffect>) -> String {
        let Some(name) = rest.first() else {
            return "[X] Usage: --join <name> [password]".to_string();
        };
        if self.store.group_by_name(name).is_some() {
            return format!("[*] You are already in '{name}'.");
        }
        let password_hash = rest.get(1).map(|p| hash_password(p));
        let expires_at = now + self.config.pending_ttl.as_secs();
        let id = self.pending.insert(
            Continuation::JoinGroup {
                name_norm: normalize(name),
                password_hash,
            },
            expires_at,
        );
        debug!("{id}: searching for {name}");
        effects.push(RuntimeEffect::Broadcast(self.envelope(
            DEST_ALL,
            Body::Search {
                group_name: name.clone(),
            },
        )));
        format!("[*] Searching for group '{name}'...")
    }

    fn cmd_create(
        &mut self,
        name: Option<&String>,
        password: Option<&String>,
        chat: Option<(ChatKind, &str)>,
        effects: &mut Vec<RuntimeEffect>,
    ) -> String {
        let Some(name) = name else {
            return "[X] Usage: --create-public <name> | --create-private <name> <password>".to_string();
        };
        if normalize(name).is_empty() {
            return "[X] Group name cannot be empty.".to_string();
        }
        let gid = group_id(name);
        if !self.create_local_group(gid.clone(), name, password.map(|p| hash_password(p))) {
            return format!("[!] Group '{name}' already exists.");
        }
        info!("created group {name} ({})", gid.short());
        // a window already showing this chat would get the notice from the reply
        if chat.map(|(_, id)| id) != Some(gid.as_str()) {
            self.open_chat(effects, ChatKind::Group, gid.as_str(), name, "[*] Group created.");
        }
        let visibility = if password.is_some() { "private" } else { "public" };
        format!("[+] Group '{name}' created ({visibility}).")
    }

    fn cmd_invite(
        &mut self,
        rest: &[String],
        chat: Option<(ChatKind, &str)>,
        now: u64,
        effects: &mut Vec<RuntimeEffect>,
    ) -> String {
        let (gid, nick) = match (rest, chat) {
            ([nick], Some((ChatKind::Group, chat_id))) => (GroupId::from(chat_id), nick),
            ([group, nick], _) => match self.store.group_by_name(group) {
                Some(g) => (g.gid.clone(), nick),
                None => return format!("[X] You are not in a group called '{group}'."),
            },
            _ => return "[X] Usage: --invite <group> <nick> (or --invite <nick> inside a group)".to_string(),
        };
        let Some(group) = self.store.group(&gid) else {
            return "[X] You are not in this group.".to_string();
        };
        let group_name = group.name.clone();

        if let Some(peer) = self.store.peer_by_nick(nick) {
            let (uid, ip, port) = (peer.uid.clone(), peer.ip.clone(), peer.port_priv);
            effects.extend(self.invite(&gid, &uid, &ip, port));
            return format!("[*] Invitation to '{group_name}' sent to {nick}.");
        }

        let reply = self.ask_network(nick, effects);
        let id = self.pending.insert(
            Continuation::InviteToGroup {
                nick_norm: normalize(nick),
                gid,
            },
            now + self.config.pending_ttl.as_secs(),
        );
        debug!("{id}: invite {nick} to {group_name} once it answers");
        reply
    }

    fn cmd_dm(&mut self, target: Option<&String>, now: u64, effects: &mut Vec<RuntimeEffect>) -> String {
        let Some(target) = target else {
            return "[X] Usage: --dm <nick|ip>".to_string();
        };
        if let Ok(ip) = target.parse::<Ipv4Addr>() {
            let ip = ip.to_string();
            let uid = self.store.peer_by_ip(&ip).map(|p| p.uid.clone()).unwrap_or_default();
            effects.extend(self.request_private(&uid, &ip, 0));
            return format!("[*] Chat request sent to {ip}.");
        }
        if let Some(peer) = self.store.peer_by_nick(target) {
            let (uid, ip, port, nick) = (peer.uid.clone(), peer.ip.clone(), peer.port_priv, peer.nick.clone());
            effects.extend(self.request_private(&uid, &ip, port));
            return format!("[*] Chat request sent to {nick}.");
        }

        let reply = self.ask_network(target, effects);
        let id = self.pending.insert(
            Continuation::OpenPrivate {
                nick_norm: normalize(target),
            },
            now + self.config.pending_ttl.as_secs(),
        );
        debug!("{id}: chat request to {target} once it answers");
        reply
    }

    /// `WHO_NAME` broadcast plus "did you mean" suggestions.
    fn ask_network(&self, nick: &str, effects: &mut Vec<RuntimeEffect>) -> String {
        effects.push(RuntimeEffect::Broadcast(self.envelope(
            DEST_ALL,
            Body::WhoName {
                nick: nick.to_string(),
            },
        )));
        let mut reply = format!("[?] '{nick}' is not known yet, asking the network...");
        let suggestions: Vec<String> = self
            .store
            .fuzzy_find(nick)
            .into_iter()
            .take(3)
            .map(|c| c.nick)
            .collect();
        if !suggestions.is_empty() {
            let _ = write!(reply, "\n    Did you mean: {}?", suggestions.join(", "));
        }
        reply
    }

    fn cmd_status(&mut self, rest: &[String]) -> String {
        if rest.is_empty() {
            return "[X] Usage: --status <text>".to_string();
        }
        let text = rest.join(" ");
        self.identity.status_msg = Some(text.clone());
        self.save_settings();
        format!("[*] Status set to: {text}")
    }

    fn cmd_info(&self) -> String {
        let prefs = &self.settings.preferences;
        format!(
            "UID:       {}\nNick:      {}\nIP:        {}\nStatus:    {}\nVersion:   {APP_VERSION} (protocol {PROTOCOL_VERSION})\nPeers:     {}\nGroups:    {}\nPending:   {}\nDND: {}  Invisible: {}  Log: {}",
            self.identity.uid,
            self.identity.nick,
            self.identity.ip,
            self.identity.status_msg.as_deref().unwrap_or("-"),
            self.store.peer_count(),
            self.store.group_count(),
            self.pending.len(),
            on_off(prefs.do_not_disturb),
            on_off(prefs.invisible),
            on_off(prefs.log_chat),
        )
    }

    fn cmd_contacts(&self) -> String {
        let mut peers: Vec<_> = self.store.peers().collect();
        peers.sort_by(|a, b| a.nick.cmp(&b.nick));
        let mut saved: Vec<_> = self
            .store
            .contacts()
            .iter()
            .filter(|(uid, _)| self.store.peer_by_uid(uid).is_none())
            .collect();
        saved.sort_by(|a, b| a.1.nick.cmp(&b.1.nick));
        if peers.is_empty() && saved.is_empty() {
            return "[*] No contacts yet.".to_string();
        }

        let mut out = String::from("[*] Contacts:");
        for peer in peers {
            let blocked = if self.store.is_blocked(&peer.uid) { " [blocked]" } else { "" };
            let status = peer.status_msg.as_deref().unwrap_or("");
            let _ = write!(
                out,
                "\n  {:<16} {:<15} {} {status}{blocked}",
                peer.nick, peer.ip, peer.status
            );
        }
        for (_, contact) in saved {
            let blocked = if contact.blocked { " [blocked]" } else { "" };
            let _ = write!(out, "\n  {:<16} {:<15} saved{blocked}", contact.nick, contact.last_ip);
        }
        out
    }

    fn cmd_block(&mut self, nick: Option<&String>, blocked: bool) -> String {
        let Some(nick) = nick else {
            return "[X] Usage: --block <nick> | --unblock <nick>".to_string();
        };
        let Some(uid) = self.store.uid_by_nick(nick) else {
            return format!("[X] Unknown contact: {nick}");
        };
        self.store.set_blocked(&uid, blocked);
        if blocked {
            format!("[*] {nick} blocked.")
        } else {
            format!("[*] {nick} unblocked.")
        }
    }

    fn cmd_nick(&mut self, rest: &[String]) -> String {
        let nick = rest.join(" ");
        if normalize(&nick).is_empty() {
            return "[X] Usage: --nick <new nick>".to_string();
        }
        self.identity.nick = nick.clone();
        self.save_settings();
        format!("[*] You are now known as {nick}.")
    }

    fn cmd_ls(&self, chat: Option<(ChatKind, &str)>) -> String {
        match chat {
            Some((ChatKind::Group, chat_id)) => {
                let Some(group) = self.store.group(&GroupId::from(chat_id)) else {
                    return "[X] You are not in this group.".to_string();
                };
                let mut out = format!("Members of '{}':", group.name);
                for member in group.members.values() {
                    let me = if member.uid == self.identity.uid { " (you)" } else { "" };
                    let _ = write!(out, "\n  {} ({}) {}{me}", member.nick, member.ip, member.status);
                }
                out
            }
            Some((ChatKind::Private, uid)) => match self.store.peer_by_uid(uid) {
                Some(peer) => format!(
                    "{} ({}) {} {}",
                    peer.nick,
                    peer.ip,
                    peer.status,
                    peer.status_msg.as_deref().unwrap_or("")
                ),
                None => "[X] Unknown peer.".to_string(),
            },
            None => "[X] --ls only works inside a chat window.".to_string(),
        }
    }
}

fn help(topic: Option<&str>) -> String {
    match topic {
        None => {
            let mut out = String::from("Commands:");
            for c in COMMANDS {
                let _ = write!(out, "\n  {:<36} {}", c.usage, c.about);
            }
            out
        }
        Some(word) => {
            let word = if word.starts_with('-') {
                word.to_string()
            } else {
                format!("--{word}")
            };
            match lookup(&word) {
                Some(c) => format!("{}\n  {}\n  aliases: {}", c.usage, c.about, c.aliases.join(", ")),
                None => format!("[?] Unknown command: {word}"),
            }
        }
    }
}

fn usage(info: &CommandInfo) -> String {
    format!("[X] Usage: {}", info.usage)
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}
