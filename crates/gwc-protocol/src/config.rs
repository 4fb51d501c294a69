//! Identity, preferences and contacts persistence.
//!
//! Everything lives under one base directory (`~/.ghostwhisperchat/` by
//! default): `config.json` for [`Settings`] and `contacts.json` for the
//! [`Contacts`] book. Loading never fails; a missing or corrupt file yields
//! defaults so the daemon always starts.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use crate::error::ProtocolError;

/// Directory name under `$HOME`.
pub const BASE_DIR_NAME: &str = ".ghostwhisperchat";

const SETTINGS_FILE: &str = "config.json";
const CONTACTS_FILE: &str = "contacts.json";

/// Default base directory: `~/.ghostwhisperchat/`.
///
/// Falls back to the current directory when no home can be resolved.
pub fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(BASE_DIR_NAME)
}

// ── Settings ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub user: UserSettings,
    pub preferences: Preferences,
    pub network: NetworkSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub nick: String,
    /// Empty until the first start generates one.
    pub uid: String,
    pub status_msg: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            nick: "NewUser".to_string(),
            uid: String::new(),
            status_msg: "Available".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub do_not_disturb: bool,
    pub invisible: bool,
    pub log_chat: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub bind_ip: Ipv4Addr,
    pub broadcast_ip: Ipv4Addr,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            bind_ip: Ipv4Addr::UNSPECIFIED,
            broadcast_ip: Ipv4Addr::BROADCAST,
        }
    }
}

// ── Contacts ──────────────────────────────────────────────────────────

/// One entry of the persistent address book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    pub nick: String,
    pub last_ip: String,
    pub last_seen: u64,
    pub trusted: bool,
    pub blocked: bool,
}

/// Address book keyed by uid.
pub type Contacts = HashMap<String, Contact>;

// ── Store trait ───────────────────────────────────────────────────────

/// Load/save contract for identity, preferences and contacts.
///
/// `load_*` must tolerate missing or corrupt data by returning defaults.
/// `save_*` errors are reported to the caller, which logs and carries on.
pub trait ConfigStore: Send + Sync {
    fn load_settings(&self) -> Settings;
    fn save_settings(&self, settings: &Settings) -> Result<(), ProtocolError>;
    fn load_contacts(&self) -> Contacts;
    fn save_contacts(&self, contacts: &Contacts) -> Result<(), ProtocolError>;
}

/// JSON files under a base directory, written atomically.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    base: PathBuf,
}

impl JsonConfigStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn settings_path(&self) -> PathBuf {
        self.base.join(SETTINGS_FILE)
    }

    pub fn contacts_path(&self) -> PathBuf {
        self.base.join(CONTACTS_FILE)
    }
}

impl ConfigStore for JsonConfigStore {
    fn load_settings(&self) -> Settings {
        load_json(&self.settings_path())
    }

    fn save_settings(&self, settings: &Settings) -> Result<(), ProtocolError> {
        write_json_atomic(&self.settings_path(), settings)
    }

    fn load_contacts(&self) -> Contacts {
        load_json(&self.contacts_path())
    }

    fn save_contacts(&self, contacts: &Contacts) -> Result<(), ProtocolError> {
        write_json_atomic(&self.contacts_path(), contacts)
    }
}

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            warn!("cannot read {}: {e}; using defaults", path.display());
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            warn!("corrupt {}: {e}; using defaults", path.display());
            T::default()
        }
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ProtocolError> {
    let persistence = |source: std::io::Error| ProtocolError::Persistence {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(persistence)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content).map_err(persistence)?;
    std::fs::rename(&tmp, path).map_err(persistence)?;
    Ok(())
}

/// Process-local store for `--ephemeral` runs and tests.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    settings: Mutex<Settings>,
    contacts: Mutex<Contacts>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
            contacts: Mutex::new(Contacts::new()),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load_settings(&self) -> Settings {
        self.settings.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn save_settings(&self, settings: &Settings) -> Result<(), ProtocolError> {
        if let Ok(mut slot) = self.settings.lock() {
            *slot = settings.clone();
        }
        Ok(())
    }

    fn load_contacts(&self) -> Contacts {
        self.contacts.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn save_contacts(&self, contacts: &Contacts) -> Result<(), ProtocolError> {
        if let Ok(mut slot) = self.contacts.lock() {
            *slot = contacts.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path().join("nested"));
        let settings = store.load_settings();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.user.nick, "NewUser");
        assert_eq!(settings.user.status_msg, "Available");
        assert!(store.load_contacts().is_empty());
    }

    #[test]
    fn corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path());
        std::fs::write(store.settings_path(), "{ not json").unwrap();
        std::fs::write(store.contacts_path(), "[1, 2").unwrap();
        assert_eq!(store.load_settings(), Settings::default());
        assert!(store.load_contacts().is_empty());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path());
        std::fs::write(
            store.settings_path(),
            r#"{"user": {"nick": "omar"}, "preferences": {"do_not_disturb": true}}"#,
        )
        .unwrap();
        let settings = store.load_settings();
        assert_eq!(settings.user.nick, "omar");
        assert_eq!(settings.user.status_msg, "Available");
        assert!(settings.preferences.do_not_disturb);
        assert_eq!(settings.network.broadcast_ip, Ipv4Addr::BROADCAST);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path().join("gwc"));

        let mut settings = Settings::default();
        settings.user.nick = "Ana".into();
        settings.user.uid = "0123456789abcdef".into();
        settings.preferences.invisible = true;
        store.save_settings(&settings).unwrap();
        assert_eq!(store.load_settings(), settings);
        assert!(!store.base_dir().join("config.json.tmp").exists());

        let mut contacts = Contacts::new();
        contacts.insert(
            "u1".into(),
            Contact {
                nick: "bob".into(),
                last_ip: "10.0.0.2".into(),
                last_seen: 42,
                trusted: false,
                blocked: true,
            },
        );
        store.save_contacts(&contacts).unwrap();
        assert_eq!(store.load_contacts(), contacts);
    }

    #[test]
    fn unwritable_location_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        // A regular file where the base directory should be.
        let store = JsonConfigStore::new(blocker.join("sub"));
        let err = store.save_settings(&Settings::default()).unwrap_err();
        assert!(matches!(err, ProtocolError::Persistence { .. }));
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryConfigStore::new();
        let mut settings = store.load_settings();
        settings.preferences.log_chat = true;
        store.save_settings(&settings).unwrap();
        assert!(store.load_settings().preferences.log_chat);
    }
}
