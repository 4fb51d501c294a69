//! Optional plain-text chat transcripts (`--log`).

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::ProtocolError;

/// Appends timestamped lines to `<dir>/<chat_id>.log`.
#[derive(Debug, Clone)]
pub struct Transcript {
    dir: PathBuf,
}

impl Transcript {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, chat_id: &str) -> PathBuf {
        // chat ids are hex, but never let one escape the directory
        let safe: String = chat_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        self.dir.join(format!("{safe}.log"))
    }

    pub fn append(&self, chat_id: &str, line: &str) -> Result<(), ProtocolError> {
        let path = self.path_for(chat_id);
        let persistence = |source: std::io::Error| ProtocolError::Persistence {
            path: path.display().to_string(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(persistence)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(persistence)?;
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "[{stamp}] {line}").map_err(persistence)?;
        Ok(())
    }
}
