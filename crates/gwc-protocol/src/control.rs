//! Local control channel: a Unix socket the CLI and chat windows talk to.
//!
//! A connection whose first line is a command gets exactly one reply and is
//! closed. A connection opening with `__REGISTER_UI__ <KIND> <chat_id>`
//! becomes a UI session: every following line is chat input, and lines
//! from the daemon are streamed back until either side closes.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::runtime::{ChatKind, RuntimeHandle, REGISTER_UI};

/// File name of the socket inside the base directory.
pub const SOCKET_NAME: &str = "gwc.sock";

/// Lines queued for a slow UI before new ones are dropped.
const UI_QUEUE: usize = 256;

/// Accepts control connections and bridges them to the runtime.
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    handle: RuntimeHandle,
}

impl ControlServer {
    /// Bind the socket at `path`, replacing a stale file left by a crash.
    ///
    /// Fails if another daemon is answering on it.
    pub async fn bind(path: impl Into<PathBuf>, handle: RuntimeHandle) -> Result<Self, ProtocolError> {
        let path = path.into();
        if path.exists() {
            if UnixStream::connect(&path).await.is_ok() {
                return Err(ProtocolError::Control(format!(
                    "another daemon is already listening on {}",
                    path.display()
                )));
            }
            debug!("removing stale socket {}", path.display());
            std::fs::remove_file(&path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&path)?;
        info!("control channel on {}", path.display());
        Ok(Self {
            listener,
            path,
            handle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until the runtime stops.
    pub async fn run(self) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let handle = self.handle.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, handle).await {
                                    debug!("control connection ended: {e}");
                                }
                            });
                        }
                        Err(e) => warn!("control accept failed: {e}"),
                    }
                }
                _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {
                    if self.handle.is_closed() {
                        break;
                    }
                }
            }
        }
        let _ = std::fs::remove_file(&self.path);
        debug!("control channel closed");
    }
}

/// What the first line of a connection asks for.
#[derive(Debug, PartialEq, Eq)]
enum Opening {
    Command(String),
    Attach { kind: ChatKind, chat_id: String },
    Invalid(String),
}

fn parse_opening(line: &str) -> Opening {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix(REGISTER_UI) {
        let mut parts = rest.split_whitespace();
        return match (parts.next(), parts.next()) {
            (Some(kind), Some(chat_id)) => match kind.parse::<ChatKind>() {
                Ok(kind) => Opening::Attach {
                    kind,
                    chat_id: chat_id.to_string(),
                },
                Err(e) => Opening::Invalid(e.to_string()),
            },
            _ => Opening::Invalid(format!("usage: {REGISTER_UI} <PRIVATE|GROUP> <chat_id>")),
        };
    }
    if crate::runtime::is_command(line) {
        Opening::Command(line.to_string())
    } else {
        Opening::Invalid("expected a --command".to_string())
    }
}

async fn serve_connection(stream: UnixStream, handle: RuntimeHandle) -> Result<(), ProtocolError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let Some(first) = lines.next_line().await? else {
        return Ok(());
    };

    match parse_opening(&first) {
        Opening::Command(line) => {
            let reply = handle.execute(line).await?;
            writer.write_all(reply.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.shutdown().await?;
        }
        Opening::Invalid(reason) => {
            writer.write_all(format!("[X] {reason}\n").as_bytes()).await?;
            writer.shutdown().await?;
        }
        Opening::Attach { kind, chat_id } => {
            let (tx, mut rx) = mpsc::channel::<String>(UI_QUEUE);
            let session = handle.attach_ui(kind, chat_id.as_str(), tx).await?;
            debug!("{session} attached to {kind} {chat_id}");

            // Ends when the runtime drops the session's sender.
            let pump = tokio::spawn(async move {
                while let Some(line) = rx.recv().await {
                    if writer.write_all(line.as_bytes()).await.is_err()
                        || writer.write_all(b"\n").await.is_err()
                    {
                        break;
                    }
                }
                let _ = writer.shutdown().await;
            });

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if handle.ui_input(session, line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("{session} read failed: {e}");
                        break;
                    }
                }
            }
            handle.ui_detached(session).await;
            let _ = pump.await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_register_ui() {
        assert_eq!(
            parse_opening("__REGISTER_UI__ GROUP abc123"),
            Opening::Attach {
                kind: ChatKind::Group,
                chat_id: "abc123".into()
            }
        );
        assert_eq!(
            parse_opening("__REGISTER_UI__ PRIVADO u1\n"),
            Opening::Attach {
                kind: ChatKind::Private,
                chat_id: "u1".into()
            }
        );
        assert!(matches!(parse_opening("__REGISTER_UI__ GROUP"), Opening::Invalid(_)));
        assert!(matches!(parse_opening("__REGISTER_UI__ ROOM x"), Opening::Invalid(_)));
    }

    #[test]
    fn opening_commands() {
        assert_eq!(parse_opening("--scan"), Opening::Command("--scan".into()));
        assert_eq!(parse_opening("-s"), Opening::Command("-s".into()));
        assert!(matches!(parse_opening("hola"), Opening::Invalid(_)));
    }
}
