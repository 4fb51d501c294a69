/// gwc: command line client for a running gwcd.
///
/// Usage:
///   gwc --scan                        # one command, one reply
///   gwc --join "Sala X" clave         # quoting is preserved
///   gwc attach GROUP <gid>            # chat window on stdin/stdout
///   gwc attach PRIVATE <uid>
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use gwc_protocol::{default_base_dir, ChatKind, CLOSE_UI, MENTION_PREFIX, REGISTER_UI, SOCKET_NAME};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(
    name = "gwc",
    version,
    about = "Talk to the local GhostWhisperChat daemon",
    disable_help_flag = true,
    disable_version_flag = true,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Control socket of the daemon (default: ~/.ghostwhisperchat/gwc.sock).
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    mode: Option<Mode>,

    /// A daemon command such as `--scan` or `--dm ana`. `--help` lists them.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[derive(Subcommand)]
enum Mode {
    /// Attach to a chat and relay lines until it closes.
    Attach {
        /// PRIVATE or GROUP.
        kind: ChatKind,
        /// Peer uid or group id.
        chat_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let socket = cli
        .socket
        .unwrap_or_else(|| default_base_dir().join(SOCKET_NAME));

    match cli.mode {
        Some(Mode::Attach { kind, chat_id }) => attach(&socket, kind, &chat_id).await,
        None => {
            let line = if cli.command.is_empty() {
                "--help".to_string()
            } else {
                join_args(&cli.command)
            };
            let reply = transient(&socket, &line).await?;
            print!("{reply}");
            Ok(())
        }
    }
}

async fn connect(socket: &Path) -> anyhow::Result<UnixStream> {
    UnixStream::connect(socket)
        .await
        .with_context(|| format!("cannot reach gwcd at {} (is it running?)", socket.display()))
}

/// Send one command line and read the reply until the daemon closes.
async fn transient(socket: &Path, line: &str) -> anyhow::Result<String> {
    let mut stream = connect(socket).await?;
    stream.write_all(format!("{line}\n").as_bytes()).await?;
    let mut reply = String::new();
    stream
        .read_to_string(&mut reply)
        .await
        .context("reading the daemon's reply")?;
    Ok(reply)
}

async fn attach(socket: &Path, kind: ChatKind, chat_id: &str) -> anyhow::Result<()> {
    let stream = connect(socket).await?;
    let (reader, mut writer) = stream.into_split();
    writer
        .write_all(format!("{REGISTER_UI} {kind} {chat_id}\n").as_bytes())
        .await?;

    let mut from_daemon = BufReader::new(reader).lines();
    let mut from_user = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = from_daemon.next_line() => match line.context("reading from the daemon")? {
                Some(line) if line == CLOSE_UI => break,
                Some(line) => {
                    stdout.write_all(render(&line).as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                }
                None => {
                    eprintln!("[*] The daemon closed this chat.");
                    break;
                }
            },
            line = from_user.next_line() => match line? {
                Some(line) => writer.write_all(format!("{line}\n").as_bytes()).await?,
                // EOF closes the window
                None => break,
            },
        }
    }
    let _ = writer.shutdown().await;
    Ok(())
}

/// Rebuild a command line from shell arguments, quoting where needed.
fn join_args(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_empty() {
                "\"\"".to_string()
            } else if !arg.chars().any(char::is_whitespace) && !arg.contains(['"', '\'']) {
                arg.clone()
            } else if arg.contains('"') {
                format!("'{arg}'")
            } else {
                format!("\"{arg}\"")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Mentions ring the terminal bell.
fn render(line: &str) -> String {
    match line.strip_prefix(MENTION_PREFIX) {
        Some(rest) => format!("\x07{rest}"),
        None => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwc_protocol::runtime::split_command_line;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn joined_args_split_back_identically() {
        for case in [
            args(&["--scan"]),
            args(&["--join", "Sala X", "mi clave"]),
            args(&["--status", "dice \"hola\""]),
            args(&["--nick", ""]),
        ] {
            let line = join_args(&case);
            assert_eq!(split_command_line(&line).unwrap(), case, "{line}");
        }
    }

    #[test]
    fn mentions_are_marked() {
        assert_eq!(render("__MENTION__ (ana): hola @omar"), "\x07(ana): hola @omar");
        assert_eq!(render("(ana): hola"), "(ana): hola");
    }

    #[test]
    fn cli_parses_both_modes() {
        let cli = Cli::try_parse_from(["gwc", "--join", "Sala", "x"]).unwrap();
        assert!(cli.mode.is_none());
        assert_eq!(cli.command, args(&["--join", "Sala", "x"]));

        let cli = Cli::try_parse_from(["gwc", "attach", "group", "abc"]).unwrap();
        match cli.mode {
            Some(Mode::Attach { kind, chat_id }) => {
                assert_eq!(kind, ChatKind::Group);
                assert_eq!(chat_id, "abc");
            }
            None => panic!("expected attach"),
        }
    }

    #[tokio::test]
    async fn missing_daemon_is_a_clear_error() {
        let dir = std::env::temp_dir().join("gwc-cli-no-daemon.sock");
        let err = transient(&dir, "--info").await.unwrap_err();
        assert!(err.to_string().contains("is it running"));
    }
}
