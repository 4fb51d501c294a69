mod bootstrap;
mod events;

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use events::{EventSink, EventStarted, EventStopped};
use gwc_protocol::{
    default_base_dir, AutoPrompter, Collaborators, CommandNotifier, CommandPrompter, ConfigStore,
    ControlServer, JsonConfigStore, LogNotifier, MemoryConfigStore, Notifier, Prompter,
    ProtocolRuntime, RuntimeChannels, RuntimeConfig, RuntimeState, Store, Transcript, SOCKET_NAME,
};
use gwc_transport::{LanNode, TransportConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "gwcd", version, about = "GhostWhisperChat daemon: serverless LAN chat")]
struct Cli {
    /// Directory for config.json, contacts.json, logs/ and the socket.
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Local address to bind all three ports on.
    #[arg(long)]
    bind_ip: Option<Ipv4Addr>,

    /// Destination of discovery broadcasts.
    #[arg(long)]
    broadcast_ip: Option<Ipv4Addr>,

    /// Use this nick (persisted).
    #[arg(long)]
    nick: Option<String>,

    /// Forget peers silent for this long.
    #[arg(long, default_value = "86400")]
    peer_timeout_secs: u64,

    /// Keep identity and contacts in memory only.
    #[arg(long)]
    ephemeral: bool,

    /// Accept every chat request and invitation without asking.
    #[arg(long, conflicts_with = "prompt_cmd")]
    auto_accept: bool,

    /// Confirmation program: `<cmd> <title> <text>`, exit 0 accepts.
    #[arg(long)]
    prompt_cmd: Option<String>,

    /// Notification program: `<cmd> <title> <text>`.
    #[arg(long)]
    notify_cmd: Option<String>,

    /// Chat window launcher: `<cmd> <PRIVATE|GROUP> <chat_id> <title>`.
    #[arg(long)]
    open_cmd: Option<String>,

    /// Control socket path (default: <config-dir>/gwc.sock).
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Print runtime events as JSON lines on stdout.
    #[arg(long)]
    jsonl: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base = cli.config_dir.clone().unwrap_or_else(default_base_dir);

    let config: Arc<dyn ConfigStore> = if cli.ephemeral {
        Arc::new(MemoryConfigStore::new())
    } else {
        Arc::new(JsonConfigStore::new(&base))
    };
    let settings = bootstrap::ensure_identity(config.as_ref(), cli.nick.as_deref());

    // Ports first: a taken port is fatal before anything else starts.
    let bind_ip = cli.bind_ip.unwrap_or(settings.network.bind_ip);
    let broadcast_ip = cli.broadcast_ip.unwrap_or(settings.network.broadcast_ip);
    let node = LanNode::bind(TransportConfig::new().bind_ip(bind_ip).broadcast_ip(broadcast_ip))
        .await
        .with_context(|| format!("cannot open the chat ports on {bind_ip}"))?;
    let ip = bootstrap::detect_local_ip(bind_ip);

    let runtime_config = RuntimeConfig {
        peer_timeout: Duration::from_secs(cli.peer_timeout_secs),
        ..RuntimeConfig::default()
    };
    let state = RuntimeState::from_settings(settings, ip, Store::new(config), runtime_config);
    let identity = state.identity().clone();

    let prompter: Arc<dyn Prompter> = match &cli.prompt_cmd {
        Some(program) => Arc::new(CommandPrompter::new(program)),
        None => Arc::new(AutoPrompter::new(cli.auto_accept)),
    };
    let notifier: Arc<dyn Notifier> = match &cli.notify_cmd {
        Some(program) => Arc::new(CommandNotifier::new(program)),
        None => Arc::new(LogNotifier),
    };
    let collaborators = Collaborators {
        prompter,
        notifier,
        transcript: Some(Transcript::new(base.join("logs"))),
    };

    let RuntimeChannels {
        handle,
        events: mut event_rx,
        mut task,
    } = ProtocolRuntime::spawn(node, state, collaborators);

    let socket = cli.socket.clone().unwrap_or_else(|| base.join(SOCKET_NAME));
    let server = match ControlServer::bind(&socket, handle.clone()).await {
        Ok(server) => server,
        Err(e) => {
            handle.shutdown().await;
            let _ = task.await;
            return Err(e).context("cannot open the control socket");
        }
    };
    let control = tokio::spawn(server.run());

    eprintln!("gwcd v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("UID:    {}", identity.uid);
    eprintln!("Nick:   {}", identity.nick);
    eprintln!("IP:     {ip}");
    eprintln!("Socket: {}", socket.display());
    eprintln!();

    let sink = EventSink {
        open_cmd: cli.open_cmd.clone(),
        jsonl: cli.jsonl,
    };
    if sink.jsonl {
        events::emit(&EventStarted {
            event: "started",
            uid: identity.uid.clone(),
            nick: identity.nick.clone(),
            ip: ip.to_string(),
            socket: socket.display().to_string(),
            timestamp: events::now_iso(),
        });
    }

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCtrl+C received, shutting down...");
            signal_handle.shutdown().await;
        }
    });

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => sink.handle(&event),
            joined = &mut task => {
                joined.context("runtime task failed")?;
                break;
            }
        }
    }
    while let Ok(event) = event_rx.try_recv() {
        sink.handle(&event);
    }

    let _ = control.await;
    if sink.jsonl {
        events::emit(&EventStopped::new());
    }
    info!("daemon stopped");
    Ok(())
}
