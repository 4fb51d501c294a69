//! Integration tests: the Unix control socket in front of a live runtime.

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gwc_protocol::normalize::group_id;
use gwc_protocol::{
    Collaborators, ControlServer, MemoryConfigStore, ProtocolRuntime, RuntimeChannels,
    RuntimeConfig, RuntimeState, Settings, Store, SOCKET_NAME,
};
use gwc_transport::{LanNode, TransportConfig};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;

async fn start(dir: &Path) -> RuntimeChannels {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let node = LanNode::bind(
        TransportConfig::new()
            .bind_ip(Ipv4Addr::LOCALHOST)
            .broadcast_ip(Ipv4Addr::LOCALHOST)
            .ports(0, 0, 0),
    )
    .await
    .unwrap();
    let mut settings = Settings::default();
    settings.user.uid = "uid-test".into();
    settings.user.nick = "tester".into();
    let store = Store::new(Arc::new(MemoryConfigStore::new()));
    let state = RuntimeState::from_settings(settings, Ipv4Addr::LOCALHOST, store, RuntimeConfig::default());
    let channels = ProtocolRuntime::spawn(node, state, Collaborators::default());

    let server = ControlServer::bind(dir.join(SOCKET_NAME), channels.handle.clone())
        .await
        .unwrap();
    tokio::spawn(server.run());
    channels
}

async fn transient(dir: &Path, line: &str) -> String {
    let mut stream = UnixStream::connect(dir.join(SOCKET_NAME)).await.unwrap();
    stream.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    let mut reply = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut reply))
        .await
        .expect("reply timed out")
        .unwrap();
    reply
}

async fn next_line(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Option<String> {
    tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("line timed out")
        .unwrap()
}

#[tokio::test]
async fn transient_command_gets_one_reply() {
    let dir = tempfile::tempdir().unwrap();
    let _channels = start(dir.path()).await;

    let reply = transient(dir.path(), "--info").await;
    assert!(reply.contains("Nick:      tester"), "{reply}");
    assert!(reply.contains("Groups:    0"), "{reply}");

    let reply = transient(dir.path(), "--join \"Sala").await;
    assert_eq!(reply, "[X] Syntax error: unbalanced quotes\n");

    let reply = transient(dir.path(), "hola").await;
    assert!(reply.starts_with("[X]"), "{reply}");
}

#[tokio::test]
async fn ui_session_round_trip_and_leave_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let _channels = start(dir.path()).await;
    transient(dir.path(), "--create-public Sala").await;
    let gid = group_id("Sala");

    let stream = UnixStream::connect(dir.path().join(SOCKET_NAME)).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    writer
        .write_all(format!("__REGISTER_UI__ GROUP {gid}\n").as_bytes())
        .await
        .unwrap();
    assert_eq!(
        next_line(&mut lines).await.unwrap(),
        format!("[*] Connected to daemon. ID: {gid}")
    );

    writer.write_all(b"--ls\n").await.unwrap();
    assert_eq!(next_line(&mut lines).await.unwrap(), "[SYSTEM] Members of 'Sala':");
    assert_eq!(
        next_line(&mut lines).await.unwrap(),
        "[SYSTEM]   tester (127.0.0.1) ONLINE (you)"
    );

    writer.write_all(b"--exit\n").await.unwrap();
    assert_eq!(next_line(&mut lines).await.unwrap(), "__CLOSE_UI__");
    drop(writer);
    assert_eq!(next_line(&mut lines).await, None);

    // closing the window left the group
    let mut groups = String::new();
    for _ in 0..50 {
        groups = transient(dir.path(), "--info").await;
        if groups.contains("Groups:    0") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(groups.contains("Groups:    0"), "{groups}");
}

#[tokio::test]
async fn reattach_closes_previous_window() {
    let dir = tempfile::tempdir().unwrap();
    let _channels = start(dir.path()).await;

    let open = |chat: &'static str| {
        let path = dir.path().join(SOCKET_NAME);
        async move {
            let stream = UnixStream::connect(path).await.unwrap();
            let (reader, mut writer) = stream.into_split();
            writer
                .write_all(format!("__REGISTER_UI__ PRIVATE {chat}\n").as_bytes())
                .await
                .unwrap();
            let mut lines = BufReader::new(reader).lines();
            let greeting = next_line(&mut lines).await.unwrap();
            (writer, lines, greeting)
        }
    };

    let (_w1, mut first, greeting) = open("uid-x").await;
    assert_eq!(greeting, "[*] Connected to daemon. ID: uid-x");
    let (_w2, _second, _) = open("uid-x").await;

    assert_eq!(next_line(&mut first).await.unwrap(), "__CLOSE_UI__");
    assert_eq!(next_line(&mut first).await, None);
}

#[tokio::test]
async fn exit_stops_the_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let channels = start(dir.path()).await;

    let reply = transient(dir.path(), "--exit").await;
    assert_eq!(reply, "[*] Daemon shutting down.\n");
    tokio::time::timeout(Duration::from_secs(5), channels.task)
        .await
        .expect("runtime did not stop")
        .unwrap();
    assert!(channels.handle.is_closed());
}

#[tokio::test]
async fn stale_socket_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(SOCKET_NAME), b"left over").unwrap();
    let _channels = start(dir.path()).await;

    let reply = transient(dir.path(), "--dnd").await;
    assert_eq!(reply, "[*] Do not disturb: ON\n");
}

#[tokio::test]
async fn second_daemon_cannot_take_the_socket() {
    let dir = tempfile::tempdir().unwrap();
    let channels = start(dir.path()).await;

    let second = ControlServer::bind(dir.path().join(SOCKET_NAME), channels.handle.clone()).await;
    assert!(second.is_err());
}
