use glance_daemon::config::GlanceConfig;
use glance_daemon::observer::{ConnectionStatus, EngineSnapshot, ObserverEvent, ObserverTx};
use glance_daemon::preferences::Preferences;
use glance_daemon::runtime::{EngineHandle, EngineRuntime, RuntimeOptions};
use glance_daemon::server::IpcServer;
use glance_daemon::session::SessionStatus;
use glance_protocol::{EventKind, HookData, HookMessage, ToolInputValue};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Harness {
    _temp_dir: TempDir,
    runtime: EngineRuntime,
    server: IpcServer,
    events: Receiver<ObserverEvent>,
}

impl Harness {
    fn start(port: u16, fallback: u16) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let config = test_config(temp_dir.path(), port, fallback);
        let (tx, events) = mpsc::channel();
        let observer = ObserverTx::new(tx);
        let runtime = EngineRuntime::spawn(
            Preferences::default(),
            None,
            observer.clone(),
            RuntimeOptions {
                sweep_interval: Duration::from_secs(10),
                fade_interval: Duration::from_millis(50),
            },
        );
        let mut server = IpcServer::new(config, Arc::new(runtime.handle()), observer);
        server.start().expect("server start");
        Self {
            _temp_dir: temp_dir,
            runtime,
            server,
            events,
        }
    }

    fn handle(&self) -> EngineHandle {
        self.runtime.handle()
    }

    fn port(&self) -> u16 {
        self.server.current_port().expect("bound port")
    }
}

fn test_config(dir: &Path, port: u16, fallback: u16) -> GlanceConfig {
    GlanceConfig {
        socket_path: dir.join("glance.sock"),
        http_port: port,
        port_fallback_count: fallback,
        reconnect_delay_ms: 10,
        state_dir: dir.to_path_buf(),
        ..GlanceConfig::default()
    }
}

fn bash_message(session_id: &str, command: &str) -> HookMessage {
    let mut data = HookData {
        tool_name: Some("Bash".to_string()),
        ..HookData::default()
    };
    data.tool_input = Some(
        [(
            "command".to_string(),
            ToolInputValue::String(command.to_string()),
        )]
        .into_iter()
        .collect(),
    );
    let mut message = HookMessage::new(session_id, EventKind::PreToolUse, data);
    message.project = "glance".to_string();
    message.cwd = "/tmp/glance".to_string();
    message
}

fn send_unix(socket: &Path, message: &HookMessage) {
    let mut stream = UnixStream::connect(socket).expect("connect unix socket");
    stream
        .write_all(&message.to_bytes().expect("encode"))
        .expect("write message");
}

fn send_http(port: u16, method: &str, body: &[u8]) -> (u16, String) {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect http");
    let head = format!(
        "{} /api/status HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        method,
        body.len()
    );
    stream.write_all(head.as_bytes()).expect("write head");
    stream.write_all(body).expect("write body");

    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read response");
    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

fn wait_for_snapshot(
    handle: &EngineHandle,
    timeout: Duration,
    mut predicate: impl FnMut(&EngineSnapshot) -> bool,
) -> EngineSnapshot {
    let deadline = Instant::now() + timeout;
    loop {
        let snapshot = handle.snapshot().expect("engine running");
        if predicate(&snapshot) || Instant::now() >= deadline {
            return snapshot;
        }
        sleep(Duration::from_millis(25));
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("ephemeral port")
        .port()
}

#[test]
fn unix_socket_message_reaches_engine() {
    let harness = Harness::start(0, 0);
    send_unix(
        harness.server.socket_path(),
        &bash_message("unix-1", "npm test"),
    );

    let snapshot = wait_for_snapshot(&harness.handle(), Duration::from_secs(3), |snapshot| {
        !snapshot.sessions.is_empty()
    });
    assert_eq!(snapshot.sessions.len(), 1);
    let session = &snapshot.sessions[0];
    assert_eq!(session.key, "unix-1");
    assert_eq!(session.status, SessionStatus::Thinking);
    assert_eq!(session.metadata, "npm test");
    assert_eq!(snapshot.stats.tool_calls, 1);
}

#[test]
fn http_post_is_acknowledged_and_applied() {
    let harness = Harness::start(0, 0);
    let body = bash_message("http-1", "cargo build").to_bytes().expect("encode");

    let (status, response) = send_http(harness.port(), "POST", &body);
    assert_eq!(status, 200);
    assert_eq!(response, r#"{"status":"ok"}"#);

    let snapshot = wait_for_snapshot(&harness.handle(), Duration::from_secs(3), |snapshot| {
        !snapshot.sessions.is_empty()
    });
    assert_eq!(snapshot.sessions[0].key, "http-1");
}

#[test]
fn http_rejects_bad_requests_without_mutation() {
    let harness = Harness::start(0, 0);
    let port = harness.port();

    let (status, _) = send_http(port, "POST", b"{not json");
    assert_eq!(status, 400);
    let (status, _) = send_http(port, "POST", b"");
    assert_eq!(status, 400);
    let (status, _) = send_http(port, "GET", b"");
    assert_eq!(status, 405);

    let snapshot = harness.handle().snapshot().expect("snapshot");
    assert!(snapshot.sessions.is_empty());
    assert_eq!(snapshot.stats.tool_calls, 0);
    assert_eq!(snapshot.stats.sessions_count, 0);
}

#[test]
fn occupied_primary_port_falls_back_to_next() {
    let primary = free_port();
    let Some(next) = primary.checked_add(1) else {
        return;
    };
    let _occupied = TcpListener::bind(("127.0.0.1", primary)).expect("occupy primary port");
    if TcpListener::bind(("127.0.0.1", next)).is_err() {
        // Neighbouring port already taken by something else on this host.
        return;
    }

    let harness = Harness::start(primary, 1);
    assert_eq!(harness.server.current_port(), Some(next));
}

#[test]
fn stop_twice_leaves_server_disconnected() {
    let mut harness = Harness::start(0, 0);
    let socket = harness.server.socket_path().to_path_buf();
    assert!(socket.exists());

    harness.server.stop();
    harness.server.stop();

    assert_eq!(harness.server.status(), ConnectionStatus::Disconnected);
    assert!(!harness.server.is_running());
    assert_eq!(harness.server.current_port(), None);
    assert!(!socket.exists());
}

#[test]
fn connection_status_transitions_are_published() {
    let mut harness = Harness::start(0, 0);
    harness.server.stop();

    let statuses: Vec<ConnectionStatus> = harness
        .events
        .try_iter()
        .filter_map(|event| match event {
            ObserverEvent::Connection(status) => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
        ]
    );
}

#[test]
fn health_check_rebinds_removed_socket() {
    let harness = Harness::start(0, 0);
    let socket = harness.server.socket_path().to_path_buf();
    std::fs::remove_file(&socket).expect("remove socket file");

    harness.server.check_health();
    assert!(socket.exists());
    assert_eq!(harness.server.status(), ConnectionStatus::Connected);

    send_unix(&socket, &bash_message("after-reconnect", "ls"));
    let snapshot = wait_for_snapshot(&harness.handle(), Duration::from_secs(3), |snapshot| {
        !snapshot.sessions.is_empty()
    });
    assert_eq!(snapshot.sessions[0].key, "after-reconnect");
}
