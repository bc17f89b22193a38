//! Glance daemon entrypoint.
//!
//! Wires the config, the engine runtime and the IPC server together, then
//! logs observer events for as long as the process lives.

use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use glance_daemon::config::{self, GlanceConfig};
use glance_daemon::logging;
use glance_daemon::observer::{ObserverEvent, ObserverTx};
use glance_daemon::preferences::{Preferences, PreferencesStore};
use glance_daemon::runtime::{EngineRuntime, RuntimeOptions};
use glance_daemon::server::IpcServer;

#[derive(Debug, Parser)]
#[command(name = "glance-daemon", version, about = "Live status for agent hook sessions")]
struct Cli {
    /// Config file (defaults to ~/.claude-glance/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Unix socket path
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Primary HTTP port
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Directory holding preferences.json
    #[arg(long, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Write a daily rolling log file here in addition to stderr
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn apply(self, mut config: GlanceConfig) -> GlanceConfig {
        if let Some(socket) = self.socket {
            config.socket_path = socket;
        }
        if let Some(port) = self.port {
            config.http_port = port;
        }
        if let Some(state_dir) = self.state_dir {
            config.state_dir = state_dir;
        }
        if let Some(log_dir) = self.log_dir {
            config.log_dir = Some(log_dir);
        }
        config
    }
}

fn main() {
    let cli = Cli::parse();

    let (config, config_error) = match config::load_config(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(err) => (GlanceConfig::default(), Some(err)),
    };
    let config = cli.apply(config);

    let _log_guard = logging::init(config.log_dir.as_deref());
    if let Some(err) = config_error {
        warn!(error = %err, "Failed to load config; using defaults");
    }

    let store = PreferencesStore::new(config.preferences_path());
    let preferences = match store.load() {
        Ok(preferences) => preferences,
        Err(err) => {
            warn!(error = %err, path = %store.path().display(), "Failed to load preferences; using defaults");
            Preferences::default()
        }
    };

    let (observer_tx, observer_rx) = mpsc::channel();
    let observer = ObserverTx::new(observer_tx);

    let runtime = EngineRuntime::spawn(
        preferences,
        Some(store),
        observer.clone(),
        RuntimeOptions {
            sweep_interval: config.sweep_interval(),
            fade_interval: config.fade_interval(),
        },
    );

    let mut server = IpcServer::new(config, Arc::new(runtime.handle()), observer);
    if let Err(err) = server.start() {
        error!(error = %err, "IPC server failed to start; running without a listener");
    } else {
        info!(
            socket = %server.socket_path().display(),
            port = server.current_port().unwrap_or_default(),
            "Glance daemon started"
        );
    }

    for event in observer_rx {
        match event {
            ObserverEvent::Sessions(snapshot) => {
                debug!(
                    active = snapshot.sessions.len(),
                    tool_calls = snapshot.stats.tool_calls,
                    sessions_today = snapshot.stats.sessions_count,
                    "Sessions updated"
                );
            }
            ObserverEvent::Alert(kind) => {
                info!(alert = ?kind, "Session alert");
            }
            ObserverEvent::Connection(status) => {
                info!(status = %status, "Connection status");
            }
        }
    }
}
