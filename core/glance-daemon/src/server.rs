//! The ingestion server: owns the unix socket, the HTTP port, and the health
//! check that rebinds them when they go away.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::GlanceConfig;
use crate::error::{Result, ServerError};
use crate::observer::{ConnectionStatus, MessageSink, ObserverEvent, ObserverTx};
use crate::runtime::Ticker;
use crate::transport::http::{self, HttpOptions};
use crate::transport::unix::{self, remove_existing_socket, UnixOptions};
use crate::transport::ListenerHandle;

pub struct IpcServer {
    shared: Arc<ServerShared>,
    health: Option<Ticker>,
}

struct ServerShared {
    config: GlanceConfig,
    sink: Arc<dyn MessageSink>,
    observer: ObserverTx,
    running: AtomicBool,
    state: Mutex<ServerState>,
    wake: Condvar,
}

struct ServerState {
    status: ConnectionStatus,
    unix: Option<ListenerHandle>,
    http: Option<ListenerHandle>,
    port: Option<u16>,
}

impl IpcServer {
    pub fn new(config: GlanceConfig, sink: Arc<dyn MessageSink>, observer: ObserverTx) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                config,
                sink,
                observer,
                running: AtomicBool::new(false),
                state: Mutex::new(ServerState {
                    status: ConnectionStatus::Disconnected,
                    unix: None,
                    http: None,
                    port: None,
                }),
                wake: Condvar::new(),
            }),
            health: None,
        }
    }

    /// Binds the unix socket and the first free HTTP port, then starts the
    /// health check. Fails only when no HTTP port could be bound.
    pub fn start(&mut self) -> Result<()> {
        let shared = &self.shared;
        if shared.running.load(Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }
        shared.set_status(ConnectionStatus::Connecting);

        let unix_result = shared.bind_unix();
        let (http_handle, port) = match shared.bind_http() {
            Ok(bound) => bound,
            Err(err) => {
                drop(unix_result);
                let _ = remove_existing_socket(&shared.config.socket_path);
                warn!(error = %err, "IPC server failed to start");
                shared.set_status(ConnectionStatus::Error(err.to_string()));
                return Err(err);
            }
        };

        let status = {
            let mut state = shared.lock_state();
            state.http = Some(http_handle);
            state.port = Some(port);
            shared.running.store(true, Ordering::SeqCst);
            match unix_result {
                Ok(handle) => {
                    state.unix = Some(handle);
                    ConnectionStatus::Connected
                }
                Err(err) => {
                    warn!(error = %err, "Unix socket unavailable; health check will retry");
                    ConnectionStatus::Error(err.to_string())
                }
            }
        };
        shared.set_status(status);
        info!(
            socket = %shared.config.socket_path.display(),
            port,
            "IPC server started"
        );

        let health_shared = Arc::clone(shared);
        self.health = Some(Ticker::spawn(
            shared.config.health_check_interval(),
            move || {
                health_shared.check_health();
                health_shared.running.load(Ordering::SeqCst)
            },
        ));
        Ok(())
    }

    /// Stops both listeners and the health check and removes the socket file.
    /// Calling it again is a no-op apart from re-publishing `Disconnected`.
    pub fn stop(&mut self) {
        let shared = &self.shared;
        let (unix_handle, http_handle) = {
            let mut state = shared.lock_state();
            shared.running.store(false, Ordering::SeqCst);
            state.port = None;
            (state.unix.take(), state.http.take())
        };
        shared.wake.notify_all();

        if let Some(health) = self.health.take() {
            health.stop();
        }
        let was_bound = unix_handle.is_some() || http_handle.is_some();
        drop(unix_handle);
        drop(http_handle);

        if let Err(err) = remove_existing_socket(&shared.config.socket_path) {
            warn!(error = %err, "Failed to remove socket file");
        }
        shared.set_status(ConnectionStatus::Disconnected);
        if was_bound {
            info!("IPC server stopped");
        }
    }

    /// Full stop followed by a fresh start, for manual recovery after a failed
    /// start.
    pub fn restart(&mut self) -> Result<()> {
        self.stop();
        self.start()
    }

    /// Runs one health check immediately instead of waiting for the ticker.
    pub fn check_health(&self) {
        self.shared.check_health();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock_state().status.clone()
    }

    pub fn current_port(&self) -> Option<u16> {
        self.shared.lock_state().port
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn socket_path(&self) -> &Path {
        &self.shared.config.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

impl ServerShared {
    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Server state lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn set_status(&self, status: ConnectionStatus) {
        {
            let mut state = self.lock_state();
            if state.status == status {
                return;
            }
            state.status = status.clone();
        }
        debug!(status = %status, "Connection status changed");
        self.observer.publish(ObserverEvent::Connection(status));
    }

    fn bind_unix(&self) -> Result<ListenerHandle> {
        unix::bind(
            &self.config.socket_path,
            Arc::clone(&self.sink),
            UnixOptions {
                max_message_bytes: self.config.max_message_bytes,
                read_timeout: self.config.read_timeout(),
            },
            self.config.bind_timeout(),
        )
    }

    fn bind_http(&self) -> Result<(ListenerHandle, u16)> {
        http::bind(
            &self.config.http_host,
            &self.config.candidate_ports(),
            Arc::clone(&self.sink),
            HttpOptions {
                max_message_bytes: self.config.max_message_bytes,
                read_timeout: self.config.read_timeout(),
            },
            self.config.bind_timeout(),
        )
    }

    fn check_health(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let (unix_ok, http_ok) = {
            let state = self.lock_state();
            let unix_ok = state.unix.as_ref().is_some_and(ListenerHandle::is_alive)
                && self.config.socket_path.exists();
            let http_ok = state.http.as_ref().is_some_and(ListenerHandle::is_alive);
            (unix_ok, http_ok)
        };

        let unix_ok = unix_ok || {
            warn!(
                socket = %self.config.socket_path.display(),
                "Socket health check failed, attempting reconnect"
            );
            self.reconnect_unix()
        };
        let http_ok = http_ok || {
            warn!("HTTP listener health check failed; rebinding");
            self.rebind_http()
        };

        if unix_ok && http_ok && self.running.load(Ordering::SeqCst) {
            self.set_status(ConnectionStatus::Connected);
        }
    }

    fn rebind_http(&self) -> bool {
        let stale = self.lock_state().http.take();
        drop(stale);

        match self.bind_http() {
            Ok((handle, port)) => {
                let mut state = self.lock_state();
                if !self.running.load(Ordering::SeqCst) {
                    return false;
                }
                state.http = Some(handle);
                state.port = Some(port);
                info!(port, "HTTP listener rebound");
                true
            }
            Err(err) => {
                warn!(error = %err, "HTTP rebind failed");
                self.lock_state().port = None;
                self.set_status(ConnectionStatus::Error(err.to_string()));
                false
            }
        }
    }

    /// Tears down the unix listener and rebinds it, waiting the reconnect
    /// delay before each attempt. Returns false on failure or when the server
    /// is stopped meanwhile.
    fn reconnect_unix(&self) -> bool {
        self.set_status(ConnectionStatus::Connecting);

        let stale = self.lock_state().unix.take();
        drop(stale);
        if let Err(err) = remove_existing_socket(&self.config.socket_path) {
            debug!(error = %err, "Failed to remove stale socket file");
        }

        let attempts = self.config.reconnect_attempts.max(1);
        for attempt in 1..=attempts {
            if !self.wait_reconnect_delay() {
                return false;
            }

            match self.bind_unix() {
                Ok(handle) => {
                    let mut state = self.lock_state();
                    if !self.running.load(Ordering::SeqCst) {
                        drop(state);
                        drop(handle);
                        let _ = remove_existing_socket(&self.config.socket_path);
                        return false;
                    }
                    state.unix = Some(handle);
                    drop(state);
                    info!(attempt, "Reconnected successfully");
                    return true;
                }
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "Reconnect attempt failed");
                }
            }
        }

        self.set_status(ConnectionStatus::Error("Failed to reconnect".to_string()));
        false
    }

    /// Sleeps for the reconnect delay, returning false if stopped meanwhile.
    fn wait_reconnect_delay(&self) -> bool {
        let state = self.lock_state();
        let result = self.wake.wait_timeout_while(state, self.config.reconnect_delay(), |_| {
            self.running.load(Ordering::SeqCst)
        });
        drop(result);
        self.running.load(Ordering::SeqCst)
    }
}
