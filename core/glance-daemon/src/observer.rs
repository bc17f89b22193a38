//! The narrow contract between the transport, the engine and the renderer.
//!
//! Decoded messages flow in through [`MessageSink`]. Everything the engine or
//! the server publishes flows out as [`ObserverEvent`] values on a channel, so
//! collaborators only ever see immutable snapshots.

use glance_protocol::HookMessage;
use serde::Serialize;
use std::fmt;
use std::sync::mpsc::Sender;

use crate::session::SessionSnapshot;
use crate::stats::StatsSnapshot;

/// Receives decoded hook messages from the transport worker threads.
pub trait MessageSink: Send + Sync {
    fn deliver(&self, message: HookMessage);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => f.write_str("disconnected"),
            ConnectionStatus::Connecting => f.write_str("connecting"),
            ConnectionStatus::Connected => f.write_str("connected"),
            ConnectionStatus::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    /// The session needs the user (waiting) or hit an error.
    Attention,
    /// The session finished its turn.
    Completion,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub sessions: Vec<SessionSnapshot>,
    pub stats: StatsSnapshot,
    pub sound_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ObserverEvent {
    Sessions(EngineSnapshot),
    Alert(AlertKind),
    Connection(ConnectionStatus),
}

/// Publishes observer events, dropping them quietly once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ObserverTx {
    sender: Option<Sender<ObserverEvent>>,
}

impl ObserverTx {
    pub fn new(sender: Sender<ObserverEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// An observer nobody listens to.
    pub fn detached() -> Self {
        Self { sender: None }
    }

    pub fn publish(&self, event: ObserverEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(event).is_err() {
                tracing::trace!("Observer receiver dropped; event discarded");
            }
        }
    }
}
