//! Errors surfaced to callers of the transport server.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to prepare socket directory {path}: {source}")]
    SocketDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind unix socket {path}: {source}")]
    SocketBind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("All HTTP ports exhausted ({first}-{last}): {reason}")]
    PortsExhausted { first: u16, last: u16, reason: String },

    #[error("Server is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, ServerError>;
