//! Claude Glance daemon: ingests hook events over a unix socket and a local
//! HTTP port and folds them into a bounded set of live session records.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod observer;
pub mod preferences;
pub mod runtime;
pub mod server;
pub mod session;
pub mod stats;
pub mod tools;
pub mod transport;
