//! Unix stream-socket transport: one JSON message per connection, no reply.

use fs_err as fs;
use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{bind_with_timeout, read_message, spawn_accept_loop, ListenerHandle};
use crate::error::ServerError;
use crate::observer::MessageSink;

#[derive(Clone)]
pub(crate) struct UnixOptions {
    pub max_message_bytes: usize,
    pub read_timeout: Duration,
}

pub(crate) fn prepare_socket_dir(socket_path: &Path) -> Result<(), ServerError> {
    let Some(parent) = socket_path.parent() else {
        return Ok(());
    };
    fs::create_dir_all(parent).map_err(|source| ServerError::SocketDir {
        path: parent.to_path_buf(),
        source,
    })
}

pub(crate) fn remove_existing_socket(socket_path: &Path) -> io::Result<()> {
    match fs::remove_file(socket_path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Removes any stale socket file, binds within `bind_timeout`, and starts the
/// accept loop.
pub(crate) fn bind(
    socket_path: &Path,
    sink: Arc<dyn MessageSink>,
    options: UnixOptions,
    bind_timeout: Duration,
) -> Result<ListenerHandle, ServerError> {
    prepare_socket_dir(socket_path)?;

    let path = socket_path.to_path_buf();
    let listener = bind_with_timeout(
        move || {
            remove_existing_socket(&path)?;
            UnixListener::bind(&path)
        },
        bind_timeout,
    )
    .map_err(|source| ServerError::SocketBind {
        path: socket_path.to_path_buf(),
        source,
    })?;
    info!(path = %socket_path.display(), "Unix socket listening");

    let wake_path = socket_path.to_path_buf();
    Ok(spawn_accept_loop(
        "unix",
        move || listener.accept().map(|(stream, _)| stream),
        move || UnixStream::connect(&wake_path).map(|_| ()),
        move |stream| handle_connection(stream, sink.as_ref(), &options),
    ))
}

fn handle_connection(mut stream: UnixStream, sink: &dyn MessageSink, options: &UnixOptions) {
    let _ = stream.set_read_timeout(Some(options.read_timeout));

    let bytes = match read_message(&mut stream, options.max_message_bytes, |_| false) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "Failed to read unix message");
            return;
        }
    };

    if bytes.is_empty() {
        debug!("Unix connection closed without data");
        return;
    }

    match glance_protocol::decode_message(&bytes) {
        Ok(message) => {
            debug!(
                session_id = %message.session_id,
                event = %message.event,
                bytes = bytes.len(),
                "Unix message received"
            );
            sink.deliver(message);
        }
        Err(err) => {
            warn!(code = err.code(), error = %err, "Dropping undecodable unix message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glance_protocol::HookMessage;
    use std::io::Write;
    use std::sync::mpsc;
    use std::sync::Mutex;

    struct ChannelSink(Mutex<mpsc::Sender<HookMessage>>);

    impl MessageSink for ChannelSink {
        fn deliver(&self, message: HookMessage) {
            let sender = self.0.lock().unwrap_or_else(|p| p.into_inner());
            let _ = sender.send(message);
        }
    }

    fn options() -> UnixOptions {
        UnixOptions {
            max_message_bytes: glance_protocol::MAX_MESSAGE_BYTES,
            read_timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn delivers_message_and_replaces_stale_socket_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let socket_path = temp_dir.path().join("run").join("glance.sock");
        fs::create_dir_all(socket_path.parent().expect("parent")).expect("dir");
        fs::write(&socket_path, b"stale").expect("stale file");

        let (tx, rx) = mpsc::channel();
        let sink: Arc<dyn MessageSink> = Arc::new(ChannelSink(Mutex::new(tx)));
        let _handle = bind(&socket_path, sink, options(), Duration::from_secs(2)).expect("bind");

        let payload = br#"{"session_id":"u1","terminal":"Terminal","project":"p","cwd":"/p","event":"Stop","data":{}}"#;
        let mut stream = UnixStream::connect(&socket_path).expect("connect");
        stream.write_all(payload).expect("write");
        drop(stream);

        let message = rx.recv_timeout(Duration::from_secs(2)).expect("message");
        assert_eq!(message.session_id, "u1");
    }

    #[test]
    fn drops_malformed_payloads() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let socket_path = temp_dir.path().join("glance.sock");
        let (tx, rx) = mpsc::channel();
        let sink: Arc<dyn MessageSink> = Arc::new(ChannelSink(Mutex::new(tx)));
        let _handle = bind(&socket_path, sink, options(), Duration::from_secs(2)).expect("bind");

        let mut stream = UnixStream::connect(&socket_path).expect("connect");
        stream.write_all(b"{definitely not json").expect("write");
        drop(stream);

        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    }
}
