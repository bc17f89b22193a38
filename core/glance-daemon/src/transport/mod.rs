//! Listener plumbing shared by the unix-socket and HTTP transports.
//!
//! Both transports block in `accept` on a dedicated thread and hand each
//! accepted connection to its own short-lived worker thread. Shutdown raises a
//! stop flag, then connects to the listener once so the blocked `accept`
//! returns and the loop sees the flag.

pub mod http;
pub mod unix;

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_CONSECUTIVE_ACCEPT_ERRORS: u32 = 20;
const READ_CHUNK_SIZE: usize = 4096;

type Waker = Box<dyn Fn() -> io::Result<()> + Send>;

/// A running accept loop. Dropping the handle stops the loop.
pub struct ListenerHandle {
    label: &'static str,
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    wake: Waker,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// False once the accept loop gave up after repeated errors.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if !thread.is_finished() {
                if let Err(err) = (self.wake)() {
                    // Nothing can reach the listener any more (its socket file
                    // was unlinked), so the thread stays parked in accept.
                    warn!(listener = self.label, error = %err, "Could not wake accept loop; detaching it");
                    self.alive.store(false, Ordering::SeqCst);
                    return;
                }
            }
            if thread.join().is_err() {
                warn!(listener = self.label, "Accept loop panicked");
            }
        }
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs `accept` until shutdown. `wake` must make a blocked `accept` return,
/// normally by connecting to the listener.
pub(crate) fn spawn_accept_loop<S, A, W, H>(
    label: &'static str,
    mut accept: A,
    wake: W,
    handler: H,
) -> ListenerHandle
where
    S: Send + 'static,
    A: FnMut() -> io::Result<S> + Send + 'static,
    W: Fn() -> io::Result<()> + Send + 'static,
    H: Fn(S) + Send + Sync + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let alive = Arc::new(AtomicBool::new(true));
    let handler = Arc::new(handler);

    let loop_stop = Arc::clone(&stop);
    let loop_alive = Arc::clone(&alive);
    let thread = thread::spawn(move || {
        let mut consecutive_errors = 0u32;
        while !loop_stop.load(Ordering::SeqCst) {
            match accept() {
                Ok(_) if loop_stop.load(Ordering::SeqCst) => break,
                Ok(stream) => {
                    consecutive_errors = 0;
                    let handler = Arc::clone(&handler);
                    thread::spawn(move || handler(stream));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    consecutive_errors += 1;
                    warn!(listener = label, error = %err, "Failed to accept connection");
                    if consecutive_errors >= MAX_CONSECUTIVE_ACCEPT_ERRORS {
                        warn!(listener = label, "Too many accept errors; listener marked dead");
                        loop_alive.store(false, Ordering::SeqCst);
                        break;
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }
        debug!(listener = label, "Accept loop exited");
    });

    ListenerHandle {
        label,
        stop,
        alive,
        wake: Box::new(wake),
        thread: Some(thread),
    }
}

/// Runs `bind` on a helper thread and waits at most `timeout` for it to
/// produce a ready listener.
pub(crate) fn bind_with_timeout<T, F>(bind: F, timeout: Duration) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(bind());
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("listener not ready within {}ms", timeout.as_millis()),
        )),
    }
}

/// Reads until EOF, `max_bytes`, read timeout, or `is_complete` says the
/// buffer holds a whole message. A timeout with data already buffered is
/// treated as the end of the message.
pub(crate) fn read_message<R, F>(reader: &mut R, max_bytes: usize, is_complete: F) -> io::Result<Vec<u8>>
where
    R: Read,
    F: Fn(&[u8]) -> bool,
{
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let room = max_bytes.saturating_sub(buffer.len());
                buffer.extend_from_slice(&chunk[..n.min(room)]);
                if buffer.len() >= max_bytes || is_complete(&buffer) {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) && !buffer.is_empty() =>
            {
                break;
            }
            Err(err) => return Err(err),
        }
    }

    Ok(buffer)
}
