//! Minimal HTTP/1.1 listener: `POST` a hook envelope, get a JSON acknowledgment.
//!
//! Only enough of HTTP is parsed to find the method and the body. Every
//! connection carries exactly one request and is closed after the response.

use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{bind_with_timeout, read_message, spawn_accept_loop, ListenerHandle};
use crate::error::ServerError;
use crate::observer::MessageSink;

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub(crate) struct HttpOptions {
    pub max_message_bytes: usize,
    pub read_timeout: Duration,
}

/// Tries each candidate port in order and adopts the first one that is ready
/// within `bind_timeout`. Returns the running listener and the bound port.
pub(crate) fn bind(
    host: &str,
    ports: &[u16],
    sink: Arc<dyn MessageSink>,
    options: HttpOptions,
    bind_timeout: Duration,
) -> Result<(ListenerHandle, u16), ServerError> {
    let mut last_error = String::from("no candidate ports");

    for &port in ports {
        let bind_host = host.to_string();
        let attempt = bind_with_timeout(
            move || {
                let listener = TcpListener::bind((bind_host.as_str(), port))?;
                let addr = listener.local_addr()?;
                Ok((listener, addr))
            },
            bind_timeout,
        );

        match attempt {
            Ok((listener, addr)) => {
                info!(host, port = addr.port(), "HTTP listener ready");
                let handle = spawn_accept_loop(
                    "http",
                    move || listener.accept().map(|(stream, _)| stream),
                    move || wake_listener(addr),
                    move |stream| handle_connection(stream, sink.as_ref(), &options),
                );
                return Ok((handle, addr.port()));
            }
            Err(err) => {
                warn!(host, port, error = %err, "HTTP port unavailable, trying next");
                last_error = err.to_string();
            }
        }
    }

    Err(ServerError::PortsExhausted {
        first: ports.first().copied().unwrap_or_default(),
        last: ports.last().copied().unwrap_or_default(),
        reason: last_error,
    })
}

/// Connects once to unblock the accept loop. Wildcard binds are reached
/// through loopback.
fn wake_listener(addr: SocketAddr) -> io::Result<()> {
    let target = if addr.ip().is_unspecified() {
        let loopback: IpAddr = match addr {
            SocketAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
        };
        SocketAddr::new(loopback, addr.port())
    } else {
        addr
    };
    TcpStream::connect_timeout(&target, WAKE_TIMEOUT).map(|_| ())
}

fn handle_connection(mut stream: TcpStream, sink: &dyn MessageSink, options: &HttpOptions) {
    let _ = stream.set_read_timeout(Some(options.read_timeout));

    let request = match read_message(&mut stream, options.max_message_bytes, is_request_complete) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "Failed to read HTTP request");
            return;
        }
    };

    let response = respond(&request, sink);
    if let Err(err) = write_response(&mut stream, &response) {
        debug!(error = %err, "Failed to write HTTP response");
    }
    let _ = stream.shutdown(Shutdown::Both);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    fn ok() -> Self {
        Self {
            status: 200,
            body: glance_protocol::HTTP_ACK_BODY.to_string(),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message }).to_string(),
        }
    }

    fn decode_failure(err: &glance_protocol::DecodeError) -> Self {
        Self {
            status: 400,
            body: serde_json::json!({ "error": err.to_string(), "code": err.code() }).to_string(),
        }
    }

    fn status_text(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            405 => "Method Not Allowed",
            _ => "Error",
        }
    }

    pub(crate) fn render(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.status_text(),
            self.body.len(),
            self.body
        )
    }
}

fn write_response(stream: &mut TcpStream, response: &HttpResponse) -> io::Result<()> {
    stream.write_all(response.render().as_bytes())?;
    stream.flush()
}

/// Turns one raw request into a response, delivering the envelope on success.
pub(crate) fn respond(request: &[u8], sink: &dyn MessageSink) -> HttpResponse {
    if !request.starts_with(b"POST ") {
        let method = request
            .split(|byte| *byte == b' ')
            .next()
            .map(String::from_utf8_lossy)
            .unwrap_or_default();
        debug!(method = %method, "Rejecting non-POST request");
        return HttpResponse::error(405, "method not allowed");
    }

    let Some((_, body_start)) = find_header_end(request) else {
        return HttpResponse::error(400, "Invalid request");
    };
    let body = &request[body_start..];
    if body.iter().all(u8::is_ascii_whitespace) {
        return HttpResponse::error(400, "Empty body");
    }

    match glance_protocol::decode_message(body) {
        Ok(message) => {
            debug!(
                session_id = %message.session_id,
                event = %message.event,
                bytes = body.len(),
                "HTTP message received"
            );
            sink.deliver(message);
            HttpResponse::ok()
        }
        Err(err) => {
            warn!(code = err.code(), error = %err, "Rejecting undecodable HTTP body");
            HttpResponse::decode_failure(&err)
        }
    }
}

/// Returns the end of the header block and the start of the body.
fn find_header_end(request: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = find(request, b"\r\n\r\n") {
        return Some((pos, pos + 4));
    }
    find(request, b"\n\n").map(|pos| (pos, pos + 2))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn content_length(headers: &[u8]) -> Option<usize> {
    String::from_utf8_lossy(headers).lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

fn is_request_complete(buffer: &[u8]) -> bool {
    let Some((header_end, body_start)) = find_header_end(buffer) else {
        return false;
    };
    let expected = content_length(&buffer[..header_end]).unwrap_or(0);
    buffer.len().saturating_sub(body_start) >= expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use glance_protocol::HookMessage;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<HookMessage>>);

    impl MessageSink for RecordingSink {
        fn deliver(&self, message: HookMessage) {
            self.0
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(message);
        }
    }

    impl RecordingSink {
        fn count(&self) -> usize {
            self.0.lock().expect("lock").len()
        }
    }

    fn post(body: &str) -> Vec<u8> {
        format!(
            "POST /api/status HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
        .into_bytes()
    }

    const STOP_BODY: &str = r#"{"session_id":"h1","terminal":"iTerm","project":"app","cwd":"/app","event":"Stop","data":{}}"#;

    #[test]
    fn valid_post_is_acknowledged_and_delivered() {
        let sink = RecordingSink::default();
        let response = respond(&post(STOP_BODY), &sink);
        assert_eq!(response, HttpResponse::ok());
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn non_post_methods_are_rejected() {
        let sink = RecordingSink::default();
        let response = respond(b"GET /api/status HTTP/1.1\r\n\r\n", &sink);
        assert_eq!(response.status, 405);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn empty_body_is_bad_request() {
        let sink = RecordingSink::default();
        let response = respond(&post(""), &sink);
        assert_eq!(response.status, 400);
        assert!(response.body.contains("Empty body"));
    }

    #[test]
    fn missing_header_terminator_is_bad_request() {
        let sink = RecordingSink::default();
        let response = respond(b"POST /api/status HTTP/1.1\r\nHost: x", &sink);
        assert_eq!(response.status, 400);
        assert!(response.body.contains("Invalid request"));
    }

    #[test]
    fn malformed_json_is_bad_request_and_not_delivered() {
        let sink = RecordingSink::default();
        let response = respond(&post("{not json"), &sink);
        assert_eq!(response.status, 400);
        let body: serde_json::Value = serde_json::from_str(&response.body).expect("json body");
        assert_eq!(body["code"], "invalid_json");
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn request_completion_waits_for_content_length() {
        let full = post(STOP_BODY);
        assert!(is_request_complete(&full));
        assert!(!is_request_complete(&full[..full.len() - 5]));
        assert!(!is_request_complete(b"POST / HTTP/1.1\r\nContent-Length: 3\r\n"));
        assert!(is_request_complete(b"GET / HTTP/1.1\r\n\r\n"));
    }

    #[test]
    fn response_closes_connection() {
        let rendered = HttpResponse::ok().render();
        assert!(rendered.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(rendered.contains("Connection: close\r\n"));
        assert!(rendered.contains("Content-Length: 15\r\n"));
        assert!(rendered.ends_with(r#"{"status":"ok"}"#));
    }
}
