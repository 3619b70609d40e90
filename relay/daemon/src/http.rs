//! Minimal HTTP/1.1 request-head handling
//!
//! The daemon serves three fixed routes and upgrades one of them to a
//! WebSocket. Only the request line and the `Upgrade` header matter, so the
//! head is parsed by hand rather than through a full HTTP stack.

use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

/// Largest request head the daemon reads
pub const MAX_HEAD_BYTES: usize = 8 * 1024;

/// The parts of a request head the daemon routes on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method
    pub method: String,
    /// Path without query string
    pub path: String,
    /// `Upgrade: websocket` was present
    pub websocket_upgrade: bool,
    /// `Sec-WebSocket-Key` value
    pub websocket_key: Option<String>,
}

/// Where a request goes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// The panel page
    Panel,
    /// WebSocket upgrade for a panel
    PanelSocket,
    /// Liveness check
    Health,
    /// Anything else
    NotFound,
    /// Known path, wrong method
    MethodNotAllowed,
}

/// Parse a request head
///
/// Returns `None` while the blank line ending the head has not arrived.
#[must_use]
pub fn parse_request_head(buf: &[u8]) -> Option<RequestHead> {
    let end = buf.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let head = String::from_utf8_lossy(&buf[..end]);
    let mut lines = head.split("\r\n");

    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?;
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut websocket_upgrade = false;
    let mut websocket_key = None;
    for (name, value) in lines.filter_map(|line| line.split_once(':')) {
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("upgrade") && value.eq_ignore_ascii_case("websocket") {
            websocket_upgrade = true;
        } else if name.eq_ignore_ascii_case("sec-websocket-key") && !value.is_empty() {
            websocket_key = Some(value.to_string());
        }
    }

    Some(RequestHead {
        method,
        path,
        websocket_upgrade,
        websocket_key,
    })
}

/// Route a parsed request
#[must_use]
pub fn route(head: &RequestHead) -> Route {
    let known = matches!(head.path.as_str(), "/" | "/index.html" | "/ws" | "/health");
    if !known {
        return Route::NotFound;
    }
    if head.method != "GET" {
        return Route::MethodNotAllowed;
    }
    match head.path.as_str() {
        "/ws" if head.websocket_upgrade && head.websocket_key.is_some() => Route::PanelSocket,
        "/health" => Route::Health,
        "/ws" => Route::NotFound,
        _ => Route::Panel,
    }
}

/// Build a complete response with `Connection: close`
#[must_use]
pub fn response(status: u16, content_type: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n{body}",
        reason = reason_phrase(status),
        len = body.len(),
    )
    .into_bytes()
}

/// Build the `101 Switching Protocols` reply for a WebSocket key
#[must_use]
pub fn upgrade_response(websocket_key: &str) -> Vec<u8> {
    let accept = derive_accept_key(websocket_key.as_bytes());
    format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
    )
    .into_bytes()
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Error",
    }
}
