//! The read-only JSON status served over TCP on the game port.
//!
//! The status path must never contend with gameplay: it reads only atomic
//! mirrors maintained by the lobbies, never a lobby mutex.

use serde::Serialize;

/// Server statistics, serialized as the `/status` body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub address: String,
    pub online: bool,
    pub lobbies: usize,
    pub max_lobbies: usize,
    #[serde(rename = "playersOnline")]
    pub players_online: usize,
}

/// Extracts the request path from a raw HTTP request head, if it is a GET.
pub fn request_path(head: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(head).ok()?;
    let mut parts = text.lines().next()?.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    parts.next()
}

/// Renders a minimal HTTP/1.1 response around a JSON body.
pub fn http_response(status_line: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}
