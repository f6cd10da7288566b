//! Camouflage handshake.
//!
//! The tunnel hides behind a normal-looking HTTPS exchange. The server
//! classifies the first decrypted request of every TLS connection: a GET
//! for the shared secret path marks the tunnel peer, anything else is
//! answered as ordinary web traffic. The client opens a tunnel by sending
//! the matching disguised request and checking for a 200. One round-trip,
//! no retries; a failed classification is terminal for that connection.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};

/// Parsed HTTP request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub version: String,
}

/// Tokenize the first line of a request on whitespace. The path must be
/// absolute; the version token may be absent on malformed-but-tolerated
/// requests.
pub fn parse_request_line(buf: &[u8]) -> Option<RequestLine> {
    let end = buf
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(buf.len());
    let line = std::str::from_utf8(&buf[..end]).ok()?;

    let mut tokens = line.split_whitespace();
    let method = tokens.next()?.to_string();
    let path = tokens.next()?.to_string();
    if !path.starts_with('/') {
        return None;
    }
    let version = tokens.next().unwrap_or("").to_string();

    Some(RequestLine {
        method,
        path,
        version,
    })
}

/// The secret path: the configured serial with a `/` prefix ensured.
pub fn secret_path(serial: &str) -> String {
    if serial.starts_with('/') {
        serial.to_string()
    } else {
        format!("/{serial}")
    }
}

/// Verdict on one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The real tunnel peer; hand the connection to the SOCKS5 engine.
    Tunnel,
    /// Ordinary web traffic; keep serving the decoy site.
    Decoy,
    /// Not parseable as a request; close without answering.
    Invalid,
}

/// Classify a request against the secret. The comparison is byte-exact
/// after the `/` prefix rule; a near-miss is deliberately ordinary traffic.
pub fn classify(serial: &str, request: &[u8]) -> (Classification, Option<RequestLine>) {
    match parse_request_line(request) {
        Some(line) => {
            if line.method == "GET" && line.path == secret_path(serial) {
                (Classification::Tunnel, Some(line))
            } else {
                (Classification::Decoy, Some(line))
            }
        }
        None => (Classification::Invalid, None),
    }
}

/// Build the disguised request announcing the tunnel client.
pub fn build_announce(serial: &str, server_host: &str, server_port: u16) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: {}:{}\r\nContent-Type: text/html\r\nConnection: keep-alive\r\nContent-Language: en\r\n\r\n",
        secret_path(serial),
        server_host,
        server_port
    )
}

/// Check the 3-digit status code at its fixed offset in `HTTP/1.1 NNN ...`.
pub fn status_is_ok(response: &[u8]) -> bool {
    response.len() >= 12 && &response[9..12] == b"200"
}

/// Client side of the handshake: send the announce, require a 200.
/// Any other status or a short read aborts the tunnel attempt.
pub async fn announce<S>(stream: &mut S, serial: &str, host: &str, port: u16) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = build_announce(serial, host, port);
    stream.write_all(request.as_bytes()).await?;

    let mut buf = [0u8; 512];
    let n = stream.read(&mut buf).await?;
    if status_is_ok(&buf[..n]) {
        debug!("tunnel accepted by {host}:{port}");
        Ok(())
    } else {
        Err(Error::handshake("server declined the tunnel request"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line() {
        let line = parse_request_line(b"GET /abc HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(line.method, "GET");
        assert_eq!(line.path, "/abc");
        assert_eq!(line.version, "HTTP/1.1");
    }

    #[test]
    fn test_parse_rejects_relative_path_and_garbage() {
        assert!(parse_request_line(b"GET abc HTTP/1.1\r\n").is_none());
        assert!(parse_request_line(b"\x16\x03\x01\x02\x00").is_none());
        assert!(parse_request_line(b"").is_none());
        assert!(parse_request_line(b"GET\r\n").is_none());
    }

    #[test]
    fn test_secret_path_prefix() {
        assert_eq!(secret_path("abc123"), "/abc123");
        assert_eq!(secret_path("/abc123"), "/abc123");
    }

    #[test]
    fn test_classify_exclusivity() {
        // the secret path and only the secret path is tunnel traffic
        let (cls, _) = classify("abc123", b"GET /abc123 HTTP/1.1\r\n\r\n");
        assert_eq!(cls, Classification::Tunnel);

        for request in [
            &b"GET /abc124 HTTP/1.1\r\n\r\n"[..],
            b"GET /abc123/ HTTP/1.1\r\n\r\n",
            b"GET /Abc123 HTTP/1.1\r\n\r\n",
            b"POST /abc123 HTTP/1.1\r\n\r\n",
            b"GET / HTTP/1.1\r\n\r\n",
        ] {
            let (cls, _) = classify("abc123", request);
            assert_eq!(cls, Classification::Decoy, "for {request:?}");
        }

        let (cls, line) = classify("abc123", b"\x00\x01\x02");
        assert_eq!(cls, Classification::Invalid);
        assert!(line.is_none());
    }

    #[test]
    fn test_announce_format() {
        let req = build_announce("abc123", "198.51.100.7", 443);
        assert!(req.starts_with("GET /abc123 HTTP/1.1\r\n"));
        assert!(req.contains("Host: 198.51.100.7:443\r\n"));
        assert!(req.contains("Connection: keep-alive\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
        // the announce itself classifies as tunnel traffic
        let (cls, _) = classify("abc123", req.as_bytes());
        assert_eq!(cls, Classification::Tunnel);
    }

    #[test]
    fn test_status_offset() {
        assert!(status_is_ok(b"HTTP/1.1 200 OK\r\n\r\n"));
        assert!(!status_is_ok(b"HTTP/1.1 404 Not Found\r\n\r\n"));
        assert!(!status_is_ok(b"HTTP/1.1 2"));
        assert!(!status_is_ok(b""));
    }

    #[tokio::test]
    async fn test_announce_round_trip() {
        let (mut client_end, mut server_end) = tokio::io::duplex(1024);

        let handshake = tokio::spawn(async move {
            announce(&mut client_end, "abc123", "192.0.2.1", 443).await
        });

        let mut buf = [0u8; 512];
        let n = server_end.read(&mut buf).await.unwrap();
        let (cls, _) = classify("abc123", &buf[..n]);
        assert_eq!(cls, Classification::Tunnel);
        server_end
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();

        handshake.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_announce_rejected_on_decoy_answer() {
        let (mut client_end, mut server_end) = tokio::io::duplex(1024);

        let handshake = tokio::spawn(async move {
            announce(&mut client_end, "abc123", "192.0.2.1", 443).await
        });

        let mut buf = [0u8; 512];
        let _ = server_end.read(&mut buf).await.unwrap();
        server_end
            .write_all(b"HTTP/1.1 404 Not Found\r\n\r\nnope")
            .await
            .unwrap();

        assert!(handshake.await.unwrap().is_err());
    }
}
