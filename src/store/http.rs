//! HTTP response synthesis for the decoy web store.
//!
//! Responses are built as complete byte blobs (status line, headers, body)
//! so callers can hand them straight to a socket. The built-in pages are
//! also what the server answers when no archive is loaded.

/// Default status lines, overridable per status code via the archive's
/// `[head]` config section.
pub const HDR_SUCCESS: &str = "HTTP/1.1 200 OK";
pub const HDR_REDIRECT: &str = "HTTP/1.1 301 Moved Permanently";
pub const HDR_BAD_REQUEST: &str = "HTTP/1.1 400 Bad Request";
pub const HDR_NOT_FOUND: &str = "HTTP/1.1 404 Not Found";

/// Default bodies, overridable via the `[error]` config section.
pub const BODY_SUCCESS: &str = "<html><head><title>Welcome</title><h1>Welcome</h1><p>This page is only for test</p></head></html>";
pub const BODY_BAD_REQUEST: &str = "<html><head><title>Bad Request</title></head><body><h1>400 Bad Request</h1><p>Unknown request</p></body></html>";
pub const BODY_NOT_FOUND: &str = "<html><head><title>404 Not Found</title></head><body><h1>404 Not Found</h1><p>File cannot be found</p></body></html>";

/// Complete canned responses for the archiveless server and for the 200
/// page acknowledging a tunnel peer.
pub const PAGE_SUCCESS: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><head><title>Welcome</title><h1>Welcome</h1><p>This page is only for test</p></head></html>";
pub const PAGE_BAD_REQUEST: &str = "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><head><title>Bad Request</title></head><body><h1>400 Bad Request</h1><p>Unknown request</p></body></html>";
pub const PAGE_NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><head><title>404 Not Found</title></head><body><h1>404 Not Found</h1><p>File cannot be found</p></body></html>";

fn push_keepalive(out: &mut String, timeout: u64) {
    if timeout > 0 {
        out.push_str("\r\nConnection: keep-alive\r\nKeep-Alive: timeout=");
        out.push_str(&timeout.to_string());
    }
}

/// A 200 response carrying file content.
pub fn ok_response(head: Option<&str>, mime: &str, timeout: u64, body: &[u8]) -> Vec<u8> {
    let mut head_block = head.unwrap_or(HDR_SUCCESS).trim_end().to_string();
    push_keepalive(&mut head_block, timeout);
    head_block.push_str("\r\nContent-Type: ");
    head_block.push_str(mime);
    head_block.push_str("\r\nContent-Length: ");
    head_block.push_str(&body.len().to_string());
    head_block.push_str("\r\n\r\n");

    let mut out = head_block.into_bytes();
    out.extend_from_slice(body);
    out
}

/// A 301 redirect whose target came from a symlink entry.
pub fn redirect_response(head: Option<&str>, timeout: u64, location: &str) -> Vec<u8> {
    let mut out = head.unwrap_or(HDR_REDIRECT).trim_end().to_string();
    push_keepalive(&mut out, timeout);
    out.push_str("\r\nLocation: ");
    out.push_str(location);
    out.push_str("\r\nContent-Type: text/html\r\nContent-Length: 0\r\n\r\n");
    out.into_bytes()
}

/// A 400 or 404 response, with config overrides applied when registered.
pub fn error_response(
    status: u16,
    head: Option<&str>,
    body: Option<&str>,
    timeout: u64,
) -> Vec<u8> {
    let default_head = if status == 400 {
        HDR_BAD_REQUEST
    } else {
        HDR_NOT_FOUND
    };
    let default_body = if status == 400 {
        BODY_BAD_REQUEST
    } else {
        BODY_NOT_FOUND
    };
    let body = body.unwrap_or(default_body);

    let mut out = head.unwrap_or(default_head).trim_end().to_string();
    push_keepalive(&mut out, timeout);
    out.push_str("\r\nContent-Type: text/html\r\nContent-Length: ");
    out.push_str(&body.len().to_string());
    out.push_str("\r\n\r\n");
    out.push_str(body);
    out.into_bytes()
}

/// Built-in extension table, consulted after the archive's `[mime]`
/// overrides.
pub fn builtin_mime(ext: &str) -> Option<&'static str> {
    let mime = match ext {
        "html" | "htm" => "text/html",
        "js" => "text/javascript",
        "css" => "text/css",
        "txt" => "text/plain",
        "apng" => "image/apng",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        "ico" | "cur" => "image/x-icon",
        "jpg" | "jpeg" | "jfif" | "pjpeg" | "pjp" => "image/jpeg",
        "png" => "image/png",
        "svg" => "image/svg+xml",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",
        "au" | "snd" => "audio/basic",
        "mid" | "rmi" => "audio/mid",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "mp2" | "mpa" | "mpeg" | "mpg" | "mpv2" => "video/mpeg",
        "mov" | "qt" => "video/quicktime",
        "flv" => "video/x-flv",
        "avi" => "video/x-msvideo",
        "swf" => "application/x-shockwave-flash",
        "ps" | "eps" | "ai" => "application/postscript",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "ppt" => "application/vnd.ms-powerpoint",
        "xls" => "application/vnd.ms-excel",
        "json" => "application/json",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "zip" => "application/zip",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_response_shape() {
        let resp = ok_response(None, "text/plain", 30, b"hello");
        let text = String::from_utf8(resp).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Connection: keep-alive\r\nKeep-Alive: timeout=30\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn test_no_keepalive_when_timeout_zero() {
        let resp = ok_response(None, "text/html", 0, b"x");
        let text = String::from_utf8(resp).unwrap();
        assert!(!text.contains("Keep-Alive"));
        assert!(!text.contains("Connection:"));
    }

    #[test]
    fn test_redirect_shape() {
        let resp = redirect_response(None, 0, "/index.html");
        let text = String::from_utf8(resp).unwrap();
        assert!(text.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
        assert!(text.contains("Location: /index.html\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn test_error_overrides() {
        let resp = error_response(404, Some("HTTP/1.1 404 Gone Fishing"), Some("nope"), 0);
        let text = String::from_utf8(resp).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Gone Fishing\r\n"));
        assert!(text.ends_with("\r\n\r\nnope"));

        let resp = error_response(400, None, None, 0);
        let text = String::from_utf8(resp).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains(BODY_BAD_REQUEST));
    }

    #[test]
    fn test_builtin_mime() {
        assert_eq!(builtin_mime("html"), Some("text/html"));
        assert_eq!(builtin_mime("png"), Some("image/png"));
        assert_eq!(builtin_mime("weird"), None);
    }
}
