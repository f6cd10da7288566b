//! Server node options, canned decoy pages, and the credential table.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::proxy::socks5::CredentialTable;
use crate::store::http;
use crate::{
    DEFAULT_CONN_TIMEOUT_SECS, DEFAULT_SCHED_TIMEOUT_SECS, DEFAULT_TUNNEL_PORT,
    DEFAULT_WEB_PORT, DEFAULT_WEB_TIMEOUT_SECS, SCHED_TIMEOUT_MAX_SECS, SCHED_TIMEOUT_MIN_SECS,
};

/// Everything the server node needs to start. Built by the binary from
/// CLI flags merged over the optional configuration file.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// TLS tunnel listener address.
    pub tunnel_ip: String,
    pub tunnel_port: u16,
    /// Plain-HTTP decoy listener address.
    pub web_ip: String,
    pub web_port: u16,
    /// PEM private key and certificate for the TLS identity.
    pub key_file: PathBuf,
    pub cert_file: PathBuf,
    /// Shared secret; requests for `/<serial>` open the tunnel.
    pub serial: String,
    /// Decoy website archive (CPIO). Absent means built-in pages only.
    pub archive: Option<PathBuf>,
    /// Raw HTTP override pages for the archiveless responder.
    pub pages: Option<PathBuf>,
    /// `name:password`-per-line credential file; presence switches the
    /// SOCKS5 engine to USERNAME/PASSWORD.
    pub credentials: Option<PathBuf>,
    /// Per-connection idle timeout (seconds).
    pub conn_timeout: u64,
    /// Reaper interval (seconds); clamped to the scheduler bounds.
    pub sched_timeout: u64,
    /// Keep-alive timeout advertised by the decoy responder (seconds).
    pub web_timeout: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            tunnel_ip: "0.0.0.0".to_string(),
            tunnel_port: DEFAULT_TUNNEL_PORT,
            web_ip: "0.0.0.0".to_string(),
            web_port: DEFAULT_WEB_PORT,
            key_file: PathBuf::new(),
            cert_file: PathBuf::new(),
            serial: String::new(),
            archive: None,
            pages: None,
            credentials: None,
            conn_timeout: DEFAULT_CONN_TIMEOUT_SECS,
            sched_timeout: DEFAULT_SCHED_TIMEOUT_SECS,
            web_timeout: DEFAULT_WEB_TIMEOUT_SECS,
        }
    }
}

impl ServerOptions {
    pub fn validate(&self) -> Result<()> {
        if self.key_file.as_os_str().is_empty() {
            return Err(Error::config("private key file is required"));
        }
        if self.cert_file.as_os_str().is_empty() {
            return Err(Error::config("certificate file is required"));
        }
        if self.serial.is_empty() {
            return Err(Error::config("serial string is required"));
        }
        if self.conn_timeout == 0 {
            return Err(Error::config("connection timeout must be positive"));
        }
        Ok(())
    }

    pub fn conn_timeout(&self) -> Duration {
        Duration::from_secs(self.conn_timeout)
    }

    /// Reaper interval, clamped to the scheduler bounds.
    pub fn sched_interval(&self) -> Duration {
        Duration::from_secs(
            self.sched_timeout
                .clamp(SCHED_TIMEOUT_MIN_SECS, SCHED_TIMEOUT_MAX_SECS),
        )
    }
}

/// The three canned responses used when no archive is loaded, and the 200
/// page acknowledging a recognized tunnel peer.
#[derive(Debug, Clone)]
pub struct DecoyPages {
    pub ok: String,
    pub bad_request: String,
    pub not_found: String,
}

impl Default for DecoyPages {
    fn default() -> Self {
        DecoyPages {
            ok: http::PAGE_SUCCESS.to_string(),
            bad_request: http::PAGE_BAD_REQUEST.to_string(),
            not_found: http::PAGE_NOT_FOUND.to_string(),
        }
    }
}

impl DecoyPages {
    /// Load override pages from a file of raw HTTP responses.
    ///
    /// Blocks are separated by a blank line after the body; within a
    /// block, header lines are rejoined with CRLF, a blank line starts
    /// the body, and body lines are concatenated verbatim. Each block
    /// replaces the page whose 3-digit code sits at the fixed status-line
    /// offset.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::config(format!("{}: {}", path.as_ref().display(), e)))?;

        let mut pages = DecoyPages::default();
        let mut block = String::new();
        let mut blanks = 0;

        let mut install = |block: &str| {
            if block.len() >= 12 {
                match &block.as_bytes()[9..12] {
                    b"200" => pages.ok = block.to_string(),
                    b"400" => pages.bad_request = block.to_string(),
                    b"404" => pages.not_found = block.to_string(),
                    _ => {}
                }
            }
        };

        for line in text.lines() {
            if blanks == 1 {
                block.push_str(line);
            } else {
                block.push_str(line);
                block.push_str("\r\n");
            }
            if line.is_empty() {
                blanks += 1;
            }
            if blanks == 2 {
                install(&block);
                block.clear();
                blanks = 0;
            }
        }
        if !block.is_empty() {
            install(&block);
        }

        Ok(pages)
    }
}

/// Parse one `name:password` pair. Empty names or passwords are rejected.
pub fn parse_credential(line: &str) -> Option<(String, String)> {
    let (name, password) = line.split_once(':')?;
    if name.is_empty() || password.is_empty() {
        return None;
    }
    Some((name.to_string(), password.to_string()))
}

/// Load a `name:password`-per-line credential file. Unparseable lines are
/// skipped; an empty result means no table is configured.
pub fn load_credentials(path: impl AsRef<Path>) -> Result<CredentialTable> {
    let text = fs::read_to_string(path.as_ref())
        .map_err(|e| Error::config(format!("{}: {}", path.as_ref().display(), e)))?;
    let mut table = CredentialTable::new();
    for line in text.lines() {
        if let Some((name, password)) = parse_credential(line.trim_end()) {
            table.insert(name, password);
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_options() -> ServerOptions {
        ServerOptions {
            key_file: "key.pem".into(),
            cert_file: "cert.pem".into(),
            serial: "abc123".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validation() {
        assert!(valid_options().validate().is_ok());

        let mut opts = valid_options();
        opts.serial.clear();
        assert!(opts.validate().is_err());

        let mut opts = valid_options();
        opts.key_file = PathBuf::new();
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_sched_interval_clamped() {
        let mut opts = valid_options();
        opts.sched_timeout = 1;
        assert_eq!(opts.sched_interval(), Duration::from_secs(SCHED_TIMEOUT_MIN_SECS));
        opts.sched_timeout = 500;
        assert_eq!(opts.sched_interval(), Duration::from_secs(SCHED_TIMEOUT_MAX_SECS));
        opts.sched_timeout = 20;
        assert_eq!(opts.sched_interval(), Duration::from_secs(20));
    }

    #[test]
    fn test_parse_credential() {
        assert_eq!(
            parse_credential("alice:s3cret"),
            Some(("alice".into(), "s3cret".into()))
        );
        assert_eq!(
            parse_credential("bob:pa:ss"),
            Some(("bob".into(), "pa:ss".into()))
        );
        assert_eq!(parse_credential("nopassword:"), None);
        assert_eq!(parse_credential(":nouser"), None);
        assert_eq!(parse_credential("plain"), None);
    }

    #[test]
    fn test_pages_file_parsing() {
        let path = std::env::temp_dir().join(format!("foxhole-pages-{}", std::process::id()));
        fs::write(
            &path,
            "HTTP/1.1 200 OK\nContent-Type: text/html\n\n<html>custom</html>\n\nHTTP/1.1 404 Not Found\n\n<h1>gone</h1>\n",
        )
        .unwrap();

        let pages = DecoyPages::from_file(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert!(pages.ok.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(pages.ok.contains("\r\n\r\n"));
        assert!(pages.ok.ends_with("<html>custom</html>"));
        assert!(pages.not_found.ends_with("<h1>gone</h1>"));
        // 400 keeps the built-in default
        assert_eq!(pages.bad_request, http::PAGE_BAD_REQUEST);
    }
}
