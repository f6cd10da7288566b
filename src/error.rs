//! Error types shared across the proxy.

use thiserror::Error;

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running either proxy node.
#[derive(Error, Debug)]
pub enum Error {
    /// Archive stream could not be decoded or written
    #[error("archive error: {0}")]
    Archive(String),

    /// Configuration file or option error
    #[error("configuration error: {0}")]
    Config(String),

    /// Camouflage handshake failed (bad request line, non-200 answer)
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Malformed SOCKS5 frame or unsupported command
    #[error("protocol error: {0}")]
    Protocol(String),

    /// TLS setup or certificate loading error
    #[error("TLS error: {0}")]
    Tls(String),

    /// A bounded wait elapsed
    #[error("connection timeout after {0}s")]
    Timeout(u64),

    /// Network I/O error
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
}

impl Error {
    /// Create a new archive error
    pub fn archive(msg: impl Into<String>) -> Self {
        Error::Archive(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new handshake error
    pub fn handshake(msg: impl Into<String>) -> Self {
        Error::Handshake(msg.into())
    }

    /// Create a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Create a new TLS error
    pub fn tls(msg: impl Into<String>) -> Self {
        Error::Tls(msg.into())
    }

    /// Check if this error is an orderly peer disconnect.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::Network(e) if e.kind() == std::io::ErrorKind::UnexpectedEof
        )
    }
}
