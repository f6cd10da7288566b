//! # Foxhole
//!
//! A TLS-tunneled SOCKS5 proxy that disguises its control channel as an
//! ordinary HTTPS site. The server terminates TLS and classifies each
//! connection by its first request: a GET for the shared secret path is the
//! tunnel peer and gets a SOCKS5 endpoint, anything else is ordinary web
//! traffic and is answered from a decoy website packed in a CPIO archive.
//!
//! ```text
//!  local app ──socks5──▶ foxhole-client ══tls══▶ foxhole-server ──tcp──▶ target
//!                                                     │
//!                              browser ──https──▶ decoy website (CPIO rootfs)
//! ```
//!
//! The crate splits into the archive codec and decoy store (pure, testable
//! in isolation), the protocol engines (camouflage + SOCKS5 + relay), and
//! the two node compositions under [`server`] and [`client`].

pub mod archive;
pub mod camouflage;
pub mod client;
pub mod error;
pub mod ini;
pub mod pidfile;
pub mod proxy;
pub mod server;
pub mod store;
pub mod tls;

pub use error::{Error, Result};

/// Default port for the TLS tunnel listener.
pub const DEFAULT_TUNNEL_PORT: u16 = 443;

/// Default port for the plain-HTTP decoy listener on the server node.
pub const DEFAULT_WEB_PORT: u16 = 80;

/// Default port for the local listener on the client node.
pub const DEFAULT_LOCAL_PORT: u16 = 1080;

/// Default per-connection idle timeout (seconds).
pub const DEFAULT_CONN_TIMEOUT_SECS: u64 = 60;

/// Default keep-alive timeout advertised by the decoy web responder (seconds).
pub const DEFAULT_WEB_TIMEOUT_SECS: u64 = 60;

/// Bounds for the session reaper interval (seconds).
pub const SCHED_TIMEOUT_MIN_SECS: u64 = 5;
pub const SCHED_TIMEOUT_MAX_SECS: u64 = 50;

/// Default session reaper interval (seconds).
pub const DEFAULT_SCHED_TIMEOUT_SECS: u64 = 20;

/// Size of the relay copy buffer.
pub const RELAY_BUFSIZE: usize = 16 * 1024;

/// Upper bound on a single camouflage/decoy HTTP request.
pub const MAX_REQUEST_SIZE: usize = 16 * 1024;
