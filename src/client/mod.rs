//! Client node.
//!
//! Listens locally, and for every accepted connection opens a TLS tunnel
//! to the server, announces the shared secret, then relays raw bytes.
//! The local application speaks SOCKS5 end-to-end with the server's
//! engine; this node never interprets the traffic.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::camouflage;
use crate::error::{Error, Result};
use crate::proxy::relay::{relay, RelayEnd};
use crate::server::{SessionKind, SessionTable};
use crate::{
    tls, DEFAULT_CONN_TIMEOUT_SECS, DEFAULT_LOCAL_PORT, DEFAULT_SCHED_TIMEOUT_SECS,
    DEFAULT_TUNNEL_PORT, SCHED_TIMEOUT_MAX_SECS, SCHED_TIMEOUT_MIN_SECS,
};

/// Everything the client node needs to start.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Remote server host (name or IP) and tunnel port.
    pub server_host: String,
    pub server_port: u16,
    /// Local listener address for the application.
    pub local_ip: String,
    pub local_port: u16,
    /// Shared secret, matched by the server's classifier.
    pub serial: String,
    /// Per-connection idle timeout (seconds).
    pub conn_timeout: u64,
    /// Reaper interval (seconds).
    pub sched_timeout: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            server_host: String::new(),
            server_port: DEFAULT_TUNNEL_PORT,
            local_ip: "127.0.0.1".to_string(),
            local_port: DEFAULT_LOCAL_PORT,
            serial: String::new(),
            conn_timeout: DEFAULT_CONN_TIMEOUT_SECS,
            sched_timeout: DEFAULT_SCHED_TIMEOUT_SECS,
        }
    }
}

impl ClientOptions {
    pub fn validate(&self) -> Result<()> {
        if self.server_host.is_empty() {
            return Err(Error::config("server address is required"));
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

    pub fn sched_interval(&self) -> Duration {
        Duration::from_secs(
            self.sched_timeout
                .clamp(SCHED_TIMEOUT_MIN_SECS, SCHED_TIMEOUT_MAX_SECS),
        )
    }
}

/// The assembled client node. Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct ClientNode {
    options: Arc<ClientOptions>,
    connector: TlsConnector,
    sessions: Arc<SessionTable>,
}

impl ClientNode {
    pub fn new(options: ClientOptions) -> Result<Self> {
        options.validate()?;
        let sessions = Arc::new(SessionTable::new(options.conn_timeout()));
        Ok(ClientNode {
            options: Arc::new(options),
            connector: tls::make_connector(),
            sessions,
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions.count()
    }

    /// Bind the local listener and serve until interrupted.
    pub async fn run(&self) -> Result<()> {
        let local_addr = format!("{}:{}", self.options.local_ip, self.options.local_port);
        let listener = TcpListener::bind(&local_addr)
            .await
            .map_err(|e| Error::config(format!("cannot bind {local_addr}: {e}")))?;

        info!("SOCKS5 entry is listening on [{local_addr}]");
        info!(
            "tunneling to [{}:{}]",
            self.options.server_host, self.options.server_port
        );

        let reaper = tokio::spawn(
            Arc::clone(&self.sessions).run_reaper(self.options.sched_interval()),
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let node = self.clone();
                        tokio::spawn(async move { node.handle_local(stream, peer).await });
                    }
                    Err(e) => warn!("accept error: {e}"),
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        reaper.abort();
        let _ = reaper.await;
        info!("exiting");
        Ok(())
    }

    /// One local connection: tunnel out, announce, relay.
    async fn handle_local(&self, stream: TcpStream, peer: SocketAddr) {
        let session = self.sessions.create(SessionKind::TunnelClient, peer);
        info!("new connection from [{peer}]");

        if let Err(e) = self.tunnel_out(stream, peer).await {
            if !e.is_disconnect() {
                debug!("[{peer}] tunnel error: {e}");
            }
        }

        session.finish();
        debug!("[{peer}] closing connection");
    }

    async fn tunnel_out(&self, mut local: TcpStream, peer: SocketAddr) -> Result<()> {
        let options = &self.options;
        let timeout = options.conn_timeout();

        let remote = tokio::time::timeout(
            timeout,
            TcpStream::connect((options.server_host.as_str(), options.server_port)),
        )
        .await
        .map_err(|_| Error::Timeout(timeout.as_secs()))?
        .map_err(Error::Network)?;
        remote.set_nodelay(true).ok();

        let name = tls::server_name(&options.server_host)?;
        let mut tunnel = tokio::time::timeout(timeout, self.connector.connect(name, remote))
            .await
            .map_err(|_| Error::Timeout(timeout.as_secs()))?
            .map_err(|e| Error::tls(format!("connect: {e}")))?;

        camouflage::announce(
            &mut tunnel,
            &options.serial,
            &options.server_host,
            options.server_port,
        )
        .await?;
        debug!("[{peer}] tunnel established");

        if relay(&mut local, &mut tunnel, timeout).await == RelayEnd::Timeout {
            debug!("[{peer}] relay timeout elapsed ({}s)", timeout.as_secs());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_validation() {
        let mut options = ClientOptions {
            server_host: "203.0.113.5".into(),
            serial: "abc123".into(),
            ..Default::default()
        };
        assert!(options.validate().is_ok());

        options.serial.clear();
        assert!(options.validate().is_err());

        options.serial = "abc123".into();
        options.server_host.clear();
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.local_port, DEFAULT_LOCAL_PORT);
        assert_eq!(options.server_port, DEFAULT_TUNNEL_PORT);
        assert_eq!(options.conn_timeout, DEFAULT_CONN_TIMEOUT_SECS);
    }

    #[test]
    fn test_node_requires_valid_options() {
        assert!(ClientNode::new(ClientOptions::default()).is_err());
        let node = ClientNode::new(ClientOptions {
            server_host: "203.0.113.5".into(),
            serial: "abc123".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(node.session_count(), 0);
    }
}
