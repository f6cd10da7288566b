//! Server node.
//!
//! Two listeners: the TLS tunnel port, where the camouflage handshake
//! decides between SOCKS5 service and the decoy website, and a plain-HTTP
//! port that only ever serves the decoy. One task per accepted
//! connection; a reaper task prunes the session table.

mod config;
mod metrics;
mod session;

pub use config::{load_credentials, parse_credential, DecoyPages, ServerOptions};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use session::{Session, SessionId, SessionKind, SessionTable};

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::camouflage::{self, Classification, RequestLine};
use crate::error::{Error, Result};
use crate::proxy::socks5::{CredentialTable, Socks5Engine};
use crate::store::VirtualFileStore;
use crate::{tls, MAX_REQUEST_SIZE};

/// The assembled server node. Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct ServerNode {
    options: Arc<ServerOptions>,
    store: Option<Arc<VirtualFileStore>>,
    pages: Arc<DecoyPages>,
    credentials: Option<Arc<CredentialTable>>,
    sessions: Arc<SessionTable>,
    metrics: Arc<ServerMetrics>,
    acceptor: TlsAcceptor,
}

impl ServerNode {
    /// Build the node. Any failure here (TLS identity, archive, listener
    /// configuration) is fatal before the accept loop starts.
    pub fn new(options: ServerOptions) -> Result<Self> {
        options.validate()?;

        let acceptor = tls::make_acceptor(&options.key_file, &options.cert_file)?;

        let store = match &options.archive {
            Some(path) => Some(Arc::new(VirtualFileStore::open(path, options.web_timeout)?)),
            None => None,
        };

        let pages = match &options.pages {
            Some(path) => DecoyPages::from_file(path)?,
            None => DecoyPages::default(),
        };

        let credentials = match &options.credentials {
            Some(path) => {
                let table = load_credentials(path)?;
                if table.is_empty() {
                    None
                } else {
                    info!("{} proxy credentials loaded", table.len());
                    Some(Arc::new(table))
                }
            }
            None => None,
        };

        let sessions = Arc::new(SessionTable::new(options.conn_timeout()));

        Ok(ServerNode {
            options: Arc::new(options),
            store,
            pages: Arc::new(pages),
            credentials,
            sessions,
            metrics: Arc::new(ServerMetrics::new()),
            acceptor,
        })
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    pub fn session_count(&self) -> usize {
        self.sessions.count()
    }

    /// Bind both listeners and serve until interrupted.
    pub async fn run(&self) -> Result<()> {
        let tunnel_addr = format!("{}:{}", self.options.tunnel_ip, self.options.tunnel_port);
        let web_addr = format!("{}:{}", self.options.web_ip, self.options.web_port);

        let tunnel = TcpListener::bind(&tunnel_addr)
            .await
            .map_err(|e| Error::config(format!("cannot bind {tunnel_addr}: {e}")))?;
        let web = TcpListener::bind(&web_addr)
            .await
            .map_err(|e| Error::config(format!("cannot bind {web_addr}: {e}")))?;

        info!("proxy server is listening on [{tunnel_addr}]");
        info!("web server is listening on [{web_addr}]");

        let reaper = tokio::spawn(
            Arc::clone(&self.sessions).run_reaper(self.options.sched_interval()),
        );

        loop {
            tokio::select! {
                accepted = tunnel.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let node = self.clone();
                        tokio::spawn(async move { node.handle_tunnel(stream, peer).await });
                    }
                    Err(e) => warn!("tunnel accept error: {e}"),
                },
                accepted = web.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let node = self.clone();
                        tokio::spawn(async move { node.handle_web(stream, peer).await });
                    }
                    Err(e) => warn!("web accept error: {e}"),
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        reaper.abort();
        let _ = reaper.await;
        info!("exiting, {}", self.metrics.format_report());
        Ok(())
    }

    /// One connection on the tunnel port, TLS accept through final close.
    async fn handle_tunnel(&self, stream: TcpStream, peer: std::net::SocketAddr) {
        self.metrics.connection_opened();
        let session = self.sessions.create(SessionKind::Socks5, peer);
        info!("new connection from [{peer}]");

        if let Err(e) = self.tunnel_session(stream, &session).await {
            if !e.is_disconnect() {
                debug!("[{peer}] session error: {e}");
            }
        }

        session.finish();
        self.metrics.connection_closed();
        debug!("[{peer}] closing connection");
    }

    async fn tunnel_session(&self, stream: TcpStream, session: &Session) -> Result<()> {
        let peer = session.peer_addr();
        let timeout = self.options.conn_timeout();
        stream.set_nodelay(true).ok();

        let mut tls_stream = match tokio::time::timeout(timeout, self.acceptor.accept(stream)).await
        {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                self.metrics.handshake_failed();
                return Err(Error::tls(format!("accept: {e}")));
            }
            Err(_) => {
                self.metrics.handshake_failed();
                return Err(Error::Timeout(timeout.as_secs()));
            }
        };

        let mut buf = vec![0u8; MAX_REQUEST_SIZE];
        let n = match tokio::time::timeout(timeout, tls_stream.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => return Ok(()),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(Error::Network(e)),
        };
        session.touch();

        match camouflage::classify(&self.options.serial, &buf[..n]) {
            (Classification::Tunnel, _) => {
                tls_stream.write_all(self.pages.ok.as_bytes()).await?;
                self.metrics.tunnel_established();
                debug!("[{peer}] tunnel peer recognized");

                let engine = Socks5Engine::new(self.credentials.clone(), timeout, peer);
                let outcome = engine.run(&mut tls_stream).await;
                self.metrics
                    .add_relayed(engine.bytes_up(), engine.bytes_down());
                outcome
            }
            (Classification::Decoy, Some(line)) => {
                session.set_kind(SessionKind::DecoyWeb);
                self.answer_decoy(&mut tls_stream, &line).await?;
                self.decoy_loop(&mut tls_stream, session).await
            }
            _ => {
                self.metrics.handshake_failed();
                Ok(())
            }
        }
    }

    /// One connection on the plain web port: decoy service only.
    async fn handle_web(&self, mut stream: TcpStream, peer: std::net::SocketAddr) {
        self.metrics.connection_opened();
        let session = self.sessions.create(SessionKind::DecoyWeb, peer);
        info!("new connection [{peer}] to web service");

        if let Err(e) = self.decoy_loop(&mut stream, &session).await {
            if !e.is_disconnect() {
                debug!("[{peer}] web session error: {e}");
            }
        }

        session.finish();
        self.metrics.connection_closed();
    }

    /// Serve decoy requests until the peer goes quiet or away. Idle time
    /// is budgeted by the web-service timeout when one is configured.
    async fn decoy_loop<S>(&self, stream: &mut S, session: &Session) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let timeout = if self.options.web_timeout > 0 {
            std::time::Duration::from_secs(self.options.web_timeout)
        } else {
            self.options.conn_timeout()
        };
        let mut buf = vec![0u8; MAX_REQUEST_SIZE];

        loop {
            let n = match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => return Ok(()),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(Error::Network(e)),
            };
            session.touch();

            match camouflage::parse_request_line(&buf[..n]) {
                Some(line) => self.answer_decoy(stream, &line).await?,
                None => return Ok(()),
            }
        }
    }

    /// Answer one parsed decoy request, store-backed when an archive is
    /// loaded, from the canned pages otherwise.
    async fn answer_decoy<S>(&self, stream: &mut S, line: &RequestLine) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let response: Vec<u8> = match &self.store {
            Some(store) => store.respond(&line.method, &line.path),
            None => {
                let page = if line.method == "GET" {
                    if line.path == "/" {
                        &self.pages.ok
                    } else {
                        &self.pages.not_found
                    }
                } else {
                    &self.pages.bad_request
                };
                page.clone().into_bytes()
            }
        };

        stream.write_all(&response).await?;
        self.metrics.decoy_answered();
        Ok(())
    }
}
