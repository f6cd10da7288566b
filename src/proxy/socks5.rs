//! SOCKS5 protocol state machine.
//!
//! Runs the server end of RFC 1928 over the decrypted tunnel stream:
//! method negotiation, optional username/password sub-negotiation, the
//! CONNECT request, then the relay. BIND and UDP-ASSOCIATE are answered
//! with "command not supported". Every wait is bounded by the session
//! timeout; expiry sends a TTL-expired reply before closing.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::relay::{relay_counted, RelayEnd};
use super::{
    ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, AUTH_VER, CMD_BIND, CMD_CONNECT, CMD_UDP,
    METHOD_NOAUTH, METHOD_UNACCEPTABLE, METHOD_USRPASS, REPLY_LEN_IPV4, REPLY_LEN_IPV6,
    REP_ATYPUNSUPPORTED, REP_CMDUNSUPPORTED, REP_FAILURE, REP_HOSTUNREACH, REP_REFUSED,
    REP_SUCCESS, REP_TTLEXPIRED, STATUS_ERROR, VER,
};
use crate::error::{Error, Result};

/// Username → password table for the USERNAME/PASSWORD method.
pub type CredentialTable = HashMap<String, String>;

/// Protocol stages. `Done` is terminal; `Bind` and `Udp` only ever emit
/// the unsupported-command reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Auth,
    Request,
    Connected,
    Bind,
    Udp,
    Done,
}

/// One SOCKS5 session on the server side of the tunnel.
pub struct Socks5Engine {
    credentials: Option<Arc<CredentialTable>>,
    timeout: Duration,
    peer: SocketAddr,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

fn reply_bytes(rep: u8, atyp: u8) -> Vec<u8> {
    let len = if atyp == ATYP_IPV6 {
        REPLY_LEN_IPV6
    } else {
        REPLY_LEN_IPV4
    };
    let mut out = vec![0u8; len];
    out[0] = VER;
    out[1] = rep;
    out[3] = atyp;
    out
}

fn ttl_expired_reply() -> Vec<u8> {
    reply_bytes(REP_TTLEXPIRED, ATYP_IPV4)
}

impl Socks5Engine {
    pub fn new(
        credentials: Option<Arc<CredentialTable>>,
        timeout: Duration,
        peer: SocketAddr,
    ) -> Self {
        Socks5Engine {
            credentials,
            timeout,
            peer,
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    /// Bytes relayed client→target after the session finished.
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Bytes relayed target→client after the session finished.
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    fn has_credentials(&self) -> bool {
        self.credentials.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// Drive the state machine until `Done`. Each inbound frame is one
    /// read from the stream, as delivered by the TLS record layer.
    pub async fn run<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stage = Stage::Init;
        let mut buf = vec![0u8; 4096];

        while stage != Stage::Done {
            let n = match tokio::time::timeout(self.timeout, stream.read(&mut buf)).await {
                Err(_) => {
                    let _ = stream.write_all(&ttl_expired_reply()).await;
                    debug!(peer = %self.peer, "socks5 timeout elapsed ({}s)", self.timeout.as_secs());
                    break;
                }
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(Error::Network(e)),
            };
            let frame = &buf[..n];

            stage = match stage {
                Stage::Init => self.stage_init(frame, stream).await?,
                Stage::Auth => self.stage_auth(frame, stream).await?,
                Stage::Request => match self.stage_request(frame, stream).await? {
                    (Stage::Connected, Some(mut target)) => {
                        self.stage_connected(stream, &mut target).await?
                    }
                    (unsupported @ (Stage::Bind | Stage::Udp), _) => {
                        self.stage_unsupported(unsupported, stream).await?
                    }
                    (next, _) => next,
                },
                _ => Stage::Done,
            };
        }

        Ok(())
    }

    /// Method negotiation. USERNAME/PASSWORD is selected only when a
    /// non-empty credential table is configured; NO-AUTH only when none is.
    async fn stage_init<S>(&self, frame: &[u8], stream: &mut S) -> Result<Stage>
    where
        S: AsyncWrite + Unpin,
    {
        let mut reply = [VER, METHOD_UNACCEPTABLE];
        let mut next = Stage::Done;

        if frame.len() > 2 && frame[0] == VER {
            let count = frame[1] as usize;
            let methods = &frame[2..frame.len().min(2 + count)];
            for &method in methods {
                if method == METHOD_USRPASS && self.has_credentials() {
                    reply[1] = METHOD_USRPASS;
                    next = Stage::Auth;
                    break;
                }
                if method == METHOD_NOAUTH && !self.has_credentials() {
                    reply[1] = METHOD_NOAUTH;
                    next = Stage::Request;
                    break;
                }
            }
        }

        stream.write_all(&reply).await?;
        Ok(next)
    }

    /// Username/password sub-negotiation.
    async fn stage_auth<S>(&self, frame: &[u8], stream: &mut S) -> Result<Stage>
    where
        S: AsyncWrite + Unpin,
    {
        let mut reply = [AUTH_VER, STATUS_ERROR];
        let mut next = Stage::Done;

        if frame.len() > 3 && frame[0] == AUTH_VER {
            if let Some((user, password)) = parse_userpass(frame) {
                let table = self.credentials.as_ref();
                if table.and_then(|t| t.get(&user)) == Some(&password) {
                    reply[1] = REP_SUCCESS;
                    next = Stage::Request;
                } else {
                    reply[1] = REP_REFUSED;
                    info!(peer = %self.peer, "authentication failed");
                }
            }
        }

        stream.write_all(&reply).await?;
        Ok(next)
    }

    /// The CONNECT request: parse the target, open the outbound
    /// connection, reply with the matching address family.
    async fn stage_request<S>(
        &self,
        frame: &[u8],
        stream: &mut S,
    ) -> Result<(Stage, Option<TcpStream>)>
    where
        S: AsyncWrite + Unpin,
    {
        if frame.len() <= 4 || frame[0] != VER || frame[2] != 0 {
            stream.write_all(&reply_bytes(REP_FAILURE, ATYP_IPV4)).await?;
            return Ok((Stage::Done, None));
        }

        match frame[1] {
            CMD_CONNECT => {}
            CMD_BIND => return Ok((Stage::Bind, None)),
            CMD_UDP => return Ok((Stage::Udp, None)),
            _ => {
                stream
                    .write_all(&reply_bytes(REP_CMDUNSUPPORTED, ATYP_IPV4))
                    .await?;
                return Ok((Stage::Done, None));
            }
        }

        let (target, reply_atyp) = match parse_connect_target(frame) {
            Some(parsed) => parsed,
            None => {
                let rep = if frame.len() > 3
                    && !matches!(frame[3], ATYP_IPV4 | ATYP_DOMAIN | ATYP_IPV6)
                {
                    REP_ATYPUNSUPPORTED
                } else {
                    REP_FAILURE
                };
                stream.write_all(&reply_bytes(rep, ATYP_IPV4)).await?;
                return Ok((Stage::Done, None));
            }
        };

        info!(peer = %self.peer, "try to reach {target}");

        let attempt = tokio::time::timeout(self.timeout, target.connect()).await;
        match attempt {
            Ok(Ok(outbound)) => {
                info!(peer = %self.peer, "connected to {target}");
                stream
                    .write_all(&reply_bytes(REP_SUCCESS, reply_atyp))
                    .await?;
                Ok((Stage::Connected, Some(outbound)))
            }
            _ => {
                info!(peer = %self.peer, "cannot connect to {target}");
                stream
                    .write_all(&reply_bytes(REP_HOSTUNREACH, reply_atyp))
                    .await?;
                Ok((Stage::Done, None))
            }
        }
    }

    async fn stage_unsupported<S>(&self, stage: Stage, stream: &mut S) -> Result<Stage>
    where
        S: AsyncWrite + Unpin,
    {
        debug!(peer = %self.peer, "{} not supported",
               if stage == Stage::Bind { "BIND" } else { "UDP-ASSOCIATE" });
        stream
            .write_all(&reply_bytes(REP_CMDUNSUPPORTED, ATYP_IPV4))
            .await?;
        Ok(Stage::Done)
    }

    async fn stage_connected<S>(&self, stream: &mut S, target: &mut TcpStream) -> Result<Stage>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (end, up, down) = relay_counted(stream, target, self.timeout).await;
        self.bytes_up.fetch_add(up, Ordering::Relaxed);
        self.bytes_down.fetch_add(down, Ordering::Relaxed);

        if end == RelayEnd::Timeout {
            let _ = stream.write_all(&ttl_expired_reply()).await;
            debug!(peer = %self.peer, "relay timeout elapsed ({}s)", self.timeout.as_secs());
        }

        Ok(Stage::Done)
    }
}

fn parse_userpass(frame: &[u8]) -> Option<(String, String)> {
    let ulen = *frame.get(1)? as usize;
    let user = frame.get(2..2 + ulen)?;
    let plen = *frame.get(2 + ulen)? as usize;
    let password = frame.get(3 + ulen..3 + ulen + plen)?;
    Some((
        String::from_utf8_lossy(user).into_owned(),
        String::from_utf8_lossy(password).into_owned(),
    ))
}

/// A parsed CONNECT target.
enum Target {
    Addr(SocketAddr),
    Name(String, u16),
}

impl Target {
    async fn connect(&self) -> std::io::Result<TcpStream> {
        match self {
            Target::Addr(addr) => TcpStream::connect(addr).await,
            Target::Name(host, port) => TcpStream::connect((host.as_str(), *port)).await,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Addr(addr) => write!(f, "{addr}"),
            Target::Name(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

/// Parse the address part of a CONNECT request. Returns the target plus
/// the address type to use in the reply (domain targets answer in the
/// IPv4 shape).
fn parse_connect_target(frame: &[u8]) -> Option<(Target, u8)> {
    match frame[3] {
        ATYP_IPV4 if frame.len() >= 10 => {
            let ip = Ipv4Addr::new(frame[4], frame[5], frame[6], frame[7]);
            let port = u16::from_be_bytes([frame[8], frame[9]]);
            Some((
                Target::Addr(SocketAddr::new(IpAddr::V4(ip), port)),
                ATYP_IPV4,
            ))
        }
        ATYP_IPV6 if frame.len() >= 22 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&frame[4..20]);
            let ip = Ipv6Addr::from(octets);
            let port = u16::from_be_bytes([frame[20], frame[21]]);
            Some((
                Target::Addr(SocketAddr::new(IpAddr::V6(ip), port)),
                ATYP_IPV6,
            ))
        }
        ATYP_DOMAIN if frame.len() > 4 => {
            let dlen = frame[4] as usize;
            let name = frame.get(5..5 + dlen)?;
            let port_bytes = frame.get(5 + dlen..5 + dlen + 2)?;
            let port = u16::from_be_bytes([port_bytes[0], port_bytes[1]]);
            Some((
                Target::Name(String::from_utf8_lossy(name).into_owned(), port),
                ATYP_IPV4,
            ))
        }
        _ => None,
    }
}
