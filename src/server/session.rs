//! Session tracking and reaping.
//!
//! Every accepted connection gets one [`Session`], shared between its
//! worker task and the [`SessionTable`]. The reaper removes sessions that
//! finished or idled past the session timeout; it wakes on a fixed
//! interval or immediately when a finishing session signals it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::debug;

/// Unique session identifier.
pub type SessionId = u64;

/// What protocol a session ended up speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Tunnel peer speaking SOCKS5 on the server node.
    Socks5,
    /// Ordinary visitor served from the decoy store.
    DecoyWeb,
    /// Local connection tunneled out by the client node.
    TunnelClient,
}

/// One accepted connection, from accept to final cleanup.
pub struct Session {
    id: SessionId,
    kind: Mutex<SessionKind>,
    peer_addr: SocketAddr,
    started_at: Instant,
    last_activity: Mutex<Instant>,
    done: AtomicBool,
    wake: Arc<Notify>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        *self.kind.lock()
    }

    /// Reclassify after the camouflage verdict (every tunnel connection
    /// starts as a presumed SOCKS5 peer).
    pub fn set_kind(&self, kind: SessionKind) {
        *self.kind.lock() = kind;
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Record activity, pushing the idle deadline out.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Mark finished and wake the reaper. Idempotent; only the first call
    /// signals.
    pub fn finish(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.wake.notify_one();
        }
    }

    fn is_expired(&self, timeout: Duration) -> bool {
        self.idle() > timeout
    }
}

/// The tracking collection for one node role. Insertion from the accept
/// path and removal from the reaper are serialized by the table lock.
pub struct SessionTable {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
    session_timeout: Duration,
    wake: Arc<Notify>,
}

impl SessionTable {
    pub fn new(session_timeout: Duration) -> Self {
        SessionTable {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            session_timeout,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Create and track a new session.
    pub fn create(&self, kind: SessionKind, peer_addr: SocketAddr) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let session = Arc::new(Session {
            id,
            kind: Mutex::new(kind),
            peer_addr,
            started_at: now,
            last_activity: Mutex::new(now),
            done: AtomicBool::new(false),
            wake: Arc::clone(&self.wake),
        });
        self.sessions.write().insert(id, Arc::clone(&session));
        session
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn remove(&self, id: SessionId) {
        self.sessions.write().remove(&id);
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Remove every finished or idle-expired session. Returns how many
    /// were dropped.
    pub fn reap(&self) -> usize {
        let doomed: Vec<SessionId> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter(|(_, s)| s.is_done() || s.is_expired(self.session_timeout))
                .map(|(id, _)| *id)
                .collect()
        };

        if !doomed.is_empty() {
            let mut sessions = self.sessions.write();
            for id in &doomed {
                sessions.remove(id);
            }
        }
        doomed.len()
    }

    /// Run the reaper until the table is dropped by every other holder.
    /// Wakes on the scheduler interval or on a finish signal.
    pub async fn run_reaper(self: Arc<Self>, interval: Duration) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.wake.notified() => {}
            }
            let reaped = self.reap();
            if reaped > 0 {
                debug!(reaped, remaining = self.count(), "session cleanup");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "198.51.100.1:40000".parse().unwrap()
    }

    #[test]
    fn test_create_and_count() {
        let table = SessionTable::new(Duration::from_secs(60));
        let a = table.create(SessionKind::Socks5, addr());
        let b = table.create(SessionKind::DecoyWeb, addr());
        assert_ne!(a.id(), b.id());
        assert_eq!(table.count(), 2);
        assert_eq!(table.get(a.id()).unwrap().kind(), SessionKind::Socks5);
    }

    #[test]
    fn test_reap_removes_done_sessions() {
        let table = SessionTable::new(Duration::from_secs(60));
        let a = table.create(SessionKind::Socks5, addr());
        let _b = table.create(SessionKind::Socks5, addr());

        a.finish();
        assert!(a.is_done());
        assert_eq!(table.reap(), 1);
        assert_eq!(table.count(), 1);
        assert!(table.get(a.id()).is_none());
    }

    #[test]
    fn test_reap_removes_idle_sessions() {
        let table = SessionTable::new(Duration::from_millis(0));
        let a = table.create(SessionKind::DecoyWeb, addr());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(table.reap(), 1);
        assert!(!a.is_done());
    }

    #[test]
    fn test_touch_defers_expiry() {
        let table = SessionTable::new(Duration::from_millis(50));
        let a = table.create(SessionKind::Socks5, addr());
        std::thread::sleep(Duration::from_millis(30));
        a.touch();
        std::thread::sleep(Duration::from_millis(30));
        // idle is ~30ms, under the 50ms budget
        assert_eq!(table.reap(), 0);
        a.finish();
        assert_eq!(table.reap(), 1);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let table = SessionTable::new(Duration::from_secs(60));
        let a = table.create(SessionKind::TunnelClient, addr());
        a.finish();
        a.finish();
        assert!(a.is_done());
    }

    #[tokio::test]
    async fn test_reaper_wakes_on_finish_signal() {
        let table = Arc::new(SessionTable::new(Duration::from_secs(60)));
        let session = table.create(SessionKind::Socks5, addr());

        // long interval: only the finish signal can wake the reaper in time
        let reaper = tokio::spawn(Arc::clone(&table).run_reaper(Duration::from_secs(3600)));

        session.finish();
        tokio::time::timeout(Duration::from_secs(2), async {
            while table.count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("reaper never woke on the finish signal");

        reaper.abort();
    }
}
