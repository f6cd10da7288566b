//! Aggregate server counters.
//!
//! Operational numbers only; no per-user data is recorded anywhere.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server metrics collector.
pub struct ServerMetrics {
    start_time: Instant,
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    tunnel_sessions: AtomicU64,
    decoy_requests: AtomicU64,
    handshake_failures: AtomicU64,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        ServerMetrics {
            start_time: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            tunnel_sessions: AtomicU64::new(0),
            decoy_requests: AtomicU64::new(0),
            handshake_failures: AtomicU64::new(0),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// A connection presented the secret path and became a tunnel.
    pub fn tunnel_established(&self) {
        self.tunnel_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// One decoy request answered (camouflaged or plain listener).
    pub fn decoy_answered(&self) {
        self.decoy_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// TLS accept or request classification failed outright.
    pub fn handshake_failed(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_relayed(&self, up: u64, down: u64) {
        self.bytes_up.fetch_add(up, Ordering::Relaxed);
        self.bytes_down.fetch_add(down, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            tunnel_sessions: self.tunnel_sessions.load(Ordering::Relaxed),
            decoy_requests: self.decoy_requests.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            bytes_up: self.bytes_up.load(Ordering::Relaxed),
            bytes_down: self.bytes_down.load(Ordering::Relaxed),
        }
    }

    /// Plain-text report for logs or a status dump.
    pub fn format_report(&self) -> String {
        let s = self.snapshot();
        format!(
            "uptime {}s, connections {} ({} active), tunnels {}, decoy hits {}, \
             handshake failures {}, relayed {}B up / {}B down",
            s.uptime_secs,
            s.total_connections,
            s.active_connections,
            s.tunnel_sessions,
            s.decoy_requests,
            s.handshake_failures,
            s.bytes_up,
            s.bytes_down,
        )
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub total_connections: u64,
    pub active_connections: u64,
    pub tunnel_sessions: u64,
    pub decoy_requests: u64,
    pub handshake_failures: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

impl MetricsSnapshot {
    /// Fraction of connections that turned out to be tunnel peers.
    pub fn tunnel_rate(&self) -> f64 {
        if self.total_connections == 0 {
            0.0
        } else {
            self.tunnel_sessions as f64 / self.total_connections as f64
        }
    }
}
