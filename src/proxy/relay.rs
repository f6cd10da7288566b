//! Bidirectional byte pump.
//!
//! Couples two streams until one side closes, errors, or the idle timeout
//! elapses. Each chunk read from one side is written in full to the other
//! before the next wait; payloads are never inspected.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::RELAY_BUFSIZE;

/// Why the relay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// A side closed or failed; the pump is done.
    Closed,
    /// No data in either direction within the idle budget.
    Timeout,
}

/// Pump bytes between `a` and `b` until either side finishes or stays
/// silent past `idle`. Read and write failures end the relay the same way
/// a close does; the caller only needs to distinguish the timeout.
pub async fn relay<A, B>(a: &mut A, b: &mut B, idle: Duration) -> RelayEnd
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    relay_counted(a, b, idle).await.0
}

/// [`relay`] with per-direction byte counters, for callers that track
/// traffic totals.
pub async fn relay_counted<A, B>(a: &mut A, b: &mut B, idle: Duration) -> (RelayEnd, u64, u64)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf_a = vec![0u8; RELAY_BUFSIZE];
    let mut buf_b = vec![0u8; RELAY_BUFSIZE];
    let mut up: u64 = 0;
    let mut down: u64 = 0;

    enum Side {
        AtoB(std::io::Result<usize>),
        BtoA(std::io::Result<usize>),
    }

    let end = loop {
        let event = tokio::time::timeout(idle, async {
            tokio::select! {
                r = a.read(&mut buf_a) => Side::AtoB(r),
                r = b.read(&mut buf_b) => Side::BtoA(r),
            }
        })
        .await;

        match event {
            Err(_) => break RelayEnd::Timeout,
            Ok(Side::AtoB(Ok(0))) | Ok(Side::BtoA(Ok(0))) => break RelayEnd::Closed,
            Ok(Side::AtoB(Ok(n))) => {
                if b.write_all(&buf_a[..n]).await.is_err() {
                    break RelayEnd::Closed;
                }
                up += n as u64;
            }
            Ok(Side::BtoA(Ok(n))) => {
                if a.write_all(&buf_b[..n]).await.is_err() {
                    break RelayEnd::Closed;
                }
                down += n as u64;
            }
            Ok(Side::AtoB(Err(_))) | Ok(Side::BtoA(Err(_))) => break RelayEnd::Closed,
        }
    };

    trace!(up, down, "relay finished: {end:?}");
    (end, up, down)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bytes_flow_both_ways() {
        let (mut app_a, mut pump_a) = tokio::io::duplex(64);
        let (mut app_b, mut pump_b) = tokio::io::duplex(64);

        let pump = tokio::spawn(async move {
            relay(&mut pump_a, &mut pump_b, Duration::from_secs(5)).await
        });

        app_a.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        app_b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        app_b.write_all(b"pong").await.unwrap();
        app_a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(app_a);
        assert_eq!(pump.await.unwrap(), RelayEnd::Closed);
    }

    #[tokio::test]
    async fn test_idle_timeout_ends_relay() {
        let (_app_a, mut pump_a) = tokio::io::duplex(64);
        let (_app_b, mut pump_b) = tokio::io::duplex(64);

        let end = relay(&mut pump_a, &mut pump_b, Duration::from_millis(50)).await;
        assert_eq!(end, RelayEnd::Timeout);
    }

    #[tokio::test]
    async fn test_large_transfer_preserves_order() {
        let (mut app_a, mut pump_a) = tokio::io::duplex(1024);
        let (mut app_b, mut pump_b) = tokio::io::duplex(1024);

        let pump = tokio::spawn(async move {
            relay_counted(&mut pump_a, &mut pump_b, Duration::from_secs(5)).await
        });

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let expect = payload.clone();
        let writer = tokio::spawn(async move {
            app_a.write_all(&payload).await.unwrap();
            drop(app_a);
        });

        let mut received = vec![0u8; expect.len()];
        app_b.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expect);

        writer.await.unwrap();
        drop(app_b);
        let (end, up, _down) = pump.await.unwrap();
        assert_eq!(end, RelayEnd::Closed);
        assert_eq!(up, 100_000);
    }
}
