//! Byte pump and bidirectional splice
//!
//! A pump copies one direction of a relay session in 64 KiB reads,
//! recording every chunk with the traffic accountant before it is written
//! on. A splice runs the two pumps of a session; when either finishes the
//! other is dropped with its streams, which the peer observes as EOF.

use crate::stats::TrafficStats;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Read buffer size for a single pump
pub const PUMP_BUFFER_SIZE: usize = 64 * 1024;

/// Accounting tag for one pump direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client towards target
    Upload,
    /// Target towards client
    Download,
}

/// Copy bytes from `reader` to `writer` until EOF or error.
///
/// Each chunk is recorded against `direction` before the write, so the
/// accountant sees bytes in the order they cross the proxy. Returns the
/// number of bytes moved.
pub async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    direction: Direction,
    stats: &TrafficStats,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stats.record(direction, n as u64);
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }

    let _ = writer.shutdown().await;
    Ok(total)
}

/// Relay bidirectionally between `a` and `b`.
///
/// Bytes from `a` to `b` are tagged `a_to_b`; the reverse direction
/// `b_to_a`. The first direction to terminate ends the session; dropping
/// the halves closes both underlying streams.
pub async fn splice<A, B>(
    a: A,
    b: B,
    a_to_b: Direction,
    b_to_a: Direction,
    stats: &TrafficStats,
) -> io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let forward = pump(&mut a_read, &mut b_write, a_to_b, stats);
    let backward = pump(&mut b_read, &mut a_write, b_to_a, stats);

    tokio::select! {
        result = forward => match result {
            Ok(n) => debug!(bytes = n, "forward direction finished"),
            Err(e) => debug!("forward direction error: {}", e),
        },
        result = backward => match result {
            Ok(n) => debug!(bytes = n, "backward direction finished"),
            Err(e) => debug!("backward direction error: {}", e),
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_pump_preserves_bytes() {
        let stats = TrafficStats::new();
        let data = b"the quick brown fox";
        let mut reader = std::io::Cursor::new(data.to_vec());
        let mut sink = Vec::new();

        let n = pump(&mut reader, &mut sink, Direction::Upload, &stats)
            .await
            .unwrap();

        assert_eq!(n, data.len() as u64);
        assert_eq!(sink, data);
    }

    #[tokio::test]
    async fn test_pump_records_direction() {
        let stats = TrafficStats::new();
        let mut reader = std::io::Cursor::new(vec![0u8; 1234]);
        let mut sink = Vec::new();

        pump(&mut reader, &mut sink, Direction::Download, &stats)
            .await
            .unwrap();

        stats.tick();
        let snap = stats.snapshot();
        assert_eq!(snap.download_total, 1234);
        assert_eq!(snap.upload_total, 0);
    }

    #[tokio::test]
    async fn test_pump_empty_source() {
        let stats = TrafficStats::new();
        let mut reader = std::io::Cursor::new(Vec::new());
        let mut sink = Vec::new();

        let n = pump(&mut reader, &mut sink, Direction::Upload, &stats)
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_pump_large_transfer() {
        let stats = TrafficStats::new();
        // Larger than one buffer, not a multiple of it
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut reader = std::io::Cursor::new(data.clone());
        let mut sink = Vec::new();

        let n = pump(&mut reader, &mut sink, Direction::Upload, &stats)
            .await
            .unwrap();

        assert_eq!(n, data.len() as u64);
        assert_eq!(sink, data);
    }

    #[tokio::test]
    async fn test_splice_bidirectional() {
        let stats = TrafficStats::new();
        let (mut client_a, server_a) = duplex(4096);
        let (mut client_b, server_b) = duplex(4096);

        let relay = tokio::spawn(async move {
            let stats = stats;
            splice(
                server_a,
                server_b,
                Direction::Upload,
                Direction::Download,
                &stats,
            )
            .await
        });

        client_a.write_all(b"message A->B").await.unwrap();
        let mut buf = [0u8; 12];
        client_b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"message A->B");

        client_b.write_all(b"message B->A").await.unwrap();
        client_a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"message B->A");

        drop(client_a);
        drop(client_b);
        tokio::time::timeout(Duration::from_secs(1), relay)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_splice_ends_on_eof() {
        let stats = TrafficStats::new();
        let (mut client_a, server_a) = duplex(1024);
        let (client_b, server_b) = duplex(1024);

        let relay = tokio::spawn(async move {
            let stats = stats;
            splice(
                server_a,
                server_b,
                Direction::Upload,
                Direction::Download,
                &stats,
            )
            .await
        });

        client_a.write_all(b"data").await.unwrap();
        drop(client_a);
        drop(client_b);

        let result = tokio::time::timeout(Duration::from_secs(1), relay).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_splice_accounts_both_directions() {
        let stats = std::sync::Arc::new(TrafficStats::new());
        let (mut client_a, server_a) = duplex(4096);
        let (mut client_b, server_b) = duplex(4096);

        let relay_stats = stats.clone();
        let relay = tokio::spawn(async move {
            splice(
                server_a,
                server_b,
                Direction::Upload,
                Direction::Download,
                &relay_stats,
            )
            .await
        });

        client_a.write_all(&[1u8; 300]).await.unwrap();
        client_b.write_all(&[2u8; 700]).await.unwrap();

        let mut buf_b = vec![0u8; 300];
        client_b.read_exact(&mut buf_b).await.unwrap();
        let mut buf_a = vec![0u8; 700];
        client_a.read_exact(&mut buf_a).await.unwrap();

        drop(client_a);
        drop(client_b);
        let _ = tokio::time::timeout(Duration::from_secs(1), relay).await;

        stats.tick();
        let snap = stats.snapshot();
        assert_eq!(snap.upload_total, 300);
        assert_eq!(snap.download_total, 700);
    }
}
