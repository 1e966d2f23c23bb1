//! Bidirectional byte pump

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Forward bytes between `a` and `b` until both directions finish.
///
/// Each direction reads into its own bounded buffer and flushes after
/// every write; the two directions share no state and never block each
/// other. A zero-length read, an IO error, or a socket closed mid-read
/// all count as a benign stop for that direction. When a direction
/// finishes, the write side it was feeding is shut down so the peer
/// observes EOF instead of a stalled stream.
///
/// Returns the byte counts moved `(a_to_b, b_to_a)`.
pub async fn relay<A, B>(a: A, b: B, buf_size: usize) -> (u64, u64)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);

    let (a_to_b, b_to_a) = tokio::join!(
        pump(a_read, b_write, buf_size, "a->b"),
        pump(b_read, a_write, buf_size, "b->a"),
    );

    debug!(a_to_b, b_to_a, "relay finished");
    (a_to_b, b_to_a)
}

async fn pump<R, W>(mut reader: R, mut writer: W, buf_size: usize, direction: &str) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buf_size];
    let mut total = 0u64;

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                trace!(direction, "peer closed");
                break;
            }
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    debug!(direction, error = %e, "write side closed");
                    break;
                }
                if let Err(e) = writer.flush().await {
                    debug!(direction, error = %e, "flush failed");
                    break;
                }
                total += n as u64;
                trace!(direction, bytes = n, "forwarded");
            }
            Err(e) => {
                debug!(direction, error = %e, "read side closed");
                break;
            }
        }
    }

    // Propagate EOF so the peer's read loop can finish too.
    let _ = writer.shutdown().await;
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Write `payload` into one side, assert it arrives byte-exact and
    /// in order on the other, and that the relay itself terminates.
    async fn assert_transfers(payload: Vec<u8>) {
        let (mut client, client_peer) = tokio::io::duplex(1024);
        let (mut sink, sink_peer) = tokio::io::duplex(1024);

        let relay_task = tokio::spawn(relay(client_peer, sink_peer, 8 * 1024));

        client.write_all(&payload).await.unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        sink.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, payload);

        drop(sink);
        drop(client);
        let (a_to_b, _) = timeout(Duration::from_secs(5), relay_task)
            .await
            .expect("relay should terminate")
            .unwrap();
        assert_eq!(a_to_b, payload.len() as u64);
    }

    #[tokio::test]
    async fn test_relay_zero_bytes() {
        assert_transfers(Vec::new()).await;
    }

    #[tokio::test]
    async fn test_relay_one_byte() {
        assert_transfers(vec![0x42]).await;
    }

    #[tokio::test]
    async fn test_relay_large_payload_in_order() {
        let payload: Vec<u8> = (0..65536u32).map(|i| (i % 251) as u8).collect();
        assert_transfers(payload).await;
    }

    #[tokio::test]
    async fn test_closing_one_side_does_not_hang_the_other() {
        let (client, client_peer) = tokio::io::duplex(1024);
        let (mut sink, sink_peer) = tokio::io::duplex(1024);

        let relay_task = tokio::spawn(relay(client_peer, sink_peer, 8 * 1024));

        // The closed side stops the a->b direction immediately...
        drop(client);

        // ...but the b->a direction still drains without hanging.
        sink.write_all(b"late data from b").await.unwrap();
        sink.shutdown().await.unwrap();

        let mut rest = Vec::new();
        sink.read_to_end(&mut rest).await.unwrap();

        timeout(Duration::from_secs(5), relay_task)
            .await
            .expect("relay should terminate after both sides close")
            .unwrap();
    }

    #[tokio::test]
    async fn test_directions_are_independent() {
        let (mut left, left_peer) = tokio::io::duplex(1024);
        let (mut right, right_peer) = tokio::io::duplex(1024);

        let relay_task = tokio::spawn(relay(left_peer, right_peer, 4 * 1024));

        left.write_all(b"ltr").await.unwrap();
        right.write_all(b"rtl").await.unwrap();

        let mut buf = [0u8; 3];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ltr");
        left.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"rtl");

        drop(left);
        drop(right);
        let (a_to_b, b_to_a) = timeout(Duration::from_secs(5), relay_task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!((a_to_b, b_to_a), (3, 3));
    }
}
