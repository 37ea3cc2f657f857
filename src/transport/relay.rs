//! Bidirectional relay between an obfuscated connection and a plain stream

use super::{ObfsConnection, TransportError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Bytes moved by a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Plain side to obfuscated side
    pub sent: u64,
    /// Obfuscated side to plain side
    pub received: u64,
}

/// Copy bytes both ways until both sides have closed or `idle` passes
/// without traffic
///
/// EOF on one side half-closes the other, so replies still in flight after
/// a half-close are delivered.
pub async fn relay<S, P>(
    conn: &mut ObfsConnection<S>,
    plain: &mut P,
    buffer_size: usize,
    idle: Duration,
) -> Result<RelayStats, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: AsyncRead + AsyncWrite + Unpin,
{
    let mut stats = RelayStats::default();
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut obfs_open = true;
    let mut plain_open = true;

    while obfs_open || plain_open {
        tokio::select! {
            incoming = conn.recv(), if obfs_open => {
                match incoming? {
                    Some(data) => {
                        plain.write_all(&data).await?;
                        stats.received += data.len() as u64;
                        trace!(bytes = data.len(), "obfs -> plain");
                    }
                    None => {
                        debug!("Obfuscated side finished sending");
                        obfs_open = false;
                        // Best effort, the plain peer may already be gone
                        let _ = plain.shutdown().await;
                    }
                }
            }
            outgoing = plain.read(&mut buf), if plain_open => {
                let n = outgoing?;
                if n == 0 {
                    debug!("Plain side finished sending");
                    plain_open = false;
                    let _ = conn.shutdown().await;
                } else {
                    conn.send(&buf[..n]).await?;
                    stats.sent += n as u64;
                    trace!(bytes = n, "plain -> obfs");
                }
            }
            _ = tokio::time::sleep(idle) => {
                debug!("Relay idle for {:?}", idle);
                return Err(TransportError::Timeout);
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obfuscation::Plain;
    use crate::transport::TransportConfig;

    #[tokio::test]
    async fn test_relay_both_directions() {
        let (obfs_a, obfs_b) = tokio::io::duplex(4096);
        let (mut app, mut plain) = tokio::io::duplex(4096);

        let remote = tokio::spawn(async move {
            let mut conn =
                ObfsConnection::accept(obfs_b, Box::new(Plain::new()), TransportConfig::default())
                    .await
                    .unwrap();
            let got = conn.recv().await.unwrap().unwrap();
            conn.send(b"pong").await.unwrap();
            got
        });

        let mut conn =
            ObfsConnection::connect(obfs_a, Box::new(Plain::new()), TransportConfig::default())
                .await
                .unwrap();
        let relay_task = tokio::spawn(async move {
            relay(&mut conn, &mut plain, 1024, Duration::from_secs(5)).await
        });

        app.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        app.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");
        assert_eq!(&remote.await.unwrap()[..], b"ping");

        drop(app);
        let stats = relay_task.await.unwrap().unwrap();
        assert_eq!(stats, RelayStats { sent: 4, received: 4 });
    }

    #[tokio::test]
    async fn test_relay_reply_after_half_close() {
        let (obfs_a, obfs_b) = tokio::io::duplex(4096);
        let (mut app, mut plain) = tokio::io::duplex(4096);

        let remote = tokio::spawn(async move {
            let mut conn =
                ObfsConnection::accept(obfs_b, Box::new(Plain::new()), TransportConfig::default())
                    .await
                    .unwrap();
            let mut request = Vec::new();
            while let Some(data) = conn.recv().await.unwrap() {
                request.extend_from_slice(&data);
            }
            // The request side is finished, the reply goes out afterwards
            tokio::time::sleep(Duration::from_millis(50)).await;
            conn.send(b"ping-pong").await.unwrap();
            conn.shutdown().await.unwrap();
            request
        });

        let mut conn =
            ObfsConnection::connect(obfs_a, Box::new(Plain::new()), TransportConfig::default())
                .await
                .unwrap();
        let relay_task = tokio::spawn(async move {
            relay(&mut conn, &mut plain, 1024, Duration::from_secs(5)).await
        });

        app.write_all(b"ping").await.unwrap();
        app.shutdown().await.unwrap();

        let mut reply = Vec::new();
        app.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"ping-pong");
        assert_eq!(remote.await.unwrap(), b"ping");

        let stats = relay_task.await.unwrap().unwrap();
        assert_eq!(stats, RelayStats { sent: 4, received: 9 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_idle_timeout() {
        let (obfs_a, _obfs_b) = tokio::io::duplex(64);
        let (_app, mut plain) = tokio::io::duplex(64);

        let mut conn =
            ObfsConnection::connect(obfs_a, Box::new(Plain::new()), TransportConfig::default())
                .await
                .unwrap();
        let result = relay(&mut conn, &mut plain, 64, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TransportError::Timeout)));
    }
}
