//! Bidirectional splice between a client and its backend.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::registry::LiveConnection;

/// Which side ended the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// Client to backend copy finished or failed
    Client { bytes: u64 },
    /// Backend to client copy finished or failed
    Backend { bytes: u64 },
    /// The live connection handle was closed
    Killed,
}

/// Copy both directions until one ends or `kill` fires, then drop both
/// streams.
pub async fn relay<C, B>(client: C, backend: B, kill: Option<LiveConnection>) -> RelayEnd
where
    C: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let upstream = async {
        let result = tokio::io::copy(&mut client_read, &mut backend_write).await;
        let _ = backend_write.shutdown().await;
        result
    };
    let downstream = async {
        let result = tokio::io::copy(&mut backend_read, &mut client_write).await;
        let _ = client_write.shutdown().await;
        result
    };
    let killed = async {
        match kill {
            Some(live) => live.closed().await,
            None => std::future::pending::<()>().await,
        }
    };

    let end = tokio::select! {
        result = upstream => RelayEnd::Client { bytes: copied(result, "client") },
        result = downstream => RelayEnd::Backend { bytes: copied(result, "backend") },
        _ = killed => RelayEnd::Killed,
    };
    debug!(?end, "Relay finished");
    end
}

fn copied(result: std::io::Result<u64>, side: &str) -> u64 {
    match result {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(side, error = %e, "Relay copy failed");
            0
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn bytes_flow_both_ways_until_client_closes() {
        let (client, mut client_peer) = tokio::io::duplex(1024);
        let (backend, mut backend_peer) = tokio::io::duplex(1024);
        let task = tokio::spawn(relay(client, backend, None));

        client_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        backend_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        backend_peer.write_all(b"pong").await.unwrap();
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        client_peer.shutdown().await.unwrap();
        assert_eq!(task.await.unwrap(), RelayEnd::Client { bytes: 4 });

        // backend sees EOF once the relay has dropped its side
        let mut rest = Vec::new();
        backend_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn kill_switch_tears_down() {
        let (client, _client_peer) = tokio::io::duplex(1024);
        let (backend, _backend_peer) = tokio::io::duplex(1024);
        let live = LiveConnection::new();
        let task = tokio::spawn(relay(client, backend, Some(live.clone())));

        live.close();
        let end = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end, RelayEnd::Killed);
    }
}
