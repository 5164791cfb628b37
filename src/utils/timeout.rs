//! Async timeout helpers and the default durations used across the crate.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::{ProtocolError, Result};

/// Default timeout for dialing and single I/O operations
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for the first packet of a control connection
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between heartbeat Pings
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Delay between attempts to reach the master
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Run `future` and map an elapsed deadline to [`ProtocolError::Timeout`]
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Like [`with_timeout_error`] for futures that cannot fail on their own
pub async fn with_timeout<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| ProtocolError::Timeout)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_maps_to_timeout() {
        let result: Result<()> = with_timeout_error(
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn inner_error_passes_through() {
        let result: Result<()> =
            with_timeout_error(async { Err(ProtocolError::ConnectionClosed) }, DEFAULT_TIMEOUT)
                .await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
        assert_eq!(with_timeout(async { 7 }, DEFAULT_TIMEOUT).await.unwrap(), 7);
    }
}
