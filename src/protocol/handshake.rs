//! Control channel handshake.
//!
//! ```text
//! node                                   master
//!  |-- SharedSecret (RSA, 16 raw bytes) -->|
//!  |   enable AES-CFB8                     |   enable AES-CFB8
//!  |<------------- Ready ------------------|
//!  |-------------- Hello ----------------->|
//! ```
//!
//! The node sends Hello itself once [`initiate`] returns.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, instrument, warn};
use zeroize::Zeroize;

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{ControlPacket, PacketId};
use crate::service::secure::{SecretBytes, SecureChannel};
use crate::utils::crypto::generate_shared_secret;
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::with_timeout_error;

/// Node side: send a fresh secret over RSA and switch to the stream cipher
#[instrument(skip_all)]
pub async fn initiate<S>(channel: &mut SecureChannel<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    global_metrics().handshake_attempt();
    let mut secret = generate_shared_secret();
    let packet = ControlPacket::SharedSecret(secret.to_vec()).encode()?;

    let result = async {
        channel.send(packet).await?;
        channel.enable_encryption(&secret)
    }
    .await;
    secret.zeroize();

    match result {
        Ok(()) => {
            global_metrics().handshake_success();
            debug!("Shared secret sent");
            Ok(())
        }
        Err(e) => {
            global_metrics().handshake_failed();
            Err(e)
        }
    }
}

/// Master side: the first packet must be SharedSecret, within `timeout`
#[instrument(skip_all)]
pub async fn accept<S>(channel: &mut SecureChannel<S>, timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    global_metrics().handshake_attempt();
    match accept_inner(channel, timeout).await {
        Ok(()) => {
            global_metrics().handshake_success();
            Ok(())
        }
        Err(e) => {
            global_metrics().handshake_failed();
            warn!(error = %e, "Handshake rejected");
            Err(e)
        }
    }
}

async fn accept_inner<S>(channel: &mut SecureChannel<S>, timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    let first = with_timeout_error(channel.recv(), timeout)
        .await?
        .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_HANDSHAKE_CLOSED.into()))?;

    if first.id != PacketId::SharedSecret.as_u32() {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_EXPECTED_SHARED_SECRET.into(),
        ));
    }

    let secret = SecretBytes(first.payload.to_vec());
    channel.enable_encryption(&secret.0)?;
    channel.send(ControlPacket::Ready.encode()?).await?;
    debug!("Stream cipher established, Ready sent");
    Ok(())
}
