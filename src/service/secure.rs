//! Secure control channel.
//!
//! [`SecureChannel`] owns both halves of a byte stream, each framed by a
//! [`PacketCodec`]. It starts in the key-exchange phase (RSA on the
//! initiator's writes, plaintext otherwise) and moves to the AES-CFB8 phase
//! once [`SecureChannel::enable_encryption`] is called on both sides.
//!
//! After the handshake the channel is split. The reader stays with the
//! dispatch loop; the writer moves into a task fed by a bounded queue, and
//! every other task writes through a cloneable [`PacketSender`].

use futures::{SinkExt, StreamExt};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::core::codec::PacketCodec;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::utils::crypto::StreamCipher;
use crate::utils::metrics::global_metrics;

/// Both directions of one control connection
pub struct SecureChannel<S> {
    reader: FramedRead<ReadHalf<S>, PacketCodec>,
    writer: FramedWrite<WriteHalf<S>, PacketCodec>,
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite,
{
    fn with_codecs(stream: S, inbound: PacketCodec, outbound: PacketCodec) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: FramedRead::new(read, inbound),
            writer: FramedWrite::new(write, outbound),
        }
    }

    /// Plaintext channel in both directions
    pub fn plain(stream: S) -> Self {
        Self::with_codecs(stream, PacketCodec::default(), PacketCodec::default())
    }

    /// Master side: inbound frames are RSA encrypted for `key`
    pub fn responder(stream: S, key: Arc<RsaPrivateKey>) -> Self {
        Self::with_codecs(stream, PacketCodec::responder(key), PacketCodec::default())
    }

    /// Node side: outbound frames are RSA encrypted with the master's key
    pub fn initiator(stream: S, key: Arc<RsaPublicKey>) -> Self {
        Self::with_codecs(stream, PacketCodec::default(), PacketCodec::initiator(key))
    }

    /// Switch both directions to AES-128-CFB8 with key = IV = `secret`
    pub fn enable_encryption(&mut self, secret: &[u8]) -> Result<()> {
        let StreamCipher {
            encryptor,
            decryptor,
        } = StreamCipher::new(secret)?;
        self.reader.decoder_mut().start_decryption(decryptor)?;
        self.writer.encoder_mut().start_encryption(encryptor);
        debug!("Stream encryption enabled");
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.reader.decoder().is_encrypted() && self.writer.encoder().is_encrypted()
    }

    pub async fn send(&mut self, packet: Packet) -> Result<()> {
        self.writer.send(packet).await?;
        global_metrics().packet_sent();
        Ok(())
    }

    /// Next packet, or `None` once the peer has closed the stream
    pub async fn recv(&mut self) -> Result<Option<Packet>> {
        next_packet(&mut self.reader).await
    }

    pub fn into_split(self) -> (ChannelReader<S>, ChannelWriter<S>) {
        (
            ChannelReader { inner: self.reader },
            ChannelWriter { inner: self.writer },
        )
    }
}

async fn next_packet<S: AsyncRead>(
    reader: &mut FramedRead<ReadHalf<S>, PacketCodec>,
) -> Result<Option<Packet>> {
    match reader.next().await {
        Some(Ok(packet)) => {
            global_metrics().packet_received();
            Ok(Some(packet))
        }
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}

/// Read half of a split channel
pub struct ChannelReader<S> {
    inner: FramedRead<ReadHalf<S>, PacketCodec>,
}

impl<S: AsyncRead> ChannelReader<S> {
    pub async fn recv(&mut self) -> Result<Option<Packet>> {
        next_packet(&mut self.inner).await
    }
}

/// Write half of a split channel
pub struct ChannelWriter<S> {
    inner: FramedWrite<WriteHalf<S>, PacketCodec>,
}

impl<S: AsyncWrite> ChannelWriter<S> {
    pub async fn send(&mut self, packet: Packet) -> Result<()> {
        self.inner.send(packet).await?;
        global_metrics().packet_sent();
        Ok(())
    }

    /// Flush and shut down the write direction
    pub async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Cloneable handle to a connection's writer task.
///
/// Packets are written in the order they are queued.
#[derive(Debug, Clone)]
pub struct PacketSender {
    tx: mpsc::Sender<Packet>,
}

impl PacketSender {
    /// A sender and the receiving end of its queue, without a writer task
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue `packet`, waiting for room. Fails once the writer is gone.
    pub async fn send(&self, packet: Packet) -> Result<()> {
        self.tx
            .send(packet)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// True when both handles feed the same connection
    pub fn same_channel(&self, other: &PacketSender) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Move `writer` into a task draining a queue of `capacity` packets.
///
/// The task ends when every [`PacketSender`] is dropped (the stream is then
/// shut down) or when a write fails.
pub fn spawn_writer<S>(mut writer: ChannelWriter<S>, capacity: usize) -> (PacketSender, JoinHandle<()>)
where
    S: AsyncWrite + Send + 'static,
{
    let (sender, mut rx) = PacketSender::channel(capacity);
    let handle = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            let id = packet.id;
            if let Err(e) = writer.send(packet).await {
                if e.is_disconnect() {
                    debug!(packet_id = id, error = %e, "Writer stopped, peer gone");
                } else {
                    warn!(packet_id = id, error = %e, "Failed to write packet");
                }
                return;
            }
        }
        let _ = writer.close().await;
    });
    (sender, handle)
}

/// Latest-value lane into a connection.
///
/// Publishing replaces whatever the forwarding task has not picked up yet.
/// A slow connection may skip intermediate values but always ends on the
/// newest one, and values are never delivered out of publish order.
#[derive(Debug, Clone)]
pub struct LatestSender {
    slot: Arc<watch::Sender<Option<Packet>>>,
}

impl LatestSender {
    /// A lane and its receiving end, without a forwarding task
    pub fn channel() -> (Self, watch::Receiver<Option<Packet>>) {
        let (tx, rx) = watch::channel(None);
        (Self { slot: Arc::new(tx) }, rx)
    }

    pub fn publish(&self, packet: Packet) {
        self.slot.send_replace(Some(packet));
    }
}

/// Forward everything published on the returned lane into `sender`.
///
/// The task ends when every [`LatestSender`] is dropped or the connection's
/// queue closes.
pub fn spawn_latest(sender: PacketSender) -> (LatestSender, JoinHandle<()>) {
    let (latest, mut rx) = LatestSender::channel();
    let handle = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let Some(packet) = rx.borrow_and_update().clone() else {
                continue;
            };
            if let Err(e) = sender.send(packet).await {
                debug!(error = %e, "Latest lane stopped");
                return;
            }
        }
    });
    (latest, handle)
}

/// Shared secret wiped on drop
pub(crate) struct SecretBytes(pub Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
