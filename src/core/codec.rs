//! # Packet codec
//!
//! [`PacketCodec`] plugs [`Packet`] framing into `tokio_util::codec` and
//! carries the cipher state of one direction pair.
//!
//! A codec starts in plaintext. During key exchange the responder decrypts
//! RSA frames (`VarInt(ciphertext_len) | ciphertext`, each holding whole
//! packet frames) and the initiator produces them. After
//! [`PacketCodec::enable_encryption`] every byte in both directions goes
//! through AES-128-CFB8. Bytes already buffered when the switch happens are
//! treated as stream bytes.

use bytes::{Buf, BufMut, BytesMut};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_FRAME_SIZE;
use crate::core::packet::Packet;
use crate::core::varint::{peek_varint, put_varint};
use crate::error::{ProtocolError, Result};
use crate::utils::crypto::{
    decrypt_in_place, encrypt_in_place, rsa_decrypt, rsa_encrypt, Aes128Cfb8Dec, Aes128Cfb8Enc,
    StreamCipher,
};

enum Inbound {
    Plain,
    Rsa {
        key: Arc<RsaPrivateKey>,
        plain: BytesMut,
    },
    Stream {
        cipher: Box<Aes128Cfb8Dec>,
        /// Bytes at the front of the read buffer that are already decrypted
        decrypted: usize,
    },
}

enum Outbound {
    Plain,
    Rsa(Arc<RsaPublicKey>),
    Stream(Box<Aes128Cfb8Enc>),
}

/// Tokio codec for control packets with pluggable encryption
pub struct PacketCodec {
    max_frame: usize,
    inbound: Inbound,
    outbound: Outbound,
}

impl PacketCodec {
    /// Plaintext codec with the given frame limit
    pub fn new(max_frame: usize) -> Self {
        Self {
            max_frame,
            inbound: Inbound::Plain,
            outbound: Outbound::Plain,
        }
    }

    /// Responder side of the key exchange: inbound frames are RSA encrypted
    pub fn responder(key: Arc<RsaPrivateKey>) -> Self {
        Self {
            inbound: Inbound::Rsa {
                key,
                plain: BytesMut::new(),
            },
            ..Self::default()
        }
    }

    /// Initiator side of the key exchange: outbound frames are RSA encrypted
    pub fn initiator(key: Arc<RsaPublicKey>) -> Self {
        Self {
            outbound: Outbound::Rsa(key),
            ..Self::default()
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.inbound, Inbound::Stream { .. }) && matches!(self.outbound, Outbound::Stream(_))
    }

    /// Switch both directions to AES-128-CFB8 keyed with `secret`
    pub fn enable_encryption(&mut self, secret: &[u8]) -> Result<()> {
        let StreamCipher {
            encryptor,
            decryptor,
        } = StreamCipher::new(secret)?;
        self.start_decryption(decryptor)?;
        self.start_encryption(encryptor);
        Ok(())
    }

    /// Switch the inbound direction to the stream cipher.
    ///
    /// Fails if decrypted key-exchange plaintext is still waiting to be
    /// parsed, since that data would otherwise be silently reinterpreted.
    pub fn start_decryption(&mut self, cipher: Aes128Cfb8Dec) -> Result<()> {
        if let Inbound::Rsa { plain, .. } = &self.inbound {
            if !plain.is_empty() {
                return Err(ProtocolError::Crypto(format!(
                    "{} bytes of key-exchange plaintext left unread",
                    plain.len()
                )));
            }
        }
        self.inbound = Inbound::Stream {
            cipher: Box::new(cipher),
            decrypted: 0,
        };
        Ok(())
    }

    /// Switch the outbound direction to the stream cipher
    pub fn start_encryption(&mut self, cipher: Aes128Cfb8Enc) {
        self.outbound = Outbound::Stream(Box::new(cipher));
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl std::fmt::Debug for PacketCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inbound = match self.inbound {
            Inbound::Plain => "plain",
            Inbound::Rsa { .. } => "rsa",
            Inbound::Stream { .. } => "stream",
        };
        let outbound = match self.outbound {
            Outbound::Plain => "plain",
            Outbound::Rsa(_) => "rsa",
            Outbound::Stream(_) => "stream",
        };
        f.debug_struct("PacketCodec")
            .field("max_frame", &self.max_frame)
            .field("inbound", &inbound)
            .field("outbound", &outbound)
            .finish()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        let max_frame = self.max_frame;
        match &mut self.inbound {
            Inbound::Plain => Packet::decode(src, max_frame),

            Inbound::Rsa { key, plain } => loop {
                if let Some(packet) = Packet::decode(plain, max_frame)? {
                    return Ok(Some(packet));
                }
                let (len, prefix) = match peek_varint(src)? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                let len = len as usize;
                if len > max_frame {
                    return Err(ProtocolError::OversizedPacket(len));
                }
                if src.len() < prefix + len {
                    src.reserve(prefix + len - src.len());
                    return Ok(None);
                }
                src.advance(prefix);
                let ciphertext = src.split_to(len);
                let plaintext = rsa_decrypt(key, &ciphertext)?;
                plain.extend_from_slice(&plaintext);
            },

            Inbound::Stream { cipher, decrypted } => {
                if src.len() > *decrypted {
                    decrypt_in_place(cipher, &mut src[*decrypted..]);
                    *decrypted = src.len();
                }
                let before = src.len();
                let packet = Packet::decode(src, max_frame)?;
                *decrypted -= before - src.len();
                Ok(packet)
            }
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        let body = packet.body_len();
        if body > self.max_frame {
            return Err(ProtocolError::OversizedPacket(body));
        }
        match &mut self.outbound {
            Outbound::Plain => packet.encode(dst),

            Outbound::Rsa(key) => {
                let mut frame = BytesMut::new();
                packet.encode(&mut frame);
                let ciphertext = rsa_encrypt(key, &frame)?;
                put_varint(dst, ciphertext.len() as u32);
                dst.put_slice(&ciphertext);
            }

            Outbound::Stream(cipher) => {
                let start = dst.len();
                packet.encode(dst);
                encrypt_in_place(cipher, &mut dst[start..]);
            }
        }
        Ok(())
    }
}
