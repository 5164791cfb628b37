//! # Packet frames
//!
//! A frame on the wire is
//!
//! ```text
//! VarInt(total_len) | VarInt(packet_id) | payload[total_len - varint_len(packet_id)]
//! ```
//!
//! The same layout is used by the control plane and by the game protocol the
//! edge proxy speaks, so both reuse [`Packet`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::MAX_FRAME_SIZE;
use crate::core::varint::{get_varint, peek_varint, put_varint, unexpected_eof, varint_len};
use crate::error::{constants, ProtocolError, Result};

/// A single framed packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// A packet with a zero-length payload
    pub fn empty(id: u32) -> Self {
        Self {
            id,
            payload: Bytes::new(),
        }
    }

    /// Length of the frame body (packet id + payload)
    pub fn body_len(&self) -> usize {
        varint_len(self.id) + self.payload.len()
    }

    /// Append the full frame to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        let body = self.body_len();
        dst.reserve(varint_len(body as u32) + body);
        put_varint(dst, body as u32);
        put_varint(dst, self.id);
        dst.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }

    /// Split one complete frame off the front of `src`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched while the frame is
    /// still incomplete.
    pub fn decode(src: &mut BytesMut, max_frame: usize) -> Result<Option<Packet>> {
        let (body_len, prefix) = match peek_varint(src)? {
            Some(v) => v,
            None => return Ok(None),
        };
        let body_len = body_len as usize;
        if body_len > max_frame {
            return Err(ProtocolError::OversizedPacket(body_len));
        }
        if src.len() < prefix + body_len {
            src.reserve(prefix + body_len - src.len());
            return Ok(None);
        }

        src.advance(prefix);
        let mut body = src.split_to(body_len).freeze();
        let id = get_varint(&mut body).map_err(|e| match e {
            ProtocolError::Io(_) => ProtocolError::Frame(constants::ERR_FRAME_TOO_SHORT.into()),
            other => other,
        })?;
        Ok(Some(Packet { id, payload: body }))
    }

    /// Parse exactly one frame from `bytes`.
    ///
    /// Fewer bytes than the frame announces is an `UnexpectedEof` I/O error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Packet> {
        let mut buf = BytesMut::from(bytes);
        Packet::decode(&mut buf, MAX_FRAME_SIZE)?.ok_or_else(unexpected_eof)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout() {
        let packet = Packet::new(5, vec![0xAA, 0xBB]);
        assert_eq!(packet.to_bytes(), vec![0x03, 0x05, 0xAA, 0xBB]);
    }

    #[test]
    fn empty_payload_frame() {
        let packet = Packet::empty(3);
        assert_eq!(packet.to_bytes(), vec![0x01, 0x03]);
        assert_eq!(Packet::from_bytes(&[0x01, 0x03]).unwrap(), packet);
    }

    #[test]
    fn multi_byte_id_counts_toward_length() {
        let packet = Packet::new(300, vec![1, 2, 3]);
        let bytes = packet.to_bytes();
        assert_eq!(bytes[0], 5);
        assert_eq!(Packet::from_bytes(&bytes).unwrap(), packet);
    }

    #[test]
    fn partial_frame_waits() {
        let bytes = Packet::new(6, vec![9; 10]).to_bytes();
        let mut buf = BytesMut::from(&bytes[..6]);
        assert!(Packet::decode(&mut buf, MAX_FRAME_SIZE).unwrap().is_none());
        assert_eq!(buf.len(), 6);
        buf.extend_from_slice(&bytes[6..]);
        let packet = Packet::decode(&mut buf, MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(packet.payload.len(), 10);
        assert!(buf.is_empty());
    }

    #[test]
    fn back_to_back_frames() {
        let mut buf = BytesMut::new();
        Packet::new(1, vec![1]).encode(&mut buf);
        Packet::new(2, vec![2, 2]).encode(&mut buf);
        assert_eq!(Packet::decode(&mut buf, MAX_FRAME_SIZE).unwrap().unwrap().id, 1);
        assert_eq!(Packet::decode(&mut buf, MAX_FRAME_SIZE).unwrap().unwrap().id, 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn truncated_frame_is_io_error() {
        let err = Packet::from_bytes(&[0x05, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[test]
    fn zero_length_frame_is_frame_error() {
        let err = Packet::from_bytes(&[0x00]).unwrap_err();
        assert!(matches!(err, ProtocolError::Frame(_)));
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 64);
        let err = Packet::decode(&mut buf, 32).unwrap_err();
        assert!(matches!(err, ProtocolError::OversizedPacket(64)));
    }
}
