//! Control packet catalog and payload codec.
//!
//! Every control packet has a fixed id. Payloads are explicit per packet:
//! raw secret bytes for SharedSecret, nothing for Ready/Ping/Pong, and a
//! `bincode`-serialized struct (fields in declaration order) for the rest.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::registry::{PlayerSession, Route};

/// Packet ids of the control protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketId {
    SharedSecret = 0,
    Hello = 1,
    Ready = 2,
    Ping = 3,
    Pong = 4,
    Routes = 5,
    BinaryData = 6,
    BinaryEnd = 7,
    PlayerAdd = 8,
    PlayerRemove = 9,
    DisconnectPlayer = 10,
}

impl PacketId {
    pub fn from_u32(id: u32) -> Option<Self> {
        Some(match id {
            0 => Self::SharedSecret,
            1 => Self::Hello,
            2 => Self::Ready,
            3 => Self::Ping,
            4 => Self::Pong,
            5 => Self::Routes,
            6 => Self::BinaryData,
            7 => Self::BinaryEnd,
            8 => Self::PlayerAdd,
            9 => Self::PlayerRemove,
            10 => Self::DisconnectPlayer,
            _ => return None,
        })
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// First packet a node sends after the key exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub key: String,
    pub version: String,
    /// Hex SHA-256 of the node's own binary
    pub hash: String,
    pub passphrase: Option<String>,
    /// `std::env::consts::ARCH` of the node
    pub arch: String,
}

/// One piece of a labeled transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryChunk {
    pub label: String,
    pub data: Vec<u8>,
}

/// Master instruction to drop a player's connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectPlayer {
    pub uuid: String,
    /// Backend `host:port` the session is on
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RoutesPayload {
    routes: Vec<Route>,
}

/// A decoded control packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPacket {
    SharedSecret(Vec<u8>),
    Hello(Hello),
    Ready,
    Ping,
    Pong,
    Routes(Vec<Route>),
    BinaryData(BinaryChunk),
    BinaryEnd(BinaryChunk),
    PlayerAdd(PlayerSession),
    PlayerRemove(PlayerSession),
    DisconnectPlayer(DisconnectPlayer),
}

impl ControlPacket {
    pub fn id(&self) -> PacketId {
        match self {
            Self::SharedSecret(_) => PacketId::SharedSecret,
            Self::Hello(_) => PacketId::Hello,
            Self::Ready => PacketId::Ready,
            Self::Ping => PacketId::Ping,
            Self::Pong => PacketId::Pong,
            Self::Routes(_) => PacketId::Routes,
            Self::BinaryData(_) => PacketId::BinaryData,
            Self::BinaryEnd(_) => PacketId::BinaryEnd,
            Self::PlayerAdd(_) => PacketId::PlayerAdd,
            Self::PlayerRemove(_) => PacketId::PlayerRemove,
            Self::DisconnectPlayer(_) => PacketId::DisconnectPlayer,
        }
    }

    /// Serialize into a framed packet
    pub fn encode(&self) -> Result<Packet> {
        let payload: Bytes = match self {
            Self::SharedSecret(secret) => Bytes::copy_from_slice(secret),
            Self::Ready | Self::Ping | Self::Pong => Bytes::new(),
            Self::Hello(hello) => serialize(hello)?,
            Self::Routes(routes) => serialize(&RoutesPayload {
                routes: routes.clone(),
            })?,
            Self::BinaryData(chunk) | Self::BinaryEnd(chunk) => serialize(chunk)?,
            Self::PlayerAdd(session) | Self::PlayerRemove(session) => serialize(session)?,
            Self::DisconnectPlayer(target) => serialize(target)?,
        };
        Ok(Packet::new(self.id().as_u32(), payload))
    }

    /// Decode a framed packet.
    ///
    /// Unknown ids yield `Ok(None)`; a payload that does not match its id's
    /// structure is a decode error.
    pub fn decode(packet: &Packet) -> Result<Option<ControlPacket>> {
        let id = match PacketId::from_u32(packet.id) {
            Some(id) => id,
            None => return Ok(None),
        };
        let payload = &packet.payload[..];
        let decoded = match id {
            PacketId::SharedSecret => Self::SharedSecret(payload.to_vec()),
            PacketId::Ready => Self::Ready,
            PacketId::Ping => Self::Ping,
            PacketId::Pong => Self::Pong,
            PacketId::Hello => Self::Hello(deserialize(id, payload)?),
            PacketId::Routes => Self::Routes(deserialize::<RoutesPayload>(id, payload)?.routes),
            PacketId::BinaryData => Self::BinaryData(deserialize(id, payload)?),
            PacketId::BinaryEnd => Self::BinaryEnd(deserialize(id, payload)?),
            PacketId::PlayerAdd => Self::PlayerAdd(deserialize(id, payload)?),
            PacketId::PlayerRemove => Self::PlayerRemove(deserialize(id, payload)?),
            PacketId::DisconnectPlayer => Self::DisconnectPlayer(deserialize(id, payload)?),
        };
        Ok(Some(decoded))
    }
}

fn serialize<T: Serialize>(value: &T) -> Result<Bytes> {
    bincode::serialize(value)
        .map(Bytes::from)
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn deserialize<T: DeserializeOwned>(id: PacketId, payload: &[u8]) -> Result<T> {
    bincode::deserialize(payload).map_err(|e| ProtocolError::Decode(format!("{id:?}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn hello() -> Hello {
        Hello {
            key: "node-a1b2c3d4".into(),
            version: "0.4.0".into(),
            hash: "ab".repeat(32),
            passphrase: Some("pw".into()),
            arch: "x86_64".into(),
        }
    }

    #[test]
    fn ids_are_fixed() {
        for raw in 0..=10u32 {
            assert_eq!(PacketId::from_u32(raw).unwrap().as_u32(), raw);
        }
        assert!(PacketId::from_u32(11).is_none());
        assert_eq!(ControlPacket::Ping.encode().unwrap(), Packet::empty(3));
    }

    #[test]
    fn hello_roundtrip() {
        let packet = ControlPacket::Hello(hello()).encode().unwrap();
        assert_eq!(packet.id, 1);
        assert_eq!(
            ControlPacket::decode(&packet).unwrap(),
            Some(ControlPacket::Hello(hello()))
        );
    }

    #[test]
    fn empty_routes_roundtrip() {
        let packet = ControlPacket::Routes(Vec::new()).encode().unwrap();
        assert_eq!(
            ControlPacket::decode(&packet).unwrap(),
            Some(ControlPacket::Routes(Vec::new()))
        );
    }

    #[test]
    fn shared_secret_is_raw_bytes() {
        let packet = ControlPacket::SharedSecret(vec![7; 16]).encode().unwrap();
        assert_eq!(&packet.payload[..], &[7; 16]);
    }

    #[test]
    fn unknown_id_is_ignored() {
        assert_eq!(ControlPacket::decode(&Packet::new(42, vec![1, 2])).unwrap(), None);
    }

    #[test]
    fn malformed_payload_is_decode_error() {
        let err = ControlPacket::decode(&Packet::new(1, vec![0xFF])).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }
}
