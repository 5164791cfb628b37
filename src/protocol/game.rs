//! Game protocol packets the edge proxy needs to understand.
//!
//! Only the first client packets are parsed: the handshake and, for logins,
//! the login start. Everything after that is spliced through untouched.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::core::packet::Packet;
use crate::core::varint::{get_string, get_varint, peek_varint, put_string, put_varint, unexpected_eof};
use crate::error::{ProtocolError, Result};

/// Largest client frame accepted before the splice starts
pub const MAX_CLIENT_FRAME: usize = 32 * 1024;

/// Handshake packet id (handshaking state)
pub const HANDSHAKE_ID: u32 = 0x00;

/// Login start packet id (login state)
pub const LOGIN_START_ID: u32 = 0x00;

/// Status response packet id (status state)
pub const STATUS_RESPONSE_ID: u32 = 0x00;

/// Disconnect packet id (login state)
pub const LOGIN_DISCONNECT_ID: u32 = 0x00;

/// State the client asks to move to after the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    Status,
    Login,
    Transfer,
    Other(u32),
}

impl NextState {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Status,
            2 => Self::Login,
            3 => Self::Transfer,
            other => Self::Other(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Status => 1,
            Self::Login => 2,
            Self::Transfer => 3,
            Self::Other(other) => other,
        }
    }
}

/// Serverbound handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: u32,
    pub host: String,
    pub port: u16,
    pub next_state: NextState,
}

impl Handshake {
    pub fn decode(packet: &Packet) -> Result<Self> {
        if packet.id != HANDSHAKE_ID {
            return Err(ProtocolError::Decode(format!(
                "expected handshake, got packet {:#04x}",
                packet.id
            )));
        }
        let mut buf = packet.payload.clone();
        let protocol_version = get_varint(&mut buf)?;
        let host = get_string(&mut buf)?;
        if buf.remaining() < 2 {
            return Err(unexpected_eof());
        }
        let port = buf.get_u16();
        let next_state = NextState::from_u32(get_varint(&mut buf)?);
        Ok(Self {
            protocol_version,
            host,
            port,
            next_state,
        })
    }

    pub fn to_packet(&self) -> Packet {
        let mut payload = BytesMut::new();
        put_varint(&mut payload, self.protocol_version);
        put_string(&mut payload, &self.host);
        payload.put_u16(self.port);
        put_varint(&mut payload, self.next_state.as_u32());
        Packet::new(HANDSHAKE_ID, payload.freeze())
    }
}

/// Serverbound login start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStart {
    pub name: String,
    /// Zero-padded when the client sent fewer than 16 bytes
    pub uuid: [u8; 16],
}

impl LoginStart {
    pub fn decode(packet: &Packet) -> Result<Self> {
        if packet.id != LOGIN_START_ID {
            return Err(ProtocolError::Decode(format!(
                "expected login start, got packet {:#04x}",
                packet.id
            )));
        }
        let mut buf = packet.payload.clone();
        let name = get_string(&mut buf)?;
        let mut uuid = [0u8; 16];
        let n = buf.remaining().min(16);
        buf.copy_to_slice(&mut uuid[..n]);
        Ok(Self { name, uuid })
    }

    /// Lowercase hex, no dashes
    pub fn uuid_hex(&self) -> String {
        hex::encode(self.uuid)
    }
}

/// Clientbound status response carrying `json`
pub fn status_response(json: &str) -> Packet {
    let mut payload = BytesMut::new();
    put_string(&mut payload, json);
    Packet::new(STATUS_RESPONSE_ID, payload.freeze())
}

/// Clientbound login disconnect with a plain text reason
pub fn login_disconnect(reason: &str) -> Packet {
    let json = serde_json::json!({ "text": reason }).to_string();
    let mut payload = BytesMut::new();
    put_string(&mut payload, &json);
    Packet::new(LOGIN_DISCONNECT_ID, payload.freeze())
}

/// Read one frame from `reader`, buffering through `buf`.
///
/// Returns the packet and its exact wire bytes. Bytes past the frame stay
/// in `buf`. A stream that ends first is an `UnexpectedEof` I/O error.
pub async fn read_frame<R>(reader: &mut R, buf: &mut BytesMut) -> Result<(Packet, Bytes)>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some((len, prefix)) = peek_varint(buf)? {
            let len = len as usize;
            if len > MAX_CLIENT_FRAME {
                return Err(ProtocolError::OversizedPacket(len));
            }
            if buf.len() >= prefix + len {
                let raw = buf.split_to(prefix + len).freeze();
                let packet = Packet::from_bytes(&raw)?;
                return Ok((packet, raw));
            }
        }
        if reader.read_buf(buf).await? == 0 {
            return Err(unexpected_eof());
        }
    }
}
