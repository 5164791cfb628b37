#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for framing, control packets and the game handshake
//! Tests boundary conditions, malformed input and resource limits

use bytes::BytesMut;
use wired::config::MAX_FRAME_SIZE;
use wired::core::packet::Packet;
use wired::core::varint::{get_string, get_varint, peek_varint, put_varint};
use wired::error::ProtocolError;
use wired::protocol::game::{read_frame, Handshake, LoginStart, NextState, MAX_CLIENT_FRAME};
use wired::protocol::message::ControlPacket;
use wired::protocol::status::FailureKind;
use wired::service::distributor::{chunk_size, transfer_packets, validate_label, TransferBuffers};

// ============================================================================
// FRAMING EDGE CASES
// ============================================================================

#[test]
fn test_packet_empty_payload() {
    let packet = Packet::empty(4);
    let decoded = Packet::from_bytes(&packet.to_bytes()).expect("Should decode empty payload");
    assert!(decoded.payload.is_empty());
    assert_eq!(decoded.id, 4);
}

#[test]
fn test_packet_at_frame_limit() {
    let payload = vec![0xAB; 4096];
    let packet = Packet::new(1, payload);
    let mut buf = BytesMut::from(&packet.to_bytes()[..]);
    let decoded = Packet::decode(&mut buf, packet.body_len())
        .unwrap()
        .expect("frame exactly at the limit");
    assert_eq!(decoded, packet);
}

#[test]
fn test_oversized_frame_rejected() {
    let packet = Packet::new(1, vec![0u8; 1000]);
    let mut buf = BytesMut::from(&packet.to_bytes()[..]);
    match Packet::decode(&mut buf, 512) {
        Err(ProtocolError::OversizedPacket(1001)) => {}
        other => panic!("Unexpected result: {other:?}"),
    }
}

#[test]
fn test_oversized_claim_rejected_before_body_arrives() {
    // Header alone claims more than the limit
    let mut buf = BytesMut::new();
    put_varint(&mut buf, (MAX_FRAME_SIZE + 1) as u32);
    assert!(matches!(
        Packet::decode(&mut buf, MAX_FRAME_SIZE),
        Err(ProtocolError::OversizedPacket(_))
    ));
}

#[test]
fn test_varint_too_long() {
    let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
    assert!(matches!(peek_varint(&bytes), Err(ProtocolError::Frame(_))));
    assert!(matches!(
        get_varint(&mut &bytes[..]),
        Err(ProtocolError::Frame(_))
    ));
    assert!(matches!(Packet::from_bytes(&bytes), Err(ProtocolError::Frame(_))));
}

#[test]
fn test_varint_max_value() {
    let mut buf = BytesMut::new();
    put_varint(&mut buf, u32::MAX);
    assert_eq!(&buf[..], &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
    assert_eq!(peek_varint(&buf).unwrap(), Some((u32::MAX, 5)));
}

#[test]
fn test_incomplete_varint_waits() {
    assert_eq!(peek_varint(&[]).unwrap(), None);
    assert_eq!(peek_varint(&[0x80, 0x80]).unwrap(), None);
}

#[test]
fn test_truncated_frame_is_io() {
    let bytes = Packet::new(2, vec![7u8; 20]).to_bytes();
    match Packet::from_bytes(&bytes[..10]) {
        Err(ProtocolError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("Unexpected result: {other:?}"),
    }
}

#[test]
fn test_zero_length_frame_has_no_id() {
    assert!(matches!(Packet::from_bytes(&[0x00]), Err(ProtocolError::Frame(_))));
}

#[test]
fn test_string_longer_than_buffer() {
    let mut buf = BytesMut::new();
    put_varint(&mut buf, 10);
    buf.extend_from_slice(b"abc");
    assert!(matches!(get_string(&mut buf.freeze()), Err(ProtocolError::Io(_))));
}

#[test]
fn test_string_invalid_utf8() {
    let mut buf = BytesMut::new();
    put_varint(&mut buf, 2);
    buf.extend_from_slice(&[0xC3, 0x28]);
    assert!(matches!(get_string(&mut buf.freeze()), Err(ProtocolError::Decode(_))));
}

// ============================================================================
// CONTROL PACKET EDGE CASES
// ============================================================================

#[test]
fn test_unknown_control_ids_are_skipped() {
    for id in [11u32, 42, 0x7F, 300, u32::MAX] {
        assert_eq!(ControlPacket::decode(&Packet::new(id, vec![1, 2, 3])).unwrap(), None);
    }
}

#[test]
fn test_malformed_control_payload() {
    // Hello with a truncated body
    let err = ControlPacket::decode(&Packet::new(1, vec![0xFF, 0x00])).unwrap_err();
    assert!(matches!(err, ProtocolError::Decode(_)));
}

#[test]
fn test_empty_routes_list() {
    let packet = ControlPacket::Routes(Vec::new()).encode().unwrap();
    assert_eq!(
        ControlPacket::decode(&packet).unwrap(),
        Some(ControlPacket::Routes(Vec::new()))
    );
}

#[test]
fn test_signal_packets_carry_no_payload() {
    for packet in [ControlPacket::Ready, ControlPacket::Ping, ControlPacket::Pong] {
        let encoded = packet.encode().unwrap();
        assert!(encoded.payload.is_empty());
        assert_eq!(ControlPacket::decode(&encoded).unwrap(), Some(packet));
    }
}

// ============================================================================
// TRANSFER EDGE CASES
// ============================================================================

#[test]
fn test_empty_transfer_still_sends_one_chunk() {
    let packets = transfer_packets("empty", &[], 1460).unwrap();
    assert_eq!(packets.len(), 2);
    assert!(matches!(&packets[0], ControlPacket::BinaryData(c) if c.data.is_empty()));
    assert!(matches!(&packets[1], ControlPacket::BinaryEnd(_)));
}

#[test]
fn test_label_longer_than_mtu() {
    assert!(matches!(chunk_size(4, "long-label"), Err(ProtocolError::Transfer(_))));
    assert!(matches!(chunk_size(5, "label"), Err(ProtocolError::Transfer(_))));
    assert_eq!(chunk_size(6, "label").unwrap(), 1);
}

#[test]
fn test_finish_unknown_label() {
    let buffers = TransferBuffers::new();
    assert_eq!(buffers.finish("never-started"), None);
}

#[test]
fn test_unsafe_labels() {
    for label in ["", ".", "..", "../x", "a/b", "a\\b", "nul\0"] {
        assert!(validate_label(label).is_err(), "{label:?} should be refused");
    }
    assert!(validate_label("motd.txt").is_ok());
}

// ============================================================================
// GAME HANDSHAKE EDGE CASES
// ============================================================================

fn handshake_bytes(host: &str, next_state: u32) -> Vec<u8> {
    Handshake {
        protocol_version: 763,
        host: host.into(),
        port: 25565,
        next_state: NextState::from_u32(next_state),
    }
    .to_packet()
    .to_bytes()
}

#[test]
fn test_handshake_missing_port() {
    let mut payload = BytesMut::new();
    put_varint(&mut payload, 763);
    wired::core::varint::put_string(&mut payload, "play.example.net");
    payload.extend_from_slice(&[0x63]);
    let packet = Packet::new(0, payload.freeze());
    assert!(matches!(Handshake::decode(&packet), Err(ProtocolError::Io(_))));
}

#[test]
fn test_handshake_wrong_packet_id() {
    let packet = Packet::new(1, vec![0u8; 8]);
    assert!(matches!(Handshake::decode(&packet), Err(ProtocolError::Decode(_))));
}

#[test]
fn test_handshake_unusual_next_state() {
    let bytes = handshake_bytes("play.example.net", 9);
    let packet = Packet::from_bytes(&bytes).unwrap();
    assert_eq!(Handshake::decode(&packet).unwrap().next_state, NextState::Other(9));
}

#[test]
fn test_login_start_short_uuid_is_zero_padded() {
    let mut payload = BytesMut::new();
    wired::core::varint::put_string(&mut payload, "Steve");
    payload.extend_from_slice(&[0xAA, 0xBB]);
    let login = LoginStart::decode(&Packet::new(0, payload.freeze())).unwrap();
    assert_eq!(login.name, "Steve");
    assert_eq!(&login.uuid[..2], &[0xAA, 0xBB]);
    assert!(login.uuid[2..].iter().all(|b| *b == 0));
    assert_eq!(login.uuid_hex().len(), 32);
}

#[tokio::test]
async fn test_read_frame_keeps_trailing_bytes() {
    let mut wire = handshake_bytes("play.example.net", 2);
    wire.extend_from_slice(b"leftover");
    let mut reader = &wire[..];
    let mut buf = BytesMut::new();

    let (packet, raw) = read_frame(&mut reader, &mut buf).await.unwrap();
    assert_eq!(Handshake::decode(&packet).unwrap().host, "play.example.net");
    assert_eq!(raw.len(), wire.len() - 8);
    assert_eq!(&buf[..], b"leftover");
}

#[tokio::test]
async fn test_read_frame_oversized_client_frame() {
    let mut wire = BytesMut::new();
    put_varint(&mut wire, (MAX_CLIENT_FRAME + 1) as u32);
    let mut reader = &wire[..];
    let mut buf = BytesMut::new();
    assert!(matches!(
        read_frame(&mut reader, &mut buf).await,
        Err(ProtocolError::OversizedPacket(_))
    ));
}

#[tokio::test]
async fn test_read_frame_stream_ends_early() {
    let wire = handshake_bytes("play.example.net", 1);
    let mut reader = &wire[..wire.len() / 2];
    let mut buf = BytesMut::new();
    assert!(matches!(
        read_frame(&mut reader, &mut buf).await,
        Err(ProtocolError::Io(_))
    ));
}

#[test]
fn test_failure_responses_are_valid_json() {
    for kind in [FailureKind::Offline, FailureKind::NotFound, FailureKind::NetworkFailure] {
        let packet = kind.status_packet();
        let mut payload = packet.payload.clone();
        let json: serde_json::Value = serde_json::from_str(&get_string(&mut payload).unwrap()).unwrap();
        assert_eq!(json["version"]["name"], kind.version_name());
        assert_eq!(json["players"]["online"], 0);

        let mut payload = kind.disconnect_packet().payload.clone();
        let json: serde_json::Value = serde_json::from_str(&get_string(&mut payload).unwrap()).unwrap();
        assert!(json["text"].as_str().unwrap().ends_with(kind.reason()));
    }
}
