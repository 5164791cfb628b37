use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tokio_util::codec::{Decoder, Encoder};
use wired::config::MAX_FRAME_SIZE;
use wired::core::codec::PacketCodec;
use wired::core::packet::Packet;
use wired::core::varint::{get_varint, put_varint};
use wired::protocol::message::{BinaryChunk, ControlPacket};
use wired::registry::{PlayerSession, Route};

#[allow(clippy::unwrap_used)]
fn bench_varint(c: &mut Criterion) {
    let mut group = c.benchmark_group("varint");
    for value in [0x7Fu32, 0x3FFF, 0x1F_FFFF, u32::MAX] {
        group.bench_function(format!("put_get_{value:#x}"), |b| {
            let mut buf = BytesMut::with_capacity(8);
            b.iter(|| {
                buf.clear();
                put_varint(&mut buf, black_box(value));
                get_varint(&mut &buf[..]).unwrap()
            })
        });
    }
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_packet_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode_decode");
    let payload_sizes = [64usize, 512, 1460, 65536, 1024 * 1024];

    for &size in &payload_sizes {
        let payload = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || Packet::new(6, vec![0u8; size]),
                |packet| {
                    let mut buf = BytesMut::with_capacity(size + 16);
                    let mut codec = PacketCodec::new(MAX_FRAME_SIZE);
                    codec.encode(packet, &mut buf).unwrap();
                    buf
                },
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("decode_{size}b"), |b| {
            let mut wire = BytesMut::new();
            Packet::new(6, payload.clone()).encode(&mut wire);
            b.iter_batched(
                || wire.clone(),
                |mut buf| {
                    let mut codec = PacketCodec::new(MAX_FRAME_SIZE);
                    codec.decode(&mut buf).unwrap().unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_control_packets(c: &mut Criterion) {
    let mut group = c.benchmark_group("control_packets");

    let routes = ControlPacket::Routes(
        (0..50)
            .map(|i| Route {
                id: format!("route-{i}"),
                server_host: "10.0.0.5".into(),
                server_port: 25565,
                proxy_domain: format!("server{i}.example.net"),
                proxy_port: 25565,
            })
            .collect(),
    );
    let chunk = ControlPacket::BinaryData(BinaryChunk {
        label: "upgrade".into(),
        data: vec![0xE1; 1453],
    });
    let player = ControlPacket::PlayerAdd(PlayerSession {
        name: "Steve".into(),
        uuid: "069a79f444e94726a5befca90e38aaf5".into(),
        joined_at: 1_700_000_000,
        backend: "10.0.0.5:25565".into(),
        virtual_host: "play.example.net".into(),
        protocol_version: 763,
        node_id: "node-abc12345".into(),
    });

    for (name, packet) in [("routes_50", routes), ("binary_chunk", chunk), ("player_add", player)] {
        group.bench_function(format!("encode_{name}"), |b| {
            b.iter(|| black_box(&packet).encode().unwrap())
        });
        let encoded = packet.encode().unwrap();
        group.bench_function(format!("decode_{name}"), |b| {
            b.iter(|| ControlPacket::decode(black_box(&encoded)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_varint,
    bench_packet_encode_decode,
    bench_control_packets
);
criterion_main!(benches);
