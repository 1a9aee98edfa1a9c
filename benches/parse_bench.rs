//! Wire format benchmarks.
//!
//! Measures request parsing for each address type and reply encoding.

use std::net::{Ipv4Addr, Ipv6Addr};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use socks_relay::proxy::{encode_success_reply, Command, HandshakeRequest, ProxyRequest, TargetAddr};

fn request(address: TargetAddr) -> Vec<u8> {
    ProxyRequest {
        version: 0x05,
        command: Command::Connect,
        address,
        port: 443,
    }
    .encode()
}

fn bench_handshake_parse(c: &mut Criterion) {
    let mut data = vec![0x05, 0xff];
    data.extend(0..=254u8);

    let mut group = c.benchmark_group("handshake_parse");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("255_methods", |b| {
        b.iter(|| black_box(HandshakeRequest::parse(&data).unwrap()))
    });

    group.finish();
}

fn bench_request_parse(c: &mut Criterion) {
    let cases = [
        ("ipv4", request(TargetAddr::Ipv4(Ipv4Addr::new(93, 184, 216, 34)))),
        ("domain", request(TargetAddr::Domain("www.example.com".into()))),
        ("domain_255", request(TargetAddr::Domain("a".repeat(255)))),
        ("ipv6", request(TargetAddr::Ipv6(Ipv6Addr::LOCALHOST))),
    ];

    let mut group = c.benchmark_group("request_parse");

    for (name, data) in &cases {
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_function(*name, |b| {
            b.iter(|| black_box(ProxyRequest::parse(data).unwrap()))
        });
    }

    group.finish();
}

fn bench_reply_encode(c: &mut Criterion) {
    let v4 = "10.0.0.2:50123".parse().unwrap();
    let v6 = "[2001:db8::2]:50123".parse().unwrap();

    let mut group = c.benchmark_group("reply_encode");

    group.bench_function("ipv4", |b| b.iter(|| black_box(encode_success_reply(v4))));
    group.bench_function("ipv6", |b| b.iter(|| black_box(encode_success_reply(v6))));

    group.finish();
}

criterion_group!(
    benches,
    bench_handshake_parse,
    bench_request_parse,
    bench_reply_encode,
);
criterion_main!(benches);
