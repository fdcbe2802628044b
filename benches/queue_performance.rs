//! Packet queue and response parser benchmarks
//!
//! Measures the hot paths of a connection run:
//! - Packet queue push/pop and compaction
//! - Response head parsing, whole and fragmented
//! - Body streaming through the parser
//!
//! Run with: cargo bench --bench queue_performance

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use tlswire::http::{Method, ResponseParser};
use tlswire::net::PacketQueue;

const RESPONSE_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: application/octet-stream\r\n\
Server: bench\r\n\
Cache-Control: no-cache\r\n\
Content-Length: 1048576\r\n\r\n";

// ========== Packet Queue ==========

fn bench_queue_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_pop");

    for size in [64usize, 1024, 16384] {
        let payload = Bytes::from(vec![0xabu8; size]);
        group.throughput(Throughput::Bytes((size * 100) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                let mut queue = PacketQueue::new();
                for _ in 0..100 {
                    queue.push(payload.clone());
                }
                while let Ok(packet) = queue.pop() {
                    black_box(packet);
                }
            });
        });
    }

    group.finish();
}

fn bench_queue_compact(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_compact");

    for count in [1usize, 10, 100] {
        let payload = Bytes::from(vec![0x5au8; 1500]);
        group.throughput(Throughput::Bytes((count * 1500) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut queue = PacketQueue::new();
                for _ in 0..count {
                    queue.push(payload.clone());
                }
                black_box(queue.compact());
            });
        });
    }

    group.finish();
}

// ========== Response Parser ==========

fn bench_parse_head(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_head");
    group.throughput(Throughput::Bytes(RESPONSE_HEAD.len() as u64));

    group.bench_function("single_fragment", |b| {
        b.iter(|| {
            let mut parser = ResponseParser::new(Method::Get, 64 * 1024);
            let step = parser.feed(black_box(RESPONSE_HEAD)).unwrap();
            black_box(step.head.is_some());
        });
    });

    group.bench_function("byte_by_byte", |b| {
        b.iter(|| {
            let mut parser = ResponseParser::new(Method::Get, 64 * 1024);
            for byte in RESPONSE_HEAD.chunks(1) {
                let step = parser.feed(black_box(byte)).unwrap();
                black_box(step.complete);
            }
        });
    });

    group.finish();
}

fn bench_body_streaming(c: &mut Criterion) {
    let mut group = c.benchmark_group("body_streaming");
    let body = vec![0u8; 1024 * 1024];

    for chunk in [4096usize, 65536] {
        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut parser = ResponseParser::new(Method::Get, 64 * 1024);
                parser.feed(RESPONSE_HEAD).unwrap();
                for fragment in body.chunks(chunk) {
                    let step = parser.feed(fragment).unwrap();
                    black_box(step.body.len());
                }
                assert!(parser.is_complete());
            });
        });
    }

    group.finish();
}

criterion_group! {
    name = queue;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(5));
    targets =
        bench_queue_push_pop,
        bench_queue_compact
}

criterion_group! {
    name = parser;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(5));
    targets =
        bench_parse_head,
        bench_body_streaming
}

criterion_main!(queue, parser);
