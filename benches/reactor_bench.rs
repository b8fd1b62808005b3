//! Benchmarks for the event loop's hot data structures

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use evhost::runtime::async_io::{TimerKind, TimerRegistry};
use evhost::runtime::http::{frame_request, HttpUrl, Method, ResponseParser};
use std::time::{Duration, Instant};

/// Benchmark scheduling and draining timers
fn bench_timers(c: &mut Criterion) {
    let mut group = c.benchmark_group("timers");

    for &count in &[16, 256, 4096] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_function(format!("schedule_{}", count), |b| {
            let base = Instant::now();
            b.iter(|| {
                let mut timers: TimerRegistry<u64> = TimerRegistry::new();
                for i in 0..count {
                    let deadline = base + Duration::from_micros((i * 7919 % 1000) as u64);
                    timers.schedule(deadline, TimerKind::OneShot, i as u64);
                }
                black_box(timers.len())
            })
        });

        group.bench_function(format!("drain_{}", count), |b| {
            let base = Instant::now();
            b.iter_batched(
                || {
                    let mut timers: TimerRegistry<u64> = TimerRegistry::new();
                    for i in 0..count {
                        timers.schedule(base, TimerKind::OneShot, i as u64);
                    }
                    timers
                },
                |mut timers| {
                    for id in timers.due(base) {
                        black_box(timers.take_due(id));
                    }
                    timers
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Benchmark incremental response parsing
fn bench_response_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_parser");

    let body = "x".repeat(16 * 1024);
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nServer: bench\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes();
    group.throughput(Throughput::Bytes(response.len() as u64));

    for &chunk in &[64, 1024, 65536] {
        group.bench_function(format!("chunk_{}", chunk), |b| {
            b.iter(|| {
                let mut parser = ResponseParser::new();
                for piece in response.chunks(chunk) {
                    parser.feed(piece);
                }
                black_box(parser.finish())
            })
        });
    }

    group.finish();
}

/// Benchmark request framing
fn bench_frame_request(c: &mut Criterion) {
    let url = HttpUrl::parse("http://example.com:8080/api/items?page=2", 80).unwrap();
    let body = r#"{"name":"widget","count":3}"#;

    c.bench_function("frame_post", |b| {
        b.iter(|| black_box(frame_request(Method::Post, &url, Some(body))))
    });
}

criterion_group!(
    benches,
    bench_timers,
    bench_response_parser,
    bench_frame_request
);
criterion_main!(benches);
