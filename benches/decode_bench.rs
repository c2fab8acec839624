//! Benchmarks for the FTDC decode pipeline
//!
//! Run with: cargo bench

use std::io::Write;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use chrono::{TimeZone, Utc};
use ftdc::decode::{flatten, write_varint, Chunk, Document};

/// Encode a flat BSON document of `count` int32 metrics
fn reference_doc(count: usize) -> Vec<u8> {
    let mut body = Vec::new();
    for i in 0..count {
        body.push(0x10u8);
        body.extend_from_slice(format!("metric_{:04}", i).as_bytes());
        body.push(0x00);
        body.extend_from_slice(&(i as i32).to_le_bytes());
    }
    let size = (body.len() + 5) as i32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&body);
    out.push(0x00);
    out
}

/// A chunk of `metrics` counters with `deltas` samples of +1 deltas each
fn chunk_payload(metrics: usize, deltas: usize) -> Vec<u8> {
    let mut uncompressed = reference_doc(metrics);
    uncompressed.extend_from_slice(&(metrics as u32).to_le_bytes());
    uncompressed.extend_from_slice(&(deltas as u32).to_le_bytes());
    for _ in 0..metrics * deltas {
        write_varint(1, &mut uncompressed);
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&uncompressed).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut out = Vec::with_capacity(4 + compressed.len());
    out.extend_from_slice(&(uncompressed.len() as u32).to_le_bytes());
    out.extend_from_slice(&compressed);
    out
}

fn bench_chunk_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_decode");
    let ts = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();

    // Production shape: thousands of metrics, a few hundred samples
    for (metrics, deltas) in [(100, 100), (1000, 100), (4000, 300)] {
        let payload = chunk_payload(metrics, deltas);

        group.throughput(Throughput::Elements((metrics * (deltas + 1)) as u64));
        group.bench_function(format!("decode_{}x{}", metrics, deltas), |b| {
            b.iter(|| Chunk::decode(black_box(&payload), ts).unwrap())
        });
    }

    group.finish();
}

fn bench_flatten(c: &mut Criterion) {
    let mut group = c.benchmark_group("flatten");

    for count in [100, 1000, 4000] {
        let bytes = reference_doc(count);
        let doc = Document::parse(&bytes).unwrap();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("flatten_{}", count), |b| {
            b.iter(|| flatten(black_box(&doc)))
        });
    }

    group.finish();
}

fn bench_bson_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("bson_parse");

    for count in [100, 1000, 4000] {
        let bytes = reference_doc(count);

        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_function(format!("parse_{}", count), |b| {
            b.iter(|| Document::parse(black_box(&bytes)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chunk_decode, bench_flatten, bench_bson_parse);
criterion_main!(benches);
