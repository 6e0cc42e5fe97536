#![allow(missing_docs)]

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use gamebox::{Compression, GameBox, NodeLink};
use std::hint::black_box;

#[path = "../tests/common/mod.rs"]
mod common;

/// A challenge with `count` distinct blocks, every tenth one linking a nested block.
fn generate_map(count: usize) -> common::Challenge {
    let blocks = (0..count)
        .map(|i| {
            let name = format!("StadiumBlock{}", i % 64);
            let node = if i % 10 == 0 {
                common::linking_block(&name, common::block("StadiumPillar", 0))
            } else {
                common::block(&name, (i % 4) as u8)
            };
            Some(NodeLink::Inline(node))
        })
        .collect();
    common::challenge(blocks)
}

// --- BENCHMARKS ---

fn bench_writers(c: &mut Criterion) {
    let block_count = 20_000;
    let registry = common::registry();

    println!("Writers block count: {}", block_count);

    let mut group = c.benchmark_group("GBX Write");

    for compression in [Compression::Uncompressed, Compression::Compressed] {
        let mut gbx = common::container(generate_map(block_count), &registry)
            .expect("Failed to build container");
        gbx.set_body_compression(compression);
        let size = gbx.to_bytes().expect("Failed to write container").len();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("write_{compression:?}"), |b| {
            b.iter(|| {
                black_box(gbx.to_bytes().expect("Failed to write container"));
            });
        });
    }

    group.finish();
}

fn bench_readers(c: &mut Criterion) {
    let block_count = 20_000;
    let registry = common::registry();

    println!("Readers block count: {}", block_count);

    let mut gbx =
        common::container(generate_map(block_count), &registry).expect("Failed to build container");
    gbx.set_body_compression(Compression::Compressed);
    let bytes = gbx.to_bytes().expect("Failed to write container");

    let mut group = c.benchmark_group("GBX Read");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    // 1. Header only: class ID and header chunks.
    group.bench_function("read_header_only", |b| {
        let options = GameBox::builder(registry.clone()).header_only(true);
        b.iter(|| {
            black_box(options.parse_bytes(&bytes).expect("Failed to read header"));
        });
    });

    // 2. Full body, skippable chunks left raw.
    group.bench_function("read_body", |b| {
        b.iter(|| {
            black_box(GameBox::parse_bytes(&bytes, registry.clone()).expect("Failed to read body"));
        });
    });

    // 3. Full body with every skippable chunk decoded, sequential then parallel.
    for parallel in [false, true] {
        group.bench_function(format!("read_discover_all_parallel_{parallel}"), |b| {
            b.iter(|| {
                let mut gbx =
                    GameBox::parse_bytes(&bytes, registry.clone()).expect("Failed to read body");
                gbx.discover_all(parallel).expect("Failed to discover");
                black_box(gbx);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_writers, bench_readers);
criterion_main!(benches);
