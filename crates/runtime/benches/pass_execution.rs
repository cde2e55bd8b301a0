// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for pass execution, blob staging and the dual arena.

use arena::{DualArena, Side};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use runtime::demo::{demo_config, demo_network};
use runtime::{stage_blob, MemoryBlobs, RuntimeConfig};
use transfer_engine::{Tiers, TransferEngine};

fn bench_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("demo_pass");
    for num_cores in [1, 2, 4, 8] {
        let config = RuntimeConfig {
            num_cores,
            journal: false,
            enable_profiling: false,
            ..demo_config()
        };
        let mut network = demo_network(config).unwrap().setup().unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(num_cores), &num_cores, |b, _| {
            b.iter(|| black_box(network.run().unwrap()))
        });
    }
    group.finish();
}

fn bench_blob_staging(c: &mut Criterion) {
    let tiers = Tiers::new(1024, 4096, 1 << 20).unwrap();
    let dma = TransferEngine::spawn(tiers.clone()).unwrap();
    let store = MemoryBlobs::new().with("w", vec![7; 256 * 1024]);

    let mut group = c.benchmark_group("blob_staging");
    for chunk in [128, 1024, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                stage_blob(
                    &store,
                    "w",
                    256 * 1024,
                    tiers.offchip.base(),
                    &dma,
                    tiers.onchip.base(),
                    chunk,
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_arena_ping_pong(c: &mut Criterion) {
    c.bench_function("arena_ping_pong_64_layers", |b| {
        let mut arena = DualArena::new(64 * 1024);
        b.iter(|| {
            arena.reset();
            let mut side = Side::Begin;
            let mut input = arena.allocate(4096, side).unwrap();
            for _ in 0..64 {
                let output = arena.allocate(4096, side.flip()).unwrap();
                arena.release(&input).unwrap();
                input = output;
                side = side.flip();
            }
            black_box(arena.boundaries())
        })
    });
}

criterion_group!(benches, bench_pass, bench_blob_staging, bench_arena_ping_pong);
criterion_main!(benches);
