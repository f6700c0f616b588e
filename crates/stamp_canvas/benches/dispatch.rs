mod common;

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use stamp_canvas::prelude::{chunk_size, BatchDispatcher, BuildRequest, Generator, Result};

const UNIT_COUNTS: [usize; 3] = [16, 128, 1024];
const WORKERS: [usize; 3] = [1, 2, 4];

/// Some arithmetic per unit so the pool has work to spread.
fn busy_unit(unit: usize) -> f64 {
    let mut rng = Generator::new(unit as u64);
    (0..2_000).map(|_| rng.uniform()).sum()
}

fn dispatch_run_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/run");

    for &count in &UNIT_COUNTS {
        group.throughput(common::elements_throughput(count));
        for &workers in &WORKERS {
            let request = BuildRequest::new(count).with_workers(workers);
            group.bench_with_input(
                BenchmarkId::new(format!("workers_{workers}"), count),
                &request,
                |b, request| {
                    let dispatcher = BatchDispatcher::new().with_label("bench");
                    b.iter(|| {
                        let built = dispatcher
                            .run(request, |_| Ok(1), |_worker| {
                                |unit: usize, _object: usize| -> Result<(f64, usize)> {
                                    Ok((busy_unit(unit), 1))
                                }
                            })
                            .map(|v| v.len())
                            .unwrap_or_default();
                        black_box(built);
                    });
                },
            );
        }
    }

    group.finish();
}

fn dispatch_chunk_size_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/chunk_size");
    group.bench_function("grid", |b| {
        b.iter(|| {
            let mut acc = 0usize;
            for count in (1..2_000).step_by(7) {
                for workers in 1..16 {
                    acc += chunk_size(black_box(count), workers, 1 + workers % 4);
                }
            }
            black_box(acc);
        });
    });
    group.finish();
}

criterion_group! {
    name = benches;
    config = common::default_criterion();
    targets = dispatch_run_benches, dispatch_chunk_size_benches
}
criterion_main!(benches);
