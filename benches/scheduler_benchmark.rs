//! Benchmark for the parallel scheduler
//!
//! Measures:
//! - Wall-clock time to run a wide level (fan-out) under varying concurrency bounds
//! - Wall-clock time to run a long dependency chain (fan-in/sequential)
//! - Scaling with segment count

use kite::{body_fn, Ride, SegmentBuilder, ParallelScheduler, Step};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::HashMap;
use tempfile::tempdir;

fn wide_ride(width: usize, max_concurrency: usize) -> (Ride, HashMap<String, kite::Segment>) {
    let mut segments = HashMap::new();
    let mut names = Vec::with_capacity(width);
    for i in 0..width {
        let name = format!("seg-{i}");
        segments.insert(
            name.clone(),
            SegmentBuilder::new(&name).build(body_fn(|_ctx| async move { Ok(()) })),
        );
        names.push(name);
    }
    let ride = Ride::new("wide", max_concurrency, vec![Step::Parallel(names)]);
    (ride, segments)
}

fn chain_ride(depth: usize) -> (Ride, HashMap<String, kite::Segment>) {
    let mut segments = HashMap::new();
    let mut steps = Vec::with_capacity(depth);
    let mut previous: Option<String> = None;
    for i in 0..depth {
        let name = format!("seg-{i}");
        let mut builder = SegmentBuilder::new(&name);
        if let Some(prev) = &previous {
            builder = builder.depends_on(prev.clone());
        }
        segments.insert(name.clone(), builder.build(body_fn(|_ctx| async move { Ok(()) })));
        steps.push(Step::Single(name.clone()));
        previous = Some(name);
    }
    let ride = Ride::new("chain", depth.max(1), steps);
    (ride, segments)
}

fn bench_wide_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("wide_fan_out");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for width in [10, 50, 200].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, &width| {
            b.iter(|| {
                rt.block_on(async {
                    let dir = tempdir().unwrap();
                    let (ride, segments) = wide_ride(width, num_cpus::get());
                    let scheduler = ParallelScheduler::new();
                    let result = scheduler.execute(&ride, &segments, dir.path()).await;
                    black_box(result);
                });
            });
        });
    }

    group.finish();
}

fn bench_sequential_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_chain");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for depth in [10, 50, 200].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, &depth| {
            b.iter(|| {
                rt.block_on(async {
                    let dir = tempdir().unwrap();
                    let (ride, segments) = chain_ride(depth);
                    let scheduler = ParallelScheduler::new();
                    let result = scheduler.execute(&ride, &segments, dir.path()).await;
                    black_box(result);
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_wide_fan_out, bench_sequential_chain);
criterion_main!(benches);
