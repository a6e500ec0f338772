//! Benchmarks for change propagation through the reactive graph.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trellis_core::{Computed, Runtime, TweenInfo};

/// Benchmark a set followed by a read at the end of a chain of computeds
fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");

    for depth in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("set_then_get", depth), &depth, |b, &depth| {
            let scope = Runtime::new().scoped();
            let source = scope.value(0i64);

            let mut tail: Computed<i64> = scope.computed({
                let source = source.clone();
                move |cx, _| Ok(cx.get(&source)? + 1)
            });
            for _ in 1..depth {
                let previous = tail.clone();
                tail = scope.computed(move |cx, _| Ok(cx.get(&previous)? + 1));
            }

            let mut next = 0;
            b.iter(|| {
                next += 1;
                source.set(next);
                black_box(tail.get().unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark eager observers fanned out from one value
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for width in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("observers", width), &width, |b, &width| {
            let scope = Runtime::new().scoped();
            let source = scope.value(0u64);
            let hits = Arc::new(AtomicU64::new(0));

            for _ in 0..width {
                let hits = hits.clone();
                scope.observer(&source).on_change(move || {
                    hits.fetch_add(1, Ordering::Relaxed);
                });
            }

            let mut next = 0;
            b.iter(|| {
                next += 1;
                source.set(next);
            });
            black_box(hits.load(Ordering::Relaxed));
        });
    }

    group.finish();
}

/// Benchmark a keyed transform where one entry changes per update
fn bench_for_values(c: &mut Criterion) {
    let mut group = c.benchmark_group("for_values");

    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("one_changed", size), &size, |b, &size| {
            let scope = Runtime::new().scoped();
            let table = scope.value((0..size).map(|i| (i, i as u64)).collect::<IndexMap<_, _>>());
            let doubled = scope.for_values(&table, |_, _, value| Ok(value * 2));

            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                table.update(|entries| {
                    entries.insert(0, next);
                });
                black_box(doubled.get().unwrap().len());
            });
        });
    }

    group.finish();
}

/// Benchmark a clock tick with many springs in motion
fn bench_followers(c: &mut Criterion) {
    let mut group = c.benchmark_group("followers");

    for count in [10, 100] {
        group.bench_with_input(BenchmarkId::new("tick", count), &count, |b, &count| {
            let runtime = Runtime::new();
            let scope = runtime.scoped();
            let goal = scope.value(0.0f64);
            let tween = scope
                .tween(&goal, TweenInfo::new(Duration::from_secs(3600)))
                .unwrap();
            for _ in 0..count {
                scope.spring(&tween, 4.0, 0.5).unwrap();
            }
            goal.set(1_000.0);

            b.iter(|| black_box(runtime.tick(Duration::from_millis(16))));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_chain,
    bench_fan_out,
    bench_for_values,
    bench_followers
);
criterion_main!(benches);
