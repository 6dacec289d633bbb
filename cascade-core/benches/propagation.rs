//! Propagation Benchmarks
//!
//! Measures the cost of pushing one write through common graph shapes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cascade_core::reactive::{freeze, root, Computation, Signal};

/// One signal read by `width` independent computations.
fn fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for width in [10usize, 100, 1000] {
        let source = Signal::new(0u64);
        let scope = root(|scope| {
            for _ in 0..width {
                let s = source.clone();
                Computation::new(move |_| s.get() + 1).unwrap();
            }
            scope
        });

        let mut next = 0u64;
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                next += 1;
                source.set(black_box(next)).unwrap();
            })
        });
        scope.dispose();
    }
    group.finish();
}

/// A chain of `depth` computations, each reading the previous one.
fn chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for depth in [10usize, 100, 1000] {
        let source = Signal::new(0u64);
        let (scope, tail) = root(|scope| {
            let s = source.clone();
            let mut last = Computation::new(move |_| s.get()).unwrap();
            for _ in 1..depth {
                let prev = last.clone();
                last = Computation::new(move |_| prev.get() + 1).unwrap();
            }
            (scope, last)
        });

        let mut next = 0u64;
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                next += 1;
                source.set(next).unwrap();
                black_box(tail.get())
            })
        });
        scope.dispose();
    }
    group.finish();
}

/// Many writes committed together through `freeze`.
fn batched_writes(c: &mut Criterion) {
    let signals: Vec<Signal<u64>> = (0..100).map(Signal::new).collect();
    let readers = signals.clone();
    let scope = root(|scope| {
        Computation::new(move |_| readers.iter().map(Signal::get).sum::<u64>()).unwrap();
        scope
    });

    let mut next = 0u64;
    c.bench_function("freeze_100_writes", |b| {
        b.iter(|| {
            next += 1;
            freeze(|| {
                for s in &signals {
                    s.set(next).unwrap();
                }
            })
            .unwrap()
        })
    });
    scope.dispose();
}

criterion_group!(benches, fan_out, chain, batched_writes);
criterion_main!(benches);
