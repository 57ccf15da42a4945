//! Propagation micro-benchmarks: direct writes, equality-gated no-op
//! writes, and a chain of derived cells recomputing per write.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use weft_core::Cell;

fn bench_direct_write(c: &mut Criterion) {
    c.bench_function("write_independent", |b| {
        let cell = Cell::new(0u64);
        let mut next = 0u64;
        b.iter(|| {
            next = next.wrapping_add(1);
            cell.set(black_box(next));
        });
    });
}

fn bench_noop_write(c: &mut Criterion) {
    c.bench_function("write_equal_value", |b| {
        let cell = Cell::new(7u64);
        b.iter(|| cell.set(black_box(7)));
    });
}

fn bench_chain_propagation(c: &mut Criterion) {
    c.bench_function("propagate_chain_16", |b| {
        let root = Cell::new(0u64);
        let mut tip = root.clone();
        for _ in 0..16 {
            let prev = tip.clone();
            tip = Cell::derived(move || prev.get() + 1);
        }

        let mut next = 0u64;
        b.iter(|| {
            next = next.wrapping_add(1);
            root.set(next);
            black_box(tip.get());
        });
    });
}

criterion_group!(
    benches,
    bench_direct_write,
    bench_noop_write,
    bench_chain_propagation
);
criterion_main!(benches);
