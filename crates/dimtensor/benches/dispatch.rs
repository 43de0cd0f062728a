use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dimtensor::prelude::*;

fn shapes() -> Vec<(&'static str, Shape, Shape)> {
    let grid = |n: usize| spatial([("x", n), ("y", n)]).expect("grid shape");
    let vector = channel([("vector", "x,y")]).expect("vector shape");
    let batched = batch([("batch", 16)]).expect("batch shape");
    vec![
        ("disjoint", grid(32), vector.clone()),
        ("same", grid(32), grid(32)),
        (
            "mixed_kinds",
            grid(32).merge(&batched).expect("merge"),
            vector.merge(&instance([("points", 8)]).expect("points")).expect("merge"),
        ),
    ]
}

fn bench_shape_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("shape_merge");

    for (name, a, b) in shapes() {
        group.bench_with_input(BenchmarkId::new("merge", name), &(a, b), |bench, (a, b)| {
            bench.iter(|| black_box(a).merge(black_box(b)).expect("merge failed"));
        });
    }

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("elementwise_dispatch");
    let cpu: BackendRef = Arc::new(CpuBackend);
    let nd: BackendRef = NdarrayBackend::shared();

    for n in [16usize, 128] {
        let shape = spatial([("x", n), ("y", n)]).expect("grid shape");
        let on = |backend: &BackendRef| {
            with_backend(Arc::clone(backend), || ones(&shape, DType::FLOAT32)).expect("ones")
        };
        let (a_cpu, b_cpu, a_nd) = (on(&cpu), on(&cpu), on(&nd));
        let v = with_backend(Arc::clone(&cpu), || {
            full(channel([("vector", 2)])?, 0.5, DType::FLOAT32)
        })
        .expect("vector");

        group.bench_with_input(BenchmarkId::new("cpu_same", n), &n, |bench, _| {
            bench.iter(|| a_cpu.add(black_box(&b_cpu)).expect("add"));
        });
        group.bench_with_input(BenchmarkId::new("cpu_broadcast", n), &n, |bench, _| {
            bench.iter(|| a_cpu.mul(black_box(&v)).expect("mul"));
        });
        group.bench_with_input(BenchmarkId::new("mixed_cpu_ndarray", n), &n, |bench, _| {
            bench.iter(|| a_cpu.add(black_box(&a_nd)).expect("add"));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_shape_merge, bench_dispatch);
criterion_main!(benches);
