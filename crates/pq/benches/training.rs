//! Benchmarks for PQ/OPQ training, encoding and the Procrustes solve.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use opqkit_core::Matrix;
use opqkit_pq::{encode_vectors, procrustes, train_opq, train_pq, KMeansParams, OpqParams, PqParams};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};

fn gaussian(n: usize, dim: usize, seed: u64) -> Matrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, 1.0).unwrap();
    let data = (0..n * dim).map(|_| normal.sample(&mut rng)).collect();
    Matrix::from_vec(n, dim, data).unwrap()
}

fn bench_train_pq(c: &mut Criterion) {
    let mut group = c.benchmark_group("train_pq");
    group.sample_size(10);
    let data = gaussian(5_000, 64, 1);
    let kmeans = KMeansParams::default().with_restarts(1).with_max_iterations(20);

    for nbits in [4u32, 8].iter() {
        let params = PqParams::new(8, *nbits).with_kmeans(kmeans.clone());
        group.bench_with_input(BenchmarkId::from_parameter(nbits), nbits, |bench, _| {
            bench.iter(|| {
                let mut rng = StdRng::seed_from_u64(0);
                train_pq(black_box(&data), &params, &mut rng).unwrap()
            })
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_vectors");
    let train = gaussian(2_000, 64, 2);
    let params = PqParams::new(8, 8)
        .with_kmeans(KMeansParams::default().with_restarts(1).with_max_iterations(10));
    let codebook = train_pq(&train, &params, &mut StdRng::seed_from_u64(0)).unwrap();

    for num_vectors in [1_000, 10_000].iter() {
        let data = gaussian(*num_vectors, 64, 3);
        group.throughput(Throughput::Elements(*num_vectors as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_vectors),
            num_vectors,
            |bench, _| bench.iter(|| encode_vectors(&codebook, black_box(&data)).unwrap()),
        );
    }

    group.finish();
}

fn bench_procrustes(c: &mut Criterion) {
    let mut group = c.benchmark_group("procrustes_solve");
    group.sample_size(10);

    for dim in [32, 128].iter() {
        let x = gaussian(2_000, *dim, 4);
        let y = gaussian(2_000, *dim, 5);
        group.bench_with_input(BenchmarkId::from_parameter(dim), dim, |bench, _| {
            bench.iter(|| procrustes::solve(black_box(&x), black_box(&y)).unwrap())
        });
    }

    group.finish();
}

fn bench_train_opq(c: &mut Criterion) {
    let mut group = c.benchmark_group("train_opq");
    group.sample_size(10);
    let data = gaussian(2_000, 32, 6);
    let params = OpqParams::new(4, 16)
        .with_iterations(5)
        .with_kmeans(KMeansParams::default().with_restarts(1).with_max_iterations(20));

    group.bench_function("d32_m4_k16", |bench| {
        bench.iter(|| {
            let mut rng = StdRng::seed_from_u64(0);
            train_opq(black_box(&data), &params, &mut rng).unwrap()
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_train_pq,
    bench_encode,
    bench_procrustes,
    bench_train_opq
);
criterion_main!(benches);
