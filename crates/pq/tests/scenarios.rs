//! End-to-end training scenarios for the PQ/OPQ codec trainer.

use opqkit_core::Matrix;
use opqkit_pq::procrustes::orthogonality_error;
use opqkit_pq::{
    apply_rotation, codec_bytes, codec_from_bytes, read_codec, reconstruction_mse, train_opq,
    train_pq, train_pq_with_codes, write_codec, CodecHeader, ErrorKind, KMeansParams, OpqParams,
    PqParams, HEADER_SIZE,
};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use std::collections::HashSet;
use tempfile::tempdir;

/// Two separable clusters per 4-dimensional subspace, unit scale.
fn two_clusters_per_subspace(n: usize) -> Matrix {
    let mut rng = StdRng::seed_from_u64(2024);
    let rows: Vec<Vec<f32>> = (0..n)
        .map(|i| {
            let first = if i % 2 == 0 { 0.5 } else { -0.5 };
            let second = if (i / 2) % 2 == 0 { 0.5 } else { -0.5 };
            (0..8)
                .map(|j| {
                    let center = if j < 4 { first } else { second };
                    center + rng.gen_range(-0.02..0.02)
                })
                .collect()
        })
        .collect();
    Matrix::from_rows(&rows).unwrap()
}

fn gaussian(n: usize, dim: usize, seed: u64) -> Matrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, 1.0).unwrap();
    let data = (0..n * dim).map(|_| normal.sample(&mut rng)).collect();
    Matrix::from_vec(n, dim, data).unwrap()
}

/// Gaussian data whose dominant direction is shared across subspaces.
fn correlated_across_subspaces(n: usize, seed: u64) -> Matrix {
    let mut data = gaussian(n, 8, seed);
    let mut rng = StdRng::seed_from_u64(seed + 1);
    let normal = Normal::new(0.0f32, 3.0).unwrap();
    for i in 0..n {
        let shared = normal.sample(&mut rng);
        let row = data.row_mut(i);
        row[0] += shared;
        row[4] += shared;
        row[1] -= shared;
        row[5] += shared;
    }
    data
}

fn fast_kmeans() -> KMeansParams {
    KMeansParams::default().with_restarts(2).with_max_iterations(50)
}

#[test]
fn test_opq_separable_clusters() {
    let data = two_clusters_per_subspace(100);
    let params = OpqParams::new(2, 4).with_iterations(10);

    let transform = train_opq(&data, &params, &mut StdRng::seed_from_u64(0)).unwrap();

    assert!(orthogonality_error(&transform.rotation) < 1e-5);
    for m in 0..2 {
        let codes: HashSet<u16> = (0..100).map(|i| transform.assignments.get(i, m)).collect();
        assert!(codes.len() >= 2, "subspace {} uses codes {:?}", m, codes);
    }

    let table = transform.encode(&data).unwrap();
    let decoded = transform.decode(&table).unwrap();
    let mse = data.squared_distance(&decoded).unwrap() / data.rows() as f64;
    assert!(mse < 0.05, "OPQ reconstruction error {}", mse);

    // Every point decodes onto its own cluster in both halves.
    for i in 0..100 {
        for (block, center) in [(0..4, cluster_sign(i, 0)), (4..8, cluster_sign(i, 1))] {
            let mean: f32 = decoded.row(i)[block].iter().sum::<f32>() / 4.0;
            assert_eq!(mean.signum(), center, "row {} decoded to {:?}", i, decoded.row(i));
        }
    }
}

/// Sign of the cluster center of row `i` in subspace `m` of
/// `two_clusters_per_subspace`.
fn cluster_sign(i: usize, m: usize) -> f32 {
    let positive = if m == 0 { i % 2 == 0 } else { (i / 2) % 2 == 0 };
    if positive {
        1.0
    } else {
        -1.0
    }
}

#[test]
fn test_pq_separable_clusters() {
    let data = two_clusters_per_subspace(100);
    let (codebook, table) =
        train_pq_with_codes(&data, &PqParams::new(2, 2), &mut StdRng::seed_from_u64(0)).unwrap();

    let mse = reconstruction_mse(&codebook, &data, &table).unwrap();
    assert!(mse < 0.05, "PQ reconstruction error {}", mse);

    for m in 0..2 {
        let codes_for = |sign: f32| -> HashSet<u16> {
            (0..100)
                .filter(|&i| cluster_sign(i, m) == sign)
                .map(|i| table.get(i, m))
                .collect()
        };
        let positive = codes_for(1.0);
        let negative = codes_for(-1.0);
        assert!(!positive.is_empty() && !negative.is_empty());
        assert!(
            positive.is_disjoint(&negative),
            "subspace {} shares codes: {:?} / {:?}",
            m,
            positive,
            negative
        );
    }
}

#[test]
fn test_opq_collinear_data() {
    let rows: Vec<Vec<f32>> = (0..50)
        .map(|i| {
            let t = i as f32 * 0.1 - 2.5;
            vec![t, 2.0 * t, -t, 0.5 * t]
        })
        .collect();
    let data = Matrix::from_rows(&rows).unwrap();
    let params = OpqParams::new(2, 4).with_iterations(3);

    let transform = train_opq(&data, &params, &mut StdRng::seed_from_u64(0)).unwrap();
    assert!(orthogonality_error(&transform.rotation) < 1e-5);
    assert_eq!(transform.distortions.len(), 3);
    assert!(transform.distortions.iter().all(|d| d.is_finite()));
}

#[test]
fn test_opq_fewer_rows_than_dimensions() {
    let data = gaussian(6, 8, 11);
    let params = OpqParams::new(2, 2).with_iterations(4).with_kmeans(fast_kmeans());

    let transform = train_opq(&data, &params, &mut StdRng::seed_from_u64(5)).unwrap();
    assert!(orthogonality_error(&transform.rotation) < 1e-5);

    let table = transform.encode(&data).unwrap();
    assert_eq!(table.num_vectors(), 6);
}

#[test]
fn test_indivisible_dimension_is_configuration_error() {
    let data = gaussian(50, 9, 1);

    let pq_err = train_pq(&data, &PqParams::new(2, 2), &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert_eq!(pq_err.kind(), ErrorKind::Configuration);

    let opq_err =
        train_opq(&data, &OpqParams::new(2, 4), &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert_eq!(opq_err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_too_few_points_is_degenerate() {
    let data = gaussian(3, 4, 2);

    let err = train_opq(&data, &OpqParams::new(2, 5), &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DegenerateInput);
}

#[test]
fn test_identity_rotation_matches_direct_training() {
    let data = gaussian(200, 8, 3);
    let params = PqParams::new(4, 3).with_kmeans(fast_kmeans());

    let direct = train_pq(&data, &params, &mut StdRng::seed_from_u64(17)).unwrap();
    let rotated = apply_rotation(&data, &Matrix::identity(8)).unwrap();
    let via_identity = train_pq(&rotated, &params, &mut StdRng::seed_from_u64(17)).unwrap();

    assert_eq!(direct, via_identity);
}

#[test]
fn test_opq_distortion_never_increases() {
    let data = correlated_across_subspaces(400, 5);
    let params = OpqParams::new(2, 8)
        .with_iterations(8)
        .with_kmeans(fast_kmeans());

    let transform = train_opq(&data, &params, &mut StdRng::seed_from_u64(9)).unwrap();
    let history = &transform.distortions;

    assert_eq!(history.len(), 8);
    for pair in history.windows(2) {
        assert!(
            pair[1] <= pair[0] * (1.0 + 1e-4),
            "distortion rose: {:?}",
            history
        );
    }
    assert!(history[history.len() - 1] < history[0]);
    assert!(orthogonality_error(&transform.rotation) < 1e-5);
}

#[test]
fn test_mse_non_increasing_in_nbits() {
    let data = gaussian(400, 8, 6);
    let mut previous = f64::INFINITY;

    for nbits in 1..=5 {
        let params = PqParams::new(2, nbits).with_kmeans(fast_kmeans());
        let (codebook, table) =
            train_pq_with_codes(&data, &params, &mut StdRng::seed_from_u64(nbits as u64))
                .unwrap();
        let mse = reconstruction_mse(&codebook, &data, &table).unwrap();

        assert!(mse <= previous, "nbits {} gave {} after {}", nbits, mse, previous);
        previous = mse;
    }
}

#[test]
fn test_trained_codec_roundtrip() {
    let dir = tempdir().unwrap();
    let data = gaussian(300, 16, 7);
    let params = PqParams::new(4, 4).with_kmeans(fast_kmeans());
    let codebook = train_pq(&data, &params, &mut StdRng::seed_from_u64(1)).unwrap();
    let header = CodecHeader::for_codebook(100000, &codebook).unwrap();

    let path = dir.path().join("encoded_data_0_100000_4_4");
    write_codec(&path, &header, &codebook).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE + 4 * 16 * 4 * 4);
    assert_eq!(&bytes[..HEADER_SIZE], &header.to_bytes());

    let (read_header, read_codebook) = read_codec(&path).unwrap();
    assert_eq!(read_header, header);
    assert_eq!(read_codebook, codebook);
    assert_eq!(codec_from_bytes(&bytes).unwrap().1, codebook);
}

#[test]
fn test_same_seed_same_artifact() {
    let data = gaussian(250, 8, 8);
    let params = PqParams::new(2, 4).with_kmeans(fast_kmeans());

    let artifact = |seed: u64| {
        let codebook = train_pq(&data, &params, &mut StdRng::seed_from_u64(seed)).unwrap();
        let header = CodecHeader::for_codebook(250, &codebook).unwrap();
        codec_bytes(&header, &codebook).unwrap()
    };

    assert_eq!(artifact(3), artifact(3));
}
