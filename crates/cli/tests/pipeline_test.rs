//! Integration tests for the opq/construct job stages.

use opqkit_core::Matrix;
use opqkit_cli::{
    construct, load_dataset, run_all, run_construct_stage, run_opq_stage, JobConfig,
    PipelineError,
};
use opqkit_pq::procrustes::orthogonality_error;
use opqkit_pq::{codec_bytes, read_codec, read_rotation, train_pq, CodecHeader, PqError, PqParams};
use rand::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_tsv(path: &Path, n: usize, dim: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let text: String = (0..n)
        .map(|_| {
            let fields: Vec<String> = (0..dim)
                .map(|_| format!("{:.4}", rng.gen_range(-1.0f32..1.0)))
                .collect();
            fields.join("\t") + "\n"
        })
        .collect();
    fs::write(path, text).unwrap();
}

fn base_config(dir: &Path, d: usize) -> JobConfig {
    let json = format!(
        r#"{{
            "data_path": {data:?},
            "d": {d},
            "max_elements": 300,
            "pq_m_list": [2, 4],
            "nbits_list": [2, 4],
            "output_dir": {out:?},
            "seed": 7,
            "kmeans": {{"restarts": 1, "max_iterations": 30}}
        }}"#,
        data = dir.join("base.tsv"),
        out = dir.join("codecs"),
        d = d,
    );
    serde_json::from_str(&json).unwrap()
}

fn enable_opq(config: &mut JobConfig, dir: &Path) {
    config.opq = 1;
    config.opq_matrix_file = Some(dir.join("opq_matrix"));
    config.m = Some(2);
    config.k = Some(4);
    config.max_iter = 3;
    config.sample_size = Some(150);
}

#[test]
fn test_construct_without_opq_matches_direct_training() {
    let dir = tempdir().unwrap();
    write_tsv(&dir.path().join("base.tsv"), 400, 8, 1);
    let config = base_config(dir.path(), 8);

    let reports = run_construct_stage(&config).unwrap();
    assert_eq!(reports.len(), 4);

    let data = load_dataset(&config).unwrap();
    assert_eq!(data.rows(), 300);

    for report in &reports {
        let params = PqParams::new(report.num_subspaces, report.nbits)
            .with_kmeans(config.kmeans.clone());
        let direct = train_pq(&data, &params, &mut StdRng::seed_from_u64(config.seed)).unwrap();
        let header =
            CodecHeader::new(300, 8, report.num_subspaces, report.nbits).unwrap();

        let expected_name = format!("encoded_data_0_300_{}_{}", report.num_subspaces, report.nbits);
        assert_eq!(report.path, dir.path().join("codecs").join(expected_name));
        assert_eq!(
            fs::read(&report.path).unwrap(),
            codec_bytes(&header, &direct).unwrap()
        );
    }
}

#[test]
fn test_opq_stage_disabled_writes_nothing() {
    let dir = tempdir().unwrap();
    let mut config = base_config(dir.path(), 8);
    config.opq_matrix_file = Some(dir.path().join("opq_matrix"));

    assert!(run_opq_stage(&config).unwrap().is_none());
    assert!(!dir.path().join("opq_matrix").exists());
}

#[test]
fn test_run_with_opq() {
    let dir = tempdir().unwrap();
    write_tsv(&dir.path().join("base.tsv"), 300, 8, 2);
    let mut config = base_config(dir.path(), 8);
    enable_opq(&mut config, dir.path());

    let reports = run_all(&config).unwrap();
    assert_eq!(reports.len(), 4);

    let rotation_path = dir.path().join("opq_matrix");
    assert_eq!(fs::metadata(&rotation_path).unwrap().len(), 8 * 8 * 4);
    let rotation = read_rotation(&rotation_path, 8).unwrap();
    assert!(orthogonality_error(&rotation) < 1e-5);

    for report in &reports {
        let (header, codebook) = read_codec(&report.path).unwrap();
        assert_eq!(header.max_elements, 300);
        assert_eq!(header.dim, 8);
        assert_eq!(header.num_subspaces as usize, report.num_subspaces);
        assert_eq!(codebook.codebook_size, 1 << report.nbits);
        assert!(report
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("encoded_data_1_300_"));
    }

    // Separate stages reproduce the single-process run.
    let first = fs::read(&reports[0].path).unwrap();
    fs::remove_file(&rotation_path).unwrap();
    run_opq_stage(&config).unwrap();
    assert_eq!(read_rotation(&rotation_path, 8).unwrap(), rotation);
    let reports = run_construct_stage(&config).unwrap();
    assert_eq!(fs::read(&reports[0].path).unwrap(), first);
}

#[test]
fn test_rotation_file_of_wrong_size() {
    let dir = tempdir().unwrap();
    write_tsv(&dir.path().join("base.tsv"), 100, 8, 3);
    let mut config = base_config(dir.path(), 8);
    enable_opq(&mut config, dir.path());
    fs::write(dir.path().join("opq_matrix"), vec![0u8; 4 * 4 * 4]).unwrap();

    let err = run_construct_stage(&config).unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(
        err,
        PipelineError::Pq(PqError::RotationSizeMismatch {
            dim: 8,
            expected_bytes: 256,
            got_bytes: 64
        })
    ));
}

#[test]
fn test_indivisible_subspaces_fail_before_training() {
    let dir = tempdir().unwrap();
    write_tsv(&dir.path().join("base.tsv"), 100, 9, 4);
    let mut config = base_config(dir.path(), 9);
    config.pq_m_list = vec![3, 2];

    let err = run_construct_stage(&config).unwrap_err();
    assert!(err.is_configuration());
    assert!(!dir.path().join("codecs").exists());
}

#[test]
fn test_dimension_must_match_config() {
    let dir = tempdir().unwrap();
    write_tsv(&dir.path().join("base.tsv"), 50, 6, 5);
    let config = base_config(dir.path(), 8);

    assert!(matches!(
        load_dataset(&config),
        Err(PipelineError::Config(_))
    ));
}

#[test]
fn test_too_few_vectors_is_degenerate() {
    let dir = tempdir().unwrap();
    write_tsv(&dir.path().join("base.tsv"), 10, 4, 6);
    let mut config = base_config(dir.path(), 4);
    config.pq_m_list = vec![2];
    config.nbits_list = vec![4];

    let data = load_dataset(&config).unwrap();
    let err = construct(&config, &data, None).unwrap_err();
    assert!(!err.is_configuration());
    assert!(matches!(err, PipelineError::Pq(PqError::DegenerateInput { .. })));
}

#[test]
fn test_identity_rotation_does_not_change_codecs() {
    let dir = tempdir().unwrap();
    write_tsv(&dir.path().join("base.tsv"), 200, 8, 8);
    let config = base_config(dir.path(), 8);
    let data = load_dataset(&config).unwrap();

    let plain = construct(&config, &data, None).unwrap();
    let plain_bytes: Vec<Vec<u8>> = plain.iter().map(|r| fs::read(&r.path).unwrap()).collect();

    let rotated = construct(&config, &data, Some(&Matrix::identity(8))).unwrap();
    for (report, bytes) in rotated.iter().zip(plain_bytes) {
        assert_eq!(fs::read(&report.path).unwrap(), bytes);
    }
}
