//! The two job stages: learn an OPQ rotation, then build one PQ codec per
//! (M, nbits) pair.

use crate::config::JobConfig;
use crate::error::{PipelineError, PipelineResult};
use opqkit_core::Matrix;
use opqkit_dataset::{read_dataset, sample_rows};
use opqkit_pq::{
    apply_rotation, read_rotation, reconstruction_mse, train_opq, train_pq_with_codes,
    write_codec, write_rotation, CodecHeader,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::fs;
use std::path::PathBuf;

/// Outcome of building one codec.
#[derive(Debug, Clone)]
pub struct CodecReport {
    pub num_subspaces: usize,
    pub nbits: u32,
    pub path: PathBuf,
    pub mse: f64,
}

/// Read the dataset named by the job, capped at `max_elements` rows.
pub fn load_dataset(config: &JobConfig) -> PipelineResult<Matrix> {
    let data = read_dataset(&config.data_path, Some(config.max_elements))?;
    if data.cols() != config.d {
        return Err(PipelineError::Config(format!(
            "dataset {} has dimension {}, config says d = {}",
            config.data_path.display(),
            data.cols(),
            config.d
        )));
    }
    Ok(data)
}

fn log_opq_disabled() {
    tracing::info!("OPQ is not enabled in the configuration, skipping");
}

/// OPQ stage. Learns R on a sample of `data` and writes the rotation
/// artifact. Returns `None` without touching anything when OPQ is disabled.
pub fn train_rotation(config: &JobConfig, data: &Matrix) -> PipelineResult<Option<Matrix>> {
    if !config.opq_enabled() {
        log_opq_disabled();
        return Ok(None);
    }

    let params = config.opq_params()?;
    let path = config.rotation_path()?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let sample_size = match config.sample_size {
        Some(size) if size > data.rows() => {
            tracing::warn!(
                "sample_size {} exceeds the {} vectors read, training on all of them",
                size,
                data.rows()
            );
            data.rows()
        }
        Some(size) => size,
        None => data.rows(),
    };
    let sample = sample_rows(data, sample_size, &mut rng);

    tracing::info!(
        "Training OPQ on {} of {} vectors (M={}, k={}, max_iter={})",
        sample.rows(),
        data.rows(),
        params.num_subspaces,
        params.num_clusters,
        params.iterations
    );
    let transform = train_opq(&sample, &params, &mut rng)?;

    write_rotation(path, &transform.rotation)?;
    Ok(Some(transform.rotation))
}

/// Construct stage. Applies `rotation` when given, then trains and writes
/// every configured codec. Pairs run in parallel, each with its own RNG
/// seeded from the job seed.
pub fn construct(
    config: &JobConfig,
    data: &Matrix,
    rotation: Option<&Matrix>,
) -> PipelineResult<Vec<CodecReport>> {
    config.validate_construct()?;
    let output_dir = config.output_dir()?;
    fs::create_dir_all(output_dir)?;

    let rotated;
    let data = match rotation {
        Some(r) => {
            rotated = apply_rotation(data, r)?;
            &rotated
        }
        None => data,
    };

    let pairs = config.codec_pairs();
    tracing::info!(
        "Constructing {} codecs from {} vectors of dimension {}",
        pairs.len(),
        data.rows(),
        data.cols()
    );

    pairs
        .par_iter()
        .map(|&(num_subspaces, nbits)| -> PipelineResult<CodecReport> {
            let params = config.pq_params(num_subspaces, nbits);
            let mut rng = StdRng::seed_from_u64(config.seed);
            let (codebook, table) = train_pq_with_codes(data, &params, &mut rng)?;
            let mse = reconstruction_mse(&codebook, data, &table)?;

            let header = CodecHeader::new(config.max_elements, config.d, num_subspaces, nbits)?;
            let path = output_dir.join(config.codec_file_name(num_subspaces, nbits));
            write_codec(&path, &header, &codebook)?;

            tracing::info!(
                "Codec M={}, nbits={}: reconstruction MSE = {:.6}",
                num_subspaces,
                nbits,
                mse
            );
            Ok(CodecReport {
                num_subspaces,
                nbits,
                path,
                mse,
            })
        })
        .collect()
}

/// `opq` subcommand.
pub fn run_opq_stage(config: &JobConfig) -> PipelineResult<Option<Matrix>> {
    if !config.opq_enabled() {
        log_opq_disabled();
        return Ok(None);
    }
    let data = load_dataset(config)?;
    train_rotation(config, &data)
}

/// `construct` subcommand. Loads R from `opq_matrix_file` when OPQ is on.
pub fn run_construct_stage(config: &JobConfig) -> PipelineResult<Vec<CodecReport>> {
    config.validate_construct()?;
    let data = load_dataset(config)?;
    let rotation = if config.opq_enabled() {
        Some(read_rotation(config.rotation_path()?, config.d)?)
    } else {
        None
    };
    construct(config, &data, rotation.as_ref())
}

/// `run` subcommand: both stages on one loaded dataset.
pub fn run_all(config: &JobConfig) -> PipelineResult<Vec<CodecReport>> {
    config.validate_construct()?;
    let data = load_dataset(config)?;
    let rotation = train_rotation(config, &data)?;
    construct(config, &data, rotation.as_ref())
}
