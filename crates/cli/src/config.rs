//! JSON job configuration shared by the `opq`, `construct` and `run` stages.

use crate::error::{PipelineError, PipelineResult};
use opqkit_pq::{KMeansParams, OpqParams, PqParams};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn default_max_elements() -> usize {
    100_000
}

fn default_max_iter() -> usize {
    10
}

/// One training job, as read from `--config-file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Dataset file (`.tsv` or `.fvecs`).
    pub data_path: PathBuf,

    /// Vector dimensionality; every row must match.
    pub d: usize,

    /// Cap on rows read. Also recorded in every codec header.
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,

    /// Subspace counts to build codecs for.
    #[serde(default)]
    pub pq_m_list: Vec<usize>,

    /// Code widths to build codecs for.
    #[serde(default)]
    pub nbits_list: Vec<u32>,

    /// 1 to learn and apply an OPQ rotation, 0 to skip it.
    #[serde(default)]
    pub opq: u8,

    /// Rotation artifact written by `opq` and read by `construct`.
    #[serde(default)]
    pub opq_matrix_file: Option<PathBuf>,

    /// OPQ training sample size; all rows when absent.
    #[serde(default)]
    pub sample_size: Option<usize>,

    /// OPQ subspace count.
    #[serde(default, rename = "M")]
    pub m: Option<usize>,

    /// OPQ centroids per subspace.
    #[serde(default)]
    pub k: Option<usize>,

    /// OPQ outer iterations.
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,

    /// Directory receiving the codec artifacts.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Seed for sampling and clustering.
    #[serde(default)]
    pub seed: u64,

    #[serde(default)]
    pub kmeans: KMeansParams,
}

impl JobConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let text = fs::read_to_string(path)?;
        let config: JobConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks shared by every stage, plus the OPQ settings when enabled.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.d == 0 {
            return Err(config_error("d must be > 0"));
        }
        if self.max_elements == 0 {
            return Err(config_error("max_elements must be > 0"));
        }
        if self.opq > 1 {
            return Err(config_error(format!("opq must be 0 or 1, got {}", self.opq)));
        }
        if self.sample_size == Some(0) {
            return Err(config_error("sample_size must be > 0"));
        }
        self.kmeans.validate()?;

        if self.opq_enabled() {
            self.rotation_path()?;
            self.opq_params()?.validate(self.d)?;
        }
        Ok(())
    }

    /// Checks for the construct stage. Every (M, nbits) pair is validated
    /// against `d` so a bad pair fails before any training starts.
    pub fn validate_construct(&self) -> PipelineResult<()> {
        self.output_dir()?;
        if self.pq_m_list.is_empty() {
            return Err(config_error("pq_m_list must not be empty"));
        }
        if self.nbits_list.is_empty() {
            return Err(config_error("nbits_list must not be empty"));
        }
        for (m, nbits) in self.codec_pairs() {
            self.pq_params(m, nbits).validate(self.d)?;
        }
        Ok(())
    }

    pub fn opq_enabled(&self) -> bool {
        self.opq == 1
    }

    pub fn opq_params(&self) -> PipelineResult<OpqParams> {
        let m = self
            .m
            .ok_or_else(|| config_error("OPQ is enabled but M is missing"))?;
        let k = self
            .k
            .ok_or_else(|| config_error("OPQ is enabled but k is missing"))?;
        Ok(OpqParams::new(m, k)
            .with_iterations(self.max_iter)
            .with_kmeans(self.kmeans.clone()))
    }

    pub fn pq_params(&self, num_subspaces: usize, nbits: u32) -> PqParams {
        PqParams::new(num_subspaces, nbits).with_kmeans(self.kmeans.clone())
    }

    /// Every (M, nbits) combination, M-major.
    pub fn codec_pairs(&self) -> Vec<(usize, u32)> {
        self.pq_m_list
            .iter()
            .flat_map(|&m| self.nbits_list.iter().map(move |&nbits| (m, nbits)))
            .collect()
    }

    pub fn rotation_path(&self) -> PipelineResult<&Path> {
        non_empty_path(self.opq_matrix_file.as_deref())
            .ok_or_else(|| config_error("OPQ is enabled but opq_matrix_file is missing"))
    }

    pub fn output_dir(&self) -> PipelineResult<&Path> {
        non_empty_path(self.output_dir.as_deref())
            .ok_or_else(|| config_error("output_dir is required to construct codecs"))
    }

    /// Artifact name read by the index: `encoded_data_{opq}_{max_elements}_{M}_{nbits}`.
    pub fn codec_file_name(&self, num_subspaces: usize, nbits: u32) -> String {
        format!(
            "encoded_data_{}_{}_{}_{}",
            self.opq, self.max_elements, num_subspaces, nbits
        )
    }
}

fn non_empty_path(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

fn config_error(msg: impl Into<String>) -> PipelineError {
    PipelineError::Config(msg.into())
}
