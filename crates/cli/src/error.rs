//! Pipeline error types.

use opqkit_dataset::DatasetError;
use opqkit_pq::{ErrorKind, PqError};
use thiserror::Error;

/// Errors that abort an `opq`, `construct` or `run` job.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Quantization error: {0}")]
    Pq(#[from] PqError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// True for errors caused by the job configuration rather than the data
    /// or the environment.
    pub fn is_configuration(&self) -> bool {
        match self {
            PipelineError::Config(_) | PipelineError::Json(_) => true,
            PipelineError::Pq(err) => err.kind() == ErrorKind::Configuration,
            _ => false,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
