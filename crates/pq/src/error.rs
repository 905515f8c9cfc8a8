//! PQ error types.

use opqkit_core::MatrixError;
use thiserror::Error;

/// PQ-related errors.
#[derive(Error, Debug)]
pub enum PqError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Subspace count {subspaces} does not divide dimension {dim} evenly")]
    SubspaceMismatch { subspaces: usize, dim: usize },

    #[error("Rotation file holds {got_bytes} bytes, expected {expected_bytes} for a {dim}x{dim} matrix")]
    RotationSizeMismatch {
        dim: usize,
        expected_bytes: usize,
        got_bytes: usize,
    },

    #[error("Cannot form {clusters} clusters from {points} points")]
    DegenerateInput { points: usize, clusters: usize },

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Invalid code {code} for subspace {subspace}")]
    InvalidCode { subspace: usize, code: usize },

    #[error("Invalid codec artifact: {0}")]
    InvalidArtifact(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of [`PqError`], used by callers that only care
/// about which class of failure aborted a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    DegenerateInput,
    Numerical,
    Format,
    Io,
}

impl PqError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PqError::InvalidParams(_)
            | PqError::DimensionMismatch { .. }
            | PqError::SubspaceMismatch { .. }
            | PqError::RotationSizeMismatch { .. } => ErrorKind::Configuration,
            PqError::DegenerateInput { .. } => ErrorKind::DegenerateInput,
            PqError::Numerical(_) => ErrorKind::Numerical,
            PqError::InvalidCode { .. } | PqError::InvalidArtifact(_) => ErrorKind::Format,
            PqError::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<MatrixError> for PqError {
    fn from(err: MatrixError) -> Self {
        match err {
            MatrixError::RaggedRow { expected, got, .. } => {
                PqError::DimensionMismatch { expected, got }
            }
            other => PqError::InvalidParams(other.to_string()),
        }
    }
}

pub type PqResult<T> = Result<T, PqError>;
