//! Dataset error types.

use opqkit_core::MatrixError;
use std::path::PathBuf;
use thiserror::Error;

/// Dataset reading errors.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: cannot parse {value:?} as a float")]
    Parse { line: usize, value: String },

    #[error("Row {row} has {got} components, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("Record {record}: invalid dimension {dim}")]
    InvalidRecord { record: usize, dim: i32 },

    #[error("Record {record} is truncated: needs {needed} bytes, {available} left")]
    Truncated {
        record: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unsupported file format: {0} (expected .tsv or .fvecs)")]
    UnsupportedFormat(PathBuf),

    #[error("Dataset {0} contains no vectors")]
    EmptyDataset(PathBuf),

    #[error("Matrix error: {0}")]
    Matrix(#[from] MatrixError),
}

pub type DatasetResult<T> = Result<T, DatasetError>;
