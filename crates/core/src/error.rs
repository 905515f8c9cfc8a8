//! Matrix shape errors.

use thiserror::Error;

/// Errors raised when building or combining matrices.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatrixError {
    #[error("Buffer of length {len} cannot hold a {rows}x{cols} matrix")]
    LengthMismatch { rows: usize, cols: usize, len: usize },

    #[error("Row {row} has {got} components, expected {expected}")]
    RaggedRow { row: usize, expected: usize, got: usize },

    #[error("Cannot multiply {left_rows}x{left_cols} by {right_rows}x{right_cols}")]
    IncompatibleShapes {
        left_rows: usize,
        left_cols: usize,
        right_rows: usize,
        right_cols: usize,
    },

    #[error("Column block {start}..{end} is out of range for {cols} columns")]
    ColumnRange { start: usize, end: usize, cols: usize },
}

pub type MatrixResult<T> = Result<T, MatrixError>;
