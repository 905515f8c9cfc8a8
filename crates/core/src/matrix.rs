//! Dense row-major `f32` matrix.
//!
//! A dataset of `n` vectors of dimension `d` is an `n x d` matrix; rotations
//! are `d x d`. Row `i` occupies `data[i * cols..(i + 1) * cols]`.

use crate::distance::{dot_product, l2_distance_squared_f64};
use crate::error::{MatrixError, MatrixResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Dense row-major matrix of `f32`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMatrix")]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

/// Unchecked serialized form; shape is validated on the way in.
#[derive(Deserialize)]
struct RawMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl TryFrom<RawMatrix> for Matrix {
    type Error = MatrixError;

    fn try_from(raw: RawMatrix) -> MatrixResult<Self> {
        Matrix::from_vec(raw.rows, raw.cols, raw.data)
    }
}

impl Matrix {
    /// Create a zero-filled matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Create the `n x n` identity matrix.
    pub fn identity(n: usize) -> Self {
        let mut m = Self::new(n, n);
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        m
    }

    /// Wrap a row-major buffer.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> MatrixResult<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(MatrixError::LengthMismatch {
                rows,
                cols,
                len: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from a list of rows; every row must have the first row's width.
    pub fn from_rows<V: AsRef<[f32]>>(rows: &[V]) -> MatrixResult<Self> {
        let cols = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(MatrixError::RaggedRow {
                    row: i,
                    expected: cols,
                    got: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.cols + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f32) {
        self.data[i * self.cols + j] = value;
    }

    /// Iterate over rows in order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> + '_ {
        // chunks_exact(0) panics; a matrix without columns has no data anyway.
        self.data.chunks_exact(self.cols.max(1)).take(self.rows)
    }

    /// Iterate over rows in parallel, preserving row order in indexed adaptors.
    pub fn par_iter_rows(&self) -> rayon::slice::ChunksExact<'_, f32> {
        self.data.par_chunks_exact(self.cols.max(1))
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Return the transpose.
    pub fn transpose(&self) -> Self {
        let mut t = Self::new(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                t.data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        t
    }

    /// Matrix product `self * rhs`, computed in parallel over output rows.
    pub fn matmul(&self, rhs: &Matrix) -> MatrixResult<Matrix> {
        if self.cols != rhs.rows {
            return Err(MatrixError::IncompatibleShapes {
                left_rows: self.rows,
                left_cols: self.cols,
                right_rows: rhs.rows,
                right_cols: rhs.cols,
            });
        }

        let mut out = Matrix::new(self.rows, rhs.cols);
        if out.is_empty() {
            return Ok(out);
        }

        // Rows of the transpose are columns of rhs, which keeps the inner
        // loop on contiguous memory.
        let rhs_t = rhs.transpose();
        let inner = self.cols;
        out.data
            .par_chunks_exact_mut(rhs.cols)
            .enumerate()
            .for_each(|(i, out_row)| {
                let lhs_row = &self.data[i * inner..(i + 1) * inner];
                for (j, value) in out_row.iter_mut().enumerate() {
                    *value = dot_product(lhs_row, &rhs_t.data[j * inner..(j + 1) * inner]);
                }
            });

        Ok(out)
    }

    /// Copy columns `start..start + width` into a new `rows x width` matrix.
    pub fn column_block(&self, start: usize, width: usize) -> MatrixResult<Matrix> {
        let end = start + width;
        if end > self.cols {
            return Err(MatrixError::ColumnRange {
                start,
                end,
                cols: self.cols,
            });
        }

        let mut data = Vec::with_capacity(self.rows * width);
        for row in self.iter_rows() {
            data.extend_from_slice(&row[start..end]);
        }
        Matrix::from_vec(self.rows, width, data)
    }

    /// Gather the given rows, in the given order, into a new matrix.
    pub fn select_rows(&self, indices: &[usize]) -> Matrix {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Matrix {
            rows: indices.len(),
            cols: self.cols,
            data,
        }
    }

    /// Sum of squared element differences, accumulated in `f64`.
    ///
    /// For a dataset and its reconstruction this is the quantization
    /// distortion.
    pub fn squared_distance(&self, other: &Matrix) -> MatrixResult<f64> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(MatrixError::IncompatibleShapes {
                left_rows: self.rows,
                left_cols: self.cols,
                right_rows: other.rows,
                right_cols: other.cols,
            });
        }
        Ok(l2_distance_squared_f64(&self.data, &other.data))
    }
}
