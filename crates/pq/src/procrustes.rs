//! Orthogonal Procrustes solver.
//!
//! Given matched point sets X and Y (both n x d), finds the orthogonal R
//! minimizing ||X R - Y||_F. With X^T Y = U S V^T the solution is R = U V^T.
//! The factorization is a one-sided Jacobi (Hestenes) SVD in `f64`.

use crate::error::{PqError, PqResult};
use opqkit_core::Matrix;
use rayon::prelude::*;

/// Sweep limit for the Jacobi iteration before reporting non-convergence.
pub const MAX_SWEEPS: usize = 60;

/// Relative off-diagonal threshold below which a column pair counts as
/// orthogonal.
const JACOBI_TOLERANCE: f64 = 1e-12;

/// Rows per partial sum when forming X^T Y.
const COVARIANCE_CHUNK: usize = 512;

/// Singular value decomposition `A = U diag(s) V^T` of a square matrix.
///
/// `u` and `v` are row-major `n x n`; singular values are non-negative and
/// sorted in descending order, with columns of `u` and `v` ordered to match.
#[derive(Debug, Clone)]
pub struct Svd {
    pub n: usize,
    pub u: Vec<f64>,
    pub singular_values: Vec<f64>,
    pub v: Vec<f64>,
}

/// Solve the orthogonal Procrustes problem for `x` and `y`.
pub fn solve(x: &Matrix, y: &Matrix) -> PqResult<Matrix> {
    if x.cols() != y.cols() {
        return Err(PqError::DimensionMismatch {
            expected: x.cols(),
            got: y.cols(),
        });
    }
    if x.rows() != y.rows() {
        return Err(PqError::DimensionMismatch {
            expected: x.rows(),
            got: y.rows(),
        });
    }

    let d = x.cols();
    let covariance = cross_covariance(x, y);
    let svd = svd(&covariance, d)?;

    let mut rotation = Matrix::new(d, d);
    for i in 0..d {
        for j in 0..d {
            let mut sum = 0.0f64;
            for k in 0..d {
                sum += svd.u[i * d + k] * svd.v[j * d + k];
            }
            rotation.set(i, j, sum as f32);
        }
    }

    Ok(rotation)
}

/// Largest absolute entry of `R^T R - I`.
pub fn orthogonality_error(r: &Matrix) -> f32 {
    let d = r.cols();
    let mut worst = 0.0f64;
    for i in 0..d {
        for j in 0..d {
            let mut dot = 0.0f64;
            for k in 0..r.rows() {
                dot += r.get(k, i) as f64 * r.get(k, j) as f64;
            }
            let target = if i == j { 1.0 } else { 0.0 };
            worst = worst.max((dot - target).abs());
        }
    }
    worst as f32
}

/// Compute `X^T Y` in `f64`.
///
/// Partial sums over fixed row chunks are added in chunk order, so the result
/// does not depend on thread scheduling.
fn cross_covariance(x: &Matrix, y: &Matrix) -> Vec<f64> {
    let n = x.rows();
    let d = x.cols();
    let num_chunks = n.div_ceil(COVARIANCE_CHUNK);

    let partials: Vec<Vec<f64>> = (0..num_chunks)
        .into_par_iter()
        .map(|chunk| {
            let mut acc = vec![0.0f64; d * d];
            let end = ((chunk + 1) * COVARIANCE_CHUNK).min(n);
            for r in chunk * COVARIANCE_CHUNK..end {
                let x_row = x.row(r);
                let y_row = y.row(r);
                for (i, &xi) in x_row.iter().enumerate() {
                    if xi == 0.0 {
                        continue;
                    }
                    let xi = xi as f64;
                    let out = &mut acc[i * d..(i + 1) * d];
                    for (o, &yj) in out.iter_mut().zip(y_row) {
                        *o += xi * yj as f64;
                    }
                }
            }
            acc
        })
        .collect();

    let mut covariance = vec![0.0f64; d * d];
    for partial in &partials {
        for (c, p) in covariance.iter_mut().zip(partial) {
            *c += p;
        }
    }
    covariance
}

/// One-sided Jacobi SVD of the row-major `n x n` matrix `a`.
///
/// Fails with [`PqError::Numerical`] on non-finite input or when
/// [`MAX_SWEEPS`] sweeps do not orthogonalize every column pair.
pub fn svd(a: &[f64], n: usize) -> PqResult<Svd> {
    if a.len() != n * n {
        return Err(PqError::InvalidParams(format!(
            "expected {} entries for a {}x{} matrix, got {}",
            n * n,
            n,
            n,
            a.len()
        )));
    }
    if a.iter().any(|v| !v.is_finite()) {
        return Err(PqError::Numerical(
            "matrix to factorize contains non-finite values".into(),
        ));
    }

    // Work on columns so the pairwise products run over contiguous memory.
    let mut w: Vec<Vec<f64>> = (0..n).map(|j| (0..n).map(|i| a[i * n + j]).collect()).collect();
    let mut v: Vec<Vec<f64>> = (0..n)
        .map(|j| {
            let mut col = vec![0.0; n];
            col[j] = 1.0;
            col
        })
        .collect();

    // Absolute floors relative to ||A||_F^2. Columns that rank deficiency
    // shrinks to roundoff never meet the relative test on their own.
    let frobenius_sq: f64 = a.iter().map(|x| x * x).sum();
    let negligible_norm = f64::EPSILON * f64::EPSILON * frobenius_sq;
    let negligible_gamma = n as f64 * f64::EPSILON * frobenius_sq;

    let mut converged = n < 2;
    for sweep in 0..MAX_SWEEPS {
        let mut rotations = 0usize;

        for p in 0..n {
            for q in p + 1..n {
                let (alpha, beta, gamma) = column_products(&w[p], &w[q]);
                if gamma == 0.0
                    || alpha <= negligible_norm
                    || beta <= negligible_norm
                    || gamma.abs() <= negligible_gamma
                    || gamma.abs() <= JACOBI_TOLERANCE * (alpha * beta).sqrt()
                {
                    continue;
                }
                rotations += 1;

                let zeta = (beta - alpha) / (2.0 * gamma);
                let t = if zeta.abs() > 1e150 {
                    0.5 / zeta
                } else {
                    zeta.signum() / (zeta.abs() + (1.0 + zeta * zeta).sqrt())
                };
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = c * t;

                rotate_columns(&mut w, p, q, c, s);
                rotate_columns(&mut v, p, q, c, s);
            }
        }

        if rotations == 0 {
            tracing::trace!("Jacobi SVD converged after {} sweeps", sweep + 1);
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(PqError::Numerical(format!(
            "Jacobi SVD of a {}x{} matrix did not converge within {} sweeps",
            n, n, MAX_SWEEPS
        )));
    }

    let norms: Vec<f64> = w.iter().map(|col| col.iter().map(|x| x * x).sum::<f64>().sqrt()).collect();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| norms[j].total_cmp(&norms[i]));

    let largest = order.first().map(|&i| norms[i]).unwrap_or(0.0);
    let rank_tolerance = largest * n as f64 * f64::EPSILON;

    let mut u_cols: Vec<Vec<f64>> = Vec::with_capacity(n);
    let mut valid = Vec::with_capacity(n);
    for &j in &order {
        if norms[j] > rank_tolerance && norms[j] > 0.0 {
            u_cols.push(w[j].iter().map(|x| x / norms[j]).collect());
            valid.push(true);
        } else {
            u_cols.push(vec![0.0; n]);
            valid.push(false);
        }
    }
    orthonormalize(&mut u_cols, &mut valid);
    complete_basis(&mut u_cols, &mut valid);

    let mut svd = Svd {
        n,
        u: vec![0.0; n * n],
        singular_values: order.iter().map(|&j| norms[j]).collect(),
        v: vec![0.0; n * n],
    };
    for (col, &j) in order.iter().enumerate() {
        for i in 0..n {
            svd.u[i * n + col] = u_cols[col][i];
            svd.v[i * n + col] = v[j][i];
        }
    }

    Ok(svd)
}

#[inline]
fn column_products(a: &[f64], b: &[f64]) -> (f64, f64, f64) {
    let mut alpha = 0.0;
    let mut beta = 0.0;
    let mut gamma = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        alpha += x * x;
        beta += y * y;
        gamma += x * y;
    }
    (alpha, beta, gamma)
}

/// Apply the plane rotation `(c, s)` to columns `p < q`.
#[inline]
fn rotate_columns(cols: &mut [Vec<f64>], p: usize, q: usize, c: f64, s: f64) {
    let (left, right) = cols.split_at_mut(q);
    let col_p = &mut left[p];
    let col_q = &mut right[0];
    for (xp, xq) in col_p.iter_mut().zip(col_q.iter_mut()) {
        let a = *xp;
        let b = *xq;
        *xp = c * a - s * b;
        *xq = s * a + c * b;
    }
}

/// Re-orthogonalize the valid columns in order. Columns of tiny singular
/// values carry roundoff relative to the leading ones; a column that loses
/// most of its norm here is marked invalid and left to `complete_basis`.
fn orthonormalize(cols: &mut [Vec<f64>], valid: &mut [bool]) {
    for j in 0..cols.len() {
        if !valid[j] {
            continue;
        }
        let mut candidate = cols[j].clone();
        for _ in 0..2 {
            for k in 0..j {
                if !valid[k] {
                    continue;
                }
                let dot: f64 = candidate.iter().zip(&cols[k]).map(|(a, b)| a * b).sum();
                for (c, &b) in candidate.iter_mut().zip(&cols[k]) {
                    *c -= dot * b;
                }
            }
        }
        let norm = candidate.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm < 0.5 {
            valid[j] = false;
        } else {
            cols[j] = candidate.into_iter().map(|x| x / norm).collect();
        }
    }
}

/// Fill the columns marked invalid with unit vectors orthogonal to every
/// valid column. Needed when X^T Y is rank deficient; otherwise U V^T would
/// not be orthogonal.
fn complete_basis(cols: &mut [Vec<f64>], valid: &mut [bool]) {
    let n = cols.len();
    for j in 0..n {
        if valid[j] {
            continue;
        }

        // The standard basis vector with the largest residual is the most
        // stable candidate; some residual has squared norm >= 1/n.
        let mut best: Option<(f64, Vec<f64>)> = None;
        for e in 0..n {
            let mut candidate = vec![0.0; n];
            candidate[e] = 1.0;
            // Two Gram-Schmidt passes for numerical orthogonality.
            for _ in 0..2 {
                for (k, col) in cols.iter().enumerate() {
                    if !valid[k] {
                        continue;
                    }
                    let dot: f64 = candidate.iter().zip(col).map(|(a, b)| a * b).sum();
                    for (c, &b) in candidate.iter_mut().zip(col) {
                        *c -= dot * b;
                    }
                }
            }
            let norm = candidate.iter().map(|x| x * x).sum::<f64>().sqrt();
            if best.as_ref().map_or(true, |(best_norm, _)| norm > *best_norm) {
                best = Some((norm, candidate));
            }
        }

        if let Some((norm, candidate)) = best {
            cols[j] = candidate.into_iter().map(|x| x / norm).collect();
            valid[j] = true;
        }
    }
}
