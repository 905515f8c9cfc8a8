//! Row sampling for OPQ training subsets.

use opqkit_core::Matrix;
use rand::seq::index;
use rand::Rng;

/// Draw `size` rows of `data` without replacement.
///
/// If `size` covers the whole dataset every row is returned in its original
/// order.
pub fn sample_rows<R: Rng + ?Sized>(data: &Matrix, size: usize, rng: &mut R) -> Matrix {
    let n = data.rows();
    if size >= n {
        return data.clone();
    }
    let indices = index::sample(rng, n, size).into_vec();
    data.select_rows(&indices)
}
