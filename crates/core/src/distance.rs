//! Distance kernels.
//!
//! Loops are unrolled by 8 with independent accumulators so the compiler can
//! auto-vectorize them on modern CPUs.

/// Compute squared L2 (Euclidean) distance between two vectors.
///
/// Nearest-centroid searches only compare distances, so the square root is
/// never taken.
#[inline]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let mut sum0 = 0.0f32;
    let mut sum1 = 0.0f32;
    let mut sum2 = 0.0f32;
    let mut sum3 = 0.0f32;

    let a_chunks = a.chunks_exact(8);
    let b_chunks = b.chunks_exact(8);
    let a_remainder = a_chunks.remainder();
    let b_remainder = b_chunks.remainder();

    for (a_chunk, b_chunk) in a_chunks.zip(b_chunks) {
        let d0 = a_chunk[0] - b_chunk[0];
        let d1 = a_chunk[1] - b_chunk[1];
        let d2 = a_chunk[2] - b_chunk[2];
        let d3 = a_chunk[3] - b_chunk[3];
        let d4 = a_chunk[4] - b_chunk[4];
        let d5 = a_chunk[5] - b_chunk[5];
        let d6 = a_chunk[6] - b_chunk[6];
        let d7 = a_chunk[7] - b_chunk[7];

        sum0 += d0 * d0 + d4 * d4;
        sum1 += d1 * d1 + d5 * d5;
        sum2 += d2 * d2 + d6 * d6;
        sum3 += d3 * d3 + d7 * d7;
    }

    for (a_val, b_val) in a_remainder.iter().zip(b_remainder.iter()) {
        let d = a_val - b_val;
        sum0 += d * d;
    }

    sum0 + sum1 + sum2 + sum3
}

/// Compute dot product of two vectors.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let mut sum0 = 0.0f32;
    let mut sum1 = 0.0f32;
    let mut sum2 = 0.0f32;
    let mut sum3 = 0.0f32;

    let a_chunks = a.chunks_exact(8);
    let b_chunks = b.chunks_exact(8);
    let a_remainder = a_chunks.remainder();
    let b_remainder = b_chunks.remainder();

    for (a_chunk, b_chunk) in a_chunks.zip(b_chunks) {
        sum0 += a_chunk[0] * b_chunk[0] + a_chunk[4] * b_chunk[4];
        sum1 += a_chunk[1] * b_chunk[1] + a_chunk[5] * b_chunk[5];
        sum2 += a_chunk[2] * b_chunk[2] + a_chunk[6] * b_chunk[6];
        sum3 += a_chunk[3] * b_chunk[3] + a_chunk[7] * b_chunk[7];
    }

    for (a_val, b_val) in a_remainder.iter().zip(b_remainder.iter()) {
        sum0 += a_val * b_val;
    }

    sum0 + sum1 + sum2 + sum3
}

/// Squared L2 distance accumulated in `f64`.
///
/// Used for distortion totals where many small errors are summed.
#[inline]
pub fn l2_distance_squared_f64(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum()
}
