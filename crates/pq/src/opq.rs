//! Optimized Product Quantization (OPQ) with learned rotation matrix.
//!
//! OPQ improves upon PQ by learning a rotation matrix R that minimizes
//! quantization error. The optimization alternates between:
//! 1. Fixing R, refreshing the subspace codebooks and assignments
//! 2. Fixing the reconstruction, solving for R (orthogonal Procrustes)
//!
//! Vectors are rows, so the rotated data is X·R.
//!
//! Reference: "Optimized Product Quantization" by Ge et al., CVPR 2013

use crate::cluster::{ClusterAssigner, Clustering, RefineStats};
use crate::codebook::{train_subspaces, PqCodebook};
use crate::config::OpqParams;
use crate::encoding::{decode_vectors, encode_vectors, AssignmentTable};
use crate::error::{PqError, PqResult};
use crate::procrustes;
use opqkit_core::Matrix;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// OPQ result: learned rotation plus the codebooks of the last refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpqTransform {
    /// The learned rotation matrix (dim × dim).
    pub rotation: Matrix,

    /// The PQ codebook trained on rotated vectors.
    pub codebook: PqCodebook,

    /// Assignments of the training vectors from the last refresh.
    pub assignments: AssignmentTable,

    /// Total squared distortion after the cold start and after every refresh.
    pub distortions: Vec<f64>,
}

impl OpqTransform {
    pub fn dim(&self) -> usize {
        self.rotation.rows()
    }

    /// Apply rotation to every row: X·R.
    pub fn rotate(&self, data: &Matrix) -> PqResult<Matrix> {
        apply_rotation(data, &self.rotation)
    }

    /// Apply inverse rotation (Rᵀ since R is orthogonal).
    pub fn rotate_inverse(&self, data: &Matrix) -> PqResult<Matrix> {
        apply_rotation(data, &self.rotation.transpose())
    }

    /// Rotate and encode.
    pub fn encode(&self, data: &Matrix) -> PqResult<AssignmentTable> {
        encode_vectors(&self.codebook, &self.rotate(data)?)
    }

    /// Decode and inverse-rotate.
    pub fn decode(&self, table: &AssignmentTable) -> PqResult<Matrix> {
        self.rotate_inverse(&decode_vectors(&self.codebook, table)?)
    }
}

/// Rotate every row of `data` by the square matrix `rotation`.
pub fn apply_rotation(data: &Matrix, rotation: &Matrix) -> PqResult<Matrix> {
    if rotation.rows() != rotation.cols() || rotation.rows() != data.cols() {
        return Err(PqError::DimensionMismatch {
            expected: data.cols() * data.cols(),
            got: rotation.rows() * rotation.cols(),
        });
    }
    Ok(data.matmul(rotation)?)
}

/// Train OPQ on `data` (n × d).
///
/// Algorithm:
/// 1. R = I; cold-start k-means on each subspace of X; record distortion
/// 2. For each of `iterations` rounds:
///    a. After the first round: X' = X·R, one warm refinement pass per
///       subspace, record distortion
///    b. R = argmin ‖X·R − Y‖ over orthogonal R, Y the current reconstruction
///
/// The loop always performs exactly `iterations` rotation solves; the
/// distortion history is diagnostic only.
pub fn train_opq<R: Rng + ?Sized>(
    data: &Matrix,
    params: &OpqParams,
    rng: &mut R,
) -> PqResult<OpqTransform> {
    let dim = data.cols();
    params.validate(dim)?;

    let num_subspaces = params.num_subspaces;
    let subspace_dim = dim / num_subspaces;
    let assigner = ClusterAssigner::new(params.kmeans.clone());

    let mut rotation = Matrix::identity(dim);
    // X·I is X itself.
    let mut rotated = data.clone();
    let mut clusterings = train_subspaces(
        &rotated,
        num_subspaces,
        params.num_clusters,
        &params.kmeans,
        rng,
    )?;
    let mut reconstruction = reconstruct(&clusterings, data.rows(), dim);
    let mut distortions = vec![rotated.squared_distance(&reconstruction)?];

    tracing::debug!("OPQ initial distortion = {:.6}", distortions[0]);

    for iter in 0..params.iterations {
        if iter > 0 {
            rotated = data.matmul(&rotation)?;

            let stats = clusterings
                .par_iter_mut()
                .enumerate()
                .map(|(m, clustering)| {
                    let block = rotated.column_block(m * subspace_dim, subspace_dim)?;
                    assigner.refine(&block, clustering)
                })
                .collect::<PqResult<Vec<RefineStats>>>()?;

            reconstruction = reconstruct(&clusterings, data.rows(), dim);
            let distortion = rotated.squared_distance(&reconstruction)?;
            distortions.push(distortion);

            tracing::debug!(
                "OPQ iteration {}: distortion = {:.6}, reassigned = {}, empty clusters = {}",
                iter,
                distortion,
                stats.iter().map(|s| s.reassigned).sum::<usize>(),
                stats.iter().map(|s| s.empty_clusters).sum::<usize>()
            );
        }

        rotation = procrustes::solve(data, &reconstruction)?;
        tracing::trace!(
            "OPQ iteration {}: orthogonality error = {:e}",
            iter,
            procrustes::orthogonality_error(&rotation)
        );
    }

    tracing::info!(
        "OPQ finished {} iterations on {} vectors, final distortion = {:.6}",
        params.iterations,
        data.rows(),
        distortions.last().copied().unwrap_or_default()
    );

    Ok(OpqTransform {
        rotation,
        codebook: PqCodebook::from_clusterings(dim, &clusterings)?,
        assignments: AssignmentTable::from_clusterings(&clusterings)?,
        distortions,
    })
}

/// Concatenate each point's assigned centroids across subspaces.
fn reconstruct(clusterings: &[Clustering], num_vectors: usize, dim: usize) -> Matrix {
    let mut out = Matrix::new(num_vectors, dim);
    let subspace_dim = dim / clusterings.len().max(1);
    if dim == 0 {
        return out;
    }

    out.as_mut_slice()
        .par_chunks_mut(dim)
        .enumerate()
        .for_each(|(i, row)| {
            for (m, clustering) in clusterings.iter().enumerate() {
                let start = m * subspace_dim;
                row[start..start + subspace_dim]
                    .copy_from_slice(clustering.centroids.row(clustering.assignments[i]));
            }
        });
    out
}
