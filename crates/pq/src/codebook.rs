//! PQ codebook training.

use crate::cluster::{ClusterAssigner, Clustering};
use crate::config::{KMeansParams, PqParams};
use crate::encoding::AssignmentTable;
use crate::error::{PqError, PqResult};
use opqkit_core::Matrix;
use rand::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A trained Product Quantization codebook.
///
/// The codebook contains M sets of K centroids, where:
/// - M = number of subspaces
/// - K = codebook_size (centroids per subspace)
/// - D/M = subspace dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PqCodebook {
    /// Number of subspaces (M).
    pub num_subspaces: usize,

    /// Number of centroids per subspace (K).
    pub codebook_size: usize,

    /// Original vector dimension.
    pub dim: usize,

    /// Dimension of each subspace (dim / num_subspaces).
    pub subspace_dim: usize,

    /// Centroids stored as [M][K][subspace_dim].
    /// Flattened layout: centroids[m * K * subspace_dim + k * subspace_dim + d]
    pub centroids: Vec<f32>,
}

impl PqCodebook {
    /// Create a zero-filled codebook.
    pub fn new(dim: usize, num_subspaces: usize, codebook_size: usize) -> PqResult<Self> {
        if num_subspaces == 0 || dim == 0 {
            return Err(PqError::InvalidParams(
                "dimension and num_subspaces must be > 0".into(),
            ));
        }
        if dim % num_subspaces != 0 {
            return Err(PqError::SubspaceMismatch {
                subspaces: num_subspaces,
                dim,
            });
        }

        let subspace_dim = dim / num_subspaces;
        Ok(Self {
            num_subspaces,
            codebook_size,
            dim,
            subspace_dim,
            centroids: vec![0.0; num_subspaces * codebook_size * subspace_dim],
        })
    }

    /// Assemble a codebook from one clustering per subspace, in subspace order.
    pub fn from_clusterings(dim: usize, clusterings: &[Clustering]) -> PqResult<Self> {
        let codebook_size = clusterings
            .first()
            .map(|c| c.num_clusters())
            .ok_or_else(|| PqError::InvalidParams("no subspace clusterings".into()))?;
        let mut codebook = Self::new(dim, clusterings.len(), codebook_size)?;

        for (m, clustering) in clusterings.iter().enumerate() {
            let centroids = &clustering.centroids;
            if centroids.rows() != codebook_size || centroids.cols() != codebook.subspace_dim {
                return Err(PqError::DimensionMismatch {
                    expected: codebook_size * codebook.subspace_dim,
                    got: centroids.rows() * centroids.cols(),
                });
            }
            let offset = m * codebook_size * codebook.subspace_dim;
            codebook.centroids[offset..offset + centroids.as_slice().len()]
                .copy_from_slice(centroids.as_slice());
        }

        Ok(codebook)
    }

    /// Get centroid for subspace m, code k.
    #[inline]
    pub fn get_centroid(&self, m: usize, k: usize) -> &[f32] {
        let offset = (m * self.codebook_size + k) * self.subspace_dim;
        &self.centroids[offset..offset + self.subspace_dim]
    }

    /// Get mutable centroid for subspace m, code k.
    #[inline]
    pub fn get_centroid_mut(&mut self, m: usize, k: usize) -> &mut [f32] {
        let offset = (m * self.codebook_size + k) * self.subspace_dim;
        &mut self.centroids[offset..offset + self.subspace_dim]
    }

    /// Get all centroids for subspace m as a contiguous slice.
    #[inline]
    pub fn subspace_centroids(&self, m: usize) -> &[f32] {
        let offset = m * self.codebook_size * self.subspace_dim;
        let size = self.codebook_size * self.subspace_dim;
        &self.centroids[offset..offset + size]
    }

    /// Get the starting index in the original vector for subspace m.
    #[inline]
    pub fn subspace_start(&self, m: usize) -> usize {
        m * self.subspace_dim
    }

    /// Extract subspace m from a vector.
    #[inline]
    pub fn extract_subvector<'a>(&self, vector: &'a [f32], m: usize) -> &'a [f32] {
        let start = self.subspace_start(m);
        &vector[start..start + self.subspace_dim]
    }

    /// Code width when the codebook size is a power of two.
    pub fn nbits(&self) -> Option<u32> {
        if self.codebook_size.is_power_of_two() {
            Some(self.codebook_size.trailing_zeros())
        } else {
            None
        }
    }

    /// Size in bytes of the serialized centroid table.
    pub fn table_byte_size(&self) -> usize {
        self.centroids.len() * std::mem::size_of::<f32>()
    }
}

/// Train a PQ codebook on `data` (n x d).
///
/// Fails before any clustering if d is not divisible by M or if there are
/// fewer than 2^nbits training vectors.
pub fn train_pq<R: Rng + ?Sized>(
    data: &Matrix,
    params: &PqParams,
    rng: &mut R,
) -> PqResult<PqCodebook> {
    train_pq_with_codes(data, params, rng).map(|(codebook, _)| codebook)
}

/// Train a PQ codebook and also return the assignments of the training data.
pub fn train_pq_with_codes<R: Rng + ?Sized>(
    data: &Matrix,
    params: &PqParams,
    rng: &mut R,
) -> PqResult<(PqCodebook, AssignmentTable)> {
    params.validate(data.cols())?;

    let clusterings = train_subspaces(
        data,
        params.num_subspaces,
        params.codebook_size(),
        &params.kmeans,
        rng,
    )?;

    let codebook = PqCodebook::from_clusterings(data.cols(), &clusterings)?;
    let table = AssignmentTable::from_clusterings(&clusterings)?;

    tracing::debug!(
        "Trained PQ codebook: M={}, nbits={}, {} training vectors",
        params.num_subspaces,
        params.nbits,
        data.rows()
    );

    Ok((codebook, table))
}

/// Cold-start clustering of every subspace block of `data`.
///
/// One seed per subspace is drawn from `rng` up front, in subspace order, so
/// the blocks can be clustered in parallel with reproducible results.
pub(crate) fn train_subspaces<R: Rng + ?Sized>(
    data: &Matrix,
    num_subspaces: usize,
    codebook_size: usize,
    kmeans: &KMeansParams,
    rng: &mut R,
) -> PqResult<Vec<Clustering>> {
    if data.rows() < codebook_size {
        return Err(PqError::DegenerateInput {
            points: data.rows(),
            clusters: codebook_size,
        });
    }

    let subspace_dim = data.cols() / num_subspaces;
    let seeds: Vec<u64> = (0..num_subspaces).map(|_| rng.gen()).collect();
    let assigner = ClusterAssigner::new(kmeans.clone());

    seeds
        .par_iter()
        .enumerate()
        .map(|(m, &seed)| {
            let block = data.column_block(m * subspace_dim, subspace_dim)?;
            let mut subspace_rng = StdRng::seed_from_u64(seed);
            assigner.cluster(&block, codebook_size, &mut subspace_rng)
        })
        .collect()
}
