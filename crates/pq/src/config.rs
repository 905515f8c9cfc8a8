//! PQ and OPQ training parameters.

use crate::error::{PqError, PqResult};
use serde::{Deserialize, Serialize};

/// Largest supported code width; codes are stored as `u16`.
pub const MAX_NBITS: u32 = 16;

/// Parameters for the cold-start k-means run of each subspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansParams {
    /// Independent k-means++ restarts; the lowest-inertia run is kept.
    pub restarts: usize,

    /// Lloyd iteration cap per restart.
    pub max_iterations: usize,

    /// Relative centroid-shift tolerance, scaled by the mean per-column
    /// variance of the points.
    pub tolerance: f64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            restarts: 3,
            max_iterations: 300,
            tolerance: 1e-4,
        }
    }
}

impl KMeansParams {
    pub fn with_restarts(mut self, restarts: usize) -> Self {
        self.restarts = restarts;
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn validate(&self) -> PqResult<()> {
        if self.restarts == 0 {
            return Err(PqError::InvalidParams("k-means restarts must be > 0".into()));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(PqError::InvalidParams(format!(
                "k-means tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Parameters for Product Quantization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqParams {
    /// Number of subspaces (M). The dimension must be divisible by M.
    pub num_subspaces: usize,

    /// Bits per code; each subspace gets `2^nbits` centroids.
    pub nbits: u32,

    /// Clustering parameters for every subspace.
    #[serde(default)]
    pub kmeans: KMeansParams,
}

impl PqParams {
    /// Create new PQ parameters with default clustering settings.
    pub fn new(num_subspaces: usize, nbits: u32) -> Self {
        Self {
            num_subspaces,
            nbits,
            kmeans: KMeansParams::default(),
        }
    }

    pub fn with_kmeans(mut self, kmeans: KMeansParams) -> Self {
        self.kmeans = kmeans;
        self
    }

    /// Centroids per subspace (k = 2^nbits).
    pub fn codebook_size(&self) -> usize {
        1usize << self.nbits
    }

    /// Get the subspace dimension.
    pub fn subspace_dim(&self, dim: usize) -> usize {
        dim / self.num_subspaces
    }

    /// Validate parameters against a dimension.
    pub fn validate(&self, dim: usize) -> PqResult<()> {
        validate_subspaces(dim, self.num_subspaces)?;
        if self.nbits == 0 || self.nbits > MAX_NBITS {
            return Err(PqError::InvalidParams(format!(
                "nbits must be in 1..={}, got {}",
                MAX_NBITS, self.nbits
            )));
        }
        self.kmeans.validate()
    }
}

impl Default for PqParams {
    fn default() -> Self {
        Self::new(8, 8)
    }
}

/// Parameters for Optimized Product Quantization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpqParams {
    /// Number of subspaces (M).
    pub num_subspaces: usize,

    /// Centroids per subspace (k). Need not be a power of two.
    pub num_clusters: usize,

    /// Outer iterations; each one ends with a rotation update.
    pub iterations: usize,

    /// Clustering parameters for the cold start of iteration 0.
    #[serde(default)]
    pub kmeans: KMeansParams,
}

impl OpqParams {
    pub fn new(num_subspaces: usize, num_clusters: usize) -> Self {
        Self {
            num_subspaces,
            num_clusters,
            iterations: 10,
            kmeans: KMeansParams::default(),
        }
    }

    /// Set number of outer OPQ iterations.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_kmeans(mut self, kmeans: KMeansParams) -> Self {
        self.kmeans = kmeans;
        self
    }

    pub fn validate(&self, dim: usize) -> PqResult<()> {
        validate_subspaces(dim, self.num_subspaces)?;
        if self.num_clusters == 0 || self.num_clusters > 1 << MAX_NBITS {
            return Err(PqError::InvalidParams(format!(
                "num_clusters must be in 1..={}, got {}",
                1usize << MAX_NBITS,
                self.num_clusters
            )));
        }
        self.kmeans.validate()
    }
}

fn validate_subspaces(dim: usize, num_subspaces: usize) -> PqResult<()> {
    if dim == 0 {
        return Err(PqError::InvalidParams("dimension must be > 0".into()));
    }
    if num_subspaces == 0 {
        return Err(PqError::InvalidParams("num_subspaces must be > 0".into()));
    }
    if dim % num_subspaces != 0 {
        return Err(PqError::SubspaceMismatch {
            subspaces: num_subspaces,
            dim,
        });
    }
    Ok(())
}
