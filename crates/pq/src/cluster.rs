//! k-means clustering of subspace points.
//!
//! A cold start ([`ClusterAssigner::cluster`]) runs several k-means++ seeded
//! Lloyd runs to convergence and keeps the best. A warm start
//! ([`ClusterAssigner::refine`]) performs exactly one mean-then-reassign pass
//! over existing centroids; the OPQ outer loop relies on that single pass.

use crate::config::KMeansParams;
use crate::error::{PqError, PqResult};
use opqkit_core::distance::l2_distance_squared_f64;
use opqkit_core::{l2_distance_squared, Matrix};
use rand::prelude::*;
use rayon::prelude::*;

/// Centroids and point assignments for one set of points.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// `k x w` centroid matrix.
    pub centroids: Matrix,

    /// Centroid index for every point, in point order.
    pub assignments: Vec<usize>,

    /// Sum of squared distances from each point to its centroid.
    pub inertia: f64,
}

impl Clustering {
    pub fn num_clusters(&self) -> usize {
        self.centroids.rows()
    }

    /// Number of points assigned to each centroid.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.num_clusters()];
        for &a in &self.assignments {
            counts[a] += 1;
        }
        counts
    }
}

/// Outcome of a warm-start pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefineStats {
    /// Points whose assignment changed.
    pub reassigned: usize,

    /// Clusters that had no points and kept their previous centroid.
    pub empty_clusters: usize,
}

/// Per-subspace k-means primitive.
#[derive(Debug, Clone, Default)]
pub struct ClusterAssigner {
    params: KMeansParams,
}

impl ClusterAssigner {
    pub fn new(params: KMeansParams) -> Self {
        Self { params }
    }

    /// Cold start: cluster `points` into `k` groups.
    ///
    /// Runs `restarts` k-means++ initialised Lloyd runs and keeps the one with
    /// the lowest inertia. All randomness comes from `rng`.
    pub fn cluster<R: Rng + ?Sized>(
        &self,
        points: &Matrix,
        k: usize,
        rng: &mut R,
    ) -> PqResult<Clustering> {
        if k == 0 {
            return Err(PqError::InvalidParams("cluster count must be > 0".into()));
        }
        if points.rows() < k {
            return Err(PqError::DegenerateInput {
                points: points.rows(),
                clusters: k,
            });
        }
        self.params.validate()?;

        let tolerance = self.params.tolerance * mean_column_variance(points);
        let mut best: Option<Clustering> = None;

        for restart in 0..self.params.restarts {
            let init = kmeans_plusplus_init(points, k, rng);
            let (run, iterations) = lloyd(points, init, self.params.max_iterations, tolerance);

            tracing::debug!(
                "k-means restart {}: {} iterations, inertia = {:.6}",
                restart,
                iterations,
                run.inertia
            );

            if best.as_ref().map_or(true, |b| run.inertia < b.inertia) {
                best = Some(run);
            }
        }

        best.ok_or_else(|| PqError::InvalidParams("k-means restarts must be > 0".into()))
    }

    /// Warm start: one pass of centroid update followed by reassignment.
    ///
    /// Each centroid becomes the mean of its assigned points; a centroid with
    /// no points is left unchanged. Every point is then moved to its nearest
    /// centroid. This is deliberately not iterated to convergence.
    pub fn refine(&self, points: &Matrix, clustering: &mut Clustering) -> PqResult<RefineStats> {
        if points.cols() != clustering.centroids.cols() {
            return Err(PqError::DimensionMismatch {
                expected: clustering.centroids.cols(),
                got: points.cols(),
            });
        }
        if points.rows() != clustering.assignments.len() {
            return Err(PqError::DimensionMismatch {
                expected: clustering.assignments.len(),
                got: points.rows(),
            });
        }

        let k = clustering.centroids.rows();
        if let Some((row, &c)) = clustering.assignments.iter().enumerate().find(|(_, &c)| c >= k) {
            return Err(PqError::InvalidParams(format!(
                "row {} is assigned to cluster {}, but only {} centroids exist",
                row, c, k
            )));
        }

        let counts = update_centroids(points, &clustering.assignments, &mut clustering.centroids);
        let empty_clusters = counts.iter().filter(|&&c| c == 0).count();

        let (assignments, inertia) = assign(points, &clustering.centroids);
        let reassigned = assignments
            .iter()
            .zip(clustering.assignments.iter())
            .filter(|(a, b)| a != b)
            .count();

        clustering.assignments = assignments;
        clustering.inertia = inertia;

        Ok(RefineStats {
            reassigned,
            empty_clusters,
        })
    }
}

/// Find the nearest of the `width`-wide centroids packed in `centroids`.
///
/// Returns the index and squared distance. Ties go to the lowest index.
#[inline]
pub(crate) fn nearest_centroid(point: &[f32], centroids: &[f32], width: usize) -> (usize, f32) {
    let mut best_idx = 0;
    let mut best_dist = f32::INFINITY;

    for (idx, centroid) in centroids.chunks_exact(width).enumerate() {
        let dist = l2_distance_squared(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best_idx = idx;
        }
    }

    (best_idx, best_dist)
}

/// Assign every point to its nearest centroid (parallel over points).
fn assign(points: &Matrix, centroids: &Matrix) -> (Vec<usize>, f64) {
    let width = centroids.cols();
    let nearest: Vec<(usize, f32)> = points
        .par_iter_rows()
        .map(|p| nearest_centroid(p, centroids.as_slice(), width))
        .collect();

    // Summed in point order so the inertia is reproducible.
    let inertia = nearest.iter().map(|&(_, d)| d as f64).sum();
    let assignments = nearest.into_iter().map(|(a, _)| a).collect();
    (assignments, inertia)
}

/// Recompute each centroid as the mean of its points. Empty clusters keep
/// their centroid. Returns the per-cluster point counts.
fn update_centroids(points: &Matrix, assignments: &[usize], centroids: &mut Matrix) -> Vec<usize> {
    let k = centroids.rows();
    let dim = centroids.cols();
    let mut sums = vec![0.0f64; k * dim];
    let mut counts = vec![0usize; k];

    for (point, &c) in points.iter_rows().zip(assignments.iter()) {
        counts[c] += 1;
        let offset = c * dim;
        for (j, &v) in point.iter().enumerate() {
            sums[offset + j] += v as f64;
        }
    }

    for c in 0..k {
        if counts[c] > 0 {
            let offset = c * dim;
            let centroid = centroids.row_mut(c);
            for j in 0..dim {
                centroid[j] = (sums[offset + j] / counts[c] as f64) as f32;
            }
        }
    }

    counts
}

/// Move each empty centroid onto one of the points farthest from their own
/// centroid, so no cluster stays empty during a cold start.
fn relocate_empty_clusters(
    points: &Matrix,
    assignments: &[usize],
    counts: &[usize],
    centroids: &mut Matrix,
) {
    let mut by_distance: Vec<(usize, f32)> = points
        .iter_rows()
        .zip(assignments.iter())
        .enumerate()
        .map(|(i, (p, &c))| (i, l2_distance_squared(p, centroids.row(c))))
        .collect();
    // Stable sort: equal distances keep the lower point index first.
    by_distance.sort_by(|a, b| b.1.total_cmp(&a.1));

    let empty = counts.iter().enumerate().filter(|&(_, &n)| n == 0).map(|(c, _)| c);
    for (c, &(point_idx, _)) in empty.zip(by_distance.iter()) {
        centroids.row_mut(c).copy_from_slice(points.row(point_idx));
    }
}

/// Lloyd iterations from the given centroids until the total squared centroid
/// shift drops to `tolerance` or `max_iterations` is reached.
fn lloyd(
    points: &Matrix,
    mut centroids: Matrix,
    max_iterations: usize,
    tolerance: f64,
) -> (Clustering, usize) {
    let (mut assignments, mut inertia) = assign(points, &centroids);
    let mut iterations = 0;

    for _ in 0..max_iterations {
        iterations += 1;
        let previous = centroids.clone();

        let counts = update_centroids(points, &assignments, &mut centroids);
        if counts.contains(&0) {
            relocate_empty_clusters(points, &assignments, &counts, &mut centroids);
        }

        let shift = l2_distance_squared_f64(previous.as_slice(), centroids.as_slice());
        let (new_assignments, new_inertia) = assign(points, &centroids);
        assignments = new_assignments;
        inertia = new_inertia;

        if shift <= tolerance {
            break;
        }
    }

    (
        Clustering {
            centroids,
            assignments,
            inertia,
        },
        iterations,
    )
}

/// k-means++ initialization: the first centroid is uniform, later ones are
/// drawn proportionally to the squared distance to the nearest chosen one.
fn kmeans_plusplus_init<R: Rng + ?Sized>(points: &Matrix, k: usize, rng: &mut R) -> Matrix {
    let n = points.rows();
    let mut centroids = Matrix::new(k, points.cols());

    let first_idx = rng.gen_range(0..n);
    centroids.row_mut(0).copy_from_slice(points.row(first_idx));

    let mut min_distances: Vec<f32> = points
        .iter_rows()
        .map(|p| l2_distance_squared(p, centroids.row(0)))
        .collect();

    for ki in 1..k {
        let total_dist: f64 = min_distances.iter().map(|&d| d as f64).sum();

        let chosen_idx = if total_dist == 0.0 {
            // Every remaining point duplicates a chosen centroid.
            rng.gen_range(0..n)
        } else {
            let threshold = rng.gen::<f64>() * total_dist;
            let mut cumsum = 0.0;
            let mut chosen = None;
            for (i, &dist) in min_distances.iter().enumerate() {
                cumsum += dist as f64;
                if dist > 0.0 && cumsum >= threshold {
                    chosen = Some(i);
                    break;
                }
            }
            // Rounding can leave the threshold just past the final sum.
            chosen.unwrap_or_else(|| {
                min_distances
                    .iter()
                    .rposition(|&d| d > 0.0)
                    .unwrap_or(n - 1)
            })
        };

        centroids.row_mut(ki).copy_from_slice(points.row(chosen_idx));

        for (i, p) in points.iter_rows().enumerate() {
            let dist = l2_distance_squared(p, centroids.row(ki));
            if dist < min_distances[i] {
                min_distances[i] = dist;
            }
        }
    }

    centroids
}

/// Mean over columns of the per-column variance.
fn mean_column_variance(points: &Matrix) -> f64 {
    let n = points.rows();
    let dim = points.cols();
    if n == 0 || dim == 0 {
        return 0.0;
    }

    let mut mean = vec![0.0f64; dim];
    for row in points.iter_rows() {
        for (m, &v) in mean.iter_mut().zip(row) {
            *m += v as f64;
        }
    }
    for m in mean.iter_mut() {
        *m /= n as f64;
    }

    let mut variance = 0.0f64;
    for row in points.iter_rows() {
        for (m, &v) in mean.iter().zip(row) {
            let d = v as f64 - m;
            variance += d * d;
        }
    }

    variance / (n * dim) as f64
}
