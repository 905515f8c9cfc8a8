//! Core numeric building blocks for opqkit.
//!
//! Provides the dense row-major [`Matrix`] used for datasets, rotations and
//! reconstructions, plus the distance kernels shared by the PQ trainer.

pub mod distance;
pub mod error;
pub mod matrix;

pub use distance::{dot_product, l2_distance_squared};
pub use error::{MatrixError, MatrixResult};
pub use matrix::Matrix;
