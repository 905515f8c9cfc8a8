//! Dataset readers for opqkit.
//!
//! Loads `.tsv` and `.fvecs` vector files into a row-major [`Matrix`],
//! optionally capped at `max_elements` rows, and draws training samples.
//!
//! [`Matrix`]: opqkit_core::Matrix

pub mod error;
pub mod reader;
pub mod sample;

pub use error::{DatasetError, DatasetResult};
pub use reader::{parse_fvecs, read_dataset, read_tsv, DatasetFormat};
pub use sample::sample_rows;
