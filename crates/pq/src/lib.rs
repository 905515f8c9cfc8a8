//! Product Quantization (PQ) and Optimized Product Quantization (OPQ) codec
//! training for opqkit.
//!
//! This crate implements:
//! - k-means clustering with k-means++ restarts and single-pass warm refinement
//! - Orthogonal Procrustes via a one-sided Jacobi SVD
//! - PQ: splits vectors into M subvectors, quantizes each to 2^nbits centroids
//! - OPQ: learns a rotation R applied as X·R before PQ
//! - The binary codec and rotation artifacts read by the downstream index
//!
//! # Example
//! ```ignore
//! use opqkit_pq::{train_pq, write_codec, CodecHeader, PqParams};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let codebook = train_pq(&data, &PqParams::new(8, 4), &mut rng)?;
//! let header = CodecHeader::for_codebook(100_000, &codebook)?;
//! write_codec(&path, &header, &codebook)?;
//! ```

pub mod cluster;
pub mod codebook;
pub mod config;
pub mod encoding;
pub mod error;
pub mod opq;
pub mod procrustes;
pub mod serialize;

pub use cluster::{ClusterAssigner, Clustering, RefineStats};
pub use codebook::{train_pq, train_pq_with_codes, PqCodebook};
pub use config::{KMeansParams, OpqParams, PqParams, MAX_NBITS};
pub use encoding::{
    decode_vector, decode_vectors, encode_vector, encode_vectors, pack_codes,
    reconstruction_mse, unpack_codes, AssignmentTable,
};
pub use error::{ErrorKind, PqError, PqResult};
pub use opq::{apply_rotation, train_opq, OpqTransform};
pub use serialize::{
    codec_bytes, codec_from_bytes, read_codec, read_rotation, rotation_from_bytes, write_codec,
    write_codec_to, write_rotation, write_rotation_to, CodecHeader, HEADER_SIZE,
};
