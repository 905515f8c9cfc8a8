//! PQ vector encoding and decoding.

use crate::cluster::{nearest_centroid, Clustering};
use crate::codebook::PqCodebook;
use crate::error::{PqError, PqResult};
use opqkit_core::Matrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-vector PQ codes, stored row-major as n x M `u16`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentTable {
    num_vectors: usize,
    num_subspaces: usize,
    codes: Vec<u16>,
}

impl AssignmentTable {
    /// Build a table from a flat row-major code buffer.
    pub fn from_codes(num_vectors: usize, num_subspaces: usize, codes: Vec<u16>) -> PqResult<Self> {
        if codes.len() != num_vectors * num_subspaces {
            return Err(PqError::DimensionMismatch {
                expected: num_vectors * num_subspaces,
                got: codes.len(),
            });
        }
        Ok(Self {
            num_vectors,
            num_subspaces,
            codes,
        })
    }

    /// Collect the assignments of one clustering per subspace.
    pub fn from_clusterings(clusterings: &[Clustering]) -> PqResult<Self> {
        let num_subspaces = clusterings.len();
        let num_vectors = clusterings.first().map_or(0, |c| c.assignments.len());
        let mut codes = vec![0u16; num_vectors * num_subspaces];

        for (m, clustering) in clusterings.iter().enumerate() {
            if clustering.assignments.len() != num_vectors {
                return Err(PqError::DimensionMismatch {
                    expected: num_vectors,
                    got: clustering.assignments.len(),
                });
            }
            for (i, &cluster) in clustering.assignments.iter().enumerate() {
                codes[i * num_subspaces + m] =
                    u16::try_from(cluster).map_err(|_| PqError::InvalidCode {
                        subspace: m,
                        code: cluster,
                    })?;
            }
        }

        Ok(Self {
            num_vectors,
            num_subspaces,
            codes,
        })
    }

    pub fn num_vectors(&self) -> usize {
        self.num_vectors
    }

    pub fn num_subspaces(&self) -> usize {
        self.num_subspaces
    }

    pub fn is_empty(&self) -> bool {
        self.num_vectors == 0
    }

    /// Code of vector `i` in subspace `m`.
    #[inline]
    pub fn get(&self, i: usize, m: usize) -> u16 {
        self.codes[i * self.num_subspaces + m]
    }

    /// All M codes of vector `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[u16] {
        let start = i * self.num_subspaces;
        &self.codes[start..start + self.num_subspaces]
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.codes
    }
}

/// Encode a single vector into PQ codes.
///
/// Returns a vector of M codes (u16), one per subvector.
#[inline]
pub fn encode_vector(codebook: &PqCodebook, vector: &[f32]) -> PqResult<Vec<u16>> {
    if vector.len() != codebook.dim {
        return Err(PqError::DimensionMismatch {
            expected: codebook.dim,
            got: vector.len(),
        });
    }

    let mut codes = vec![0u16; codebook.num_subspaces];
    encode_into(codebook, vector, &mut codes);
    Ok(codes)
}

/// Encode every row of `data` in parallel.
pub fn encode_vectors(codebook: &PqCodebook, data: &Matrix) -> PqResult<AssignmentTable> {
    if data.cols() != codebook.dim {
        return Err(PqError::DimensionMismatch {
            expected: codebook.dim,
            got: data.cols(),
        });
    }

    let m = codebook.num_subspaces;
    let mut codes = vec![0u16; data.rows() * m];
    codes
        .par_chunks_mut(m)
        .zip(data.par_iter_rows())
        .for_each(|(out, vector)| encode_into(codebook, vector, out));

    AssignmentTable::from_codes(data.rows(), m, codes)
}

/// Decode PQ codes back to an approximate vector.
///
/// Reconstructs the vector by concatenating the corresponding centroids.
pub fn decode_vector(codebook: &PqCodebook, codes: &[u16]) -> PqResult<Vec<f32>> {
    check_codes(codebook, codes)?;

    let mut vector = Vec::with_capacity(codebook.dim);
    for (m, &code) in codes.iter().enumerate() {
        vector.extend_from_slice(codebook.get_centroid(m, code as usize));
    }
    Ok(vector)
}

/// Decode a whole assignment table into an n x d matrix.
pub fn decode_vectors(codebook: &PqCodebook, table: &AssignmentTable) -> PqResult<Matrix> {
    if table.num_subspaces() != codebook.num_subspaces {
        return Err(PqError::DimensionMismatch {
            expected: codebook.num_subspaces,
            got: table.num_subspaces(),
        });
    }
    for i in 0..table.num_vectors() {
        check_codes(codebook, table.row(i))?;
    }

    let mut out = Matrix::new(table.num_vectors(), codebook.dim);
    if codebook.dim == 0 {
        return Ok(out);
    }
    out.as_mut_slice()
        .par_chunks_mut(codebook.dim)
        .enumerate()
        .for_each(|(i, row)| {
            for (m, &code) in table.row(i).iter().enumerate() {
                let start = codebook.subspace_start(m);
                row[start..start + codebook.subspace_dim]
                    .copy_from_slice(codebook.get_centroid(m, code as usize));
            }
        });
    Ok(out)
}

/// Mean squared reconstruction error over the rows of `data`.
pub fn reconstruction_mse(
    codebook: &PqCodebook,
    data: &Matrix,
    table: &AssignmentTable,
) -> PqResult<f64> {
    if table.num_vectors() != data.rows() {
        return Err(PqError::DimensionMismatch {
            expected: data.rows(),
            got: table.num_vectors(),
        });
    }
    if data.rows() == 0 {
        return Ok(0.0);
    }

    let decoded = decode_vectors(codebook, table)?;
    let total = data.squared_distance(&decoded)?;
    Ok(total / data.rows() as f64)
}

/// Pack an assignment table into the byte layout read by the index.
///
/// 8-bit codes take one byte each. 4-bit codes go two per byte, the even
/// subspace in the low nibble; with an odd M the last high nibble is zero.
pub fn pack_codes(table: &AssignmentTable, nbits: u32) -> PqResult<Vec<u8>> {
    let limit = match nbits {
        4 | 8 => 1u16 << nbits,
        _ => {
            return Err(PqError::InvalidParams(format!(
                "code packing supports nbits 4 or 8, got {}",
                nbits
            )))
        }
    };

    for (idx, &code) in table.as_slice().iter().enumerate() {
        if code >= limit {
            return Err(PqError::InvalidCode {
                subspace: idx % table.num_subspaces().max(1),
                code: code as usize,
            });
        }
    }

    if nbits == 8 {
        return Ok(table.as_slice().iter().map(|&c| c as u8).collect());
    }

    let bytes_per_vector = packed_row_len(table.num_subspaces(), nbits);
    let mut packed = Vec::with_capacity(table.num_vectors() * bytes_per_vector);
    for i in 0..table.num_vectors() {
        for pair in table.row(i).chunks(2) {
            let low = pair[0] as u8;
            let high = pair.get(1).map_or(0, |&c| c as u8);
            packed.push(low | (high << 4));
        }
    }
    Ok(packed)
}

/// Inverse of [`pack_codes`].
pub fn unpack_codes(
    bytes: &[u8],
    num_vectors: usize,
    num_subspaces: usize,
    nbits: u32,
) -> PqResult<AssignmentTable> {
    if nbits != 4 && nbits != 8 {
        return Err(PqError::InvalidParams(format!(
            "code packing supports nbits 4 or 8, got {}",
            nbits
        )));
    }

    let row_len = packed_row_len(num_subspaces, nbits);
    if bytes.len() != num_vectors * row_len {
        return Err(PqError::DimensionMismatch {
            expected: num_vectors * row_len,
            got: bytes.len(),
        });
    }

    let codes = if nbits == 8 {
        bytes.iter().map(|&b| b as u16).collect()
    } else {
        let mut codes = Vec::with_capacity(num_vectors * num_subspaces);
        for row in bytes.chunks(row_len.max(1)).take(num_vectors) {
            for m in 0..num_subspaces {
                let byte = row[m / 2];
                let code = if m % 2 == 0 { byte & 0x0f } else { byte >> 4 };
                codes.push(code as u16);
            }
        }
        codes
    };

    AssignmentTable::from_codes(num_vectors, num_subspaces, codes)
}

fn packed_row_len(num_subspaces: usize, nbits: u32) -> usize {
    (num_subspaces * nbits as usize).div_ceil(8)
}

#[inline]
fn encode_into(codebook: &PqCodebook, vector: &[f32], codes: &mut [u16]) {
    for (m, code) in codes.iter_mut().enumerate() {
        let subvec = codebook.extract_subvector(vector, m);
        let (best, _) = nearest_centroid(
            subvec,
            codebook.subspace_centroids(m),
            codebook.subspace_dim,
        );
        *code = best as u16;
    }
}

fn check_codes(codebook: &PqCodebook, codes: &[u16]) -> PqResult<()> {
    if codes.len() != codebook.num_subspaces {
        return Err(PqError::InvalidParams(format!(
            "Expected {} codes, got {}",
            codebook.num_subspaces,
            codes.len()
        )));
    }
    for (m, &code) in codes.iter().enumerate() {
        if code as usize >= codebook.codebook_size {
            return Err(PqError::InvalidCode {
                subspace: m,
                code: code as usize,
            });
        }
    }
    Ok(())
}
