//! Binary codec and rotation artifacts.
//!
//! Codec layout (little-endian):
//! - i32 max_elements, i32 dim, i32 num_subspaces, i32 nbits
//! - M·k·sub_dim f32 centroids, subspace-major then cluster then dimension
//!
//! Rotation layout: dim·dim f32, row-major, no header.

use crate::codebook::PqCodebook;
use crate::config::MAX_NBITS;
use crate::error::{PqError, PqResult};
use opqkit_core::Matrix;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Size of the codec header in bytes.
pub const HEADER_SIZE: usize = 16;

const FLOAT_SIZE: usize = std::mem::size_of::<f32>();

/// Fixed header preceding the centroid table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecHeader {
    pub max_elements: i32,
    pub dim: i32,
    pub num_subspaces: i32,
    pub nbits: i32,
}

impl CodecHeader {
    pub fn new(max_elements: usize, dim: usize, num_subspaces: usize, nbits: u32) -> PqResult<Self> {
        Ok(Self {
            max_elements: to_i32("max_elements", max_elements)?,
            dim: to_i32("dim", dim)?,
            num_subspaces: to_i32("num_subspaces", num_subspaces)?,
            nbits: to_i32("nbits", nbits as usize)?,
        })
    }

    /// Header describing `codebook`, which must have a power-of-two size.
    pub fn for_codebook(max_elements: usize, codebook: &PqCodebook) -> PqResult<Self> {
        let nbits = codebook.nbits().ok_or_else(|| {
            PqError::InvalidParams(format!(
                "codebook size {} is not a power of two",
                codebook.codebook_size
            ))
        })?;
        Self::new(max_elements, codebook.dim, codebook.num_subspaces, nbits)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        for (chunk, value) in bytes
            .chunks_exact_mut(4)
            .zip([self.max_elements, self.dim, self.num_subspaces, self.nbits])
        {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(data: &[u8]) -> PqResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(PqError::InvalidArtifact(format!(
                "codec header needs {} bytes, got {}",
                HEADER_SIZE,
                data.len()
            )));
        }
        let field = |i: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&data[i * 4..i * 4 + 4]);
            i32::from_le_bytes(raw)
        };
        Ok(Self {
            max_elements: field(0),
            dim: field(1),
            num_subspaces: field(2),
            nbits: field(3),
        })
    }

    /// Checks the header describes a loadable codebook and returns
    /// (dim, num_subspaces, codebook_size).
    fn shape(&self) -> PqResult<(usize, usize, usize)> {
        if self.max_elements < 0 {
            return Err(PqError::InvalidArtifact(format!(
                "negative max_elements {}",
                self.max_elements
            )));
        }
        if self.dim <= 0 || self.num_subspaces <= 0 || self.dim % self.num_subspaces != 0 {
            return Err(PqError::InvalidArtifact(format!(
                "dim {} is not split into {} subspaces",
                self.dim, self.num_subspaces
            )));
        }
        if self.nbits <= 0 || self.nbits as u32 > MAX_NBITS {
            return Err(PqError::InvalidArtifact(format!("nbits {} out of range", self.nbits)));
        }
        Ok((
            self.dim as usize,
            self.num_subspaces as usize,
            1usize << self.nbits,
        ))
    }

    /// Byte length of the centroid table that follows this header.
    pub fn table_byte_size(&self) -> PqResult<usize> {
        let (dim, _, codebook_size) = self.shape()?;
        Ok(codebook_size * dim * FLOAT_SIZE)
    }

    fn check_codebook(&self, codebook: &PqCodebook) -> PqResult<()> {
        let matches = self.dim as i64 == codebook.dim as i64
            && self.num_subspaces as i64 == codebook.num_subspaces as i64
            && self.nbits > 0
            && self.nbits as u32 <= MAX_NBITS
            && 1usize << self.nbits == codebook.codebook_size;
        if !matches {
            return Err(PqError::InvalidParams(format!(
                "header (d={}, M={}, nbits={}) does not describe codebook (d={}, M={}, k={})",
                self.dim,
                self.num_subspaces,
                self.nbits,
                codebook.dim,
                codebook.num_subspaces,
                codebook.codebook_size
            )));
        }
        Ok(())
    }
}

fn to_i32(name: &str, value: usize) -> PqResult<i32> {
    i32::try_from(value)
        .map_err(|_| PqError::InvalidParams(format!("{} = {} does not fit in i32", name, value)))
}

/// Write header then centroid table to `writer`.
pub fn write_codec_to<W: Write>(
    writer: &mut W,
    header: &CodecHeader,
    codebook: &PqCodebook,
) -> PqResult<()> {
    header.check_codebook(codebook)?;
    writer.write_all(&header.to_bytes())?;
    write_floats(writer, &codebook.centroids)?;
    Ok(())
}

/// Serialize a codec into memory.
pub fn codec_bytes(header: &CodecHeader, codebook: &PqCodebook) -> PqResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + codebook.table_byte_size());
    write_codec_to(&mut bytes, header, codebook)?;
    Ok(bytes)
}

/// Write a codec artifact to `path` atomically.
pub fn write_codec(path: &Path, header: &CodecHeader, codebook: &PqCodebook) -> PqResult<()> {
    atomic_write(path, |writer| write_codec_to(writer, header, codebook))?;
    tracing::info!(
        "Wrote codec {} (M={}, nbits={}, {} bytes)",
        path.display(),
        header.num_subspaces,
        header.nbits,
        HEADER_SIZE + codebook.table_byte_size()
    );
    Ok(())
}

/// Parse a codec artifact.
pub fn codec_from_bytes(data: &[u8]) -> PqResult<(CodecHeader, PqCodebook)> {
    let header = CodecHeader::from_bytes(data)?;
    let (dim, num_subspaces, codebook_size) = header.shape()?;
    let table_size = header.table_byte_size()?;

    if data.len() != HEADER_SIZE + table_size {
        return Err(PqError::InvalidArtifact(format!(
            "codec holds {} bytes, header implies {}",
            data.len(),
            HEADER_SIZE + table_size
        )));
    }

    let mut codebook = PqCodebook::new(dim, num_subspaces, codebook_size)?;
    codebook.centroids = read_floats(&data[HEADER_SIZE..]);
    Ok((header, codebook))
}

/// Read a codec artifact from disk.
pub fn read_codec(path: &Path) -> PqResult<(CodecHeader, PqCodebook)> {
    codec_from_bytes(&fs::read(path)?)
}

/// Write a square rotation matrix, row-major.
pub fn write_rotation_to<W: Write>(writer: &mut W, rotation: &Matrix) -> PqResult<()> {
    if rotation.rows() != rotation.cols() {
        return Err(PqError::InvalidParams(format!(
            "rotation must be square, got {}x{}",
            rotation.rows(),
            rotation.cols()
        )));
    }
    write_floats(writer, rotation.as_slice())?;
    Ok(())
}

/// Write a rotation artifact to `path` atomically.
pub fn write_rotation(path: &Path, rotation: &Matrix) -> PqResult<()> {
    atomic_write(path, |writer| write_rotation_to(writer, rotation))?;
    tracing::info!(
        "Wrote {}x{} rotation to {}",
        rotation.rows(),
        rotation.cols(),
        path.display()
    );
    Ok(())
}

/// Parse a rotation of known dimension.
pub fn rotation_from_bytes(data: &[u8], dim: usize) -> PqResult<Matrix> {
    let expected_bytes = dim * dim * FLOAT_SIZE;
    if data.len() != expected_bytes {
        return Err(PqError::RotationSizeMismatch {
            dim,
            expected_bytes,
            got_bytes: data.len(),
        });
    }
    Ok(Matrix::from_vec(dim, dim, read_floats(data))?)
}

/// Read a rotation artifact; its length must be exactly dim·dim·4 bytes.
pub fn read_rotation(path: &Path, dim: usize) -> PqResult<Matrix> {
    rotation_from_bytes(&fs::read(path)?, dim)
}

fn write_floats<W: Write>(writer: &mut W, values: &[f32]) -> std::io::Result<()> {
    for value in values {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

fn read_floats(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(FLOAT_SIZE)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write via `<path>.tmp`, fsync, then rename over `path`. The temporary
/// file is removed if anything fails.
fn atomic_write<F>(path: &Path, write: F) -> PqResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> PqResult<()>,
{
    let tmp_path = temp_path(path);
    let result = write_and_sync(&tmp_path, write)
        .and_then(|()| fs::rename(&tmp_path, path).map_err(PqError::from));
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_and_sync<F>(tmp_path: &Path, write: F) -> PqResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> PqResult<()>,
{
    let file = File::create(tmp_path)?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}
