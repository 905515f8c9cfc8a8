//! TSV and fvecs readers.
//!
//! ```text
//! TSV:   one vector per line, components separated by '\t'
//! fvecs: repeated [i32 dim (LE)][dim x f32 (LE)] records
//! ```

use crate::error::{DatasetError, DatasetResult};
use memmap2::Mmap;
use opqkit_core::Matrix;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Rows between progress log lines.
const PROGRESS_INTERVAL: usize = 10_000;

/// On-disk dataset encoding, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Tsv,
    Fvecs,
}

impl DatasetFormat {
    pub fn from_path(path: &Path) -> DatasetResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("tsv") => Ok(DatasetFormat::Tsv),
            Some("fvecs") => Ok(DatasetFormat::Fvecs),
            _ => Err(DatasetError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Read at most `max_elements` vectors from `path` (all when `None`).
pub fn read_dataset(path: &Path, max_elements: Option<usize>) -> DatasetResult<Matrix> {
    let format = DatasetFormat::from_path(path)?;
    let file = File::open(path)?;

    let data = match format {
        DatasetFormat::Tsv => read_tsv(BufReader::new(file), max_elements)?,
        DatasetFormat::Fvecs => {
            if file.metadata()?.len() == 0 {
                Matrix::new(0, 0)
            } else {
                let mmap = unsafe { Mmap::map(&file)? };
                parse_fvecs(&mmap, max_elements)?
            }
        }
    };

    if data.rows() == 0 {
        return Err(DatasetError::EmptyDataset(path.to_path_buf()));
    }

    tracing::info!(
        "Read {} vectors of dimension {} from {}",
        data.rows(),
        data.cols(),
        path.display()
    );
    Ok(data)
}

/// Parse tab-separated vectors. Blank lines are skipped.
pub fn read_tsv<R: BufRead>(reader: R, max_elements: Option<usize>) -> DatasetResult<Matrix> {
    let limit = max_elements.unwrap_or(usize::MAX);
    let mut values = Vec::new();
    let mut width = None;
    let mut rows = 0;

    for (idx, line) in reader.lines().enumerate() {
        if rows >= limit {
            break;
        }
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let start = values.len();
        for field in line.split('\t') {
            let field = field.trim();
            let value = field.parse::<f32>().map_err(|_| DatasetError::Parse {
                line: idx + 1,
                value: field.to_string(),
            })?;
            values.push(value);
        }

        let got = values.len() - start;
        let expected = *width.get_or_insert(got);
        if got != expected {
            return Err(DatasetError::RaggedRow {
                row: rows,
                expected,
                got,
            });
        }

        rows += 1;
        if rows % PROGRESS_INTERVAL == 0 {
            tracing::debug!("Reading TSV data: {}", rows);
        }
    }

    Ok(Matrix::from_vec(rows, width.unwrap_or(0), values)?)
}

/// Parse fvecs records from an in-memory buffer.
pub fn parse_fvecs(bytes: &[u8], max_elements: Option<usize>) -> DatasetResult<Matrix> {
    let limit = max_elements.unwrap_or(usize::MAX);
    let mut values = Vec::new();
    let mut width = None;
    let mut rows = 0;
    let mut offset = 0;

    while offset < bytes.len() && rows < limit {
        let header = bytes.get(offset..offset + 4).ok_or(DatasetError::Truncated {
            record: rows,
            needed: 4,
            available: bytes.len() - offset,
        })?;
        let dim = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if dim <= 0 {
            return Err(DatasetError::InvalidRecord { record: rows, dim });
        }
        let dim = dim as usize;

        let expected = *width.get_or_insert(dim);
        if dim != expected {
            return Err(DatasetError::RaggedRow {
                row: rows,
                expected,
                got: dim,
            });
        }

        offset += 4;
        let needed = dim * 4;
        let payload = bytes.get(offset..offset + needed).ok_or(DatasetError::Truncated {
            record: rows,
            needed,
            available: bytes.len() - offset,
        })?;
        values.extend(
            payload
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
        offset += needed;

        rows += 1;
        if rows % PROGRESS_INTERVAL == 0 {
            tracing::debug!("Reading FVECs data: {}", rows);
        }
    }

    Ok(Matrix::from_vec(rows, width.unwrap_or(0), values)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn fvecs_record(values: &[f32]) -> Vec<u8> {
        let mut bytes = (values.len() as i32).to_le_bytes().to_vec();
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            DatasetFormat::from_path(Path::new("data/base.tsv")).unwrap(),
            DatasetFormat::Tsv
        );
        assert_eq!(
            DatasetFormat::from_path(Path::new("sift_base.fvecs")).unwrap(),
            DatasetFormat::Fvecs
        );
        assert!(matches!(
            DatasetFormat::from_path(Path::new("vectors.csv")),
            Err(DatasetError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_read_tsv() {
        let input = "1.0\t2.0\t3.0\n\n  4\t5\t-6.5  \n";
        let data = read_tsv(Cursor::new(input), None).unwrap();

        assert_eq!(data.rows(), 2);
        assert_eq!(data.cols(), 3);
        assert_eq!(data.row(1), &[4.0, 5.0, -6.5]);
    }

    #[test]
    fn test_read_tsv_max_elements() {
        let input = "1\t1\n2\t2\n3\t3\n";
        let data = read_tsv(Cursor::new(input), Some(2)).unwrap();
        assert_eq!(data.rows(), 2);
        assert_eq!(data.row(1), &[2.0, 2.0]);
    }

    #[test]
    fn test_read_tsv_parse_error_line() {
        let input = "1\t2\n3\tx\n";
        let err = read_tsv(Cursor::new(input), None).unwrap_err();
        assert!(matches!(err, DatasetError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_read_tsv_ragged() {
        let input = "1\t2\t3\n4\t5\n";
        let err = read_tsv(Cursor::new(input), None).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::RaggedRow {
                row: 1,
                expected: 3,
                got: 2
            }
        ));
    }

    #[test]
    fn test_parse_fvecs() {
        let mut bytes = fvecs_record(&[1.0, 2.0]);
        bytes.extend(fvecs_record(&[3.0, 4.0]));
        bytes.extend(fvecs_record(&[5.0, 6.0]));

        let all = parse_fvecs(&bytes, None).unwrap();
        assert_eq!(all.rows(), 3);
        assert_eq!(all.row(2), &[5.0, 6.0]);

        let capped = parse_fvecs(&bytes, Some(1)).unwrap();
        assert_eq!(capped.rows(), 1);
    }

    #[test]
    fn test_parse_fvecs_truncated() {
        let mut bytes = fvecs_record(&[1.0, 2.0, 3.0]);
        bytes.extend(fvecs_record(&[4.0, 5.0, 6.0]));
        bytes.truncate(bytes.len() - 2);

        let err = parse_fvecs(&bytes, None).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::Truncated {
                record: 1,
                needed: 12,
                available: 10
            }
        ));
    }

    #[test]
    fn test_parse_fvecs_dimension_change() {
        let mut bytes = fvecs_record(&[1.0, 2.0]);
        bytes.extend(fvecs_record(&[3.0]));
        assert!(matches!(
            parse_fvecs(&bytes, None),
            Err(DatasetError::RaggedRow { row: 1, .. })
        ));
    }

    #[test]
    fn test_parse_fvecs_invalid_dim() {
        let bytes = (-3i32).to_le_bytes();
        assert!(matches!(
            parse_fvecs(&bytes, None),
            Err(DatasetError::InvalidRecord { record: 0, dim: -3 })
        ));
    }
}
