//! Binary codec for the vector blob (`vectors-<gen>.bin`).
//!
//! File format:
//! - 8 bytes: magic "TOOLSEEK"
//! - 4 bytes: version (u32 LE)
//! - 8 bytes: record count (u64 LE)
//! - 8 bytes: dimension (u64 LE)
//! - per record: name length (u32 LE), UTF-8 name, `dimension` f32 LE values

use crate::error::{AppError, Result};

/// Blob format version. Increment when the layout changes.
pub const BLOB_VERSION: u32 = 1;

/// Magic bytes to identify valid vector blobs.
const BLOB_MAGIC: &[u8; 8] = b"TOOLSEEK";

const HEADER_LEN: usize = 8 + 4 + 8 + 8;

/// Vectors decoded from a blob, in file order.
#[derive(Debug)]
pub struct DecodedVectors {
    pub dimension: usize,
    pub entries: Vec<(String, Vec<f32>)>,
}

/// Serialize named vectors. Every vector must have length `dimension`.
pub fn encode_vectors<'a, I>(dimension: usize, entries: I) -> Result<Vec<u8>>
where
    I: ExactSizeIterator<Item = (&'a str, &'a [f32])>,
{
    let count = entries.len();
    let mut out = Vec::with_capacity(HEADER_LEN + count * (16 + dimension * 4));

    out.extend_from_slice(BLOB_MAGIC);
    out.extend_from_slice(&BLOB_VERSION.to_le_bytes());
    out.extend_from_slice(&(count as u64).to_le_bytes());
    out.extend_from_slice(&(dimension as u64).to_le_bytes());

    for (name, vector) in entries {
        if vector.len() != dimension {
            return Err(AppError::StorageError(format!(
                "Vector for '{}' has dimension {}, expected {}",
                name,
                vector.len(),
                dimension
            )));
        }
        let name_len = u32::try_from(name.len()).map_err(|_| {
            AppError::StorageError(format!("Tool name too long to store: {} bytes", name.len()))
        })?;
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        for &val in vector {
            out.extend_from_slice(&val.to_le_bytes());
        }
    }

    Ok(out)
}

/// Parse a blob written by [`encode_vectors`].
///
/// Any structural problem (bad magic, other version, truncation, trailing
/// bytes, invalid UTF-8) is reported as `AppError::StorageError`.
pub fn decode_vectors(bytes: &[u8]) -> Result<DecodedVectors> {
    let mut cursor = Cursor { bytes, pos: 0 };

    let magic = cursor.take(8, "magic")?;
    if magic != BLOB_MAGIC {
        return Err(AppError::StorageError("Invalid vector blob magic".to_string()));
    }

    let version = u32::from_le_bytes(cursor.array("version")?);
    if version != BLOB_VERSION {
        return Err(AppError::StorageError(format!(
            "Vector blob version {} does not match expected {}",
            version, BLOB_VERSION
        )));
    }

    let count = u64::from_le_bytes(cursor.array("record count")?) as usize;
    let dimension = u64::from_le_bytes(cursor.array("dimension")?) as usize;

    // Reject sizes the remaining bytes cannot possibly hold before allocating
    let min_record = 4usize.saturating_add(dimension.saturating_mul(4));
    if count.saturating_mul(min_record) > cursor.remaining() {
        return Err(AppError::StorageError(format!(
            "Vector blob truncated: {} records of dimension {} do not fit in {} bytes",
            count,
            dimension,
            cursor.remaining()
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let name_len = u32::from_le_bytes(cursor.array("name length")?) as usize;
        let name = std::str::from_utf8(cursor.take(name_len, "name")?)
            .map_err(|e| AppError::StorageError(format!("Tool name is not UTF-8: {}", e)))?
            .to_string();

        let raw = cursor.take(dimension * 4, "vector")?;
        let vector = raw
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        entries.push((name, vector));
    }

    if cursor.remaining() != 0 {
        return Err(AppError::StorageError(format!(
            "Vector blob has {} trailing bytes",
            cursor.remaining()
        )));
    }

    Ok(DecodedVectors { dimension, entries })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(AppError::StorageError(format!(
                "Vector blob truncated while reading {}",
                what
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let a = vec![1.0f32, 2.0, 3.0];
        let b = vec![-0.5f32, 0.25, 0.0];
        let entries = vec![("alpha", a.as_slice()), ("beta", b.as_slice())];
        encode_vectors(3, entries.into_iter()).unwrap()
    }

    #[test]
    fn test_decode_written_blob() {
        let decoded = decode_vectors(&sample()).unwrap();

        assert_eq!(decoded.dimension, 3);
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.entries[0].0, "alpha");
        assert_eq!(decoded.entries[1].1, vec![-0.5, 0.25, 0.0]);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected_on_write() {
        let short = vec![1.0f32];
        let result = encode_vectors(3, vec![("x", short.as_slice())].into_iter());
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample();
        bytes[0] = b'X';
        assert!(decode_vectors(&bytes).is_err());
    }

    #[test]
    fn test_truncated_blob() {
        let bytes = sample();
        assert!(decode_vectors(&bytes[..bytes.len() - 1]).is_err());
        assert!(decode_vectors(&bytes[..10]).is_err());
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = sample();
        bytes.push(0);
        assert!(decode_vectors(&bytes).is_err());
    }

    #[test]
    fn test_huge_count_does_not_allocate() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(BLOB_MAGIC);
        bytes.extend_from_slice(&BLOB_VERSION.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        bytes.extend_from_slice(&1024u64.to_le_bytes());
        assert!(decode_vectors(&bytes).is_err());
    }
}
