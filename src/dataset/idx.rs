//! IDX decoding for the MNIST image and label files.
//!
//! All header integers are big-endian u32. Image files carry magic 2051 and
//! `(count, rows, cols)`; label files carry magic 2049 and `(count,)`.

use ndarray::{Array1, Array3};

use crate::error::DatasetError;

pub const IMAGE_MAGIC: u32 = 2051;
pub const LABEL_MAGIC: u32 = 2049;

struct Reader<'a> {
    file: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(file: &'a str, bytes: &'a [u8]) -> Self {
        Self {
            file,
            bytes,
            pos: 0,
        }
    }

    fn read_u32(&mut self) -> Result<u32, DatasetError> {
        let chunk = self.take(4)?;
        Ok(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DatasetError> {
        let end = self.pos.checked_add(len).filter(|&e| e <= self.bytes.len());
        match end {
            Some(end) => {
                let chunk = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(chunk)
            }
            None => Err(DatasetError::Truncated {
                file: self.file.to_string(),
                reason: format!(
                    "needed {} bytes at offset {}, only {} available",
                    len,
                    self.pos,
                    self.bytes.len().saturating_sub(self.pos)
                ),
            }),
        }
    }

    fn expect_magic(&mut self, expected: u32) -> Result<(), DatasetError> {
        let actual = self.read_u32()?;
        if actual != expected {
            return Err(DatasetError::BadMagic {
                file: self.file.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn finish(&self) -> Result<(), DatasetError> {
        if self.pos != self.bytes.len() {
            return Err(DatasetError::Truncated {
                file: self.file.to_string(),
                reason: format!("{} trailing bytes", self.bytes.len() - self.pos),
            });
        }
        Ok(())
    }
}

/// Decodes an uncompressed IDX3 image file into `(count, rows, cols)`.
pub fn parse_images(file: &str, bytes: &[u8]) -> Result<Array3<u8>, DatasetError> {
    let mut reader = Reader::new(file, bytes);
    reader.expect_magic(IMAGE_MAGIC)?;
    let count = reader.read_u32()? as usize;
    let rows = reader.read_u32()? as usize;
    let cols = reader.read_u32()? as usize;

    let len = count
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .ok_or_else(|| DatasetError::Truncated {
            file: file.to_string(),
            reason: "image dimensions overflow".to_string(),
        })?;
    let pixels = reader.take(len)?.to_vec();
    reader.finish()?;

    Ok(Array3::from_shape_vec((count, rows, cols), pixels)?)
}

/// Decodes an uncompressed IDX1 label file.
pub fn parse_labels(file: &str, bytes: &[u8]) -> Result<Array1<u8>, DatasetError> {
    let mut reader = Reader::new(file, bytes);
    reader.expect_magic(LABEL_MAGIC)?;
    let count = reader.read_u32()? as usize;
    let labels = reader.take(count)?.to_vec();
    reader.finish()?;

    Ok(Array1::from_vec(labels))
}

/// Encodes images as IDX3. Used to build fixtures.
pub fn encode_images(images: &Array3<u8>) -> Vec<u8> {
    let (count, rows, cols) = images.dim();
    let mut out = Vec::with_capacity(16 + images.len());
    for v in [IMAGE_MAGIC, count as u32, rows as u32, cols as u32] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out.extend(images.iter().copied());
    out
}

/// Encodes labels as IDX1. Used to build fixtures.
pub fn encode_labels(labels: &Array1<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + labels.len());
    out.extend_from_slice(&LABEL_MAGIC.to_be_bytes());
    out.extend_from_slice(&(labels.len() as u32).to_be_bytes());
    out.extend(labels.iter().copied());
    out
}
