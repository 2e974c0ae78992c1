//! NumPy `.npy` serialization for `ndarray` arrays.
//!
//! Writes format version 1.0: the `\x93NUMPY` magic, a little-endian header
//! length, an ASCII dict describing dtype, memory order and shape, padded so
//! the data starts on a 64-byte boundary, followed by the C-order data.

use ndarray::{ArrayBase, Data, Dimension};

use crate::error::NpyError;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const ALIGNMENT: usize = 64;
/// Magic, two version bytes and the u16 header length.
const V1_PREAMBLE_LEN: usize = MAGIC.len() + 2 + 2;

/// An element type with a fixed NumPy dtype descriptor.
pub trait NpyElement: Copy {
    /// Dtype string, e.g. `|u1` or `<f4`.
    const DESCR: &'static str;

    fn write_le(&self, out: &mut Vec<u8>);
}

impl NpyElement for u8 {
    const DESCR: &'static str = "|u1";

    fn write_le(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }
}

impl NpyElement for i64 {
    const DESCR: &'static str = "<i8";

    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl NpyElement for f32 {
    const DESCR: &'static str = "<f4";

    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl NpyElement for f64 {
    const DESCR: &'static str = "<f8";

    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

/// Parsed `.npy` preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    pub descr: String,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
    /// Byte offset of the first data element.
    pub data_offset: usize,
}

impl NpyHeader {
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Serializes an array into an in-memory `.npy` buffer.
pub fn to_npy_bytes<S, D>(array: &ArrayBase<S, D>) -> Result<Vec<u8>, NpyError>
where
    S: Data,
    S::Elem: NpyElement,
    D: Dimension,
{
    let header = header_dict(<S::Elem as NpyElement>::DESCR, array.shape());
    let elem_size = std::mem::size_of::<S::Elem>();

    let mut out = Vec::with_capacity(ALIGNMENT + array.len() * elem_size);
    write_preamble(&mut out, &header)?;

    // `iter` walks logical (C) order regardless of the memory layout.
    match array.as_slice() {
        Some(slice) => slice.iter().for_each(|v| v.write_le(&mut out)),
        None => array.iter().for_each(|v| v.write_le(&mut out)),
    }
    Ok(out)
}

/// Checks that `bytes` hold a complete `T` array of `shape` in C order.
pub fn verify_npy<T: NpyElement>(bytes: &[u8], shape: &[usize]) -> Result<NpyHeader, NpyError> {
    let header = read_npy_header(bytes)?;
    if header.descr != T::DESCR || header.fortran_order || header.shape != shape {
        return Err(NpyError::Mismatch(format!(
            "expected {} {:?} in C order, found {} {:?}{}",
            T::DESCR,
            shape,
            header.descr,
            header.shape,
            if header.fortran_order { " in Fortran order" } else { "" }
        )));
    }
    let expected_len = header.data_offset + header.element_count() * std::mem::size_of::<T>();
    if bytes.len() != expected_len {
        return Err(NpyError::Mismatch(format!(
            "expected {} bytes, found {}",
            expected_len,
            bytes.len()
        )));
    }
    Ok(header)
}

fn header_dict(descr: &str, shape: &[usize]) -> String {
    let shape = match shape {
        [] => "()".to_string(),
        [n] => format!("({},)", n),
        dims => format!(
            "({})",
            dims.iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        descr, shape
    )
}

fn write_preamble(out: &mut Vec<u8>, dict: &str) -> Result<(), NpyError> {
    // Dict plus the terminating newline, padded to the alignment.
    let unpadded = V1_PREAMBLE_LEN + dict.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    let header_len = dict.len() + padding + 1;
    let header_len = u16::try_from(header_len).map_err(|_| NpyError::HeaderTooLarge(header_len))?;

    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(padding));
    out.push(b'\n');
    Ok(())
}

/// Parses the preamble of a `.npy` buffer (format version 1.x or 2.x).
pub fn read_npy_header(bytes: &[u8]) -> Result<NpyHeader, NpyError> {
    let invalid = |msg: &str| NpyError::InvalidPreamble(msg.to_string());

    if bytes.len() < V1_PREAMBLE_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(invalid("missing magic"));
    }
    let major = bytes[6];
    let (header_len, dict_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(invalid("truncated header length"));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        v => return Err(NpyError::InvalidPreamble(format!("unsupported version {}", v))),
    };

    let data_offset = dict_start + header_len;
    if bytes.len() < data_offset {
        return Err(invalid("truncated header"));
    }
    let dict = std::str::from_utf8(&bytes[dict_start..data_offset])
        .map_err(|_| invalid("header is not valid UTF-8"))?;

    let descr = quoted_value(dict, "'descr':").ok_or_else(|| invalid("missing descr"))?;
    let fortran_order = dict
        .split("'fortran_order':")
        .nth(1)
        .map(|rest| rest.trim_start().starts_with("True"))
        .ok_or_else(|| invalid("missing fortran_order"))?;
    let shape = dict
        .split("'shape':")
        .nth(1)
        .and_then(|rest| {
            let start = rest.find('(')?;
            let end = rest.find(')')?;
            Some(&rest[start + 1..end])
        })
        .ok_or_else(|| invalid("missing shape"))?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| invalid("non-numeric shape")))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NpyHeader {
        descr,
        fortran_order,
        shape,
        data_offset,
    })
}

fn quoted_value(dict: &str, key: &str) -> Option<String> {
    let rest = dict.split(key).nth(1)?;
    let start = rest.find('\'')? + 1;
    let len = rest[start..].find('\'')?;
    Some(rest[start..start + len].to_string())
}
