//! EBML primitives.
//!
//! The readers here work on byte slices and return `Ok(None)` when more input
//! is needed, so they can be driven by an incremental parser.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Result, WebmError};

/// Maximum width of an element ID in bytes.
pub const MAX_ID_LEN: usize = 4;
/// Maximum width of a data size / vint in bytes.
pub const MAX_VINT_LEN: usize = 8;

/// An element ID and size, as read from the start of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub id: u32,
    /// `None` for the reserved "unknown size" encoding.
    pub size: Option<u64>,
    pub header_len: usize,
}

#[inline]
fn vint_width(first: u8) -> Option<usize> {
    if first == 0 {
        None
    } else {
        Some(first.leading_zeros() as usize + 1)
    }
}

/// Reads an element ID. The returned value keeps its length marker bits, the
/// way element IDs are conventionally written.
pub fn read_id(data: &[u8]) -> Result<Option<(u32, usize)>> {
    let Some(&first) = data.first() else {
        return Ok(None);
    };
    let width = match vint_width(first) {
        Some(width) if width <= MAX_ID_LEN => width,
        _ => return Err(WebmError::InvalidVint(first)),
    };
    if data.len() < width {
        return Ok(None);
    }
    let id = data[..width]
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
    Ok(Some((id, width)))
}

/// Reads a variable-length integer with its marker bit stripped.
///
/// Returns the value, the width in bytes and whether every value bit was set
/// (the reserved "unknown" pattern for element sizes).
pub fn read_vint(data: &[u8]) -> Result<Option<(u64, usize, bool)>> {
    let Some(&first) = data.first() else {
        return Ok(None);
    };
    let width = match vint_width(first) {
        Some(width) if width <= MAX_VINT_LEN => width,
        _ => return Err(WebmError::InvalidVint(first)),
    };
    if data.len() < width {
        return Ok(None);
    }
    let mask = if width == 8 { 0 } else { 0xFFu8 >> width };
    let mut value = u64::from(first & mask);
    for &b in &data[1..width] {
        value = (value << 8) | u64::from(b);
    }
    let all_ones = value == (1u64 << (7 * width)) - 1;
    Ok(Some((value, width, all_ones)))
}

/// Reads an element data size; `Some((None, len))` is the unknown size.
pub fn read_size(data: &[u8]) -> Result<Option<(Option<u64>, usize)>> {
    Ok(read_vint(data)?.map(|(value, width, unknown)| {
        let size = if unknown { None } else { Some(value) };
        (size, width)
    }))
}

/// Reads a complete element header, or `None` if `data` ends inside it.
pub fn parse_element_header(data: &[u8]) -> Result<Option<ElementHeader>> {
    let Some((id, id_len)) = read_id(data)? else {
        return Ok(None);
    };
    let Some((size, size_len)) = read_size(&data[id_len..])? else {
        return Ok(None);
    };
    Ok(Some(ElementHeader {
        id,
        size,
        header_len: id_len + size_len,
    }))
}

/// Reads an unsigned integer element body (0 to 8 bytes).
pub fn read_uint(body: &[u8]) -> Result<u64> {
    match body.len() {
        0 => Ok(0),
        len @ 1..=8 => Ok(BigEndian::read_uint(body, len)),
        len => Err(WebmError::InvalidValue {
            element: "uint",
            reason: format!("{len} bytes"),
        }),
    }
}

/// Reads a float element body (0, 4 or 8 bytes).
pub fn read_float(body: &[u8]) -> Result<f64> {
    match body.len() {
        0 => Ok(0.0),
        4 => Ok(f64::from(BigEndian::read_f32(body))),
        8 => Ok(BigEndian::read_f64(body)),
        len => Err(WebmError::InvalidValue {
            element: "float",
            reason: format!("{len} bytes"),
        }),
    }
}

/// Reads a string element body, dropping trailing NUL padding.
pub fn read_string(body: &[u8]) -> String {
    let end = body.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

/// Iterates over the children of a fully buffered master element body.
pub fn children(body: &[u8]) -> Children<'_> {
    Children { data: body }
}

pub struct Children<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for Children<'a> {
    type Item = Result<(u32, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        let result = match parse_element_header(self.data) {
            Ok(Some(ElementHeader {
                id,
                size: Some(size),
                header_len,
            })) => {
                let end = header_len as u64 + size;
                if end > self.data.len() as u64 {
                    Err(WebmError::ElementOverflow { id })
                } else {
                    let end = end as usize;
                    let body = &self.data[header_len..end];
                    self.data = &self.data[end..];
                    return Some(Ok((id, body)));
                }
            }
            Ok(Some(header)) => Err(WebmError::UnknownSizeNotAllowed { id: header.id }),
            Ok(None) => Err(WebmError::ElementOverflow { id: 0 }),
            Err(e) => Err(e),
        };
        self.data = &[];
        Some(result)
    }
}
