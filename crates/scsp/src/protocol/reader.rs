//! SCSP frame reading utilities.
//!
//! This module provides the two primitives every other decoder builds on:
//! the numeric/length scanner and the single-value decoder. Neither raises;
//! running out of bytes is reported as `None` and the caller decides whether
//! that means "read more" or "malformed".

use scsp_core::Value;

use crate::protocol::tag;

/// Result of scanning an ASCII length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Number {
    /// Value before the optional `:`
    pub value: u64,
    /// Value after the `:` (0 when absent)
    pub extended: u64,
    /// Index of the first byte past the terminating space
    pub next: usize,
}

/// Scan digits from `start` until the first space.
///
/// A `:` switches accumulation to the extended value. Any other non-digit
/// contributes `0` to the current accumulator. Returns `None` when no space
/// terminates the field inside `buf`.
pub fn scan_number(buf: &[u8], start: usize) -> Option<Number> {
    let mut value: u64 = 0;
    let mut extended: u64 = 0;
    let mut in_extended = false;

    for (i, &byte) in buf.iter().enumerate().skip(start) {
        let digit = match byte {
            b' ' => {
                return Some(Number {
                    value,
                    extended,
                    next: i + 1,
                });
            }
            b':' => {
                in_extended = true;
                continue;
            }
            b'0'..=b'9' => u64::from(byte - b'0'),
            _ => 0,
        };

        let acc = if in_extended {
            &mut extended
        } else {
            &mut value
        };
        *acc = acc.saturating_mul(10).saturating_add(digit);
    }

    None
}

/// Decode one tagged value starting at `index`.
///
/// Returns the value and its cell size (bytes consumed, tag included), or
/// `None` if the cell runs past the end of `buf`.
pub fn decode_value(buf: &[u8], index: usize) -> Option<(Value, usize)> {
    let &cell_tag = buf.get(index)?;

    if cell_tag == tag::NULL {
        return Some((Value::Null, 2));
    }

    let number = scan_number(buf, index + 1)?;

    match cell_tag {
        tag::INTEGER | tag::FLOAT => {
            let cell_size = number.next - index;
            let numeral = String::from_utf8_lossy(&buf[index + 1..number.next - 1]);
            let value = if cell_tag == tag::INTEGER {
                parse_integer(&numeral)
            } else {
                parse_float(&numeral)
            };
            Some((value, cell_size))
        }
        _ => {
            let declared = usize::try_from(number.value).ok()?;
            let len = if cell_tag == tag::ZEROSTRING {
                declared.saturating_sub(1)
            } else {
                declared
            };
            let body = buf.get(number.next..number.next.checked_add(len)?)?;
            let cell_size = declared + number.next - index;
            let value = if cell_tag == tag::BLOB {
                Value::Blob(body.to_vec())
            } else {
                Value::Text(String::from_utf8_lossy(body).into_owned())
            };
            Some((value, cell_size))
        }
    }
}

fn parse_integer(numeral: &str) -> Value {
    numeral
        .parse::<i64>()
        .map(Value::Integer)
        .or_else(|_| numeral.parse::<f64>().map(Value::Float))
        .unwrap_or_else(|_| Value::Text(numeral.to_string()))
}

fn parse_float(numeral: &str) -> Value {
    numeral
        .parse::<f64>()
        .map_or_else(|_| Value::Text(numeral.to_string()), Value::Float)
}

/// A cursor over a frame body.
#[derive(Debug)]
pub struct FrameReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    /// Create a new reader positioned at `pos`.
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    /// Current offset into the underlying buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get remaining bytes in the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Scan a length field at the current position.
    pub fn read_number(&mut self) -> Option<Number> {
        let number = scan_number(self.data, self.pos)?;
        self.pos = number.next;
        Some(number)
    }

    /// Decode one tagged value at the current position.
    pub fn read_value(&mut self) -> Option<Value> {
        let (value, cell_size) = decode_value(self.data, self.pos)?;
        self.pos += cell_size;
        Some(value)
    }

    /// Read a `+LEN text` field, skipping its tag byte.
    pub fn read_text(&mut self) -> Option<String> {
        let number = scan_number(self.data, self.pos + 1)?;
        let len = usize::try_from(number.value).ok()?;
        let body = self.data.get(number.next..number.next.checked_add(len)?)?;
        self.pos = number.next + len;
        Some(String::from_utf8_lossy(body).into_owned())
    }

    /// Read a `:N` field, skipping its tag byte.
    pub fn read_flag(&mut self) -> Option<u64> {
        let number = scan_number(self.data, self.pos + 1)?;
        self.pos = number.next;
        Some(number.value)
    }

    /// Read `count` values, appending them to `out`.
    pub fn read_values(&mut self, count: usize, out: &mut Vec<Value>) -> Option<()> {
        // every cell takes at least two bytes
        out.reserve(count.min(self.remaining() / 2));
        for _ in 0..count {
            let value = self.read_value()?;
            out.push(value);
        }
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_simple_number() {
        let n = scan_number(b":123 ", 1).unwrap();
        assert_eq!(n.value, 123);
        assert_eq!(n.extended, 0);
        assert_eq!(n.next, 5);
    }

    #[test]
    fn test_scan_extended_code() {
        let n = scan_number(b"19:2067 UNIQUE", 0).unwrap();
        assert_eq!(n.value, 19);
        assert_eq!(n.extended, 2067);
        assert_eq!(n.next, 8);
    }

    #[test]
    fn test_scan_incomplete() {
        assert_eq!(scan_number(b"+1234", 1), None);
        assert_eq!(scan_number(b"", 0), None);
    }

    #[test]
    fn test_scan_non_digits_count_as_zero() {
        // the leading tag contributes a zero digit when scanned from 0
        let n = scan_number(b"=5 ", 0).unwrap();
        assert_eq!(n.value, 5);
        let n = scan_number(b"1x2 ", 0).unwrap();
        assert_eq!(n.value, 102);
    }

    #[test]
    fn test_scan_saturates_instead_of_overflowing() {
        let n = scan_number(b"99999999999999999999999999 ", 0).unwrap();
        assert_eq!(n.value, u64::MAX);
    }

    #[test]
    fn test_decode_string() {
        let (value, size) = decode_value(b"+11 Hello World", 0).unwrap();
        assert_eq!(value, Value::Text("Hello World".to_string()));
        assert_eq!(size, 15);
    }

    #[test]
    fn test_decode_zero_terminated_string() {
        let (value, size) = decode_value(b"!6 Hello\0", 0).unwrap();
        assert_eq!(value, Value::Text("Hello".to_string()));
        assert_eq!(size, 9);
    }

    #[test]
    #[allow(clippy::approx_constant)]
    fn test_decode_numbers() {
        let (value, size) = decode_value(b":123456 ", 0).unwrap();
        assert_eq!(value, Value::Integer(123_456));
        assert_eq!(size, 8);

        let (value, size) = decode_value(b":-42 ", 0).unwrap();
        assert_eq!(value, Value::Integer(-42));
        assert_eq!(size, 5);

        let (value, size) = decode_value(b",3.1415 ", 0).unwrap();
        assert_eq!(value, Value::Float(3.1415));
        assert_eq!(size, 8);
    }

    #[test]
    fn test_decode_null_and_blob() {
        let (value, size) = decode_value(b"_ ", 0).unwrap();
        assert_eq!(value, Value::Null);
        assert_eq!(size, 2);

        let (value, size) = decode_value(b"$10 0123456789", 0).unwrap();
        assert_eq!(value, Value::Blob(b"0123456789".to_vec()));
        assert_eq!(size, 14);
    }

    #[test]
    fn test_decode_past_end_is_none() {
        assert_eq!(decode_value(b"+11 Hello", 0), None);
        assert_eq!(decode_value(b":12", 0), None);
        assert_eq!(decode_value(b"", 0), None);
    }

    #[test]
    fn test_reader_walks_cells() {
        let buf = b"+1 a:2 _ $2 xy";
        let mut reader = FrameReader::new(buf, 0);
        let mut out = Vec::new();
        reader.read_values(4, &mut out).unwrap();
        assert_eq!(
            out,
            vec![
                Value::Text("a".to_string()),
                Value::Integer(2),
                Value::Null,
                Value::Blob(b"xy".to_vec()),
            ]
        );
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reader_text_and_flags() {
        let mut reader = FrameReader::new(b"+2 id:1 ", 0);
        assert_eq!(reader.read_text(), Some("id".to_string()));
        assert_eq!(reader.read_flag(), Some(1));
        assert_eq!(reader.position(), 8);
    }
}
