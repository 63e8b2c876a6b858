//! Binary encoding for cells and other on-disk structures.
//!
//! # Cell Format
//!
//! A serialized cell is length-prefixed so a reader can skip it without decoding:
//!
//! - Length of the encoded value (4 bytes, little-endian)
//! - Type tag (1 byte, 0 = NULL, otherwise `DataType::tag`)
//! - Payload (type-specific, strings and bytes carry their own 4-byte length)

use crate::error::{Error, Result};
use crate::types::DataType;
use crate::value::Value;

const NULL_TAG: u8 = 0;

/// Appends little-endian primitives to a byte buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Writes a 4-byte length followed by the bytes.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    pub fn put_str(&mut self, v: &str) {
        self.put_bytes(v.as_bytes());
    }

    /// Writes raw bytes without a length prefix.
    pub fn put_raw(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads little-endian primitives from a byte slice.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Moves the read offset. Used to resume decoding at a remembered position.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::format(format!(
                "seek to {} beyond end of {} byte buffer",
                pos,
                self.data.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::format(format!(
                "unexpected end of data: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(self.get_u64()? as i64)
    }

    /// Reads a 4-byte length followed by that many bytes.
    pub fn get_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    pub fn get_str(&mut self) -> Result<String> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::format(format!("invalid utf-8: {}", e)))
    }

    /// Reads `n` raw bytes.
    pub fn get_raw(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }
}

/// Encodes a value (type tag + payload) without the outer length prefix.
pub fn encode_value(value: &Value, out: &mut ByteWriter) {
    match value {
        Value::Null => out.put_u8(NULL_TAG),
        Value::Boolean(v) => {
            out.put_u8(DataType::Boolean.tag());
            out.put_u8(*v as u8);
        }
        Value::Int32(v) => {
            out.put_u8(DataType::Int32.tag());
            out.put_u32(*v as u32);
        }
        Value::Int64(v) => {
            out.put_u8(DataType::Int64.tag());
            out.put_i64(*v);
        }
        Value::Float64(v) => {
            out.put_u8(DataType::Float64.tag());
            out.put_u64(v.to_bits());
        }
        Value::String(v) => {
            out.put_u8(DataType::String.tag());
            out.put_str(v);
        }
        Value::DateTime(v) => {
            out.put_u8(DataType::DateTime.tag());
            out.put_i64(*v);
        }
        Value::Bytes(v) => {
            out.put_u8(DataType::Bytes.tag());
            out.put_bytes(v);
        }
    }
}

/// Decodes a value written by [`encode_value`].
pub fn decode_value(reader: &mut ByteReader<'_>) -> Result<Value> {
    let tag = reader.get_u8()?;
    if tag == NULL_TAG {
        return Ok(Value::Null);
    }
    let dt = DataType::from_tag(tag)
        .ok_or_else(|| Error::format(format!("unknown cell type tag {}", tag)))?;
    let value = match dt {
        DataType::Boolean => match reader.get_u8()? {
            0 => Value::Boolean(false),
            1 => Value::Boolean(true),
            b => return Err(Error::format(format!("invalid boolean byte {}", b))),
        },
        DataType::Int32 => Value::Int32(reader.get_u32()? as i32),
        DataType::Int64 => Value::Int64(reader.get_i64()?),
        DataType::Float64 => Value::Float64(f64::from_bits(reader.get_u64()?)),
        DataType::String => Value::String(reader.get_str()?),
        DataType::DateTime => Value::DateTime(reader.get_i64()?),
        DataType::Bytes => Value::Bytes(reader.get_bytes()?.to_vec()),
    };
    Ok(value)
}

/// Writes one length-prefixed cell.
pub fn write_cell(value: &Value, out: &mut ByteWriter) {
    let mut cell = ByteWriter::with_capacity(16);
    encode_value(value, &mut cell);
    out.put_bytes(cell.as_slice());
}

/// Reads one length-prefixed cell, verifying the prefix matches the decoded length.
pub fn read_cell(reader: &mut ByteReader<'_>) -> Result<Value> {
    let bytes = reader.get_bytes()?;
    let mut inner = ByteReader::new(bytes);
    let value = decode_value(&mut inner)?;
    if inner.remaining() != 0 {
        return Err(Error::format(format!(
            "cell length prefix {} does not match encoded length {}",
            bytes.len(),
            inner.position()
        )));
    }
    Ok(value)
}

/// Skips one length-prefixed cell without decoding it.
pub fn skip_cell(reader: &mut ByteReader<'_>) -> Result<()> {
    reader.get_bytes().map(|_| ())
}

/// Encodes a full row: one length-prefixed cell per column.
pub fn encode_cells(cells: &[Value]) -> Vec<u8> {
    let mut out = ByteWriter::with_capacity(cells.len() * 12);
    for cell in cells {
        write_cell(cell, &mut out);
    }
    out.into_inner()
}

/// Decodes `column_count` cells written by [`encode_cells`].
pub fn decode_cells(data: &[u8], column_count: usize) -> Result<Vec<Value>> {
    let mut reader = ByteReader::new(data);
    let mut cells = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        cells.push(read_cell(&mut reader)?);
    }
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_values() -> Vec<Value> {
        vec![
            Value::Null,
            Value::Boolean(true),
            Value::Boolean(false),
            Value::Int32(-17),
            Value::Int64(i64::MAX),
            Value::Float64(-0.5),
            Value::String("héllo".into()),
            Value::String(String::new()),
            Value::DateTime(1_700_000_000_000),
            Value::Bytes(vec![0, 1, 255]),
        ]
    }

    #[test]
    fn test_cells_roundtrip() {
        let values = sample_values();
        let data = encode_cells(&values);
        let decoded = decode_cells(&data, values.len()).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_skip_cell() {
        let values = sample_values();
        let data = encode_cells(&values);
        let mut reader = ByteReader::new(&data);
        for _ in 0..6 {
            skip_cell(&mut reader).unwrap();
        }
        assert_eq!(read_cell(&mut reader).unwrap(), Value::String("héllo".into()));
    }

    #[test]
    fn test_truncated_cell_is_format_error() {
        let data = encode_cells(&[Value::String("abcdef".into())]);
        let err = decode_cells(&data[..data.len() - 2], 1).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn test_unknown_tag_is_format_error() {
        let mut w = ByteWriter::new();
        w.put_bytes(&[99]);
        let err = decode_cells(w.as_slice(), 1).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn test_length_prefix_mismatch() {
        let mut w = ByteWriter::new();
        // Int32 tag and payload plus one trailing byte inside the prefix
        w.put_bytes(&[2, 1, 0, 0, 0, 9]);
        assert!(decode_cells(w.as_slice(), 1).is_err());
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Boolean),
            any::<i32>().prop_map(Value::Int32),
            any::<i64>().prop_map(Value::Int64),
            any::<i64>().prop_map(Value::DateTime),
            ".{0,24}".prop_map(Value::String),
            prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        ]
    }

    proptest! {
        #[test]
        fn prop_cells_roundtrip(values in prop::collection::vec(arb_value(), 0..16)) {
            let data = encode_cells(&values);
            let decoded = decode_cells(&data, values.len()).unwrap();
            prop_assert_eq!(decoded, values);
        }
    }
}
