//! Reads a packed row buffer back into values.
//!
//! This is the client half of the row format; the server never calls it outside
//! of tests.
use thiserror::Error;

use super::{
    Binding, Value,
    encoder::{ADDRESS_SIZE, ClientAddress, RowLayout, VARIANT_DATA},
    store_status, vt,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("read of {len} bytes at offset {offset} is outside the buffer")]
    OutOfBounds { offset: usize, len: usize },

    #[error("address {0:#010x} does not point into the buffer")]
    BadAddress(u32),

    #[error("unsupported variant type {0:#06x}")]
    UnknownType(u16),

    #[error("string at offset {0} is not terminated")]
    Unterminated(usize),

    #[error("string at offset {0} is not valid UTF-16")]
    InvalidText(usize),
}

struct RegionReader<'a> {
    buf: &'a [u8],
}

impl RegionReader<'_> {
    fn get(&self, offset: usize, len: usize) -> Result<&[u8], DecodeError> {
        offset
            .checked_add(len)
            .and_then(|end| self.buf.get(offset..end))
            .ok_or(DecodeError::OutOfBounds { offset, len })
    }

    fn u8(&self, offset: usize) -> Result<u8, DecodeError> {
        Ok(self.get(offset, 1)?[0])
    }

    fn u16(&self, offset: usize) -> Result<u16, DecodeError> {
        let b = self.get(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&self, offset: usize) -> Result<u32, DecodeError> {
        let b = self.get(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn inline(&self, offset: usize) -> Result<[u8; 8], DecodeError> {
        let mut out = [0; 8];
        out.copy_from_slice(self.get(offset, 8)?);
        Ok(out)
    }

    fn local(&self, layout: &RowLayout, address: u32) -> Result<usize, DecodeError> {
        layout
            .to_local(ClientAddress::new(address))
            .map(|local| local.get() as usize)
            .filter(|local| *local < self.buf.len())
            .ok_or(DecodeError::BadAddress(address))
    }

    fn string(&self, offset: usize) -> Result<String, DecodeError> {
        let mut units = Vec::new();
        let mut at = offset;
        loop {
            let unit = self
                .u16(at)
                .map_err(|_| DecodeError::Unterminated(offset))?;
            if unit == 0 {
                break;
            }
            units.push(unit);
            at += 2;
        }
        String::from_utf16(&units).map_err(|_| DecodeError::InvalidText(offset))
    }
}

/// Decodes the first `rows` records of `buffer`, the row region of a fetch
/// response. Columns without a bound value decode as [`Value::Empty`].
pub fn decode_rows(
    buffer: &[u8],
    layout: &RowLayout,
    binding: &Binding,
    rows: u32,
) -> Result<Vec<Vec<Value>>, DecodeError> {
    let reader = RegionReader { buf: buffer };
    let row_width = binding.row_width() as usize;
    let mut out = Vec::with_capacity(rows as usize);

    for i in 0..rows as usize {
        let row_start = i * row_width;
        let mut values = Vec::with_capacity(binding.columns().len());

        for column in binding.columns() {
            let null = match column.status {
                Some(offset) => reader.u8(row_start + offset as usize)? == store_status::NULL,
                None => false,
            };
            let Some(offset) = column.value.filter(|_| !null) else {
                values.push(Value::Empty);
                continue;
            };

            let slot = row_start + offset as usize;
            let vtype = reader.u16(slot)?;
            let value = match vtype {
                vt::VT_LPWSTR => {
                    let address = reader.u32(slot + VARIANT_DATA)?;
                    Value::Str(reader.string(reader.local(layout, address)?)?)
                }
                t if t == vt::VT_VECTOR | vt::VT_LPWSTR => {
                    let count = reader.u32(slot + VARIANT_DATA)? as usize;
                    let array = reader.u32(slot + VARIANT_DATA + ADDRESS_SIZE)?;
                    let mut items = Vec::with_capacity(count.min(64));
                    if count > 0 {
                        let array = reader.local(layout, array)?;
                        for k in 0..count {
                            let address = reader.u32(array + k * ADDRESS_SIZE)?;
                            items.push(reader.string(reader.local(layout, address)?)?);
                        }
                    }
                    Value::StrVector(items)
                }
                t => Value::from_inline(t, reader.inline(slot + VARIANT_DATA)?)
                    .ok_or(DecodeError::UnknownType(t))?,
            };
            values.push(value);
        }
        out.push(values);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::{
        props,
        rowset::{ColumnBinding, Row, encode_rows},
    };

    use super::*;

    fn binding() -> Binding {
        Binding::new(
            20,
            vec![
                ColumnBinding::new(props::FILE_NAME, vt::VT_VARIANT)
                    .value_at(0)
                    .status_at(16),
            ],
        )
        .unwrap()
    }

    fn layout() -> RowLayout {
        RowLayout {
            buffer_length: 64,
            row_width: 20,
            reserved: 0,
            client_base: 0x1000,
        }
    }

    #[test]
    fn null_status_decodes_empty() {
        let encoded = encode_rows(layout(), &binding(), &[Row::new(1)]).unwrap();
        let rows = decode_rows(encoded.rows(), &layout(), &binding(), 1).unwrap();
        assert_eq!(rows, vec![vec![Value::Empty]]);
    }

    #[test]
    fn address_below_base_rejected() {
        let mut buffer = vec![0_u8; 64];
        buffer[0..2].copy_from_slice(&vt::VT_LPWSTR.to_le_bytes());
        buffer[8..12].copy_from_slice(&0x10_u32.to_le_bytes());

        let err = decode_rows(&buffer, &layout(), &binding(), 1).unwrap_err();
        assert_eq!(err, DecodeError::BadAddress(0x10));
    }

    #[test]
    fn unterminated_string_rejected() {
        let mut buffer = vec![b'a'; 64];
        buffer[0..2].copy_from_slice(&vt::VT_LPWSTR.to_le_bytes());
        buffer[8..12].copy_from_slice(&0x1020_u32.to_le_bytes());
        buffer[16] = store_status::OK;

        let err = decode_rows(&buffer, &layout(), &binding(), 1).unwrap_err();
        assert_eq!(err, DecodeError::Unterminated(0x20));
    }

    #[test]
    fn row_past_buffer_rejected() {
        let buffer = vec![0_u8; 10];
        assert!(matches!(
            decode_rows(&buffer, &layout(), &binding(), 1),
            Err(DecodeError::OutOfBounds { .. })
        ));
    }
}
