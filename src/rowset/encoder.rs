//! Row buffer encoder.
//!
//! [`encode_rows`] packs backend rows into the layout described by a
//! [`Binding`]. Fixed records grow from offset zero, string data grows down from
//! the end of the buffer. When a row's string data would reach into the fixed
//! records, that row and every row after it are dropped: the buffer never grows
//! and nothing is written outside `[0, buffer_length)`.
//!
//! The output carries [`SEEK_DESCRIPTION_SIZE`] bytes of leading padding so a
//! seek description can be placed in front of the rows without moving them;
//! [`EncodedRows::finish`] fills or trims that padding.
use std::ops::Range;

use log::trace;
use thiserror::Error;

use super::{Binding, Row, Value, store_status, vt};

pub const VARIANT_SIZE: usize = 16;
pub const STATUS_SIZE: usize = 1;
pub const LENGTH_SIZE: usize = 4;
pub const ADDRESS_SIZE: usize = 4;
/// Offset of the data half of a variant slot.
pub const VARIANT_DATA: usize = 8;
pub const SEEK_DESCRIPTION_SIZE: usize = 12;
/// Length reported for every bound column.
pub const DEFAULT_LENGTH: u32 = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("write of {len} bytes at offset {offset} exceeds buffer length {capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
}

/// Offset relative to the start of the row region of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalOffset(u32);

impl LocalOffset {
    pub fn new(offset: u32) -> Self {
        Self(offset)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// Address in the client's address space, as stored in variant slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientAddress(u32);

impl ClientAddress {
    pub fn new(address: u32) -> Self {
        Self(address)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// Client supplied geometry of one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLayout {
    pub buffer_length: u32,
    pub row_width: u32,
    /// Offset of the row data within the response message.
    pub reserved: u32,
    /// Base address the client will load the response at.
    pub client_base: u32,
}

impl RowLayout {
    pub fn to_client(&self, local: LocalOffset) -> ClientAddress {
        ClientAddress(
            local
                .0
                .wrapping_add(self.client_base)
                .wrapping_add(self.reserved),
        )
    }

    pub fn to_local(&self, address: ClientAddress) -> Option<LocalOffset> {
        address
            .0
            .checked_sub(self.client_base)?
            .checked_sub(self.reserved)
            .map(LocalOffset)
    }
}

/// Bounds checked writer over the row region.
struct RegionWriter<'a> {
    buf: &'a mut [u8],
}

impl<'a> RegionWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    fn put(&mut self, offset: usize, bytes: &[u8]) -> Result<(), EncodeError> {
        let capacity = self.buf.len();
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= capacity)
            .ok_or(EncodeError::OutOfBounds {
                offset,
                len: bytes.len(),
                capacity,
            })?;
        self.buf[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn put_u8(&mut self, offset: usize, v: u8) -> Result<(), EncodeError> {
        self.put(offset, &[v])
    }

    fn put_u16(&mut self, offset: usize, v: u16) -> Result<(), EncodeError> {
        self.put(offset, &v.to_le_bytes())
    }

    fn put_u32(&mut self, offset: usize, v: u32) -> Result<(), EncodeError> {
        self.put(offset, &v.to_le_bytes())
    }

    fn put_utf16(&mut self, offset: usize, units: &[u16]) -> Result<(), EncodeError> {
        let bytes = units.iter().flat_map(|u| u.to_le_bytes()).collect::<Vec<u8>>();
        self.put(offset, &bytes)
    }

    fn clear(&mut self, range: Range<usize>) {
        let end = range.end.min(self.buf.len());
        let start = range.start.min(end);
        self.buf[start..end].fill(0);
    }
}

/// Output of [`encode_rows`].
#[derive(Debug)]
pub struct EncodedRows {
    bytes: Vec<u8>,
    pub rows_returned: u32,
    /// Rows were dropped for lack of space rather than for lack of results.
    pub truncated: bool,
}

impl EncodedRows {
    /// Produces the final row blob. With a seek description the reserved
    /// padding carries it; without one the padding is removed.
    pub fn finish(mut self, seek: Option<[u8; SEEK_DESCRIPTION_SIZE]>) -> Vec<u8> {
        match seek {
            Some(seek) => {
                self.bytes[..SEEK_DESCRIPTION_SIZE].copy_from_slice(&seek);
            }
            None => {
                self.bytes.drain(..SEEK_DESCRIPTION_SIZE);
            }
        }
        self.bytes
    }

    /// The row region, without the leading padding.
    pub fn rows(&self) -> &[u8] {
        &self.bytes[SEEK_DESCRIPTION_SIZE..]
    }
}

enum RowFit {
    Complete,
    NoSpace,
}

/// UTF-16 code units of `s` followed by a terminator.
fn utf16z(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Moves the variable region down by `needed` bytes, refusing to reach the
/// end of the current fixed record.
fn reserve(var_end: &mut usize, needed: usize, row_end: usize) -> Option<usize> {
    let at = var_end.checked_sub(needed)?;
    if at <= row_end {
        return None;
    }
    *var_end = at;
    Some(at)
}

fn local(offset: usize) -> LocalOffset {
    // Offsets never exceed the buffer length, which is a u32.
    LocalOffset(offset as u32)
}

fn write_row(
    writer: &mut RegionWriter<'_>,
    layout: &RowLayout,
    binding: &Binding,
    row: &Row,
    row_start: usize,
    var_end: &mut usize,
) -> Result<RowFit, EncodeError> {
    let row_end = row_start + layout.row_width as usize;

    for column in binding.columns() {
        let value = row
            .get(&column.property)
            .filter(|v| !matches!(v, Value::Empty));

        if let Some(offset) = column.status {
            let status = if value.is_some() {
                store_status::OK
            } else {
                store_status::NULL
            };
            writer.put_u8(row_start + offset as usize, status)?;
        }
        if let Some(offset) = column.length {
            writer.put_u32(row_start + offset as usize, DEFAULT_LENGTH)?;
        }

        let Some(offset) = column.value else {
            continue;
        };
        let slot = row_start + offset as usize;

        match value {
            None => writer.put_u16(slot, vt::VT_EMPTY)?,
            Some(Value::Str(s)) => {
                let units = utf16z(s);
                let Some(at) = reserve(var_end, units.len() * 2, row_end) else {
                    return Ok(RowFit::NoSpace);
                };
                writer.put_utf16(at, &units)?;
                writer.put_u16(slot, vt::VT_LPWSTR)?;
                writer.put_u32(slot + VARIANT_DATA, layout.to_client(local(at)).get())?;
            }
            Some(Value::StrVector(items)) => {
                let encoded = items.iter().map(|s| utf16z(s)).collect::<Vec<_>>();
                let text: usize = encoded.iter().map(|u| u.len() * 2).sum();
                let needed = encoded.len() * ADDRESS_SIZE + text;
                let Some(at) = reserve(var_end, needed, row_end) else {
                    return Ok(RowFit::NoSpace);
                };

                let mut cursor = at + encoded.len() * ADDRESS_SIZE;
                for (i, units) in encoded.iter().enumerate() {
                    let address = layout.to_client(local(cursor)).get();
                    writer.put_u32(at + i * ADDRESS_SIZE, address)?;
                    writer.put_utf16(cursor, units)?;
                    cursor += units.len() * 2;
                }

                writer.put_u16(slot, vt::VT_VECTOR | vt::VT_LPWSTR)?;
                writer.put_u32(slot + VARIANT_DATA, encoded.len() as u32)?;
                writer.put_u32(
                    slot + VARIANT_DATA + ADDRESS_SIZE,
                    layout.to_client(local(at)).get(),
                )?;
            }
            Some(value) => {
                let inline = value.inline_bytes().unwrap_or_default();
                writer.put_u16(slot, value.vtype())?;
                writer.put(slot + VARIANT_DATA, &inline)?;
            }
        }
    }

    Ok(RowFit::Complete)
}

/// Packs `rows` into a buffer of `layout.buffer_length` bytes.
///
/// Rows are written in order until one does not fit, either because its fixed
/// record would collide with the variable region or because its string data
/// would reach its fixed record. The returned count covers only rows written
/// completely.
pub fn encode_rows(
    layout: RowLayout,
    binding: &Binding,
    rows: &[Row],
) -> Result<EncodedRows, EncodeError> {
    debug_assert_eq!(layout.row_width, binding.row_width());

    let capacity = layout.buffer_length as usize;
    let row_width = layout.row_width as usize;
    let mut bytes = vec![0_u8; SEEK_DESCRIPTION_SIZE + capacity];
    let mut writer = RegionWriter::new(&mut bytes[SEEK_DESCRIPTION_SIZE..]);

    let mut var_end = capacity;
    let mut written = 0_u32;
    let mut truncated = false;

    for (i, row) in rows.iter().enumerate() {
        let row_start = i * row_width;
        if row_start + row_width > var_end {
            trace!("row {i} fixed record does not fit, stopping");
            truncated = true;
            break;
        }

        let mark = var_end;
        match write_row(&mut writer, &layout, binding, row, row_start, &mut var_end)? {
            RowFit::Complete => written += 1,
            RowFit::NoSpace => {
                trace!("row {i} variable data does not fit, stopping");
                writer.clear(row_start..mark);
                truncated = true;
                break;
            }
        }
    }

    trace!(
        "encoded {written} of {} rows, variable region starts at {var_end}",
        rows.len()
    );

    Ok(EncodedRows {
        bytes,
        rows_returned: written,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::{
        props::{self, PropertyId},
        rowset::{ColumnBinding, decoder::decode_rows},
    };

    use super::*;

    const BASE: u32 = 0x0010_0000;
    const RESERVED: u32 = 40;

    fn packed_binding(columns: &[PropertyId]) -> Binding {
        let columns = columns
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let at = (i * 24) as u16;
                ColumnBinding::new(p.clone(), vt::VT_VARIANT)
                    .value_at(at)
                    .status_at(at + 16)
                    .length_at(at + 20)
            })
            .collect::<Vec<_>>();
        Binding::new(24 * columns.len() as u32, columns).unwrap()
    }

    fn layout(binding: &Binding, buffer_length: u32) -> RowLayout {
        RowLayout {
            buffer_length,
            row_width: binding.row_width(),
            reserved: RESERVED,
            client_base: BASE,
        }
    }

    fn named(i: u32, name: &str) -> Row {
        Row::new(i)
            .with(props::RANK, Value::I4(i as i32 * 10))
            .with(props::FILE_NAME, Value::Str(name.into()))
    }

    #[test]
    fn fixed_value_layout() {
        let binding = packed_binding(&[props::RANK]);
        let encoded = encode_rows(
            layout(&binding, 256),
            &binding,
            &[Row::new(1).with(props::RANK, Value::I4(-2))],
        )
        .unwrap();
        let rows = encoded.rows();

        assert_eq!(encoded.rows_returned, 1);
        assert_eq!(&rows[0..2], &vt::VT_I4.to_le_bytes());
        assert_eq!(&rows[8..12], &(-2_i32).to_le_bytes());
        assert_eq!(rows[16], store_status::OK);
        assert_eq!(&rows[20..24], &DEFAULT_LENGTH.to_le_bytes());
    }

    #[test]
    fn string_lands_at_buffer_end() {
        let binding = packed_binding(&[props::FILE_NAME]);
        let encoded = encode_rows(
            layout(&binding, 128),
            &binding,
            &[Row::new(1).with(props::FILE_NAME, Value::Str("ab".into()))],
        )
        .unwrap();
        let rows = encoded.rows();

        // "ab\0" is 6 bytes, so it starts 6 bytes before the end.
        assert_eq!(&rows[122..128], &[b'a', 0, b'b', 0, 0, 0]);
        let address = u32::from_le_bytes(rows[8..12].try_into().unwrap());
        assert_eq!(address, 122 + BASE + RESERVED);
    }

    #[test]
    fn missing_value_is_null() {
        let binding = packed_binding(&[props::SIZE]);
        let encoded = encode_rows(layout(&binding, 64), &binding, &[Row::new(1)]).unwrap();
        let rows = encoded.rows();

        assert_eq!(encoded.rows_returned, 1);
        assert_eq!(&rows[0..2], &vt::VT_EMPTY.to_le_bytes());
        assert_eq!(rows[16], store_status::NULL);
    }

    #[test]
    fn vector_slots_precede_text() {
        let binding = packed_binding(&[props::KIND]);
        let encoded = encode_rows(
            layout(&binding, 128),
            &binding,
            &[Row::new(1).with(props::KIND, Value::StrVector(vec!["doc".into()]))],
        )
        .unwrap();
        let rows = encoded.rows();

        // 4 byte slot + "doc\0" (8 bytes) from the end.
        let at = 128 - 12;
        assert_eq!(&rows[0..2], &(vt::VT_VECTOR | vt::VT_LPWSTR).to_le_bytes());
        assert_eq!(u32::from_le_bytes(rows[8..12].try_into().unwrap()), 1);
        assert_eq!(
            u32::from_le_bytes(rows[12..16].try_into().unwrap()),
            at as u32 + BASE + RESERVED
        );
        assert_eq!(
            u32::from_le_bytes(rows[at..at + 4].try_into().unwrap()),
            (at + 4) as u32 + BASE + RESERVED
        );
    }

    #[test]
    fn truncates_when_strings_reach_records() {
        let binding = packed_binding(&[props::RANK, props::FILE_NAME]);
        let rows = vec![named(1, "first"), named(2, "second"), named(3, "third")];
        // Two 48 byte records plus two short names fit, the third does not.
        let encoded = encode_rows(layout(&binding, 130), &binding, &rows).unwrap();

        assert_eq!(encoded.rows_returned, 2);
        assert!(encoded.truncated);
    }

    #[test]
    fn aborted_row_leaves_no_data() {
        let binding = packed_binding(&[props::RANK, props::FILE_NAME]);
        let rows = vec![named(1, "a"), named(2, &"x".repeat(100))];
        let encoded = encode_rows(layout(&binding, 120), &binding, &rows).unwrap();

        assert_eq!(encoded.rows_returned, 1);
        assert!(encoded.rows()[48..116].iter().all(|b| *b == 0));
    }

    #[test]
    fn everything_fits_is_not_truncated() {
        let binding = packed_binding(&[props::RANK, props::FILE_NAME]);
        let rows = vec![named(1, "a"), named(2, "b")];
        let encoded = encode_rows(layout(&binding, 512), &binding, &rows).unwrap();

        assert_eq!(encoded.rows_returned, 2);
        assert!(!encoded.truncated);
    }

    #[test]
    fn buffer_smaller_than_record() {
        let binding = packed_binding(&[props::RANK]);
        let encoded =
            encode_rows(layout(&binding, 10), &binding, &[named(1, "a")]).unwrap();
        assert_eq!(encoded.rows_returned, 0);
        assert!(encoded.truncated);
    }

    #[test]
    fn finish_trims_or_fills_padding() {
        let binding = packed_binding(&[props::RANK]);
        let rows = [named(1, "a")];

        let trimmed = encode_rows(layout(&binding, 64), &binding, &rows)
            .unwrap()
            .finish(None);
        assert_eq!(trimmed.len(), 64);

        let seek = [7_u8; SEEK_DESCRIPTION_SIZE];
        let filled = encode_rows(layout(&binding, 64), &binding, &rows)
            .unwrap()
            .finish(Some(seek));
        assert_eq!(filled.len(), 64 + SEEK_DESCRIPTION_SIZE);
        assert_eq!(&filled[..SEEK_DESCRIPTION_SIZE], &seek);
    }

    #[test]
    fn round_trip_every_type() {
        let columns = vec![
            PropertyId::new(props::PSGUID_QUERY, 100),
            PropertyId::new(props::PSGUID_QUERY, 101),
            PropertyId::new(props::PSGUID_QUERY, 102),
            PropertyId::new(props::PSGUID_QUERY, 103),
            PropertyId::new(props::PSGUID_QUERY, 104),
            PropertyId::new(props::PSGUID_QUERY, 105),
            PropertyId::new(props::PSGUID_QUERY, 106),
            PropertyId::new(props::PSGUID_QUERY, 107),
            PropertyId::new(props::PSGUID_QUERY, 108),
            PropertyId::new(props::PSGUID_QUERY, 109),
            PropertyId::new(props::PSGUID_QUERY, 110),
            PropertyId::new(props::PSGUID_QUERY, 111),
            PropertyId::new(props::PSGUID_QUERY, 112),
            PropertyId::new(props::PSGUID_QUERY, 113),
            PropertyId::new(props::PSGUID_QUERY, 114),
        ];
        let values = vec![
            Value::Bool(false),
            Value::I1(-1),
            Value::UI1(200),
            Value::I2(-300),
            Value::UI2(60_000),
            Value::I4(i32::MIN),
            Value::UI4(u32::MAX),
            Value::I8(-9_000_000_000),
            Value::UI8(18_000_000_000),
            Value::R4(-0.5),
            Value::R8(1e100),
            Value::Date(45_123.5),
            Value::FileTime(133_500_000_000_000_000),
            Value::Str("h\u{e9}llo w\u{f6}rld \u{1F600}".into()),
            Value::StrVector(vec!["one".into(), "two".into(), String::new()]),
        ];
        let row = columns
            .iter()
            .cloned()
            .zip(values.iter().cloned())
            .fold(Row::new(1), |row, (p, v)| row.with(p, v));

        let binding = packed_binding(&columns);
        let layout = layout(&binding, 2048);
        let encoded = encode_rows(layout, &binding, &[row.clone(), row]).unwrap();
        assert_eq!(encoded.rows_returned, 2);

        let decoded = decode_rows(encoded.rows(), &layout, &binding, 2).unwrap();
        assert_eq!(decoded, vec![values.clone(), values]);
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i32>().prop_map(Value::I4),
            any::<u64>().prop_map(Value::UI8),
            any::<bool>().prop_map(Value::Bool),
            ".{0,300}".prop_map(Value::Str),
            prop::collection::vec(".{0,40}", 0..4).prop_map(Value::StrVector),
            Just(Value::Empty),
        ]
    }

    proptest! {
        #[test]
        fn never_exceeds_buffer(
            buffer_length in 0_u32..2048,
            row_width in 1_u32..96,
            offsets in prop::collection::vec((0_u16..96, 0_u16..96, 0_u16..96), 1..4),
            rows in prop::collection::vec(prop::collection::vec(value_strategy(), 4), 0..12),
        ) {
            let columns = offsets
                .iter()
                .enumerate()
                .map(|(i, (v, s, l))| ColumnBinding {
                    property: PropertyId::new(props::PSGUID_QUERY, i as u32),
                    vtype: vt::VT_VARIANT,
                    value: (u32::from(*v) + VARIANT_SIZE as u32 <= row_width).then_some(*v),
                    status: (u32::from(*s) + STATUS_SIZE as u32 <= row_width).then_some(*s),
                    length: (u32::from(*l) + LENGTH_SIZE as u32 <= row_width).then_some(*l),
                })
                .collect::<Vec<_>>();
            let binding = Binding::new(row_width, columns).unwrap();
            let rows = rows
                .into_iter()
                .enumerate()
                .map(|(i, values)| {
                    values.into_iter().enumerate().fold(Row::new(i as u32), |row, (c, v)| {
                        row.with(PropertyId::new(props::PSGUID_QUERY, c as u32), v)
                    })
                })
                .collect::<Vec<_>>();
            let layout = RowLayout { buffer_length, row_width, reserved: 0, client_base: 0 };

            let encoded = encode_rows(layout, &binding, &rows).unwrap();
            prop_assert!(encoded.rows_returned as usize <= rows.len());
            prop_assert!(encoded.rows_returned * row_width <= buffer_length);
            prop_assert_eq!(encoded.rows().len(), buffer_length as usize);
            prop_assert_eq!(encoded.truncated, (encoded.rows_returned as usize) < rows.len());
            prop_assert_eq!(encoded.finish(None).len(), buffer_length as usize);
        }

        #[test]
        fn written_rows_decode_exactly(
            buffer_length in 0_u32..1024,
            rows in prop::collection::vec((any::<i32>(), "[a-zA-Z0-9 \u{e9}\u{1F600}]{0,64}"), 0..10),
        ) {
            let binding = packed_binding(&[props::RANK, props::FILE_NAME]);
            let layout = layout(&binding, buffer_length);
            let rows = rows
                .into_iter()
                .enumerate()
                .map(|(i, (rank, name))| {
                    Row::new(i as u32)
                        .with(props::RANK, Value::I4(rank))
                        .with(props::FILE_NAME, Value::Str(name))
                })
                .collect::<Vec<_>>();

            let encoded = encode_rows(layout, &binding, &rows).unwrap();
            let count = encoded.rows_returned;
            let decoded = decode_rows(encoded.rows(), &layout, &binding, count).unwrap();

            for (row, values) in rows.iter().zip(decoded) {
                prop_assert_eq!(row.get(&props::RANK), Some(&values[0]));
                prop_assert_eq!(row.get(&props::FILE_NAME), Some(&values[1]));
            }
        }
    }
}
