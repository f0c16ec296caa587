//! Row values and the binary row buffer.
//!
//! A fetch packs rows into a client supplied buffer. The buffer starts with one
//! fixed width record per row, laid out by the cursor's [`Binding`]; string data
//! does not fit in a fixed record and is written into a shared variable region
//! that grows from the end of the buffer towards the records.
//!
//! ```text
//!  0                                                            buffer_length
//!  +----------+----------+-----+---------------------+-------+-------+
//!  |  row 0   |  row 1   | ... |        free         | str 1 | str 0 |
//!  +----------+----------+-----+---------------------+-------+-------+
//!   row_width  row_width                              <- variable region
//! ```
//!
//! Every bound value occupies a 16 byte variant slot: a 2 byte type tag, 6 bytes
//! of padding and 8 bytes of data. Fixed width values are stored inline, string
//! values store the client-space address of their text.
//!
//! # See Also
//!
//! - [`encoder`]: packs rows into a buffer.
//! - [`decoder`]: reads a packed buffer back into values.
use std::collections::HashMap;

use crate::props::PropertyId;

mod binding;
pub mod decoder;
pub mod encoder;
mod value;

pub use binding::{Binding, BindingError, ColumnBinding};
pub use encoder::{ClientAddress, EncodeError, EncodedRows, LocalOffset, RowLayout, encode_rows};
pub use value::Value;

/// Variant type tags.
pub mod vt {
    pub const VT_EMPTY: u16 = 0x0000;
    pub const VT_NULL: u16 = 0x0001;
    pub const VT_I2: u16 = 0x0002;
    pub const VT_I4: u16 = 0x0003;
    pub const VT_R4: u16 = 0x0004;
    pub const VT_R8: u16 = 0x0005;
    pub const VT_DATE: u16 = 0x0007;
    pub const VT_BOOL: u16 = 0x000B;
    pub const VT_VARIANT: u16 = 0x000C;
    pub const VT_I1: u16 = 0x0010;
    pub const VT_UI1: u16 = 0x0011;
    pub const VT_UI2: u16 = 0x0012;
    pub const VT_UI4: u16 = 0x0013;
    pub const VT_I8: u16 = 0x0014;
    pub const VT_UI8: u16 = 0x0015;
    pub const VT_LPWSTR: u16 = 0x001F;
    pub const VT_FILETIME: u16 = 0x0040;
    pub const VT_VECTOR: u16 = 0x1000;
}

/// Per-column status byte.
pub mod store_status {
    pub const OK: u8 = 0;
    pub const DEFERRED: u8 = 1;
    pub const NULL: u8 = 2;
}

/// One result row as produced by a search backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub work_id: u32,
    pub values: HashMap<PropertyId, Value>,
}

impl Row {
    pub fn new(work_id: u32) -> Self {
        Self {
            work_id,
            values: HashMap::new(),
        }
    }

    pub fn with(mut self, property: PropertyId, value: Value) -> Self {
        self.values.insert(property, value);
        self
    }

    pub fn get(&self, property: &PropertyId) -> Option<&Value> {
        self.values.get(property)
    }
}
