use bincode::{Decode, Encode};
use thiserror::Error;

use crate::props::PropertyId;

use super::encoder::{LENGTH_SIZE, STATUS_SIZE, VARIANT_SIZE};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("row width must be non-zero")]
    ZeroWidth,

    #[error("column {column} {field} field at offset {offset} overruns row width {row_width}")]
    FieldOutOfRow {
        column: usize,
        field: &'static str,
        offset: u32,
        row_width: u32,
    },

    #[error("binding has no columns")]
    NoColumns,
}

/// Layout of one bound column inside a fixed width row record. An offset of
/// `None` means the client did not ask for that field.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ColumnBinding {
    pub property: PropertyId,
    pub vtype: u16,
    pub value: Option<u16>,
    pub status: Option<u16>,
    pub length: Option<u16>,
}

impl ColumnBinding {
    pub fn new(property: PropertyId, vtype: u16) -> Self {
        Self {
            property,
            vtype,
            value: None,
            status: None,
            length: None,
        }
    }

    pub fn value_at(mut self, offset: u16) -> Self {
        self.value = Some(offset);
        self
    }

    pub fn status_at(mut self, offset: u16) -> Self {
        self.status = Some(offset);
        self
    }

    pub fn length_at(mut self, offset: u16) -> Self {
        self.length = Some(offset);
        self
    }
}

/// Validated column layout for a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    row_width: u32,
    columns: Vec<ColumnBinding>,
}

impl Binding {
    pub fn new(row_width: u32, columns: Vec<ColumnBinding>) -> Result<Self, BindingError> {
        if row_width == 0 {
            return Err(BindingError::ZeroWidth);
        }
        if columns.is_empty() {
            return Err(BindingError::NoColumns);
        }

        for (column, binding) in columns.iter().enumerate() {
            let fields = [
                ("value", binding.value, VARIANT_SIZE),
                ("status", binding.status, STATUS_SIZE),
                ("length", binding.length, LENGTH_SIZE),
            ];
            for (field, offset, size) in fields {
                if let Some(offset) = offset {
                    if u32::from(offset) + size as u32 > row_width {
                        return Err(BindingError::FieldOutOfRow {
                            column,
                            field,
                            offset: u32::from(offset),
                            row_width,
                        });
                    }
                }
            }
        }

        Ok(Self { row_width, columns })
    }

    pub fn row_width(&self) -> u32 {
        self.row_width
    }

    pub fn columns(&self) -> &[ColumnBinding] {
        &self.columns
    }
}

#[cfg(test)]
mod tests {
    use crate::{props, rowset::vt};

    use super::*;

    #[test]
    fn accepts_fields_inside_row() {
        let binding = Binding::new(
            24,
            vec![
                ColumnBinding::new(props::SIZE, vt::VT_VARIANT)
                    .value_at(0)
                    .status_at(16)
                    .length_at(20),
            ],
        )
        .unwrap();
        assert_eq!(binding.row_width(), 24);
        assert_eq!(binding.columns().len(), 1);
    }

    #[test]
    fn rejects_value_past_row_end() {
        let err = Binding::new(
            20,
            vec![ColumnBinding::new(props::SIZE, vt::VT_VARIANT).value_at(8)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BindingError::FieldOutOfRow { field: "value", .. }
        ));
    }

    #[test]
    fn rejects_length_past_row_end() {
        let err = Binding::new(
            16,
            vec![ColumnBinding::new(props::SIZE, vt::VT_VARIANT).length_at(14)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BindingError::FieldOutOfRow {
                field: "length",
                ..
            }
        ));
    }

    #[test]
    fn rejects_empty_and_zero_width() {
        assert_eq!(Binding::new(0, vec![]), Err(BindingError::ZeroWidth));
        assert_eq!(Binding::new(8, vec![]), Err(BindingError::NoColumns));
    }
}
