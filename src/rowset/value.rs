use std::{cmp::Ordering, fmt};

use bincode::{Decode, Encode};

use super::vt::*;

/// A typed column value.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Value {
    Empty,
    Bool(bool),
    I1(i8),
    UI1(u8),
    I2(i16),
    UI2(u16),
    I4(i32),
    UI4(u32),
    I8(i64),
    UI8(u64),
    R4(f32),
    R8(f64),
    /// OLE automation date: days since 1899-12-30.
    Date(f64),
    /// 100ns intervals since 1601-01-01.
    FileTime(u64),
    Str(String),
    StrVector(Vec<String>),
}

const VARIANT_TRUE: i16 = -1;

impl Value {
    pub fn vtype(&self) -> u16 {
        match self {
            Value::Empty => VT_EMPTY,
            Value::Bool(_) => VT_BOOL,
            Value::I1(_) => VT_I1,
            Value::UI1(_) => VT_UI1,
            Value::I2(_) => VT_I2,
            Value::UI2(_) => VT_UI2,
            Value::I4(_) => VT_I4,
            Value::UI4(_) => VT_UI4,
            Value::I8(_) => VT_I8,
            Value::UI8(_) => VT_UI8,
            Value::R4(_) => VT_R4,
            Value::R8(_) => VT_R8,
            Value::Date(_) => VT_DATE,
            Value::FileTime(_) => VT_FILETIME,
            Value::Str(_) => VT_LPWSTR,
            Value::StrVector(_) => VT_VECTOR | VT_LPWSTR,
        }
    }

    /// Values whose data lives in the variable region of a row buffer.
    pub fn is_variable(&self) -> bool {
        matches!(self, Value::Str(_) | Value::StrVector(_))
    }

    /// The 8 byte inline representation of a fixed width value.
    pub(crate) fn inline_bytes(&self) -> Option<[u8; 8]> {
        let mut out = [0_u8; 8];
        match self {
            Value::Empty => {}
            Value::Bool(b) => {
                let v: i16 = if *b { VARIANT_TRUE } else { 0 };
                out[..2].copy_from_slice(&v.to_le_bytes());
            }
            Value::I1(v) => out[..1].copy_from_slice(&v.to_le_bytes()),
            Value::UI1(v) => out[..1].copy_from_slice(&v.to_le_bytes()),
            Value::I2(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            Value::UI2(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            Value::I4(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Value::UI4(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Value::R4(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Value::I8(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::UI8(v) | Value::FileTime(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::R8(v) | Value::Date(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::Str(_) | Value::StrVector(_) => return None,
        }
        Some(out)
    }

    /// Inverse of [`Value::inline_bytes`].
    pub(crate) fn from_inline(vtype: u16, bytes: [u8; 8]) -> Option<Value> {
        let b = bytes;
        Some(match vtype {
            VT_EMPTY => Value::Empty,
            VT_BOOL => Value::Bool(i16::from_le_bytes([b[0], b[1]]) != 0),
            VT_I1 => Value::I1(i8::from_le_bytes([b[0]])),
            VT_UI1 => Value::UI1(b[0]),
            VT_I2 => Value::I2(i16::from_le_bytes([b[0], b[1]])),
            VT_UI2 => Value::UI2(u16::from_le_bytes([b[0], b[1]])),
            VT_I4 => Value::I4(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            VT_UI4 => Value::UI4(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            VT_R4 => Value::R4(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            VT_I8 => Value::I8(i64::from_le_bytes(b)),
            VT_UI8 => Value::UI8(u64::from_le_bytes(b)),
            VT_FILETIME => Value::FileTime(u64::from_le_bytes(b)),
            VT_R8 => Value::R8(f64::from_le_bytes(b)),
            VT_DATE => Value::Date(f64::from_le_bytes(b)),
            _ => return None,
        })
    }

    fn as_f64(&self) -> Option<f64> {
        Some(match self {
            Value::I1(v) => f64::from(*v),
            Value::UI1(v) => f64::from(*v),
            Value::I2(v) => f64::from(*v),
            Value::UI2(v) => f64::from(*v),
            Value::I4(v) => f64::from(*v),
            Value::UI4(v) => f64::from(*v),
            Value::I8(v) => *v as f64,
            Value::UI8(v) | Value::FileTime(v) => *v as f64,
            Value::R4(v) => f64::from(*v),
            Value::R8(v) | Value::Date(v) => *v,
            _ => return None,
        })
    }

    /// Orders two values for restriction evaluation and sorting. Numbers
    /// compare across widths, strings compare case-insensitively.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Empty, Value::Empty) => Some(Ordering::Equal),
            (Value::StrVector(a), Value::StrVector(b)) => Some(a.cmp(b)),
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }

    /// Strings a content restriction can match against.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            Value::Str(s) => vec![s.as_str()],
            Value::StrVector(v) => v.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => write!(f, "-"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::I1(v) => write!(f, "{v}"),
            Value::UI1(v) => write!(f, "{v}"),
            Value::I2(v) => write!(f, "{v}"),
            Value::UI2(v) => write!(f, "{v}"),
            Value::I4(v) => write!(f, "{v}"),
            Value::UI4(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}"),
            Value::UI8(v) => write!(f, "{v}"),
            Value::R4(v) => write!(f, "{v}"),
            Value::R8(v) | Value::Date(v) => write!(f, "{v}"),
            Value::FileTime(v) => write!(f, "{v:#x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::StrVector(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_round_trip() {
        let values = vec![
            Value::Bool(true),
            Value::I1(-5),
            Value::UI2(65000),
            Value::I4(-123_456),
            Value::UI8(u64::MAX),
            Value::R4(1.5),
            Value::Date(45_000.25),
            Value::FileTime(133_000_000_000_000_000),
        ];
        for value in values {
            let bytes = value.inline_bytes().unwrap();
            assert_eq!(Value::from_inline(value.vtype(), bytes), Some(value));
        }
    }

    #[test]
    fn strings_are_not_inline() {
        assert!(Value::Str("a".into()).inline_bytes().is_none());
        assert!(Value::StrVector(vec![]).is_variable());
    }

    #[test]
    fn bool_uses_variant_true() {
        assert_eq!(&Value::Bool(true).inline_bytes().unwrap()[..2], &[0xFF, 0xFF]);
    }

    #[test]
    fn display() {
        assert_eq!(Value::Empty.to_string(), "-");
        assert_eq!(Value::I4(-3).to_string(), "-3");
        assert_eq!(
            Value::StrVector(vec!["a".into(), "b".into()]).to_string(),
            "[a, b]"
        );
    }

    #[test]
    fn numbers_compare_across_widths() {
        assert_eq!(
            Value::I4(10).compare(&Value::UI8(9)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Str("ABC".into()).compare(&Value::Str("abc".into())),
            Some(Ordering::Equal)
        );
        assert_eq!(Value::Str("a".into()).compare(&Value::I4(1)), None);
    }
}
