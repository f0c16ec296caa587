use bincode::{Decode, Encode};

use crate::{
    props::PropertyId,
    restriction::{Restriction, SortKey},
    rowset::{ColumnBinding, encoder::SEEK_DESCRIPTION_SIZE},
};

use super::MessageKind;

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ConnectIn {
    pub client_version: u32,
    pub is_remote: bool,
    pub machine: String,
    pub user: String,
    pub catalog: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct RowsetOptions {
    /// Zero means no limit.
    pub max_results: u32,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CreateQueryIn {
    /// `file://host/share/dir` or `\\host\share\dir`.
    pub scope: String,
    pub restriction: Option<Restriction>,
    pub sort: Vec<SortKey>,
    pub groupings: u32,
    pub columns: Vec<PropertyId>,
    pub options: RowsetOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SetBindingsIn {
    pub cursor: u32,
    pub row_width: u32,
    pub columns: Vec<ColumnBinding>,
}

/// Where a fetch starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub enum SeekDescription {
    /// Continue from the cursor's stored position.
    #[default]
    None,
    Next {
        skip: u32,
    },
    At {
        bookmark: u32,
        skip: u32,
    },
    AtRatio {
        numerator: u32,
        denominator: u32,
    },
    ByBookmark {
        bookmark: u32,
    },
}

impl SeekDescription {
    /// Seek type code as it appears next to a seek description on the wire.
    pub fn code(&self) -> u32 {
        match self {
            SeekDescription::None => 0,
            SeekDescription::Next { .. } => 1,
            SeekDescription::At { .. } => 2,
            SeekDescription::AtRatio { .. } => 3,
            SeekDescription::ByBookmark { .. } => 4,
        }
    }

    /// Fixed 12 byte form placed in front of the rows of a fetch response.
    pub fn to_bytes(&self) -> [u8; SEEK_DESCRIPTION_SIZE] {
        let words = match *self {
            SeekDescription::None => [0, 0, 0],
            SeekDescription::Next { skip } => [skip, 0, 0],
            SeekDescription::At { bookmark, skip } => [bookmark, skip, 0],
            SeekDescription::AtRatio {
                numerator,
                denominator,
            } => [numerator, denominator, 0],
            SeekDescription::ByBookmark { bookmark } => [1, bookmark, 0],
        };

        let mut out = [0; SEEK_DESCRIPTION_SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(code: u32, bytes: &[u8; SEEK_DESCRIPTION_SIZE]) -> Option<Self> {
        let word = |i: usize| {
            u32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        Some(match code {
            0 => SeekDescription::None,
            1 => SeekDescription::Next { skip: word(0) },
            2 => SeekDescription::At {
                bookmark: word(0),
                skip: word(1),
            },
            3 => SeekDescription::AtRatio {
                numerator: word(0),
                denominator: word(1),
            },
            4 => SeekDescription::ByBookmark { bookmark: word(1) },
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct GetRowsIn {
    pub cursor: u32,
    pub rows_to_transfer: u32,
    pub row_width: u32,
    /// Size of the client's row buffer.
    pub read_buffer: u32,
    /// Address the client maps the response at.
    pub client_base: u32,
    /// Offset of the row data within the response.
    pub reserved: u32,
    pub fetch_backwards: bool,
    pub chapter: u32,
    pub seek: SeekDescription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct FreeCursorIn {
    pub cursor: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct GetRatioFinishedIn {
    pub cursor: u32,
    pub quick: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct GetQueryStatusExIn {
    pub cursor: u32,
    pub bookmark: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct RestartPositionIn {
    pub cursor: u32,
    pub chapter: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct SetScopePrioritizationIn {
    pub priority: u32,
    pub event_frequency: u32,
}

/// Decoded request body. The kind travels in the PDU header; kinds this
/// server does not implement keep their kind and drop the body.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Connect(ConnectIn),
    Disconnect,
    CreateQuery(CreateQueryIn),
    FreeCursor(FreeCursorIn),
    GetRows(GetRowsIn),
    RatioFinished(GetRatioFinishedIn),
    SetBindings(SetBindingsIn),
    GetQueryStatus,
    GetQueryStatusEx(GetQueryStatusExIn),
    RestartPosition(RestartPositionIn),
    GetRowsetNotify,
    SetScopePrioritization(SetScopePrioritizationIn),
    GetScopeStatistics,
    Unhandled(MessageKind),
}

impl Request {
    pub fn kind(&self) -> MessageKind {
        match self {
            Request::Connect(_) => MessageKind::Connect,
            Request::Disconnect => MessageKind::Disconnect,
            Request::CreateQuery(_) => MessageKind::CreateQuery,
            Request::FreeCursor(_) => MessageKind::FreeCursor,
            Request::GetRows(_) => MessageKind::GetRows,
            Request::RatioFinished(_) => MessageKind::RatioFinished,
            Request::SetBindings(_) => MessageKind::SetBindings,
            Request::GetQueryStatus => MessageKind::GetQueryStatus,
            Request::GetQueryStatusEx(_) => MessageKind::GetQueryStatusEx,
            Request::RestartPosition(_) => MessageKind::RestartPosition,
            Request::GetRowsetNotify => MessageKind::GetRowsetNotify,
            Request::SetScopePrioritization(_) => MessageKind::SetScopePrioritization,
            Request::GetScopeStatistics => MessageKind::GetScopeStatistics,
            Request::Unhandled(kind) => *kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_at_bytes() {
        let seek = SeekDescription::At {
            bookmark: 0xFFFF_FFFC,
            skip: 3,
        };
        let bytes = seek.to_bytes();
        assert_eq!(&bytes[..4], &[0xFC, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&bytes[4..8], &[3, 0, 0, 0]);
        assert_eq!(&bytes[8..], &[0; 4]);
        assert_eq!(SeekDescription::from_bytes(seek.code(), &bytes), Some(seek));
    }

    #[test]
    fn unknown_seek_code() {
        assert_eq!(SeekDescription::from_bytes(9, &[0; 12]), None);
    }

    #[test]
    fn request_kind() {
        assert_eq!(Request::GetQueryStatus.kind(), MessageKind::GetQueryStatus);
        assert_eq!(
            Request::Unhandled(MessageKind::CiState).kind(),
            MessageKind::CiState
        );
    }
}
