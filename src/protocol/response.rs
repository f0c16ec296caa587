use bincode::{Decode, Encode};

use super::MessageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct ConnectOut {
    pub server_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CreateQueryOut {
    pub true_sequential: bool,
    pub work_id_unique: bool,
    pub cursors: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct FreeCursorOut {
    pub cursors_remaining: u32,
}

/// Fixed part of a fetch response. The row buffer follows it, prefixed by a
/// 12 byte seek description when `seek_type` is non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct GetRowsOut {
    pub rows_returned: u32,
    pub seek_type: u32,
    pub chapter: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct RatioFinishedOut {
    pub numerator: u32,
    pub denominator: u32,
    pub rows: u32,
    pub new_rows: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct QueryStatusOut {
    pub status: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct QueryStatusExOut {
    pub status: u32,
    pub filtered_documents: u32,
    pub documents_to_filter: u32,
    pub ratio_numerator: u32,
    pub ratio_denominator: u32,
    /// Row index of the bookmark named in the request.
    pub bookmark_position: u32,
    pub row_count: u32,
    pub results_found: u32,
    pub max_rank: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct RowsetNotifyOut {
    pub more_events: bool,
    pub event_type: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct ScopeStatisticsOut {
    pub indexed_items: u32,
    pub outstanding_adds: u32,
    pub outstanding_modifies: u32,
}

/// Response body. Failed requests and kinds without an out record answer with
/// [`Response::Empty`], a bare header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Empty,
    Connect(ConnectOut),
    CreateQuery(CreateQueryOut),
    FreeCursor(FreeCursorOut),
    GetRows(GetRowsOut),
    RatioFinished(RatioFinishedOut),
    QueryStatus(QueryStatusOut),
    QueryStatusEx(QueryStatusExOut),
    RowsetNotify(RowsetNotifyOut),
    ScopeStatistics(ScopeStatisticsOut),
}

impl Response {
    /// Whether a successful response to `kind` carries an out record.
    pub fn has_body(kind: MessageKind) -> bool {
        matches!(
            kind,
            MessageKind::Connect
                | MessageKind::CreateQuery
                | MessageKind::FreeCursor
                | MessageKind::GetRows
                | MessageKind::RatioFinished
                | MessageKind::GetQueryStatus
                | MessageKind::GetQueryStatusEx
                | MessageKind::GetRowsetNotify
                | MessageKind::GetScopeStatistics
        )
    }
}
