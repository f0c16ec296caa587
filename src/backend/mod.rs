//! Search backends.
//!
//! The session engine never evaluates queries itself. It hands the compiled
//! query to a [`SearchBackend`] and later asks it for rows, status and
//! statistics. All calls are asynchronous; the dispatcher may drop a call in
//! flight when its query is released.
use std::{fmt, path::PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    props::PropertyId,
    protocol::status,
    restriction::{Restriction, SortKey},
    rowset::Row,
    session::CursorHandle,
};

pub mod memory;

pub use memory::MemoryBackend;

/// Backend side handle of a running query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendQueryId(pub u64);

impl fmt::Display for BackendQueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend:{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Failure with a specific result code.
    #[error("backend failed with status {0:#010x}")]
    Status(u32),

    #[error("backend does not know query {0}")]
    UnknownQuery(BackendQueryId),

    #[error("backend failure: {0}")]
    Failed(String),
}

impl BackendError {
    pub fn status(&self) -> u32 {
        match self {
            BackendError::Status(code) if status::is_failure(*code) => *code,
            _ => status::E_FAIL,
        }
    }
}

/// A query after restriction reuse has been expanded.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub restriction: Option<Restriction>,
    pub sort: Vec<SortKey>,
    pub columns: Vec<PropertyId>,
    pub cursors: Vec<CursorHandle>,
    /// Directory the results are limited to.
    pub root: Option<PathBuf>,
    /// Zero means no limit.
    pub max_results: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Busy,
    Done,
    Error,
}

impl QueryState {
    pub fn code(self) -> u32 {
        match self {
            QueryState::Busy => status::STAT_BUSY,
            QueryState::Error => status::STAT_ERROR,
            QueryState::Done => status::STAT_DONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendStatus {
    pub state: QueryState,
    /// Items examined so far and items left to examine.
    pub processed: u32,
    pub remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowFetch {
    pub chapter: u32,
    /// 1-based index of the first row.
    pub start: u32,
    pub count: u32,
    pub forward: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    pub rows: Vec<Row>,
    /// The backend has no rows past this batch.
    pub no_more: bool,
    pub total_rows: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpensiveProperties {
    pub total_rows: u32,
    pub result_count: u32,
    pub max_rank: u32,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn run_query(&self, request: QueryRequest) -> Result<BackendQueryId, BackendError>;

    async fn get_status(&self, query: BackendQueryId) -> Result<BackendStatus, BackendError>;

    async fn get_rows(
        &self,
        query: BackendQueryId,
        cursor: CursorHandle,
        fetch: RowFetch,
    ) -> Result<RowBatch, BackendError>;

    async fn get_expensive_properties(
        &self,
        query: BackendQueryId,
    ) -> Result<ExpensiveProperties, BackendError>;

    async fn release_query(&self, query: BackendQueryId) -> Result<(), BackendError>;

    /// Whether the user who ran `query` may see `row`.
    async fn has_access_to_row(&self, query: BackendQueryId, row: &Row) -> bool;
}
