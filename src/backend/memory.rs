//! In-memory backend over a snapshot of the shared directories.
//!
//! Every regular file below a share becomes one row. Queries are evaluated
//! eagerly by filtering and sorting the snapshot; the result list is kept until
//! the query is released.
use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use log::{debug, trace};

use crate::{
    config::Share,
    props,
    restriction::{RelOp, Restriction, SortKey},
    rowset::{Row, Value},
    session::CursorHandle,
};

use super::{
    BackendError, BackendQueryId, BackendStatus, ExpensiveProperties, QueryRequest, QueryState,
    RowBatch, RowFetch, SearchBackend,
};

/// Rank given to every item; the snapshot has no relevance model.
const DEFAULT_RANK: i32 = 1000;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET: u64 = 11_644_473_600;

#[derive(Debug, Clone)]
struct Item {
    path: Option<PathBuf>,
    row: Row,
}

#[derive(Debug)]
pub struct MemoryBackend {
    items: Vec<Item>,
    denied: HashSet<u32>,
    queries: Mutex<HashMap<BackendQueryId, Vec<Row>>>,
    next_id: AtomicU64,
}

fn file_time(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| {
            (d.as_secs() + FILETIME_UNIX_OFFSET) * 10_000_000 + u64::from(d.subsec_nanos() / 100)
        })
        .unwrap_or_default()
}

fn kind_of(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "txt" | "md" | "doc" | "docx" | "pdf" | "rtf" | "odt" => "document",
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "svg" => "picture",
        "mp3" | "flac" | "wav" | "ogg" => "music",
        "mp4" | "mkv" | "avi" | "mov" => "video",
        "rs" | "c" | "h" | "py" | "js" | "ts" | "go" => "program",
        _ => "unknown",
    }
}

fn item_row(work_id: u32, path: &Path, metadata: &fs::Metadata) -> Row {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let modified = metadata.modified().map(file_time).unwrap_or_default();

    let mut row = Row::new(work_id)
        .with(props::FILE_NAME, Value::Str(name))
        .with(
            props::ITEM_URL,
            Value::Str(format!("file://{}", path.display())),
        )
        .with(props::SIZE, Value::UI8(metadata.len()))
        .with(props::DATE_MODIFIED, Value::FileTime(modified))
        .with(props::KIND, Value::StrVector(vec![kind_of(&extension).to_owned()]))
        .with(props::RANK, Value::I4(DEFAULT_RANK))
        .with(props::WORK_ID, Value::UI4(work_id));
    if !extension.is_empty() {
        row = row.with(props::ITEM_TYPE, Value::Str(format!(".{extension}")));
    }
    row
}

fn walk(dir: &Path, items: &mut Vec<Item>) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            walk(&path, items)?;
        } else if metadata.is_file() {
            let work_id = items.len() as u32 + 1;
            trace!("indexed {} as work id {work_id}", path.display());
            items.push(Item {
                row: item_row(work_id, &path, &metadata),
                path: Some(path),
            });
        }
    }
    Ok(())
}

fn matches(restriction: &Restriction, row: &Row) -> bool {
    match restriction {
        Restriction::And(children) => children.iter().all(|c| matches(c, row)),
        Restriction::Or(children) => children.iter().any(|c| matches(c, row)),
        Restriction::Not(inner) => !matches(inner, row),
        Restriction::Property {
            property,
            op,
            value,
        } => {
            let Some(ordering) = row.get(property).and_then(|v| v.compare(value)) else {
                return false;
            };
            match op {
                RelOp::Lt => ordering == Ordering::Less,
                RelOp::Le => ordering != Ordering::Greater,
                RelOp::Gt => ordering == Ordering::Greater,
                RelOp::Ge => ordering != Ordering::Less,
                RelOp::Eq => ordering == Ordering::Equal,
                RelOp::Ne => ordering != Ordering::Equal,
            }
        }
        Restriction::Content { property, phrase } => {
            let phrase = phrase.to_lowercase();
            row.get(property).is_some_and(|v| {
                v.texts()
                    .iter()
                    .any(|t| t.to_lowercase().contains(&phrase))
            })
        }
        // Reuse is expanded before a query gets here.
        Restriction::ReuseWhere(_) => false,
    }
}

fn order(sort: &[SortKey], a: &Row, b: &Row) -> Ordering {
    for key in sort {
        let ordering = match (a.get(&key.property), b.get(&key.property)) {
            (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = if key.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

impl MemoryBackend {
    /// Snapshots every file below the given shares.
    pub fn new(shares: &[Share]) -> io::Result<Self> {
        let mut items = Vec::new();
        for share in shares {
            walk(&share.path, &mut items)?;
            debug!("share '{}' walked, {} items so far", share.name, items.len());
        }
        Ok(Self::from_items(items))
    }

    /// Backend over fixed rows that belong to no directory.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self::from_items(rows.into_iter().map(|row| Item { path: None, row }).collect())
    }

    fn from_items(items: Vec<Item>) -> Self {
        Self {
            items,
            denied: HashSet::new(),
            queries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Hides the row with `work_id` from every query.
    pub fn deny(mut self, work_id: u32) -> Self {
        self.denied.insert(work_id);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn results(&self, query: BackendQueryId) -> Result<Vec<Row>, BackendError> {
        let queries = self
            .queries
            .lock()
            .map_err(|_| BackendError::Failed("query table poisoned".into()))?;
        queries
            .get(&query)
            .cloned()
            .ok_or(BackendError::UnknownQuery(query))
    }

    fn result_count(&self, query: BackendQueryId) -> Result<u32, BackendError> {
        let queries = self
            .queries
            .lock()
            .map_err(|_| BackendError::Failed("query table poisoned".into()))?;
        queries
            .get(&query)
            .map(|rows| rows.len() as u32)
            .ok_or(BackendError::UnknownQuery(query))
    }
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    async fn run_query(&self, request: QueryRequest) -> Result<BackendQueryId, BackendError> {
        let mut rows = self
            .items
            .iter()
            .filter(|item| match (&request.root, &item.path) {
                (Some(root), Some(path)) => path.starts_with(root),
                // Rows without a path are not scoped.
                _ => true,
            })
            .filter(|item| {
                request
                    .restriction
                    .as_ref()
                    .is_none_or(|r| matches(r, &item.row))
            })
            .map(|item| item.row.clone())
            .collect::<Vec<_>>();

        rows.sort_by(|a, b| order(&request.sort, a, b));
        if request.max_results > 0 {
            rows.truncate(request.max_results as usize);
        }

        let id = BackendQueryId(self.next_id.fetch_add(1, AtomicOrdering::Relaxed));
        debug!("{id}: {} matching rows", rows.len());
        self.queries
            .lock()
            .map_err(|_| BackendError::Failed("query table poisoned".into()))?
            .insert(id, rows);
        Ok(id)
    }

    async fn get_status(&self, query: BackendQueryId) -> Result<BackendStatus, BackendError> {
        let count = self.result_count(query)?;
        Ok(BackendStatus {
            state: QueryState::Done,
            processed: count,
            remaining: 0,
        })
    }

    async fn get_rows(
        &self,
        query: BackendQueryId,
        cursor: CursorHandle,
        fetch: RowFetch,
    ) -> Result<RowBatch, BackendError> {
        let rows = self.results(query)?;
        let total = rows.len();
        trace!("{query} cursor {cursor}: {fetch:?} of {total}");

        let start = fetch.start as usize;
        if start == 0 || start > total {
            return Ok(RowBatch {
                rows: Vec::new(),
                no_more: true,
                total_rows: Some(total as u32),
            });
        }

        let count = fetch.count as usize;
        let (batch, no_more) = if fetch.forward {
            let end = (start - 1).saturating_add(count).min(total);
            (rows[start - 1..end].to_vec(), end == total)
        } else {
            let first = start.saturating_sub(count);
            let batch = rows[first..start].iter().rev().cloned().collect();
            (batch, first == 0)
        };

        Ok(RowBatch {
            rows: batch,
            no_more,
            total_rows: Some(total as u32),
        })
    }

    async fn get_expensive_properties(
        &self,
        query: BackendQueryId,
    ) -> Result<ExpensiveProperties, BackendError> {
        let count = self.result_count(query)?;
        Ok(ExpensiveProperties {
            total_rows: count,
            result_count: count,
            max_rank: if count > 0 { DEFAULT_RANK as u32 } else { 0 },
        })
    }

    async fn release_query(&self, query: BackendQueryId) -> Result<(), BackendError> {
        let removed = self
            .queries
            .lock()
            .map_err(|_| BackendError::Failed("query table poisoned".into()))?
            .remove(&query);
        match removed {
            Some(_) => Ok(()),
            None => Err(BackendError::UnknownQuery(query)),
        }
    }

    async fn has_access_to_row(&self, _query: BackendQueryId, row: &Row) -> bool {
        !self.denied.contains(&row.work_id)
    }
}
