use log::{debug, trace, warn};

use crate::{
    backend::{BackendQueryId, QueryRequest, QueryState, RowFetch},
    protocol::{
        ConnectIn, ConnectOut, CreateQueryIn, CreateQueryOut, FreeCursorIn, FreeCursorOut,
        GetQueryStatusExIn, GetRatioFinishedIn, GetRowsIn, GetRowsOut, QueryStatusExOut,
        QueryStatusOut, RatioFinishedOut, Response, RowsetNotifyOut, ScopeStatisticsOut,
        SetBindingsIn, SetScopePrioritizationIn,
        header::{MAX_READ_BUFFER, SERVER_VERSION},
        status,
    },
    restriction,
    rowset::{Binding, RowLayout, encode_rows},
    session::{ClientId, CursorHandle, QueryInit, cursor},
};

use super::{Dispatcher, MAX_GROUPINGS, Reply, WspError};

/// Rows per fetch are limited by every configured maximum; zero means none.
fn clamp_rows(requested: u32, query_max: u32, server_max: Option<u32>) -> u32 {
    let mut rows = requested;
    if query_max > 0 {
        rows = rows.min(query_max);
    }
    if let Some(max) = server_max {
        rows = rows.min(max);
    }
    rows
}

/// What a fetch needs to know about its query, copied out of the registry.
struct FetchContext {
    backend: Option<BackendQueryId>,
    no_index: bool,
    binding: Binding,
    stored: u32,
    total_rows: Option<u32>,
    max_results: u32,
}

impl Dispatcher {
    pub(super) fn connect(&self, client: ClientId, req: ConnectIn) -> Result<Reply, WspError> {
        if !req.catalog.eq_ignore_ascii_case(&self.config.catalog) {
            return Err(WspError::InvalidArgument(format!(
                "unknown catalog '{}'",
                req.catalog
            )));
        }
        self.lock()?.connect(
            client,
            req.client_version,
            &req.catalog,
            &req.machine,
            &req.user,
        )?;
        Ok(Reply::ok(Response::Connect(ConnectOut {
            server_version: SERVER_VERSION,
        })))
    }

    pub(super) async fn create_query(
        &self,
        client: ClientId,
        req: CreateQueryIn,
    ) -> Result<Reply, WspError> {
        if req.groupings > MAX_GROUPINGS {
            return Err(WspError::InvalidArgument(format!(
                "{} groupings requested, at most {MAX_GROUPINGS} supported",
                req.groupings
            )));
        }
        let scope = self.config.resolve_scope(&req.scope)?;
        let no_index = !scope.indexed;
        let root = scope.root.clone();

        let (handles, request) = {
            let mut registry = self.lock()?;
            let expanded = req
                .restriction
                .as_ref()
                .map(|tree| restriction::expand(tree, registry.wheres()))
                .transpose()?;

            let handles = registry.create_query(
                client,
                QueryInit {
                    // Stored expanded so later reuse never meets a nested reuse node.
                    restriction: expanded.clone(),
                    sort: req.sort.clone(),
                    groupings: req.groupings,
                    columns: req.columns.clone(),
                    max_results: req.options.max_results,
                    scope: Some(scope),
                    no_index,
                },
            )?;
            let request = QueryRequest {
                restriction: expanded,
                sort: req.sort,
                columns: req.columns,
                cursors: handles.clone(),
                root: Some(root),
                max_results: req.options.max_results,
            };
            (handles, request)
        };

        let out = Response::CreateQuery(CreateQueryOut {
            true_sequential: true,
            work_id_unique: true,
            cursors: handles.iter().map(|h| h.get()).collect(),
        });
        if no_index {
            debug!("query {client}: scope is not indexed, no backend query");
            return Ok(Reply::ok(out));
        }

        let (pending, live) = self.lock()?.begin_call(client)?;
        let result = pending.run(self.backend.run_query(request)).await;

        let orphan = {
            let mut registry = self.lock()?;
            let alive = live.is_alive();
            match result {
                Some(Ok(id)) if alive => {
                    registry.finish_call(client);
                    registry.attach_backend(client, id)?;
                    return Ok(Reply::ok(out));
                }
                Some(Ok(id)) => id,
                Some(Err(e)) => {
                    if alive {
                        registry.finish_call(client);
                        registry.release_query(client)?;
                    }
                    return Err(e.into());
                }
                None => return Err(WspError::Aborted),
            }
        };

        // The query went away while the backend was building it.
        debug!("query {client}: released during creation, dropping {orphan}");
        if let Err(e) = self.backend.release_query(orphan).await {
            warn!("query {client}: failed to release {orphan}: {e}");
        }
        Err(WspError::Aborted)
    }

    pub(super) fn set_bindings(
        &self,
        client: ClientId,
        req: SetBindingsIn,
    ) -> Result<Reply, WspError> {
        let binding = Binding::new(req.row_width, req.columns)?;
        let cursor = CursorHandle::new(req.cursor);
        trace!(
            "query {client} cursor {cursor}: {} columns in {} byte rows",
            binding.columns().len(),
            binding.row_width()
        );
        self.lock()?.set_binding(client, cursor, binding)?;
        Ok(Reply::ok(Response::Empty))
    }

    fn fetch_context(
        &self,
        client: ClientId,
        cursor: CursorHandle,
        chapter: u32,
    ) -> Result<FetchContext, WspError> {
        let registry = self.lock()?;
        let query = registry.find_query(client)?;
        let binding = registry.binding(client, cursor)?.clone();
        let stored = registry.find_cursor(client, cursor)?.position.get(chapter);
        Ok(FetchContext {
            backend: query.backend,
            no_index: query.no_index,
            binding,
            stored,
            total_rows: query.total_rows,
            max_results: query.max_results,
        })
    }

    async fn total_rows(
        &self,
        client: ClientId,
        backend: BackendQueryId,
        known: Option<u32>,
    ) -> Result<u32, WspError> {
        if let Some(total) = known {
            return Ok(total);
        }
        let props = self
            .call(client, self.backend.get_expensive_properties(backend))
            .await?;
        if let Ok(query) = self.lock()?.find_query_mut(client) {
            query.total_rows = Some(props.total_rows);
        }
        Ok(props.total_rows)
    }

    pub(super) async fn get_rows(&self, client: ClientId, req: GetRowsIn) -> Result<Reply, WspError> {
        let handle = CursorHandle::new(req.cursor);
        let ctx = self.fetch_context(client, handle, req.chapter)?;

        if req.row_width != ctx.binding.row_width() {
            return Err(WspError::InvalidArgument(format!(
                "row width {} differs from bound width {}",
                req.row_width,
                ctx.binding.row_width()
            )));
        }
        if req.read_buffer > MAX_READ_BUFFER {
            return Err(WspError::InvalidArgument(format!(
                "read buffer of {} bytes exceeds {MAX_READ_BUFFER}",
                req.read_buffer
            )));
        }
        cursor::validate(&req.seek)?;

        if ctx.no_index {
            return Ok(Reply::with_status(
                status::DB_S_ENDOFROWSET,
                Response::GetRows(GetRowsOut {
                    rows_returned: 0,
                    seek_type: 0,
                    chapter: req.chapter,
                }),
            ));
        }
        let backend = ctx
            .backend
            .ok_or(WspError::Unexpected("query has no backend context"))?;

        let total = if cursor::needs_total(&req.seek) {
            Some(self.total_rows(client, backend, ctx.total_rows).await?)
        } else {
            ctx.total_rows
        };
        let start = cursor::resolve(&req.seek, ctx.stored, total)?;
        let requested = clamp_rows(
            req.rows_to_transfer,
            ctx.max_results,
            self.config.max_results,
        );

        let fetch = RowFetch {
            chapter: req.chapter,
            start,
            count: requested,
            forward: !req.fetch_backwards,
        };
        let mut batch = self
            .call(client, self.backend.get_rows(backend, handle, fetch))
            .await?;
        if batch.rows.len() > requested as usize {
            warn!(
                "query {client}: backend returned {} rows for {requested}",
                batch.rows.len()
            );
            batch.rows.truncate(requested as usize);
            batch.no_more = false;
        }
        let fetched = batch.rows.len() as u32;

        // Offset of each visible row within the backend batch.
        let mut offsets = Vec::with_capacity(batch.rows.len());
        let mut rows = Vec::with_capacity(batch.rows.len());
        for (offset, row) in (0_u32..).zip(batch.rows) {
            if self.backend.has_access_to_row(backend, &row).await {
                offsets.push(offset);
                rows.push(row);
            } else {
                trace!("query {client}: hiding work id {}", row.work_id);
            }
        }

        let layout = RowLayout {
            buffer_length: req.read_buffer,
            row_width: req.row_width,
            reserved: req.reserved,
            client_base: req.client_base,
        };
        let encoded = encode_rows(layout, &ctx.binding, &rows)?;
        let returned = encoded.rows_returned;
        let no_more = batch.no_more && !encoded.truncated;

        // Backend rows consumed, hidden ones included. A truncated fetch
        // resumes at the first visible row that was not written.
        let consumed = offsets
            .get(returned as usize)
            .copied()
            .unwrap_or(fetched);
        let next = if fetch.forward {
            start.saturating_add(consumed)
        } else {
            start.saturating_sub(consumed)
        };
        let seek = cursor::resume_seek(&req.seek, next, requested, returned, no_more);
        debug!(
            "query {client} cursor {handle}: {returned} of {requested} rows from {start}{}",
            if encoded.truncated { ", out of space" } else { "" }
        );

        {
            let mut registry = self.lock()?;
            let query = registry.find_query_mut(client).map_err(|_| WspError::Aborted)?;
            if batch.total_rows.is_some() {
                query.total_rows = batch.total_rows;
            }
            let state = registry
                .find_cursor_mut(client, handle)
                .map_err(|_| WspError::Aborted)?;
            if fetch.forward {
                state.position.set(req.chapter, next);
            }
        }

        let status = if no_more {
            status::DB_S_ENDOFROWSET
        } else {
            status::S_OK
        };
        Ok(Reply {
            status,
            body: Response::GetRows(GetRowsOut {
                rows_returned: returned,
                seek_type: seek.map(|s| s.code()).unwrap_or_default(),
                chapter: req.chapter,
            }),
            trailing: encoded.finish(seek.map(|s| s.to_bytes())),
        })
    }

    /// Query and backend context of a client, with an optional cursor check.
    fn query_backend(
        &self,
        client: ClientId,
        cursor: Option<CursorHandle>,
    ) -> Result<(Option<BackendQueryId>, Option<u32>), WspError> {
        let registry = self.lock()?;
        let query = registry.find_query(client)?;
        if let Some(cursor) = cursor {
            registry.find_cursor(client, cursor)?;
        }
        if query.no_index {
            return Ok((None, query.total_rows));
        }
        let backend = query
            .backend
            .ok_or(WspError::Unexpected("query has no backend context"))?;
        Ok((Some(backend), query.total_rows))
    }

    pub(super) async fn query_status(&self, client: ClientId) -> Result<Reply, WspError> {
        let (backend, _) = self.query_backend(client, None)?;
        let state = match backend {
            Some(backend) => {
                self.call(client, self.backend.get_status(backend))
                    .await?
                    .state
            }
            None => QueryState::Done,
        };
        Ok(Reply::ok(Response::QueryStatus(QueryStatusOut {
            status: state.code(),
        })))
    }

    pub(super) async fn query_status_ex(
        &self,
        client: ClientId,
        req: GetQueryStatusExIn,
    ) -> Result<Reply, WspError> {
        let (backend, _) = self.query_backend(client, Some(CursorHandle::new(req.cursor)))?;
        let Some(backend) = backend else {
            return Ok(Reply::ok(Response::QueryStatusEx(QueryStatusExOut {
                status: QueryState::Done.code(),
                ratio_numerator: 1,
                ratio_denominator: 1,
                ..Default::default()
            })));
        };

        let state = self.call(client, self.backend.get_status(backend)).await?;
        let props = self
            .call(client, self.backend.get_expensive_properties(backend))
            .await?;
        if let Ok(query) = self.lock()?.find_query_mut(client) {
            query.total_rows = Some(props.total_rows);
        }

        Ok(Reply::ok(Response::QueryStatusEx(QueryStatusExOut {
            status: state.state.code(),
            filtered_documents: state.processed,
            documents_to_filter: state.remaining,
            ratio_numerator: state.processed,
            ratio_denominator: state.processed.saturating_add(state.remaining).max(1),
            bookmark_position: cursor::bookmark_position(req.bookmark, Some(props.total_rows))?,
            row_count: props.total_rows,
            results_found: props.result_count,
            max_rank: props.max_rank,
        })))
    }

    pub(super) async fn ratio_finished(
        &self,
        client: ClientId,
        req: GetRatioFinishedIn,
    ) -> Result<Reply, WspError> {
        let (backend, known) = self.query_backend(client, Some(CursorHandle::new(req.cursor)))?;
        let Some(backend) = backend else {
            return Ok(Reply::ok(Response::RatioFinished(RatioFinishedOut {
                numerator: 1,
                denominator: 1,
                rows: 0,
                new_rows: false,
            })));
        };

        let state = self.call(client, self.backend.get_status(backend)).await?;
        let props = self
            .call(client, self.backend.get_expensive_properties(backend))
            .await?;
        if let Ok(query) = self.lock()?.find_query_mut(client) {
            query.total_rows = Some(props.total_rows);
        }

        let (numerator, denominator) = match state.state {
            QueryState::Done => (1, 1),
            _ => (
                state.processed,
                state.processed.saturating_add(state.remaining).max(1),
            ),
        };
        Ok(Reply::ok(Response::RatioFinished(RatioFinishedOut {
            numerator,
            denominator,
            rows: props.total_rows,
            new_rows: known.is_some_and(|k| k != props.total_rows),
        })))
    }

    pub(super) async fn scope_statistics(&self, client: ClientId) -> Result<Reply, WspError> {
        let (backend, _) = self.query_backend(client, None)?;
        let indexed_items = match backend {
            Some(backend) => {
                self.call(client, self.backend.get_expensive_properties(backend))
                    .await?
                    .result_count
            }
            None => 0,
        };
        Ok(Reply::ok(Response::ScopeStatistics(ScopeStatisticsOut {
            indexed_items,
            ..Default::default()
        })))
    }

    pub(super) fn rowset_notify(&self, client: ClientId) -> Result<Reply, WspError> {
        self.lock()?.find_query(client)?;
        Ok(Reply::ok(Response::RowsetNotify(RowsetNotifyOut {
            more_events: false,
            event_type: 0,
        })))
    }

    pub(super) async fn free_cursor(
        &self,
        client: ClientId,
        req: FreeCursorIn,
    ) -> Result<Reply, WspError> {
        let release = self
            .lock()?
            .release_cursor(client, CursorHandle::new(req.cursor))?;
        if let Some(released) = release.released {
            self.release_backend(released).await;
        }
        Ok(Reply::ok(Response::FreeCursor(FreeCursorOut {
            cursors_remaining: release.remaining,
        })))
    }

    pub(super) fn set_scope_prioritization(
        &self,
        client: ClientId,
        req: SetScopePrioritizationIn,
    ) -> Result<Reply, WspError> {
        self.lock()?.find_query_mut(client)?.priority = req.priority;
        Ok(Reply::ok(Response::Empty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_to_every_limit() {
        assert_eq!(clamp_rows(50, 0, None), 50);
        assert_eq!(clamp_rows(50, 20, None), 20);
        assert_eq!(clamp_rows(50, 20, Some(5)), 5);
        assert_eq!(clamp_rows(3, 20, Some(5)), 3);
    }
}
