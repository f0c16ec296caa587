//! Connection, query and cursor bookkeeping.
//!
//! The [`SessionRegistry`] owns every client connection, the query each client
//! runs and the cursors of that query. A client runs at most one query at a
//! time and the query is addressed by the client's id.
//!
//! ```text
//! Client --(0..1)--> Query --(1..n)--> Cursor --(0..1)--> Binding
//! ```
//!
//! Releasing the last cursor of a query releases the query; disconnecting a
//! client releases its query. Released queries are returned to the caller so
//! their backend state can be freed outside the registry lock.
use std::{collections::HashMap, fmt};

use log::{debug, info};
use thiserror::Error;

use crate::{
    backend::BackendQueryId,
    config::ResolvedScope,
    props::PropertyId,
    restriction::{self, Restriction, SortKey},
    rowset::Binding,
};

pub mod cursor;
mod pending;
mod whereid;

pub use cursor::{Cursor, Position, SeekError};
pub use pending::{Liveness, PendingCall};
pub use whereid::WhereIdRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u32);

impl ClientId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A query is identified by the client that created it.
pub type QueryId = ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CursorHandle(u32);

impl CursorHandle {
    pub fn new(handle: u32) -> Self {
        Self(handle)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CursorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("client {0} is not connected")]
    UnknownClient(ClientId),

    #[error("client {0} is already connected")]
    AlreadyConnected(ClientId),

    #[error("client {0} has no active query")]
    UnknownQuery(QueryId),

    #[error("client {0} already has an active query")]
    QueryExists(QueryId),

    #[error("query {query} has no cursor {cursor}")]
    UnknownCursor { query: QueryId, cursor: CursorHandle },

    #[error("cursor {cursor} of query {query} has no bindings")]
    MissingBinding { query: QueryId, cursor: CursorHandle },
}

#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub version: u32,
    pub catalog: String,
    pub machine: String,
    pub user: String,
}

/// Everything needed to register a new query.
#[derive(Debug, Clone, Default)]
pub struct QueryInit {
    pub restriction: Option<Restriction>,
    pub sort: Vec<SortKey>,
    pub groupings: u32,
    pub columns: Vec<PropertyId>,
    /// Zero means no limit.
    pub max_results: u32,
    pub scope: Option<ResolvedScope>,
    pub no_index: bool,
}

#[derive(Debug)]
pub struct Query {
    pub id: QueryId,
    pub restriction: Option<Restriction>,
    /// Compiled filter text, also kept in the where id registry.
    pub filter: String,
    pub sort: Vec<SortKey>,
    pub groupings: u32,
    pub columns: Vec<PropertyId>,
    pub max_results: u32,
    pub scope: Option<ResolvedScope>,
    /// Scope is not indexed; the query yields no rows and never reaches a
    /// backend.
    pub no_index: bool,
    pub backend: Option<BackendQueryId>,
    pub total_rows: Option<u32>,
    pub priority: u32,
    cursors: HashMap<CursorHandle, Cursor>,
    pending: Option<PendingCall>,
    liveness: Liveness,
}

impl Query {
    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }

    pub fn cursor_handles(&self) -> Vec<CursorHandle> {
        let mut handles = self.cursors.keys().copied().collect::<Vec<_>>();
        handles.sort();
        handles
    }

    pub fn has_pending_call(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        if let Some(call) = self.pending.take() {
            debug!("query {} released with a call in flight, cancelling", self.id);
            call.cancel();
        }
        self.liveness.kill();
    }
}

/// A query removed from the registry whose backend state still has to be
/// released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleasedQuery {
    pub id: QueryId,
    pub backend: Option<BackendQueryId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorRelease {
    pub remaining: u32,
    pub released: Option<ReleasedQuery>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    clients: HashMap<ClientId, Client>,
    queries: HashMap<QueryId, Query>,
    wheres: WhereIdRegistry,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(
        &mut self,
        id: ClientId,
        version: u32,
        catalog: &str,
        machine: &str,
        user: &str,
    ) -> Result<QueryId, SessionError> {
        if self.clients.contains_key(&id) {
            return Err(SessionError::AlreadyConnected(id));
        }
        info!("client {id} connected: version {version:#x}, catalog '{catalog}', {user}@{machine}");
        self.clients.insert(
            id,
            Client {
                id,
                version,
                catalog: catalog.to_owned(),
                machine: machine.to_owned(),
                user: user.to_owned(),
            },
        );
        Ok(id)
    }

    pub fn client(&self, id: ClientId) -> Result<&Client, SessionError> {
        self.clients.get(&id).ok_or(SessionError::UnknownClient(id))
    }

    /// Protocol version of a connected client.
    pub fn client_version(&self, id: ClientId) -> Option<u32> {
        self.clients.get(&id).map(|c| c.version)
    }

    /// Registers a query for `client` and allocates its cursors, one more than
    /// the number of groupings.
    pub fn create_query(
        &mut self,
        client: ClientId,
        init: QueryInit,
    ) -> Result<Vec<CursorHandle>, SessionError> {
        self.client(client)?;
        if self.queries.contains_key(&client) {
            return Err(SessionError::QueryExists(client));
        }

        let filter = match &init.restriction {
            Some(tree) => {
                let filter = restriction::render(tree, &self.wheres);
                self.wheres.insert(client.get(), filter.clone(), tree.clone());
                filter
            }
            None => String::new(),
        };

        let handles = (1..=init.groupings.saturating_add(1))
            .map(CursorHandle::new)
            .collect::<Vec<_>>();
        let cursors = handles
            .iter()
            .map(|h| (*h, Cursor::new(*h)))
            .collect::<HashMap<_, _>>();

        debug!(
            "query {client} created with {} cursors, filter '{filter}'",
            handles.len()
        );
        self.queries.insert(
            client,
            Query {
                id: client,
                restriction: init.restriction,
                filter,
                sort: init.sort,
                groupings: init.groupings,
                columns: init.columns,
                max_results: init.max_results,
                scope: init.scope,
                no_index: init.no_index,
                backend: None,
                total_rows: None,
                priority: 0,
                cursors,
                pending: None,
                liveness: Liveness::new(),
            },
        );
        Ok(handles)
    }

    pub fn find_query(&self, query: QueryId) -> Result<&Query, SessionError> {
        self.queries
            .get(&query)
            .ok_or(SessionError::UnknownQuery(query))
    }

    pub fn find_query_mut(&mut self, query: QueryId) -> Result<&mut Query, SessionError> {
        self.queries
            .get_mut(&query)
            .ok_or(SessionError::UnknownQuery(query))
    }

    pub fn find_cursor(&self, query: QueryId, cursor: CursorHandle) -> Result<&Cursor, SessionError> {
        self.find_query(query)?
            .cursors
            .get(&cursor)
            .ok_or(SessionError::UnknownCursor { query, cursor })
    }

    pub fn find_cursor_mut(
        &mut self,
        query: QueryId,
        cursor: CursorHandle,
    ) -> Result<&mut Cursor, SessionError> {
        self.find_query_mut(query)?
            .cursors
            .get_mut(&cursor)
            .ok_or(SessionError::UnknownCursor { query, cursor })
    }

    /// Binding of a cursor, which must have been set before rows are fetched.
    pub fn binding(&self, query: QueryId, cursor: CursorHandle) -> Result<&Binding, SessionError> {
        self.find_cursor(query, cursor)?
            .binding
            .as_ref()
            .ok_or(SessionError::MissingBinding { query, cursor })
    }

    pub fn set_binding(
        &mut self,
        query: QueryId,
        cursor: CursorHandle,
        binding: Binding,
    ) -> Result<(), SessionError> {
        self.find_cursor_mut(query, cursor)?.binding = Some(binding);
        Ok(())
    }

    pub fn attach_backend(
        &mut self,
        query: QueryId,
        backend: BackendQueryId,
    ) -> Result<(), SessionError> {
        self.find_query_mut(query)?.backend = Some(backend);
        Ok(())
    }

    /// Records a backend call on `query`. The returned call is cancelled and
    /// the liveness flag cleared if the query is released before the call is
    /// finished.
    pub fn begin_call(&mut self, query: QueryId) -> Result<(PendingCall, Liveness), SessionError> {
        let q = self.find_query_mut(query)?;
        let call = PendingCall::new();
        q.pending = Some(call.clone());
        Ok((call, q.liveness.clone()))
    }

    pub fn finish_call(&mut self, query: QueryId) {
        if let Some(q) = self.queries.get_mut(&query) {
            q.pending = None;
        }
    }

    pub fn release_cursor(
        &mut self,
        query: QueryId,
        cursor: CursorHandle,
    ) -> Result<CursorRelease, SessionError> {
        let q = self.find_query_mut(query)?;
        if q.cursors.remove(&cursor).is_none() {
            return Err(SessionError::UnknownCursor { query, cursor });
        }

        let remaining = q.cursors.len() as u32;
        let released = if remaining == 0 {
            Some(self.release_query(query)?)
        } else {
            None
        };
        Ok(CursorRelease {
            remaining,
            released,
        })
    }

    pub fn release_query(&mut self, query: QueryId) -> Result<ReleasedQuery, SessionError> {
        let q = self
            .queries
            .remove(&query)
            .ok_or(SessionError::UnknownQuery(query))?;
        self.wheres.remove(query.get());
        debug!("query {query} released");
        Ok(ReleasedQuery {
            id: q.id,
            backend: q.backend,
        })
    }

    /// Forgets a client and releases its query, if any.
    pub fn disconnect(&mut self, client: ClientId) -> Result<Option<ReleasedQuery>, SessionError> {
        self.clients
            .remove(&client)
            .ok_or(SessionError::UnknownClient(client))?;
        info!("client {client} disconnected");
        Ok(self.release_query(client).ok())
    }

    pub fn wheres(&self) -> &WhereIdRegistry {
        &self.wheres
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
