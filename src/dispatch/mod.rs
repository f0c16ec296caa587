//! Request dispatch.
//!
//! The [`Dispatcher`] turns one request PDU into at most one response PDU. It
//! decodes the request (verifying its checksum), runs the handler for its kind
//! against the shared [`SessionRegistry`] and the search backend, and encodes
//! the outcome.
//!
//! ```text
//! received -> validated -> (sync | backend pending) -> completing -> response built
//! ```
//!
//! The registry lock is only taken between backend calls, never across one.
//! Every backend call is registered on its query as a pending call, so
//! releasing the query cancels it; a handler resuming after a call checks that
//! its query is still alive before touching session state.
use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
};

use log::{debug, warn};

use crate::{
    backend::{BackendError, SearchBackend},
    config::ServerConfig,
    protocol::{
        Request, Response,
        codec::{self, PduHeader},
        status,
    },
    session::{ClientId, QueryId, ReleasedQuery, SessionRegistry},
};

mod error;
mod handlers;

pub use error::WspError;

/// Most groupings a query may ask for; each one costs a cursor.
pub const MAX_GROUPINGS: u32 = 32;

/// Outcome of a handler: header status, body and the bytes following it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u32,
    pub body: Response,
    pub trailing: Vec<u8>,
}

impl Reply {
    pub fn ok(body: Response) -> Self {
        Self::with_status(status::S_OK, body)
    }

    pub fn with_status(status: u32, body: Response) -> Self {
        Self {
            status,
            body,
            trailing: Vec::new(),
        }
    }

    pub fn failed(status: u32) -> Self {
        Self::with_status(status, Response::Empty)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Mutex<SessionRegistry>>,
    backend: Arc<dyn SearchBackend>,
    config: Arc<ServerConfig>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn SearchBackend>, config: ServerConfig) -> Self {
        Self {
            registry: Arc::new(Mutex::new(SessionRegistry::new())),
            backend,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &Arc<Mutex<SessionRegistry>> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionRegistry>, WspError> {
        self.registry
            .lock()
            .map_err(|_| WspError::Unexpected("session registry poisoned"))
    }

    /// Handles one request PDU from `client`. Returns `None` when nothing is
    /// to be sent back: after `Disconnect`, or when the PDU is too short to
    /// name its kind.
    pub async fn dispatch(&self, client: ClientId, pdu: &[u8]) -> Option<Vec<u8>> {
        let header = match PduHeader::parse(pdu) {
            Ok(header) => header,
            Err(e) => {
                warn!("client {client}: dropping pdu: {e}");
                return None;
            }
        };
        let kind = match header.kind() {
            Ok(kind) => kind,
            Err(e) => {
                warn!("client {client}: {e}");
                return Some(codec::encode_status(header.msg, status::E_INVALIDARG));
            }
        };

        let version = self
            .lock()
            .ok()
            .and_then(|registry| registry.client_version(client))
            .unwrap_or_default();

        let outcome = match codec::decode_request(pdu, version) {
            Ok(request) => {
                debug!("client {client}: {kind}");
                self.handle(client, request).await
            }
            Err(e) => Err(e.into()),
        };

        if !kind.has_payload() {
            return None;
        }

        let reply = outcome.unwrap_or_else(|e| {
            warn!("client {client}: {kind} failed: {e}");
            Reply::failed(e.status())
        });
        match codec::encode_response(kind, reply.status, &reply.body, &reply.trailing) {
            Ok(pdu) => Some(pdu),
            Err(e) => {
                warn!("client {client}: failed to encode {kind} response: {e}");
                Some(codec::encode_status(kind.code(), status::E_FAIL))
            }
        }
    }

    async fn handle(&self, client: ClientId, request: Request) -> Result<Reply, WspError> {
        match request {
            Request::Connect(req) => self.connect(client, req),
            Request::Disconnect => {
                self.drop_client(client).await;
                Ok(Reply::ok(Response::Empty))
            }
            Request::CreateQuery(req) => self.create_query(client, req).await,
            Request::FreeCursor(req) => self.free_cursor(client, req).await,
            Request::GetRows(req) => self.get_rows(client, req).await,
            Request::RatioFinished(req) => self.ratio_finished(client, req).await,
            Request::SetBindings(req) => self.set_bindings(client, req),
            Request::GetQueryStatus => self.query_status(client).await,
            Request::GetQueryStatusEx(req) => self.query_status_ex(client, req).await,
            Request::RestartPosition(_) => Ok(Reply::ok(Response::Empty)),
            Request::GetRowsetNotify => self.rowset_notify(client),
            Request::SetScopePrioritization(req) => self.set_scope_prioritization(client, req),
            Request::GetScopeStatistics => self.scope_statistics(client).await,
            Request::Unhandled(kind) => Err(WspError::NotImplemented(kind)),
        }
    }

    /// Runs a backend call on behalf of `query`. The call is abandoned when the
    /// query is released while it is in flight.
    async fn call<T, F>(&self, query: QueryId, fut: F) -> Result<T, WspError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        let (pending, live) = self.lock()?.begin_call(query)?;
        let out = pending.run(fut).await;

        let mut registry = self.lock()?;
        if !live.is_alive() {
            return Err(WspError::Aborted);
        }
        registry.finish_call(query);
        match out {
            Some(result) => Ok(result?),
            None => Err(WspError::Aborted),
        }
    }

    async fn release_backend(&self, released: ReleasedQuery) {
        if let Some(backend) = released.backend {
            if let Err(e) = self.backend.release_query(backend).await {
                warn!("query {}: failed to release {backend}: {e}", released.id);
            }
        }
    }

    /// Forgets `client` and releases its query. Used for `Disconnect` and when
    /// a connection goes away.
    pub async fn drop_client(&self, client: ClientId) {
        let released = match self.lock() {
            Ok(mut registry) => registry.disconnect(client),
            Err(e) => {
                warn!("client {client}: {e}");
                return;
            }
        };
        match released {
            Ok(Some(released)) => self.release_backend(released).await,
            Ok(None) => {}
            Err(e) => debug!("client {client}: {e}"),
        }
    }
}
