//! Blocking protocol client used by `wsp_cli`.
//!
//! Keeps one query open at a time and binds a fixed set of columns to it.
//! Every bound column takes 24 bytes: a variant slot, a status byte and a
//! length word.
use std::io::{Read, Write};

use log::debug;
use thiserror::Error;

use crate::{
    command::Command,
    props::{self, PropertyId},
    protocol::{
        ConnectIn, CreateQueryIn, FreeCursorIn, GetQueryStatusExIn, GetRowsIn, MessageKind,
        ProtocolTransport, QueryStatusExOut, Request, Response, RowsetOptions, SeekDescription,
        SetBindingsIn, TransportError,
        codec::{self, CodecError, PduHeader},
        header::{BOOKMARK_LAST, NULL_CHAPTER},
        status,
    },
    rowset::{
        Binding, BindingError, ColumnBinding, RowLayout, Value,
        decoder::{DecodeError, decode_rows},
        vt,
    },
};

pub const CLIENT_VERSION: u32 = 0x0000_010A;
const READ_BUFFER: u32 = 0x4000;
const CLIENT_BASE: u32 = 0x0001_0000;
const COLUMN_WIDTH: u16 = 24;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("failed to read rows: {0}")]
    Rows(#[from] DecodeError),

    #[error("{kind} failed with status {status:#010x}")]
    Status { kind: MessageKind, status: u32 },

    #[error("server closed the connection")]
    Closed,

    #[error("no query is open")]
    NoQuery,
}

/// Rows returned by one fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub rows: Vec<Vec<Value>>,
    /// The server has no rows past these.
    pub end: bool,
}

pub struct SearchClient<T: Read + Write> {
    transport: ProtocolTransport<T>,
    scope: String,
    columns: Vec<PropertyId>,
    binding: Binding,
    cursor: Option<u32>,
}

impl<T: Read + Write> SearchClient<T> {
    pub fn new(stream: T, scope: &str) -> Result<Self, ClientError> {
        let columns = vec![props::FILE_NAME, props::SIZE, props::ITEM_URL];
        let bindings = columns
            .iter()
            .zip((0..).step_by(COLUMN_WIDTH as usize))
            .map(|(property, at)| {
                ColumnBinding::new(property.clone(), vt::VT_VARIANT)
                    .value_at(at)
                    .status_at(at + 16)
                    .length_at(at + 20)
            })
            .collect::<Vec<_>>();
        let binding = Binding::new(
            u32::from(COLUMN_WIDTH) * columns.len() as u32,
            bindings,
        )?;

        Ok(Self {
            transport: ProtocolTransport::new(stream),
            scope: scope.to_owned(),
            columns,
            binding,
            cursor: None,
        })
    }

    pub fn columns(&self) -> &[PropertyId] {
        &self.columns
    }

    pub fn set_scope(&mut self, scope: &str) {
        self.scope = scope.to_owned();
    }

    fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        let pdu = codec::encode_request(request, CLIENT_VERSION)?;
        self.transport.write_pdu(&pdu)?;
        Ok(())
    }

    fn exchange(&mut self, request: Request) -> Result<(PduHeader, Response, Vec<u8>), ClientError> {
        let kind = request.kind();
        self.send(&request)?;
        let pdu = self.transport.read_pdu()?.ok_or(ClientError::Closed)?;
        let (header, response, trailing) = codec::decode_response(&pdu)?;
        if status::is_failure(header.status) {
            return Err(ClientError::Status {
                kind,
                status: header.status,
            });
        }
        debug!("{kind}: status {:#010x}", header.status);
        Ok((header, response, trailing))
    }

    /// Returns the server version.
    pub fn connect(&mut self, catalog: &str) -> Result<u32, ClientError> {
        let (_, response, _) = self.exchange(Request::Connect(ConnectIn {
            client_version: CLIENT_VERSION,
            is_remote: true,
            machine: "wsp-cli".into(),
            user: std::env::var("USER").unwrap_or_default(),
            catalog: catalog.to_owned(),
        }))?;
        match response {
            Response::Connect(out) => Ok(out.server_version),
            _ => Ok(0),
        }
    }

    /// Replaces the open query with one matching `phrase`.
    pub fn query(&mut self, phrase: &str) -> Result<(), ClientError> {
        if let Some(cursor) = self.cursor.take() {
            self.exchange(Request::FreeCursor(FreeCursorIn { cursor }))?;
        }

        let (_, response, _) = self.exchange(Request::CreateQuery(CreateQueryIn {
            scope: self.scope.clone(),
            restriction: Some(Command::restriction(phrase)),
            sort: vec![],
            groupings: 0,
            columns: self.columns.clone(),
            options: RowsetOptions::default(),
        }))?;
        let Response::CreateQuery(out) = response else {
            return Err(ClientError::NoQuery);
        };
        let cursor = out.cursors.first().copied().ok_or(ClientError::NoQuery)?;

        self.exchange(Request::SetBindings(SetBindingsIn {
            cursor,
            row_width: self.binding.row_width(),
            columns: self.binding.columns().to_vec(),
        }))?;
        self.cursor = Some(cursor);
        Ok(())
    }

    /// Fetches up to `rows` rows following the last fetch.
    pub fn fetch(&mut self, rows: u32) -> Result<Fetched, ClientError> {
        let cursor = self.cursor.ok_or(ClientError::NoQuery)?;
        let (header, response, trailing) = self.exchange(Request::GetRows(GetRowsIn {
            cursor,
            rows_to_transfer: rows,
            row_width: self.binding.row_width(),
            read_buffer: READ_BUFFER,
            client_base: CLIENT_BASE,
            reserved: 0,
            fetch_backwards: false,
            chapter: NULL_CHAPTER,
            seek: SeekDescription::None,
        }))?;
        let Response::GetRows(out) = response else {
            return Err(ClientError::Status {
                kind: MessageKind::GetRows,
                status: header.status,
            });
        };

        let layout = RowLayout {
            buffer_length: READ_BUFFER,
            row_width: self.binding.row_width(),
            reserved: 0,
            client_base: CLIENT_BASE,
        };
        let rows = decode_rows(&trailing, &layout, &self.binding, out.rows_returned)?;
        Ok(Fetched {
            rows,
            end: header.status == status::DB_S_ENDOFROWSET,
        })
    }

    pub fn status(&mut self) -> Result<QueryStatusExOut, ClientError> {
        let cursor = self.cursor.ok_or(ClientError::NoQuery)?;
        let (header, response, _) =
            self.exchange(Request::GetQueryStatusEx(GetQueryStatusExIn {
                cursor,
                bookmark: BOOKMARK_LAST,
            }))?;
        match response {
            Response::QueryStatusEx(out) => Ok(out),
            _ => Err(ClientError::Status {
                kind: MessageKind::GetQueryStatusEx,
                status: header.status,
            }),
        }
    }

    /// Ends the session. The server sends no reply.
    pub fn disconnect(mut self) -> Result<(), ClientError> {
        self.send(&Request::Disconnect)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::{Ipv4Addr, SocketAddr, TcpStream},
        sync::Arc,
        thread,
    };

    use crate::{
        backend::MemoryBackend,
        config::{ServerConfig, Share},
        protocol::SearchServer,
        rowset::Row,
    };

    use super::*;

    fn item(work_id: u32, name: &str, size: u64) -> Row {
        Row::new(work_id)
            .with(props::FILE_NAME, Value::Str(name.into()))
            .with(props::SIZE, Value::UI8(size))
            .with(props::ITEM_URL, Value::Str(format!("file://srv/docs/{name}")))
    }

    #[test]
    fn searches_over_tcp() {
        let config = ServerConfig {
            address: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            shares: vec![Share {
                name: "docs".into(),
                path: "/srv/docs".into(),
            }],
            workers: 1,
            ..Default::default()
        };
        let backend = Arc::new(MemoryBackend::with_rows(vec![
            item(1, "report-2023.pdf", 4096),
            item(2, "notes.txt", 12),
            item(3, "report-2024.pdf", 8192),
        ]));
        let server = SearchServer::new(config, backend).unwrap();
        let address = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let listener = thread::spawn(move || server.listen());

        let stream = TcpStream::connect(address).unwrap();
        let mut client = SearchClient::new(stream, "file://srv/docs").unwrap();
        assert!(matches!(client.fetch(1), Err(ClientError::NoQuery)));

        assert_eq!(client.connect("SystemIndex").unwrap(), 0x109);
        client.query("report").unwrap();

        let first = client.fetch(1).unwrap();
        assert!(!first.end);
        assert_eq!(
            first.rows,
            vec![vec![
                Value::Str("report-2023.pdf".into()),
                Value::UI8(4096),
                Value::Str("file://srv/docs/report-2023.pdf".into()),
            ]]
        );

        let rest = client.fetch(10).unwrap();
        assert!(rest.end);
        assert_eq!(rest.rows.len(), 1);
        assert_eq!(rest.rows[0][0], Value::Str("report-2024.pdf".into()));

        let status = client.status().unwrap();
        assert_eq!(status.row_count, 2);

        client.query("notes").unwrap();
        assert_eq!(client.fetch(10).unwrap().rows.len(), 1);

        client.set_scope("file://srv/missing");
        assert!(matches!(
            client.query("notes"),
            Err(ClientError::Status {
                kind: MessageKind::CreateQuery,
                status: status::E_INVALIDARG
            })
        ));

        client.disconnect().unwrap();
        shutdown.trigger();
        listener.join().unwrap().unwrap();
    }
}
