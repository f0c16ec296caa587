//! Client-server communication protocol.
//!
//! This module defines the wire protocol spoken between search clients and the
//! server: message kinds, the fixed PDU header, request and response bodies, the
//! header checksum, and the transport that frames whole PDUs over a stream.
//!
//! # Overview
//!
//! A client opens a connection, sends `Connect`, submits a query with
//! `CreateQuery`, describes the row layout it wants with `SetBindings` and then
//! pages through results with repeated `GetRows` calls. Every exchange is one
//! request PDU answered by at most one response PDU (`Disconnect` has no reply).
//!
//! # Binary Format
//!
//! ```text
//! +---------+---------+-----------+-----------+----------------+----------------+
//! |  msg    | status  | checksum  | reserved  |      body      | trailing blob  |
//! +---------+---------+-----------+-----------+----------------+----------------+
//!   4 bytes   4 bytes   4 bytes     4 bytes     bincode (LE)     GetRows only
//! ```
//!
//! - All header integers are little-endian.
//! - The body is the message-specific record encoded with bincode using a
//!   little-endian, fixed-width integer configuration.
//! - `GetRows` responses carry the packed row buffer after the body.
//!
//! # Key Components
//!
//! - [`MessageKind`]: discriminant stored in the header `msg` field.
//! - [`Request`] / [`Response`]: message bodies.
//! - [`codec`]: PDU (de)serialization and checksum placement.
//! - [`ProtocolTransport`]: length-prefixed framing over any `Read + Write`.
//! - [`SearchServer`]: TCP listener handing connections to the dispatcher.
pub mod checksum;
pub mod codec;
mod message;
mod request;
mod response;
mod server;
mod thread;
mod transport;

use thread::ThreadPool;

pub use message::MessageKind;
pub use request::{
    ConnectIn, CreateQueryIn, FreeCursorIn, GetQueryStatusExIn, GetRatioFinishedIn, GetRowsIn,
    Request, RestartPositionIn, RowsetOptions, SeekDescription, SetBindingsIn,
    SetScopePrioritizationIn,
};
pub use response::{
    ConnectOut, CreateQueryOut, FreeCursorOut, GetRowsOut, QueryStatusExOut, QueryStatusOut,
    RatioFinishedOut, Response, RowsetNotifyOut, ScopeStatisticsOut,
};
pub use server::{SearchServer, ShutdownHandle};
pub use transport::{MAX_PDU_SIZE, ProtocolTransport, TransportError};

pub mod header {
    pub const HEADER_SIZE: usize = 16;

    pub const HEADER_MSG: usize = 0;
    pub const HEADER_STATUS: usize = HEADER_MSG + size_of::<u32>();
    pub const HEADER_CHECKSUM: usize = HEADER_STATUS + size_of::<u32>();
    pub const HEADER_RESERVED: usize = HEADER_CHECKSUM + size_of::<u32>();

    /// Highest client version that does not checksum its requests.
    pub const CHECKSUM_FREE_VERSION: u32 = 0x0000_0109;
    pub const SERVER_VERSION: u32 = 0x0000_0109;

    pub const BOOKMARK_FIRST: u32 = 0xFFFF_FFFC;
    pub const BOOKMARK_LAST: u32 = 0xFFFF_FFFD;

    /// Chapter used by flat (uncategorized) rowsets.
    pub const NULL_CHAPTER: u32 = 0;

    /// Upper bound on the client supplied read buffer for one fetch.
    pub const MAX_READ_BUFFER: u32 = 0x0001_0000;
}

/// Result codes written into the header `status` field.
pub mod status {
    pub const S_OK: u32 = 0x0000_0000;
    /// Soft status: the payload is complete, there are no further rows.
    pub const DB_S_ENDOFROWSET: u32 = 0x0004_0EC6;

    pub const E_NOTIMPL: u32 = 0x8000_4001;
    pub const E_ABORT: u32 = 0x8000_4004;
    pub const E_FAIL: u32 = 0x8000_4005;
    pub const E_UNEXPECTED: u32 = 0x8000_FFFF;
    pub const E_INVALIDARG: u32 = 0x8007_0057;
    pub const DB_E_BADRATIO: u32 = 0x8004_0E12;
    /// A restriction reused the filter of a query that no longer exists.
    pub const STATUS_STALE_WHERE_ID: u32 = 0x8004_1E01;

    /// Query status values reported by `GetQueryStatus`.
    pub const STAT_BUSY: u32 = 0x0;
    pub const STAT_ERROR: u32 = 0x1;
    pub const STAT_DONE: u32 = 0x2;

    pub fn is_failure(status: u32) -> bool {
        status & 0x8000_0000 != 0
    }
}
