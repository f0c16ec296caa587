//! PDU (de)serialization.
//!
//! A PDU is the 16 byte header followed by the bincode encoded body of its
//! message kind and, for fetch responses, the row buffer. Checksums are placed
//! after the whole PDU is assembled so they cover the final bytes.
use bincode::{
    Decode, Encode,
    config::{Configuration, Fixint, LittleEndian},
    decode_from_slice, encode_into_std_write,
};
use log::trace;
use thiserror::Error;

use super::{
    MessageKind, Request, Response, checksum,
    header::{HEADER_CHECKSUM, HEADER_MSG, HEADER_RESERVED, HEADER_SIZE, HEADER_STATUS},
    status,
};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("pdu of {0} bytes is shorter than its header")]
    Truncated(usize),

    #[error("unknown message kind {0:#x}")]
    UnknownKind(u32),

    #[error("checksum mismatch for {kind}: header {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch {
        kind: MessageKind,
        expected: u32,
        actual: u32,
    },

    #[error("failed to encode body: {0}")]
    Serialize(#[from] bincode::error::EncodeError),

    #[error("failed to decode body: {0}")]
    Deserialize(#[from] bincode::error::DecodeError),
}

pub fn config() -> Configuration<LittleEndian, Fixint> {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PduHeader {
    pub msg: u32,
    pub status: u32,
    pub checksum: u32,
    pub reserved: u32,
}

impl PduHeader {
    pub fn parse(pdu: &[u8]) -> Result<Self, CodecError> {
        if pdu.len() < HEADER_SIZE {
            return Err(CodecError::Truncated(pdu.len()));
        }
        let word = |at: usize| u32::from_le_bytes([pdu[at], pdu[at + 1], pdu[at + 2], pdu[at + 3]]);
        Ok(Self {
            msg: word(HEADER_MSG),
            status: word(HEADER_STATUS),
            checksum: word(HEADER_CHECKSUM),
            reserved: word(HEADER_RESERVED),
        })
    }

    pub fn kind(&self) -> Result<MessageKind, CodecError> {
        MessageKind::try_from(self.msg).map_err(CodecError::UnknownKind)
    }

    fn write(&self, out: &mut Vec<u8>) {
        for word in [self.msg, self.status, self.checksum, self.reserved] {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }
}

fn body<T: Decode<()>>(payload: &[u8]) -> Result<T, CodecError> {
    let (value, read) = decode_from_slice::<T, _>(payload, config())?;
    if read < payload.len() {
        trace!("ignoring {} bytes after body", payload.len() - read);
    }
    Ok(value)
}

fn check(kind: MessageKind, header: &PduHeader, payload: &[u8]) -> Result<(), CodecError> {
    let actual = checksum::compute(kind, payload);
    if actual != header.checksum {
        return Err(CodecError::ChecksumMismatch {
            kind,
            expected: header.checksum,
            actual,
        });
    }
    Ok(())
}

/// Decodes a request PDU, verifying its checksum when `kind` requires one from
/// a client of `client_version`. A `Connect` request carries its own version.
pub fn decode_request(pdu: &[u8], client_version: u32) -> Result<Request, CodecError> {
    let header = PduHeader::parse(pdu)?;
    let kind = header.kind()?;
    let payload = &pdu[HEADER_SIZE..];

    let request = match kind {
        MessageKind::Connect => Request::Connect(body(payload)?),
        MessageKind::Disconnect => Request::Disconnect,
        MessageKind::CreateQuery => Request::CreateQuery(body(payload)?),
        MessageKind::FreeCursor => Request::FreeCursor(body(payload)?),
        MessageKind::GetRows => Request::GetRows(body(payload)?),
        MessageKind::RatioFinished => Request::RatioFinished(body(payload)?),
        MessageKind::SetBindings => Request::SetBindings(body(payload)?),
        MessageKind::GetQueryStatus => Request::GetQueryStatus,
        MessageKind::GetQueryStatusEx => Request::GetQueryStatusEx(body(payload)?),
        MessageKind::RestartPosition => Request::RestartPosition(body(payload)?),
        MessageKind::GetRowsetNotify => Request::GetRowsetNotify,
        MessageKind::SetScopePrioritization => Request::SetScopePrioritization(body(payload)?),
        MessageKind::GetScopeStatistics => Request::GetScopeStatistics,
        other => Request::Unhandled(other),
    };

    let version = match &request {
        Request::Connect(connect) => connect.client_version,
        _ => client_version,
    };
    if kind.request_checksummed(version) {
        check(kind, &header, payload)?;
    }

    Ok(request)
}

fn push_body<T: Encode>(value: &T, out: &mut Vec<u8>) -> Result<(), CodecError> {
    encode_into_std_write(value, out, config())?;
    Ok(())
}

/// Client side encoding of a request, with the checksum stamped when the
/// server will ask for one.
pub fn encode_request(request: &Request, client_version: u32) -> Result<Vec<u8>, CodecError> {
    let kind = request.kind();
    let mut out = Vec::with_capacity(HEADER_SIZE + 64);
    PduHeader {
        msg: kind.code(),
        ..Default::default()
    }
    .write(&mut out);

    let version = match request {
        Request::Connect(connect) => {
            push_body(connect, &mut out)?;
            connect.client_version
        }
        Request::CreateQuery(r) => push_body(r, &mut out).map(|_| client_version)?,
        Request::FreeCursor(r) => push_body(r, &mut out).map(|_| client_version)?,
        Request::GetRows(r) => push_body(r, &mut out).map(|_| client_version)?,
        Request::RatioFinished(r) => push_body(r, &mut out).map(|_| client_version)?,
        Request::SetBindings(r) => push_body(r, &mut out).map(|_| client_version)?,
        Request::GetQueryStatusEx(r) => push_body(r, &mut out).map(|_| client_version)?,
        Request::RestartPosition(r) => push_body(r, &mut out).map(|_| client_version)?,
        Request::SetScopePrioritization(r) => push_body(r, &mut out).map(|_| client_version)?,
        Request::Disconnect
        | Request::GetQueryStatus
        | Request::GetRowsetNotify
        | Request::GetScopeStatistics
        | Request::Unhandled(_) => client_version,
    };

    if kind.request_checksummed(version) {
        checksum::stamp(kind, &mut out);
    }
    Ok(out)
}

/// Builds a response PDU. The body is only written for successful responses;
/// `trailing` follows it unchanged.
pub fn encode_response(
    kind: MessageKind,
    status: u32,
    response: &Response,
    trailing: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(HEADER_SIZE + 32 + trailing.len());
    PduHeader {
        msg: kind.code(),
        status,
        ..Default::default()
    }
    .write(&mut out);

    match response {
        Response::Empty => {}
        Response::Connect(r) => push_body(r, &mut out)?,
        Response::CreateQuery(r) => push_body(r, &mut out)?,
        Response::FreeCursor(r) => push_body(r, &mut out)?,
        Response::GetRows(r) => push_body(r, &mut out)?,
        Response::RatioFinished(r) => push_body(r, &mut out)?,
        Response::QueryStatus(r) => push_body(r, &mut out)?,
        Response::QueryStatusEx(r) => push_body(r, &mut out)?,
        Response::RowsetNotify(r) => push_body(r, &mut out)?,
        Response::ScopeStatistics(r) => push_body(r, &mut out)?,
    }
    out.extend_from_slice(trailing);

    if kind.response_checksummed() {
        checksum::stamp(kind, &mut out);
    }
    Ok(out)
}

/// Header-only response for a message whose kind could not be decoded.
pub fn encode_status(msg: u32, status: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE);
    PduHeader {
        msg,
        status,
        ..Default::default()
    }
    .write(&mut out);
    out
}

fn decode_out<T: Decode<()>>(payload: &[u8]) -> Result<(T, Vec<u8>), CodecError> {
    let (value, read) = decode_from_slice::<T, _>(payload, config())?;
    Ok((value, payload[read..].to_vec()))
}

/// Client side decoding of a response PDU into its header, body and the bytes
/// following the body.
pub fn decode_response(pdu: &[u8]) -> Result<(PduHeader, Response, Vec<u8>), CodecError> {
    let header = PduHeader::parse(pdu)?;
    let kind = header.kind()?;
    let payload = &pdu[HEADER_SIZE..];

    if kind.response_checksummed() {
        check(kind, &header, payload)?;
    }
    if status::is_failure(header.status) || !Response::has_body(kind) {
        return Ok((header, Response::Empty, payload.to_vec()));
    }

    let (response, trailing) = match kind {
        MessageKind::Connect => decode_out(payload).map(|(r, t)| (Response::Connect(r), t))?,
        MessageKind::CreateQuery => {
            decode_out(payload).map(|(r, t)| (Response::CreateQuery(r), t))?
        }
        MessageKind::FreeCursor => decode_out(payload).map(|(r, t)| (Response::FreeCursor(r), t))?,
        MessageKind::GetRows => decode_out(payload).map(|(r, t)| (Response::GetRows(r), t))?,
        MessageKind::RatioFinished => {
            decode_out(payload).map(|(r, t)| (Response::RatioFinished(r), t))?
        }
        MessageKind::GetQueryStatus => {
            decode_out(payload).map(|(r, t)| (Response::QueryStatus(r), t))?
        }
        MessageKind::GetQueryStatusEx => {
            decode_out(payload).map(|(r, t)| (Response::QueryStatusEx(r), t))?
        }
        MessageKind::GetRowsetNotify => {
            decode_out(payload).map(|(r, t)| (Response::RowsetNotify(r), t))?
        }
        MessageKind::GetScopeStatistics => {
            decode_out(payload).map(|(r, t)| (Response::ScopeStatistics(r), t))?
        }
        _ => (Response::Empty, payload.to_vec()),
    };

    Ok((header, response, trailing))
}

#[cfg(test)]
mod tests {
    use crate::protocol::{
        ConnectIn, ConnectOut, CreateQueryIn, FreeCursorIn, GetRowsOut, RowsetOptions,
        header::SERVER_VERSION,
    };

    use super::*;

    fn connect(version: u32) -> Request {
        Request::Connect(ConnectIn {
            client_version: version,
            is_remote: true,
            machine: "host".into(),
            user: "alice".into(),
            catalog: "SystemIndex".into(),
        })
    }

    #[test]
    fn header_layout() {
        let pdu = encode_status(0xCC, status::E_INVALIDARG);
        assert_eq!(pdu.len(), HEADER_SIZE);
        assert_eq!(
            PduHeader::parse(&pdu).unwrap(),
            PduHeader {
                msg: 0xCC,
                status: status::E_INVALIDARG,
                checksum: 0,
                reserved: 0,
            }
        );
    }

    #[test]
    fn short_pdu_rejected() {
        assert!(matches!(
            decode_request(&[0; 8], 0),
            Err(CodecError::Truncated(8))
        ));
    }

    #[test]
    fn unknown_kind_rejected() {
        let pdu = encode_status(0x42, 0);
        assert!(matches!(
            decode_request(&pdu, 0),
            Err(CodecError::UnknownKind(0x42))
        ));
    }

    #[test]
    fn new_client_connect_is_checksummed() {
        let request = connect(0x10A);
        let mut pdu = encode_request(&request, 0).unwrap();
        assert_eq!(decode_request(&pdu, 0).unwrap(), request);

        // First byte of the machine name, after version, flag and length.
        let at = HEADER_SIZE + 4 + 1 + 8;
        assert_eq!(pdu[at], b'h');
        pdu[at] = b'H';
        assert!(matches!(
            decode_request(&pdu, 0),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn old_client_connect_skips_checksum() {
        let request = connect(0x109);
        let pdu = encode_request(&request, 0).unwrap();
        assert_eq!(PduHeader::parse(&pdu).unwrap().checksum, 0);
        assert_eq!(decode_request(&pdu, 0).unwrap(), request);
    }

    #[test]
    fn create_query_checksum_verified() {
        let request = Request::CreateQuery(CreateQueryIn {
            scope: "file://host/docs".into(),
            restriction: None,
            sort: vec![],
            groupings: 0,
            columns: vec![],
            options: RowsetOptions::default(),
        });
        let mut pdu = encode_request(&request, 0x109).unwrap();
        pdu[HEADER_CHECKSUM] ^= 1;
        assert!(matches!(
            decode_request(&pdu, 0x109),
            Err(CodecError::ChecksumMismatch {
                kind: MessageKind::CreateQuery,
                ..
            })
        ));
    }

    #[test]
    fn free_cursor_not_checksummed() {
        let request = Request::FreeCursor(FreeCursorIn { cursor: 2 });
        let pdu = encode_request(&request, 0x10A).unwrap();
        assert_eq!(decode_request(&pdu, 0x10A).unwrap(), request);
    }

    #[test]
    fn unhandled_kind_keeps_kind() {
        let pdu = encode_status(MessageKind::CompareBmk.code(), 0);
        assert_eq!(
            decode_request(&pdu, 0).unwrap(),
            Request::Unhandled(MessageKind::CompareBmk)
        );
    }

    #[test]
    fn rows_follow_body() {
        let out = GetRowsOut {
            rows_returned: 2,
            seek_type: 0,
            chapter: 0,
        };
        let pdu = encode_response(
            MessageKind::GetRows,
            status::S_OK,
            &Response::GetRows(out),
            &[1, 2, 3],
        )
        .unwrap();

        let (header, response, trailing) = decode_response(&pdu).unwrap();
        assert_eq!(header.status, status::S_OK);
        assert_eq!(response, Response::GetRows(out));
        assert_eq!(trailing, vec![1, 2, 3]);
    }

    #[test]
    fn response_checksum_covers_status_body() {
        let pdu = encode_response(
            MessageKind::Connect,
            status::S_OK,
            &Response::Connect(ConnectOut {
                server_version: SERVER_VERSION,
            }),
            &[],
        )
        .unwrap();
        let header = PduHeader::parse(&pdu).unwrap();
        assert!(checksum::verify(
            MessageKind::Connect,
            header.checksum,
            &pdu[HEADER_SIZE..]
        ));
    }

    #[test]
    fn failed_response_has_no_body() {
        let pdu = encode_response(
            MessageKind::FreeCursor,
            status::E_INVALIDARG,
            &Response::Empty,
            &[],
        )
        .unwrap();
        let (header, response, trailing) = decode_response(&pdu).unwrap();
        assert_eq!(header.status, status::E_INVALIDARG);
        assert_eq!(response, Response::Empty);
        assert!(trailing.is_empty());
    }
}
