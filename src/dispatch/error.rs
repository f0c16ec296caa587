use thiserror::Error;

use crate::{
    backend::BackendError,
    config::ScopeError,
    protocol::{MessageKind, codec::CodecError, status},
    restriction::StaleWhereId,
    rowset::{BindingError, EncodeError},
    session::{SeekError, SessionError},
};

/// Any failure while handling one request. Each variant maps onto the status
/// code written into the response header.
#[derive(Debug, Error)]
pub enum WspError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Seek(#[from] SeekError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    StaleWhere(#[from] StaleWhereId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} is not implemented")]
    NotImplemented(MessageKind),

    #[error("query was released while a backend call was in flight")]
    Aborted,

    #[error("unexpected state: {0}")]
    Unexpected(&'static str),
}

impl WspError {
    pub fn status(&self) -> u32 {
        match self {
            WspError::Codec(_)
            | WspError::Session(_)
            | WspError::Binding(_)
            | WspError::Scope(_)
            | WspError::InvalidArgument(_) => status::E_INVALIDARG,
            WspError::Seek(SeekError::BadRatio { .. }) => status::DB_E_BADRATIO,
            WspError::Seek(SeekError::Unsupported) | WspError::NotImplemented(_) => {
                status::E_NOTIMPL
            }
            WspError::Seek(SeekError::MissingTotal) => status::E_FAIL,
            WspError::Backend(e) => e.status(),
            WspError::StaleWhere(_) => status::STATUS_STALE_WHERE_ID,
            WspError::Aborted => status::E_ABORT,
            WspError::Encode(_) | WspError::Unexpected(_) => status::E_UNEXPECTED,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::session::{ClientId, CursorHandle};

    use super::*;

    #[test]
    fn statuses() {
        let cases = [
            (
                WspError::from(SessionError::UnknownCursor {
                    query: ClientId::new(1),
                    cursor: CursorHandle::new(4),
                }),
                status::E_INVALIDARG,
            ),
            (
                WspError::from(SeekError::BadRatio {
                    numerator: 1,
                    denominator: 0,
                }),
                status::DB_E_BADRATIO,
            ),
            (WspError::from(SeekError::Unsupported), status::E_NOTIMPL),
            (
                WspError::from(StaleWhereId(3)),
                status::STATUS_STALE_WHERE_ID,
            ),
            (
                WspError::from(BackendError::Status(status::E_ABORT)),
                status::E_ABORT,
            ),
            (
                WspError::from(BackendError::Failed("io".into())),
                status::E_FAIL,
            ),
            (
                WspError::NotImplemented(MessageKind::FetchValue),
                status::E_NOTIMPL,
            ),
            (WspError::Aborted, status::E_ABORT),
        ];
        for (error, expected) in cases {
            assert_eq!(error.status(), expected, "{error}");
        }
    }
}
