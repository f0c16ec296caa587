use std::fmt;

use super::header::CHECKSUM_FREE_VERSION;

/// Message discriminants carried in the header `msg` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Connect,
    Disconnect,
    CreateQuery,
    FreeCursor,
    GetRows,
    RatioFinished,
    CompareBmk,
    GetApproximatePosition,
    SetBindings,
    GetNotify,
    SendNotify,
    GetQueryStatus,
    CiState,
    FetchValue,
    GetQueryStatusEx,
    RestartPosition,
    StopAsynch,
    StartWatching,
    StopWatching,
    SetCatState,
    GetRowsetNotify,
    FindIndices,
    SetScopePrioritization,
    GetScopeStatistics,
}

impl MessageKind {
    pub fn code(self) -> u32 {
        match self {
            MessageKind::Connect => 0xC8,
            MessageKind::Disconnect => 0xC9,
            MessageKind::CreateQuery => 0xCA,
            MessageKind::FreeCursor => 0xCB,
            MessageKind::GetRows => 0xCC,
            MessageKind::RatioFinished => 0xCD,
            MessageKind::CompareBmk => 0xCE,
            MessageKind::GetApproximatePosition => 0xCF,
            MessageKind::SetBindings => 0xD0,
            MessageKind::GetNotify => 0xD1,
            MessageKind::SendNotify => 0xD2,
            MessageKind::GetQueryStatus => 0xD7,
            MessageKind::CiState => 0xD9,
            MessageKind::FetchValue => 0xE4,
            MessageKind::GetQueryStatusEx => 0xE6,
            MessageKind::RestartPosition => 0xE7,
            MessageKind::StopAsynch => 0xE8,
            MessageKind::StartWatching => 0xE9,
            MessageKind::StopWatching => 0xEA,
            MessageKind::SetCatState => 0xEC,
            MessageKind::GetRowsetNotify => 0xF1,
            MessageKind::FindIndices => 0xF2,
            MessageKind::SetScopePrioritization => 0xF3,
            MessageKind::GetScopeStatistics => 0xF4,
        }
    }

    /// Whether a request of this kind must carry a valid checksum.
    ///
    /// `Connect` only requires one from clients newer than version 0x109.
    pub fn request_checksummed(self, client_version: u32) -> bool {
        match self {
            MessageKind::Connect => client_version > CHECKSUM_FREE_VERSION,
            MessageKind::CreateQuery | MessageKind::SetBindings | MessageKind::GetRows => true,
            _ => false,
        }
    }

    /// Whether the server stamps a checksum on responses of this kind.
    pub fn response_checksummed(self) -> bool {
        matches!(
            self,
            MessageKind::Connect
                | MessageKind::CreateQuery
                | MessageKind::SetBindings
                | MessageKind::GetRows
                | MessageKind::FetchValue
        )
    }

    /// Kinds whose response is never sent.
    pub fn has_payload(self) -> bool {
        self != MessageKind::Disconnect
    }
}

impl TryFrom<u32> for MessageKind {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0xC8 => MessageKind::Connect,
            0xC9 => MessageKind::Disconnect,
            0xCA => MessageKind::CreateQuery,
            0xCB => MessageKind::FreeCursor,
            0xCC => MessageKind::GetRows,
            0xCD => MessageKind::RatioFinished,
            0xCE => MessageKind::CompareBmk,
            0xCF => MessageKind::GetApproximatePosition,
            0xD0 => MessageKind::SetBindings,
            0xD1 => MessageKind::GetNotify,
            0xD2 => MessageKind::SendNotify,
            0xD7 => MessageKind::GetQueryStatus,
            0xD9 => MessageKind::CiState,
            0xE4 => MessageKind::FetchValue,
            0xE6 => MessageKind::GetQueryStatusEx,
            0xE7 => MessageKind::RestartPosition,
            0xE8 => MessageKind::StopAsynch,
            0xE9 => MessageKind::StartWatching,
            0xEA => MessageKind::StopWatching,
            0xEC => MessageKind::SetCatState,
            0xF1 => MessageKind::GetRowsetNotify,
            0xF2 => MessageKind::FindIndices,
            0xF3 => MessageKind::SetScopePrioritization,
            0xF4 => MessageKind::GetScopeStatistics,
            other => return Err(other),
        })
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}(0x{:02X})", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in 0xC8..=0xF4 {
            if let Ok(kind) = MessageKind::try_from(code) {
                assert_eq!(kind.code(), code);
            }
        }
    }

    #[test]
    fn unknown_code_rejected() {
        assert_eq!(MessageKind::try_from(0x42), Err(0x42));
    }

    #[test]
    fn connect_checksum_depends_on_version() {
        assert!(!MessageKind::Connect.request_checksummed(0x109));
        assert!(MessageKind::Connect.request_checksummed(0x10A));
        assert!(MessageKind::GetRows.request_checksummed(0));
        assert!(!MessageKind::FreeCursor.request_checksummed(0x10A));
    }

    #[test]
    fn fetch_value_response_checksummed() {
        assert!(MessageKind::FetchValue.response_checksummed());
        assert!(!MessageKind::FetchValue.request_checksummed(0x10A));
    }
}
