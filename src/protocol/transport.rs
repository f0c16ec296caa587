use std::io::{self, ErrorKind, Read, Write};

use bincode::{decode_from_std_read, encode_into_std_write, error::DecodeError};
use thiserror::Error;

use super::{codec, header::MAX_READ_BUFFER};

/// Largest PDU accepted in either direction: a full row buffer plus room for
/// the header and body.
pub const MAX_PDU_SIZE: u32 = MAX_READ_BUFFER * 2;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("pdu of {0} bytes exceeds the {MAX_PDU_SIZE} byte limit")]
    TooLarge(usize),
    #[error("failed to encode frame length: {0}")]
    Serialize(#[from] bincode::error::EncodeError),
    #[error("failed to decode frame length: {0}")]
    Deserialize(#[from] DecodeError),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

/// Frames whole PDUs over a byte stream. Each PDU is preceded by its length as
/// a little-endian `u32`.
pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    pub fn write_pdu(&mut self, pdu: &[u8]) -> Result<(), TransportError> {
        let len = u32::try_from(pdu.len())
            .ok()
            .filter(|len| *len <= MAX_PDU_SIZE)
            .ok_or(TransportError::TooLarge(pdu.len()))?;
        encode_into_std_write(len, &mut self.stream, codec::config())?;
        self.stream.write_all(pdu)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Reads the next PDU. Returns `None` when the peer closed the stream
    /// between PDUs.
    pub fn read_pdu(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let len: u32 = match decode_from_std_read(&mut self.stream, codec::config()) {
            Ok(len) => len,
            Err(DecodeError::Io { inner, .. }) if inner.kind() == ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if len > MAX_PDU_SIZE {
            return Err(TransportError::TooLarge(len as usize));
        }

        let mut pdu = vec![0; len as usize];
        self.stream.read_exact(&mut pdu)?;
        Ok(Some(pdu))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek, SeekFrom};

    use super::*;

    #[test]
    fn read_write_pdu() {
        let stream = Cursor::new(Vec::new());
        let mut transport = ProtocolTransport::new(stream);

        transport.write_pdu(&[0xC8, 0, 0, 0]).unwrap();
        transport.write_pdu(&[1, 2, 3]).unwrap();
        assert_eq!(&transport.stream.get_ref()[..4], &4_u32.to_le_bytes());

        transport.stream.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(transport.read_pdu().unwrap(), Some(vec![0xC8, 0, 0, 0]));
        assert_eq!(transport.read_pdu().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(transport.read_pdu().unwrap(), None);
    }

    #[test]
    fn rejects_oversized_length() {
        let mut bytes = (MAX_PDU_SIZE + 1).to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 8]);
        let mut transport = ProtocolTransport::new(Cursor::new(bytes));

        assert!(matches!(
            transport.read_pdu(),
            Err(TransportError::TooLarge(_))
        ));
    }

    #[test]
    fn truncated_pdu_is_io_error() {
        let mut bytes = 16_u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 4]);
        let mut transport = ProtocolTransport::new(Cursor::new(bytes));

        assert!(matches!(transport.read_pdu(), Err(TransportError::Io(_))));
    }
}
