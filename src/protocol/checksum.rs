//! PDU checksum.
//!
//! The checksum covers everything after the 16 byte header: the payload is read
//! as little-endian 32-bit words (a trailing partial word is zero padded), the
//! words are summed, XORed with [`CHECKSUM_XOR`] and reduced by the message
//! code. All arithmetic wraps.
use super::{
    MessageKind,
    header::{HEADER_CHECKSUM, HEADER_MSG, HEADER_SIZE},
};

pub const CHECKSUM_XOR: u32 = 0x5953_3959;

pub fn compute(kind: MessageKind, payload: &[u8]) -> u32 {
    let sum = payload.chunks(4).fold(0_u32, |acc, chunk| {
        let mut word = [0_u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        acc.wrapping_add(u32::from_le_bytes(word))
    });
    (sum ^ CHECKSUM_XOR).wrapping_sub(kind.code())
}

pub fn verify(kind: MessageKind, expected: u32, payload: &[u8]) -> bool {
    compute(kind, payload) == expected
}

/// Recomputes the checksum of a fully serialized PDU and writes it into the
/// header in place.
///
/// # Panics
///
/// If `pdu` is shorter than the header.
pub fn stamp(kind: MessageKind, pdu: &mut [u8]) {
    debug_assert_eq!(
        u32::from_le_bytes([
            pdu[HEADER_MSG],
            pdu[HEADER_MSG + 1],
            pdu[HEADER_MSG + 2],
            pdu[HEADER_MSG + 3]
        ]),
        kind.code()
    );
    let checksum = compute(kind, &pdu[HEADER_SIZE..]);
    pdu[HEADER_CHECKSUM..HEADER_CHECKSUM + 4].copy_from_slice(&checksum.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn empty_payload() {
        assert_eq!(
            compute(MessageKind::GetRows, &[]),
            CHECKSUM_XOR.wrapping_sub(0xCC)
        );
    }

    #[test]
    fn partial_word_is_zero_padded() {
        let padded = [1, 2, 3, 0];
        assert_eq!(
            compute(MessageKind::CreateQuery, &[1, 2, 3]),
            compute(MessageKind::CreateQuery, &padded)
        );
    }

    #[test]
    fn kind_changes_checksum() {
        let payload = [9_u8; 12];
        assert_ne!(
            compute(MessageKind::GetRows, &payload),
            compute(MessageKind::SetBindings, &payload)
        );
    }

    proptest! {
        #[test]
        fn untampered_payload_verifies(payload in prop::collection::vec(any::<u8>(), 0..256)) {
            let sum = compute(MessageKind::GetRows, &payload);
            prop_assert!(verify(MessageKind::GetRows, sum, &payload));
        }

        #[test]
        fn tampered_word_never_verifies(
            payload in prop::collection::vec(any::<u8>(), 4..256),
            index in any::<prop::sample::Index>(),
            delta in 1_u8..=255,
        ) {
            let sum = compute(MessageKind::CreateQuery, &payload);
            let mut tampered = payload.clone();
            let at = index.index(tampered.len());
            tampered[at] = tampered[at].wrapping_add(delta);
            prop_assert!(!verify(MessageKind::CreateQuery, sum, &tampered));
        }
    }
}
