//! Fragment header (6LoWPAN layout).
//!
//! First fragment (4 bytes): `11000` | datagram size (11 bits), tag (16).
//! Subsequent fragments (5 bytes): `11100` | size, tag, offset in 8-byte units.

use super::ProtocolError;

const FRAG_1_DISPATCH: u8 = 0b11000;
const FRAG_N_DISPATCH: u8 = 0b11100;

pub const FRAG_1_SIZE: usize = 4;
pub const FRAG_N_SIZE: usize = 5;

/// Largest datagram the 11-bit size field can describe.
pub const MAX_DATAGRAM_SIZE: usize = 0x07ff;

/// Offsets and non-final fragment lengths are multiples of this.
pub const FRAG_UNIT: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Total datagram size in bytes.
    pub size: u16,
    /// Per-datagram tag chosen by the originator.
    pub tag: u16,
    /// Byte offset of this fragment's payload; always a multiple of 8.
    pub offset: u16,
}

impl FragmentHeader {
    pub fn is_first(&self) -> bool {
        self.offset == 0
    }

    pub fn encoded_len(&self) -> usize {
        if self.is_first() { FRAG_1_SIZE } else { FRAG_N_SIZE }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        let dispatch = if self.is_first() { FRAG_1_DISPATCH } else { FRAG_N_DISPATCH };
        let word = ((dispatch as u16) << 11) | (self.size & MAX_DATAGRAM_SIZE as u16);
        buf.extend_from_slice(&word.to_be_bytes());
        buf.extend_from_slice(&self.tag.to_be_bytes());
        if !self.is_first() {
            buf.push((self.offset as usize / FRAG_UNIT) as u8);
        }
    }

    pub fn decode(data: &[u8]) -> Result<(Self, usize), ProtocolError> {
        if data.len() < FRAG_1_SIZE {
            return Err(ProtocolError::MessageTooShort {
                expected: FRAG_1_SIZE,
                got: data.len(),
            });
        }
        let word = u16::from_be_bytes([data[0], data[1]]);
        let dispatch = (word >> 11) as u8;
        let size = word & MAX_DATAGRAM_SIZE as u16;
        let tag = u16::from_be_bytes([data[2], data[3]]);
        match dispatch {
            FRAG_1_DISPATCH => Ok((Self { size, tag, offset: 0 }, FRAG_1_SIZE)),
            FRAG_N_DISPATCH => {
                if data.len() < FRAG_N_SIZE {
                    return Err(ProtocolError::MessageTooShort {
                        expected: FRAG_N_SIZE,
                        got: data.len(),
                    });
                }
                let offset = data[4] as u16 * FRAG_UNIT as u16;
                if offset == 0 {
                    return Err(ProtocolError::Malformed("subsequent fragment at offset 0".into()));
                }
                Ok((Self { size, tag, offset }, FRAG_N_SIZE))
            }
            other => Err(ProtocolError::InvalidDispatch(other)),
        }
    }
}
