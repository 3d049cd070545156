//! Splitting datagrams into link-sized frames.

use super::ForwardError;
use crate::protocol::{FragmentHeader, MeshFrame, MeshHeader, FRAG_UNIT, MAX_DATAGRAM_SIZE};

/// Split `datagram` into frames that each fit in `mtu` bytes.
///
/// `trailer` is the number of bytes added after encoding (key epoch and
/// MIC when the frame will be secured). A datagram that fits is sent as
/// one unfragmented frame. Otherwise every fragment but the last carries
/// a multiple of 8 payload bytes.
pub fn fragment(
    header: &MeshHeader,
    datagram: &[u8],
    mtu: usize,
    trailer: usize,
    tag: u16,
) -> Result<Vec<MeshFrame>, ForwardError> {
    let mut base = header.clone();
    base.frag = None;
    let base_len = base.encoded_len() + trailer;

    if base_len + datagram.len() <= mtu {
        return Ok(vec![MeshFrame::new(base, datagram.to_vec())]);
    }
    if datagram.len() > MAX_DATAGRAM_SIZE {
        return Err(ForwardError::TooLarge {
            size: datagram.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }

    let size = datagram.len() as u16;
    let first = FragmentHeader { size, tag, offset: 0 };
    let first_room = chunk_room(mtu, base_len + first.encoded_len());
    let rest_room = chunk_room(mtu, base.encoded_len_with_frag() + trailer);
    if first_room == 0 || rest_room == 0 {
        return Err(ForwardError::MtuTooSmall(mtu));
    }

    let mut frames = Vec::new();
    let mut offset = 0usize;
    while offset < datagram.len() {
        let room = if offset == 0 { first_room } else { rest_room };
        let end = (offset + room).min(datagram.len());
        let mut h = base.clone();
        h.frag = Some(FragmentHeader {
            size,
            tag,
            offset: offset as u16,
        });
        frames.push(MeshFrame::new(h, datagram[offset..end].to_vec()));
        offset = end;
    }
    Ok(frames)
}

/// Payload bytes available after `overhead`, rounded down to the fragment unit.
fn chunk_room(mtu: usize, overhead: usize) -> usize {
    mtu.saturating_sub(overhead) / FRAG_UNIT * FRAG_UNIT
}
