//! Mesh header: the per-hop envelope of every frame.

use super::fragment::FragmentHeader;
use super::{ProtocolError, PROTOCOL_VERSION};
use crate::identity::{ExtAddr, MeshNetId, Sid};
use std::fmt;

/// Dispatch value in the top three bits of the control byte.
const MESH_DISPATCH: u8 = 0b101;

/// Fixed part of the header: control, flags, hops, netid, src, dest.
pub const MESH_HEADER_FIXED_SIZE: usize = 9;

/// Bytes appended after the payload when the SEC flag is set.
pub const MIC_SIZE: usize = 4;

const FLAG_SRC_EXT: u8 = 0x01;
const FLAG_DEST_EXT: u8 = 0x02;
const FLAG_MCAST: u8 = 0x04;
const FLAG_FRAG: u8 = 0x08;
const FLAG_SEC: u8 = 0x10;

/// Payload class carried by a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Command,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Data => write!(f, "data"),
            FrameKind::Command => write!(f, "cmd"),
        }
    }
}

/// How far a multicast frame may propagate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum McastScope {
    /// Down the originator's subtree only.
    Subnet = 1,
    /// The whole mesh.
    Mesh = 2,
}

impl McastScope {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(McastScope::Subnet),
            2 => Some(McastScope::Mesh),
            _ => None,
        }
    }
}

/// Multicast sub-header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct McastInfo {
    pub scope: McastScope,
    pub seq: u8,
}

/// Decoded mesh header.
///
/// ## Wire Format
///
/// | Offset | Field     | Size    | Notes                                   |
/// |--------|-----------|---------|-----------------------------------------|
/// | 0      | control   | 1 byte  | dispatch 0b101, cmd bit, version        |
/// | 1      | flags     | 1 byte  | SRC_EXT, DEST_EXT, MCAST, FRAG, SEC     |
/// | 2      | hops_left | 1 byte  | decremented per forwarding hop          |
/// | 3      | netid     | 2 bytes | meshnetid                               |
/// | 5      | src       | 2 bytes | originator SID                          |
/// | 7      | dest      | 2 bytes | final destination SID                   |
/// | 9      | optional  | var     | src ext, dest ext, mcast, frag, epoch   |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshHeader {
    pub kind: FrameKind,
    pub hops_left: u8,
    pub netid: MeshNetId,
    pub src: Sid,
    pub dest: Sid,
    pub src_ext: Option<ExtAddr>,
    pub dest_ext: Option<ExtAddr>,
    pub mcast: Option<McastInfo>,
    pub frag: Option<FragmentHeader>,
    /// Key epoch; present exactly when the frame carries a MIC.
    pub key_epoch: Option<u8>,
}

impl MeshHeader {
    /// Header for a frame with the given endpoints and no optional parts.
    pub fn new(kind: FrameKind, netid: MeshNetId, src: Sid, dest: Sid, hops_left: u8) -> Self {
        Self {
            kind,
            hops_left,
            netid,
            src,
            dest,
            src_ext: None,
            dest_ext: None,
            mcast: None,
            frag: None,
            key_epoch: None,
        }
    }

    /// Number of bytes `encode` will produce.
    pub fn encoded_len(&self) -> usize {
        let mut len = MESH_HEADER_FIXED_SIZE;
        if self.src_ext.is_some() {
            len += ExtAddr::LEN;
        }
        if self.dest_ext.is_some() {
            len += ExtAddr::LEN;
        }
        if self.mcast.is_some() {
            len += 2;
        }
        if let Some(frag) = &self.frag {
            len += frag.encoded_len();
        }
        if self.key_epoch.is_some() {
            len += 1;
        }
        len
    }

    /// Header length with a fragment header of the larger (subsequent) form.
    pub fn encoded_len_with_frag(&self) -> usize {
        let base = self.encoded_len() - self.frag.map(|f| f.encoded_len()).unwrap_or(0);
        base + super::fragment::FRAG_N_SIZE
    }

    pub fn is_broadcast(&self) -> bool {
        self.dest == Sid::BCAST && self.dest_ext.is_none()
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        let cmd_bit = match self.kind {
            FrameKind::Data => 0,
            FrameKind::Command => 0x10,
        };
        buf.push((MESH_DISPATCH << 5) | cmd_bit | (PROTOCOL_VERSION & 0x0f));

        let mut flags = 0u8;
        if self.src_ext.is_some() {
            flags |= FLAG_SRC_EXT;
        }
        if self.dest_ext.is_some() {
            flags |= FLAG_DEST_EXT;
        }
        if self.mcast.is_some() {
            flags |= FLAG_MCAST;
        }
        if self.frag.is_some() {
            flags |= FLAG_FRAG;
        }
        if self.key_epoch.is_some() {
            flags |= FLAG_SEC;
        }
        buf.push(flags);
        buf.push(self.hops_left);
        buf.extend_from_slice(&self.netid.as_u16().to_be_bytes());
        buf.extend_from_slice(&self.src.as_u16().to_be_bytes());
        buf.extend_from_slice(&self.dest.as_u16().to_be_bytes());

        if let Some(ext) = &self.src_ext {
            buf.extend_from_slice(ext.as_bytes());
        }
        if let Some(ext) = &self.dest_ext {
            buf.extend_from_slice(ext.as_bytes());
        }
        if let Some(mcast) = &self.mcast {
            buf.push(mcast.scope as u8);
            buf.push(mcast.seq);
        }
        if let Some(frag) = &self.frag {
            frag.encode(buf);
        }
        if let Some(epoch) = self.key_epoch {
            buf.push(epoch);
        }
    }

    /// Decode a header, returning it and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), ProtocolError> {
        if data.len() < MESH_HEADER_FIXED_SIZE {
            return Err(ProtocolError::MessageTooShort {
                expected: MESH_HEADER_FIXED_SIZE,
                got: data.len(),
            });
        }

        let control = data[0];
        if control >> 5 != MESH_DISPATCH {
            return Err(ProtocolError::InvalidDispatch(control));
        }
        let version = control & 0x0f;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let kind = if control & 0x10 != 0 {
            FrameKind::Command
        } else {
            FrameKind::Data
        };
        let flags = data[1];
        let hops_left = data[2];
        let netid = MeshNetId::new(u16::from_be_bytes([data[3], data[4]]));
        let src = Sid::new(u16::from_be_bytes([data[5], data[6]]));
        let dest = Sid::new(u16::from_be_bytes([data[7], data[8]]));

        let mut pos = MESH_HEADER_FIXED_SIZE;
        let take = |len: usize, pos: &mut usize| -> Result<std::ops::Range<usize>, ProtocolError> {
            let end = *pos + len;
            if end > data.len() {
                return Err(ProtocolError::MessageTooShort {
                    expected: end,
                    got: data.len(),
                });
            }
            let range = *pos..end;
            *pos = end;
            Ok(range)
        };

        let src_ext = if flags & FLAG_SRC_EXT != 0 {
            let r = take(ExtAddr::LEN, &mut pos)?;
            Some(ExtAddr::from_slice(&data[r]).map_err(|e| ProtocolError::Malformed(e.to_string()))?)
        } else {
            None
        };
        let dest_ext = if flags & FLAG_DEST_EXT != 0 {
            let r = take(ExtAddr::LEN, &mut pos)?;
            Some(ExtAddr::from_slice(&data[r]).map_err(|e| ProtocolError::Malformed(e.to_string()))?)
        } else {
            None
        };
        let mcast = if flags & FLAG_MCAST != 0 {
            let r = take(2, &mut pos)?;
            let scope = McastScope::from_byte(data[r.start])
                .ok_or_else(|| ProtocolError::Malformed(format!("mcast scope {}", data[r.start])))?;
            Some(McastInfo {
                scope,
                seq: data[r.start + 1],
            })
        } else {
            None
        };
        let frag = if flags & FLAG_FRAG != 0 {
            let (frag, used) = FragmentHeader::decode(&data[pos..])?;
            pos += used;
            Some(frag)
        } else {
            None
        };
        let key_epoch = if flags & FLAG_SEC != 0 {
            let r = take(1, &mut pos)?;
            Some(data[r.start])
        } else {
            None
        };

        Ok((
            Self {
                kind,
                hops_left,
                netid,
                src,
                dest,
                src_ext,
                dest_ext,
                mcast,
                frag,
                key_epoch,
            },
            pos,
        ))
    }
}

/// A complete frame split into header, payload and optional MIC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshFrame {
    pub header: MeshHeader,
    pub payload: Vec<u8>,
    pub mic: Option<[u8; MIC_SIZE]>,
}

impl MeshFrame {
    pub fn new(header: MeshHeader, payload: Vec<u8>) -> Self {
        Self {
            header,
            payload,
            mic: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.header.encoded_len() + self.payload.len() + MIC_SIZE);
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        if let Some(mic) = &self.mic {
            buf.extend_from_slice(mic);
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let (header, used) = MeshHeader::decode(data)?;
        let rest = &data[used..];
        if header.key_epoch.is_some() {
            if rest.len() < MIC_SIZE {
                return Err(ProtocolError::MessageTooShort {
                    expected: used + MIC_SIZE,
                    got: data.len(),
                });
            }
            let split = rest.len() - MIC_SIZE;
            let mut mic = [0u8; MIC_SIZE];
            mic.copy_from_slice(&rest[split..]);
            Ok(Self {
                header,
                payload: rest[..split].to_vec(),
                mic: Some(mic),
            })
        } else {
            Ok(Self {
                header,
                payload: rest.to_vec(),
                mic: None,
            })
        }
    }

    /// Bytes covered by the MIC: encoded header followed by payload.
    pub fn authenticated_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.header.encoded_len() + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf
    }
}
