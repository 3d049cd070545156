//! Type-length-value encoding for management command bodies.
//!
//! Each TLV is `{type u8, length u8, value}`. Readers skip types they do
//! not know, so new TLVs can be added without breaking older nodes.

use super::ProtocolError;
use crate::identity::{ExtAddr, ExtNetId, Sid};

/// TLV type identifiers. 0x0c and 0x11 are unassigned.
pub mod tlv_type {
    pub const NET_INFO: u8 = 0x01;
    pub const LEADER_PRIORITY: u8 = 0x02;
    pub const SSID_INFO: u8 = 0x03;
    pub const PATH_COST: u8 = 0x04;
    pub const CHANNEL: u8 = 0x05;
    pub const EXT_NETID: u8 = 0x06;
    pub const MODE: u8 = 0x07;
    pub const RSID: u8 = 0x08;
    pub const SID: u8 = 0x09;
    pub const NODE_TYPE: u8 = 0x0a;
    pub const STATUS: u8 = 0x0b;
    pub const RSSI: u8 = 0x0d;
    pub const LINK_FLAGS: u8 = 0x0e;
    pub const NETWORK_DATA: u8 = 0x0f;
    pub const ROUTER_ID: u8 = 0x10;
    pub const DEVICE_ID: u8 = 0x12;
    pub const CHALLENGE: u8 = 0x13;
    pub const AUTH_CODE: u8 = 0x14;
    pub const AUTH_RESULT: u8 = 0x15;
    pub const JOINER: u8 = 0x16;
    pub const TARGET_EXT: u8 = 0x17;
    pub const STABLE_INFO: u8 = 0x18;
    pub const VERTEX: u8 = 0x19;
    pub const SYNC_KIND: u8 = 0x1a;
}

/// Appends TLVs to a buffer.
#[derive(Debug, Default)]
pub struct TlvWriter {
    buf: Vec<u8>,
}

impl TlvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing prefix (e.g. a command header).
    pub fn with_prefix(prefix: Vec<u8>) -> Self {
        Self { buf: prefix }
    }

    /// Append a TLV. Values longer than 255 bytes are truncated by the caller's contract.
    pub fn put(&mut self, tlv: u8, value: &[u8]) -> &mut Self {
        debug_assert!(value.len() <= u8::MAX as usize);
        let len = value.len().min(u8::MAX as usize);
        self.buf.push(tlv);
        self.buf.push(len as u8);
        self.buf.extend_from_slice(&value[..len]);
        self
    }

    pub fn put_u8(&mut self, tlv: u8, value: u8) -> &mut Self {
        self.put(tlv, &[value])
    }

    pub fn put_u16(&mut self, tlv: u8, value: u16) -> &mut Self {
        self.put(tlv, &value.to_be_bytes())
    }

    pub fn put_sid(&mut self, tlv: u8, sid: Sid) -> &mut Self {
        self.put_u16(tlv, sid.as_u16())
    }

    pub fn put_ext(&mut self, tlv: u8, ext: &ExtAddr) -> &mut Self {
        self.put(tlv, ext.as_bytes())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Parsed view over a TLV sequence.
#[derive(Debug)]
pub struct TlvReader<'a> {
    entries: Vec<(u8, &'a [u8])>,
}

impl<'a> TlvReader<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ProtocolError> {
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            if pos + 2 > data.len() {
                return Err(ProtocolError::Malformed("truncated tlv header".into()));
            }
            let tlv = data[pos];
            let len = data[pos + 1] as usize;
            let start = pos + 2;
            let end = start + len;
            if end > data.len() {
                return Err(ProtocolError::MessageTooShort {
                    expected: end,
                    got: data.len(),
                });
            }
            entries.push((tlv, &data[start..end]));
            pos = end;
        }
        Ok(Self { entries })
    }

    /// First value of the given type.
    pub fn get(&self, tlv: u8) -> Option<&'a [u8]> {
        self.entries.iter().find(|(t, _)| *t == tlv).map(|(_, v)| *v)
    }

    /// Every value of the given type, in order.
    pub fn get_all(&self, tlv: u8) -> impl Iterator<Item = &'a [u8]> + '_ {
        self.entries.iter().filter(move |(t, _)| *t == tlv).map(|(_, v)| *v)
    }

    pub fn require(&self, tlv: u8) -> Result<&'a [u8], ProtocolError> {
        self.get(tlv).ok_or(ProtocolError::MissingTlv(tlv))
    }

    pub fn u8(&self, tlv: u8) -> Result<Option<u8>, ProtocolError> {
        match self.get(tlv) {
            None => Ok(None),
            Some(v) => fixed::<1>(tlv, v).map(|b| Some(b[0])),
        }
    }

    pub fn u16(&self, tlv: u8) -> Result<Option<u16>, ProtocolError> {
        match self.get(tlv) {
            None => Ok(None),
            Some(v) => fixed::<2>(tlv, v).map(|b| Some(u16::from_be_bytes(b))),
        }
    }

    pub fn sid(&self, tlv: u8) -> Result<Option<Sid>, ProtocolError> {
        Ok(self.u16(tlv)?.map(Sid::new))
    }

    pub fn ext(&self, tlv: u8) -> Result<Option<ExtAddr>, ProtocolError> {
        match self.get(tlv) {
            None => Ok(None),
            Some(v) => fixed::<8>(tlv, v).map(|b| Some(ExtAddr::from_bytes(b))),
        }
    }

    pub fn ext_netid(&self, tlv: u8) -> Result<Option<ExtNetId>, ProtocolError> {
        match self.get(tlv) {
            None => Ok(None),
            Some(v) => fixed::<6>(tlv, v).map(|b| Some(ExtNetId::from_bytes(b))),
        }
    }

    pub fn require_u8(&self, tlv: u8) -> Result<u8, ProtocolError> {
        self.u8(tlv)?.ok_or(ProtocolError::MissingTlv(tlv))
    }

    pub fn require_u16(&self, tlv: u8) -> Result<u16, ProtocolError> {
        self.u16(tlv)?.ok_or(ProtocolError::MissingTlv(tlv))
    }

    pub fn require_ext(&self, tlv: u8) -> Result<ExtAddr, ProtocolError> {
        self.ext(tlv)?.ok_or(ProtocolError::MissingTlv(tlv))
    }
}

/// Copy a TLV value of an exact width.
pub(crate) fn fixed<const N: usize>(tlv: u8, value: &[u8]) -> Result<[u8; N], ProtocolError> {
    if value.len() != N {
        return Err(ProtocolError::Malformed(format!(
            "tlv 0x{:02x}: expected {} bytes, got {}",
            tlv,
            N,
            value.len()
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(value);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_skips_unknown_types() {
        let mut writer = TlvWriter::new();
        writer
            .put(0x0c, &[0xff; 16])
            .put(0xee, &[1, 2, 3])
            .put_u16(tlv_type::PATH_COST, 300)
            .put(0x11, &[0]);
        let buf = writer.finish();

        let reader = TlvReader::parse(&buf).unwrap();
        assert_eq!(reader.u16(tlv_type::PATH_COST).unwrap(), Some(300));
        assert_eq!(reader.u8(tlv_type::CHANNEL).unwrap(), None);
    }

    #[test]
    fn test_reader_rejects_overrun() {
        let buf = [tlv_type::CHANNEL, 4, 1];
        assert!(matches!(
            TlvReader::parse(&buf),
            Err(ProtocolError::MessageTooShort { expected: 6, got: 3 })
        ));
    }

    #[test]
    fn test_wrong_width_is_malformed() {
        let buf = [tlv_type::PATH_COST, 1, 9];
        let reader = TlvReader::parse(&buf).unwrap();
        assert!(matches!(reader.u16(tlv_type::PATH_COST), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_require_reports_missing() {
        let reader = TlvReader::parse(&[]).unwrap();
        assert_eq!(
            reader.require_u8(tlv_type::STATUS),
            Err(ProtocolError::MissingTlv(tlv_type::STATUS))
        );
    }

    #[test]
    fn test_get_all_preserves_order() {
        let mut writer = TlvWriter::new();
        writer.put_u8(tlv_type::RSID, 1).put_u8(tlv_type::RSID, 2);
        let buf = writer.finish();
        let reader = TlvReader::parse(&buf).unwrap();
        let values: Vec<u8> = reader.get_all(tlv_type::RSID).map(|v| v[0]).collect();
        assert_eq!(values, vec![1, 2]);
    }
}
