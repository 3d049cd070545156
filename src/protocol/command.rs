//! Management commands: attach, allocation, link estimation, network
//! data, routing exchange and authentication.
//!
//! ## Wire Format
//!
//! | Offset | Field | Size    | Notes                         |
//! |--------|-------|---------|-------------------------------|
//! | 0      | type  | 1 byte  | `CommandType`                 |
//! | 1      | seq   | 2 bytes | per-sender command sequence   |
//! | 3      | tlvs  | var     | `{type, length, value}` items |

use super::tlv::{fixed, tlv_type, TlvReader, TlvWriter};
use super::ProtocolError;
use crate::identity::{ExtAddr, ExtNetId, MeshNetId, Rsid, Sid};
use crate::network_data::{NetInfo, NetworkDataRecord, StableNetworkData};
use crate::node::{LeaderPriority, Mode, NodeType};
use std::fmt;

/// Size of the `{type, seq}` command header.
pub const COMMAND_HEADER_SIZE: usize = 3;

/// Size of EAP challenges and auth codes.
pub const CHALLENGE_SIZE: usize = 16;

// ============================================================================
// Command Types
// ============================================================================

/// Management command identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Advertisement = 0x01,
    AttachRequest = 0x02,
    AttachResponse = 0x03,
    SidRequest = 0x04,
    SidResponse = 0x05,
    AddressError = 0x06,
    LinkRequest = 0x07,
    LinkAccept = 0x08,
    LinkAcceptAndRequest = 0x09,
    NetworkDataUpdate = 0x0a,
    RoutingInfo = 0x0b,
    RsidRequest = 0x0c,
    RsidResponse = 0x0d,
    AuthStart = 0x10,
    AuthRelay = 0x11,
    AuthChallenge = 0x12,
    AuthCode = 0x13,
    AuthCodeRelay = 0x14,
    AuthResult = 0x15,
}

impl CommandType {
    /// Try to convert from a byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        let t = match b {
            0x01 => CommandType::Advertisement,
            0x02 => CommandType::AttachRequest,
            0x03 => CommandType::AttachResponse,
            0x04 => CommandType::SidRequest,
            0x05 => CommandType::SidResponse,
            0x06 => CommandType::AddressError,
            0x07 => CommandType::LinkRequest,
            0x08 => CommandType::LinkAccept,
            0x09 => CommandType::LinkAcceptAndRequest,
            0x0a => CommandType::NetworkDataUpdate,
            0x0b => CommandType::RoutingInfo,
            0x0c => CommandType::RsidRequest,
            0x0d => CommandType::RsidResponse,
            0x10 => CommandType::AuthStart,
            0x11 => CommandType::AuthRelay,
            0x12 => CommandType::AuthChallenge,
            0x13 => CommandType::AuthCode,
            0x14 => CommandType::AuthCodeRelay,
            0x15 => CommandType::AuthResult,
            _ => return None,
        };
        Some(t)
    }

    /// Convert to a byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Commands accepted from a neighbor that has not been admitted yet.
    pub fn allowed_before_admission(self) -> bool {
        matches!(
            self,
            CommandType::Advertisement
                | CommandType::AttachRequest
                | CommandType::AuthStart
                | CommandType::AuthRelay
                | CommandType::AuthChallenge
                | CommandType::AuthCode
                | CommandType::AuthCodeRelay
                | CommandType::AuthResult
        )
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandType::Advertisement => "Advertisement",
            CommandType::AttachRequest => "AttachRequest",
            CommandType::AttachResponse => "AttachResponse",
            CommandType::SidRequest => "SidRequest",
            CommandType::SidResponse => "SidResponse",
            CommandType::AddressError => "AddressError",
            CommandType::LinkRequest => "LinkRequest",
            CommandType::LinkAccept => "LinkAccept",
            CommandType::LinkAcceptAndRequest => "LinkAcceptAndRequest",
            CommandType::NetworkDataUpdate => "NetworkDataUpdate",
            CommandType::RoutingInfo => "RoutingInfo",
            CommandType::RsidRequest => "RsidRequest",
            CommandType::RsidResponse => "RsidResponse",
            CommandType::AuthStart => "AuthStart",
            CommandType::AuthRelay => "AuthRelay",
            CommandType::AuthChallenge => "AuthChallenge",
            CommandType::AuthCode => "AuthCode",
            CommandType::AuthCodeRelay => "AuthCodeRelay",
            CommandType::AuthResult => "AuthResult",
        };
        write!(f, "{}", name)
    }
}

/// Allocation outcome carried in responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AllocStatus {
    Ok = 0,
    Busy = 1,
    Exhausted = 2,
}

impl AllocStatus {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AllocStatus::Ok),
            1 => Some(AllocStatus::Busy),
            2 => Some(AllocStatus::Exhausted),
            _ => None,
        }
    }
}

/// Routing strategy a routing-info command belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RouterId {
    SidRouter = 1,
    VectorRouter = 2,
}

impl RouterId {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(RouterId::SidRouter),
            2 => Some(RouterId::VectorRouter),
            _ => None,
        }
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterId::SidRouter => write!(f, "SID_ROUTER"),
            RouterId::VectorRouter => write!(f, "VECTOR_ROUTER"),
        }
    }
}

/// Child slots a router advertises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SsidInfo {
    pub child_num: u16,
    pub free_slots: u8,
}

// ============================================================================
// Command Bodies
// ============================================================================

/// Periodic router beacon, also sent in answer to discovery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Advertisement {
    pub net_info: NetInfo,
    pub leader: LeaderPriority,
    pub ssid: SsidInfo,
    pub path_cost: u16,
    pub channel: u8,
    pub ext_netid: ExtNetId,
    pub mode: Mode,
    pub rsid: Option<Rsid>,
}

/// Broadcast: discovery. Unicast: request a SID from the addressee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachRequest {
    pub mode: Mode,
    pub ext_netid: ExtNetId,
    pub requested_sid: Option<Sid>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachResponse {
    pub status: AllocStatus,
    pub sid: Sid,
    pub node_type: NodeType,
    pub net_info: NetInfo,
    pub stable: StableNetworkData,
    pub leader: LeaderPriority,
    pub path_cost: u16,
    pub ext_netid: ExtNetId,
    pub channel: u8,
}

/// Renewal request after the parent's SID changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SidRequest {
    pub mode: Mode,
    pub current_sid: Option<Sid>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SidResponse {
    pub status: AllocStatus,
    pub sid: Sid,
    pub node_type: NodeType,
}

/// The named SID is not allocated where the sender expected it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressError {
    pub sid: Sid,
    pub target: Option<ExtAddr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkRequest {
    /// Sleepy child announcing it is awake.
    pub wakeup: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkAccept {
    /// RSSI the sender observed on our link request.
    pub rssi: i8,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct NetworkDataUpdate {
    pub net_info: Option<NetInfo>,
    pub stable: Option<StableNetworkData>,
    pub records: Vec<NetworkDataRecord>,
}

/// Router-specific payload; the body is itself a TLV sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingInfo {
    pub router: RouterId,
    pub body: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsidRequest {
    pub rsid: Option<Rsid>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsidResponse {
    pub status: AllocStatus,
    pub rsid: Option<Rsid>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthStart {
    pub device_id: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthRelay {
    pub joiner: ExtAddr,
    pub device_id: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthChallenge {
    pub joiner: ExtAddr,
    pub challenge: [u8; CHALLENGE_SIZE],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthCode {
    pub joiner: ExtAddr,
    pub code: [u8; CHALLENGE_SIZE],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthResult {
    pub joiner: ExtAddr,
    pub success: bool,
}

/// Decoded command payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandBody {
    Advertisement(Advertisement),
    AttachRequest(AttachRequest),
    AttachResponse(AttachResponse),
    SidRequest(SidRequest),
    SidResponse(SidResponse),
    AddressError(AddressError),
    LinkRequest(LinkRequest),
    LinkAccept(LinkAccept),
    LinkAcceptAndRequest(LinkAccept),
    NetworkDataUpdate(NetworkDataUpdate),
    RoutingInfo(RoutingInfo),
    RsidRequest(RsidRequest),
    RsidResponse(RsidResponse),
    AuthStart(AuthStart),
    AuthRelay(AuthRelay),
    AuthChallenge(AuthChallenge),
    AuthCode(AuthCode),
    AuthCodeRelay(AuthCode),
    AuthResult(AuthResult),
}

/// A management command with its header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub seq: u16,
    pub body: CommandBody,
}

impl Command {
    pub fn new(seq: u16, body: CommandBody) -> Self {
        Self { seq, body }
    }

    pub fn command_type(&self) -> CommandType {
        match &self.body {
            CommandBody::Advertisement(_) => CommandType::Advertisement,
            CommandBody::AttachRequest(_) => CommandType::AttachRequest,
            CommandBody::AttachResponse(_) => CommandType::AttachResponse,
            CommandBody::SidRequest(_) => CommandType::SidRequest,
            CommandBody::SidResponse(_) => CommandType::SidResponse,
            CommandBody::AddressError(_) => CommandType::AddressError,
            CommandBody::LinkRequest(_) => CommandType::LinkRequest,
            CommandBody::LinkAccept(_) => CommandType::LinkAccept,
            CommandBody::LinkAcceptAndRequest(_) => CommandType::LinkAcceptAndRequest,
            CommandBody::NetworkDataUpdate(_) => CommandType::NetworkDataUpdate,
            CommandBody::RoutingInfo(_) => CommandType::RoutingInfo,
            CommandBody::RsidRequest(_) => CommandType::RsidRequest,
            CommandBody::RsidResponse(_) => CommandType::RsidResponse,
            CommandBody::AuthStart(_) => CommandType::AuthStart,
            CommandBody::AuthRelay(_) => CommandType::AuthRelay,
            CommandBody::AuthChallenge(_) => CommandType::AuthChallenge,
            CommandBody::AuthCode(_) => CommandType::AuthCode,
            CommandBody::AuthCodeRelay(_) => CommandType::AuthCodeRelay,
            CommandBody::AuthResult(_) => CommandType::AuthResult,
        }
    }

    /// Encode as a command payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(64);
        header.push(self.command_type().to_byte());
        header.extend_from_slice(&self.seq.to_be_bytes());
        let mut w = TlvWriter::with_prefix(header);

        match &self.body {
            CommandBody::Advertisement(adv) => {
                w.put(tlv_type::NET_INFO, &encode_net_info(&adv.net_info))
                    .put(tlv_type::LEADER_PRIORITY, &encode_leader(&adv.leader))
                    .put(tlv_type::SSID_INFO, &encode_ssid(&adv.ssid))
                    .put_u16(tlv_type::PATH_COST, adv.path_cost)
                    .put_u8(tlv_type::CHANNEL, adv.channel)
                    .put(tlv_type::EXT_NETID, adv.ext_netid.as_bytes())
                    .put_u8(tlv_type::MODE, adv.mode.bits());
                if let Some(rsid) = adv.rsid {
                    w.put_u8(tlv_type::RSID, rsid.as_u8());
                }
            }
            CommandBody::AttachRequest(req) => {
                w.put_u8(tlv_type::MODE, req.mode.bits())
                    .put(tlv_type::EXT_NETID, req.ext_netid.as_bytes());
                if let Some(sid) = req.requested_sid {
                    w.put_sid(tlv_type::SID, sid);
                }
            }
            CommandBody::AttachResponse(resp) => {
                w.put_u8(tlv_type::STATUS, resp.status as u8)
                    .put_sid(tlv_type::SID, resp.sid)
                    .put_u8(tlv_type::NODE_TYPE, resp.node_type.to_byte())
                    .put(tlv_type::NET_INFO, &encode_net_info(&resp.net_info))
                    .put(tlv_type::STABLE_INFO, &encode_stable(&resp.stable))
                    .put(tlv_type::LEADER_PRIORITY, &encode_leader(&resp.leader))
                    .put_u16(tlv_type::PATH_COST, resp.path_cost)
                    .put(tlv_type::EXT_NETID, resp.ext_netid.as_bytes())
                    .put_u8(tlv_type::CHANNEL, resp.channel);
            }
            CommandBody::SidRequest(req) => {
                w.put_u8(tlv_type::MODE, req.mode.bits());
                if let Some(sid) = req.current_sid {
                    w.put_sid(tlv_type::SID, sid);
                }
            }
            CommandBody::SidResponse(resp) => {
                w.put_u8(tlv_type::STATUS, resp.status as u8)
                    .put_sid(tlv_type::SID, resp.sid)
                    .put_u8(tlv_type::NODE_TYPE, resp.node_type.to_byte());
            }
            CommandBody::AddressError(err) => {
                w.put_sid(tlv_type::SID, err.sid);
                if let Some(target) = &err.target {
                    w.put_ext(tlv_type::TARGET_EXT, target);
                }
            }
            CommandBody::LinkRequest(req) => {
                w.put_u8(tlv_type::LINK_FLAGS, u8::from(req.wakeup));
            }
            CommandBody::LinkAccept(acc) | CommandBody::LinkAcceptAndRequest(acc) => {
                w.put_u8(tlv_type::RSSI, acc.rssi as u8);
            }
            CommandBody::NetworkDataUpdate(update) => {
                if let Some(info) = &update.net_info {
                    w.put(tlv_type::NET_INFO, &encode_net_info(info));
                }
                if let Some(stable) = &update.stable {
                    w.put(tlv_type::STABLE_INFO, &encode_stable(stable));
                }
                for record in &update.records {
                    w.put(tlv_type::NETWORK_DATA, &encode_record(record));
                }
            }
            CommandBody::RoutingInfo(info) => {
                w.put_u8(tlv_type::ROUTER_ID, info.router as u8);
                let mut buf = w.finish();
                buf.extend_from_slice(&info.body);
                return buf;
            }
            CommandBody::RsidRequest(req) => {
                if let Some(rsid) = req.rsid {
                    w.put_u8(tlv_type::RSID, rsid.as_u8());
                }
            }
            CommandBody::RsidResponse(resp) => {
                w.put_u8(tlv_type::STATUS, resp.status as u8);
                if let Some(rsid) = resp.rsid {
                    w.put_u8(tlv_type::RSID, rsid.as_u8());
                }
            }
            CommandBody::AuthStart(start) => {
                w.put(tlv_type::DEVICE_ID, &start.device_id);
            }
            CommandBody::AuthRelay(relay) => {
                w.put_ext(tlv_type::JOINER, &relay.joiner)
                    .put(tlv_type::DEVICE_ID, &relay.device_id);
            }
            CommandBody::AuthChallenge(ch) => {
                w.put_ext(tlv_type::JOINER, &ch.joiner)
                    .put(tlv_type::CHALLENGE, &ch.challenge);
            }
            CommandBody::AuthCode(code) | CommandBody::AuthCodeRelay(code) => {
                w.put_ext(tlv_type::JOINER, &code.joiner)
                    .put(tlv_type::AUTH_CODE, &code.code);
            }
            CommandBody::AuthResult(result) => {
                w.put_ext(tlv_type::JOINER, &result.joiner)
                    .put_u8(tlv_type::AUTH_RESULT, u8::from(result.success));
            }
        }
        w.finish()
    }

    /// Decode a command payload.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < COMMAND_HEADER_SIZE {
            return Err(ProtocolError::MessageTooShort {
                expected: COMMAND_HEADER_SIZE,
                got: data.len(),
            });
        }
        let kind =
            CommandType::from_byte(data[0]).ok_or(ProtocolError::InvalidCommandType(data[0]))?;
        let seq = u16::from_be_bytes([data[1], data[2]]);
        let tlvs = &data[COMMAND_HEADER_SIZE..];

        let r = TlvReader::parse(tlvs)?;
        let body = match kind {
            CommandType::Advertisement => CommandBody::Advertisement(Advertisement {
                net_info: decode_net_info(r.require(tlv_type::NET_INFO)?)?,
                leader: decode_leader(r.require(tlv_type::LEADER_PRIORITY)?)?,
                ssid: decode_ssid(r.require(tlv_type::SSID_INFO)?)?,
                path_cost: r.require_u16(tlv_type::PATH_COST)?,
                channel: r.require_u8(tlv_type::CHANNEL)?,
                ext_netid: require_ext_netid(&r)?,
                mode: Mode::from_bits(r.require_u8(tlv_type::MODE)?),
                rsid: r.u8(tlv_type::RSID)?.map(Rsid::new),
            }),
            CommandType::AttachRequest => CommandBody::AttachRequest(AttachRequest {
                mode: Mode::from_bits(r.require_u8(tlv_type::MODE)?),
                ext_netid: require_ext_netid(&r)?,
                requested_sid: r.sid(tlv_type::SID)?,
            }),
            CommandType::AttachResponse => CommandBody::AttachResponse(AttachResponse {
                status: decode_status(&r)?,
                sid: Sid::new(r.require_u16(tlv_type::SID)?),
                node_type: decode_node_type(&r)?,
                net_info: decode_net_info(r.require(tlv_type::NET_INFO)?)?,
                stable: decode_stable(r.require(tlv_type::STABLE_INFO)?)?,
                leader: decode_leader(r.require(tlv_type::LEADER_PRIORITY)?)?,
                path_cost: r.require_u16(tlv_type::PATH_COST)?,
                ext_netid: require_ext_netid(&r)?,
                channel: r.require_u8(tlv_type::CHANNEL)?,
            }),
            CommandType::SidRequest => CommandBody::SidRequest(SidRequest {
                mode: Mode::from_bits(r.require_u8(tlv_type::MODE)?),
                current_sid: r.sid(tlv_type::SID)?,
            }),
            CommandType::SidResponse => CommandBody::SidResponse(SidResponse {
                status: decode_status(&r)?,
                sid: Sid::new(r.require_u16(tlv_type::SID)?),
                node_type: decode_node_type(&r)?,
            }),
            CommandType::AddressError => CommandBody::AddressError(AddressError {
                sid: Sid::new(r.require_u16(tlv_type::SID)?),
                target: r.ext(tlv_type::TARGET_EXT)?,
            }),
            CommandType::LinkRequest => CommandBody::LinkRequest(LinkRequest {
                wakeup: r.u8(tlv_type::LINK_FLAGS)?.unwrap_or(0) & 0x01 != 0,
            }),
            CommandType::LinkAccept => CommandBody::LinkAccept(LinkAccept {
                rssi: r.require_u8(tlv_type::RSSI)? as i8,
            }),
            CommandType::LinkAcceptAndRequest => CommandBody::LinkAcceptAndRequest(LinkAccept {
                rssi: r.require_u8(tlv_type::RSSI)? as i8,
            }),
            CommandType::NetworkDataUpdate => {
                let net_info = r.get(tlv_type::NET_INFO).map(decode_net_info).transpose()?;
                let stable = r.get(tlv_type::STABLE_INFO).map(decode_stable).transpose()?;
                let records = r
                    .get_all(tlv_type::NETWORK_DATA)
                    .map(decode_record)
                    .collect::<Result<Vec<_>, _>>()?;
                CommandBody::NetworkDataUpdate(NetworkDataUpdate {
                    net_info,
                    stable,
                    records,
                })
            }
            CommandType::RsidRequest => CommandBody::RsidRequest(RsidRequest {
                rsid: r.u8(tlv_type::RSID)?.map(Rsid::new),
            }),
            CommandType::RsidResponse => CommandBody::RsidResponse(RsidResponse {
                status: decode_status(&r)?,
                rsid: r.u8(tlv_type::RSID)?.map(Rsid::new),
            }),
            CommandType::AuthStart => CommandBody::AuthStart(AuthStart {
                device_id: r.require(tlv_type::DEVICE_ID)?.to_vec(),
            }),
            CommandType::AuthRelay => CommandBody::AuthRelay(AuthRelay {
                joiner: r.require_ext(tlv_type::JOINER)?,
                device_id: r.require(tlv_type::DEVICE_ID)?.to_vec(),
            }),
            CommandType::AuthChallenge => CommandBody::AuthChallenge(AuthChallenge {
                joiner: r.require_ext(tlv_type::JOINER)?,
                challenge: fixed(tlv_type::CHALLENGE, r.require(tlv_type::CHALLENGE)?)?,
            }),
            CommandType::AuthCode | CommandType::AuthCodeRelay => {
                let code = AuthCode {
                    joiner: r.require_ext(tlv_type::JOINER)?,
                    code: fixed(tlv_type::AUTH_CODE, r.require(tlv_type::AUTH_CODE)?)?,
                };
                if kind == CommandType::AuthCode {
                    CommandBody::AuthCode(code)
                } else {
                    CommandBody::AuthCodeRelay(code)
                }
            }
            CommandType::AuthResult => CommandBody::AuthResult(AuthResult {
                joiner: r.require_ext(tlv_type::JOINER)?,
                success: r.require_u8(tlv_type::AUTH_RESULT)? != 0,
            }),
            CommandType::RoutingInfo => return decode_routing_info(seq, tlvs),
        };
        Ok(Self { seq, body })
    }
}

fn decode_routing_info(seq: u16, tlvs: &[u8]) -> Result<Command, ProtocolError> {
    // The router id TLV comes first; the router's own TLVs follow it.
    if tlvs.len() < 3 || tlvs[0] != tlv_type::ROUTER_ID || tlvs[1] != 1 {
        return Err(ProtocolError::MissingTlv(tlv_type::ROUTER_ID));
    }
    let router = RouterId::from_byte(tlvs[2])
        .ok_or_else(|| ProtocolError::Malformed(format!("router id {}", tlvs[2])))?;
    let body = tlvs[3..].to_vec();
    TlvReader::parse(&body)?;
    Ok(Command {
        seq,
        body: CommandBody::RoutingInfo(RoutingInfo { router, body }),
    })
}

// ============================================================================
// Composite TLV Values
// ============================================================================

fn encode_net_info(info: &NetInfo) -> [u8; 5] {
    let size = info.size.to_be_bytes();
    [info.version, size[0], size[1], info.stable_main, info.stable_minor]
}

fn decode_net_info(value: &[u8]) -> Result<NetInfo, ProtocolError> {
    let b: [u8; 5] = fixed(tlv_type::NET_INFO, value)?;
    Ok(NetInfo {
        version: b[0],
        size: u16::from_be_bytes([b[1], b[2]]),
        stable_main: b[3],
        stable_minor: b[4],
    })
}

fn encode_leader(leader: &LeaderPriority) -> [u8; 9] {
    let mut out = [0u8; 9];
    out[0] = leader.weight;
    out[1..].copy_from_slice(leader.ext.as_bytes());
    out
}

fn decode_leader(value: &[u8]) -> Result<LeaderPriority, ProtocolError> {
    let b: [u8; 9] = fixed(tlv_type::LEADER_PRIORITY, value)?;
    let mut ext = [0u8; 8];
    ext.copy_from_slice(&b[1..]);
    Ok(LeaderPriority::new(b[0], ExtAddr::from_bytes(ext)))
}

fn encode_ssid(ssid: &SsidInfo) -> [u8; 3] {
    let n = ssid.child_num.to_be_bytes();
    [n[0], n[1], ssid.free_slots]
}

fn decode_ssid(value: &[u8]) -> Result<SsidInfo, ProtocolError> {
    let b: [u8; 3] = fixed(tlv_type::SSID_INFO, value)?;
    Ok(SsidInfo {
        child_num: u16::from_be_bytes([b[0], b[1]]),
        free_slots: b[2],
    })
}

fn encode_stable(stable: &StableNetworkData) -> [u8; 20] {
    let mut out = [0u8; 20];
    out[0] = stable.main_version;
    out[1] = stable.minor_version;
    out[2..4].copy_from_slice(&stable.meshnetid.as_u16().to_be_bytes());
    out[4..].copy_from_slice(&stable.mcast_addr);
    out
}

fn decode_stable(value: &[u8]) -> Result<StableNetworkData, ProtocolError> {
    let b: [u8; 20] = fixed(tlv_type::STABLE_INFO, value)?;
    let mut mcast_addr = [0u8; 16];
    mcast_addr.copy_from_slice(&b[4..]);
    Ok(StableNetworkData {
        main_version: b[0],
        minor_version: b[1],
        meshnetid: MeshNetId::new(u16::from_be_bytes([b[2], b[3]])),
        mcast_addr,
    })
}

/// `origin(2) prefix(16) len(1) flags(1) cost(2) seq(2)`
fn encode_record(record: &NetworkDataRecord) -> [u8; 24] {
    let mut out = [0u8; 24];
    out[0..2].copy_from_slice(&record.origin.as_u16().to_be_bytes());
    out[2..18].copy_from_slice(&record.prefix);
    out[18] = record.prefix_len;
    out[19] = u8::from(record.border_router);
    out[20..22].copy_from_slice(&record.cost.to_be_bytes());
    out[22..24].copy_from_slice(&record.seq.to_be_bytes());
    out
}

fn decode_record(value: &[u8]) -> Result<NetworkDataRecord, ProtocolError> {
    let b: [u8; 24] = fixed(tlv_type::NETWORK_DATA, value)?;
    let mut prefix = [0u8; 16];
    prefix.copy_from_slice(&b[2..18]);
    if b[18] > 128 {
        return Err(ProtocolError::Malformed(format!("prefix length {}", b[18])));
    }
    Ok(NetworkDataRecord {
        origin: Sid::new(u16::from_be_bytes([b[0], b[1]])),
        prefix,
        prefix_len: b[18],
        border_router: b[19] & 0x01 != 0,
        cost: u16::from_be_bytes([b[20], b[21]]),
        seq: u16::from_be_bytes([b[22], b[23]]),
    })
}

fn decode_status(r: &TlvReader<'_>) -> Result<AllocStatus, ProtocolError> {
    let b = r.require_u8(tlv_type::STATUS)?;
    AllocStatus::from_byte(b).ok_or_else(|| ProtocolError::Malformed(format!("status {}", b)))
}

fn decode_node_type(r: &TlvReader<'_>) -> Result<NodeType, ProtocolError> {
    let b = r.require_u8(tlv_type::NODE_TYPE)?;
    NodeType::from_byte(b).ok_or_else(|| ProtocolError::Malformed(format!("node type {}", b)))
}

fn require_ext_netid(r: &TlvReader<'_>) -> Result<ExtNetId, ProtocolError> {
    r.ext_netid(tlv_type::EXT_NETID)?
        .ok_or(ProtocolError::MissingTlv(tlv_type::EXT_NETID))
}
