use super::*;
use crate::identity::{ExtAddr, ExtNetId, MeshNetId, Rsid, Sid};
use crate::network_data::{NetInfo, NetworkDataRecord, StableNetworkData};
use crate::node::{LeaderPriority, Mode, NodeType};

fn ext(last: u8) -> ExtAddr {
    ExtAddr::from_bytes([0x02, 0, 0, 0, 0, 0, 0, last])
}

fn sample_advertisement() -> Advertisement {
    Advertisement {
        net_info: NetInfo {
            version: 4,
            size: 12,
            stable_main: 1,
            stable_minor: 2,
        },
        leader: LeaderPriority::new(2, ext(9)),
        ssid: SsidInfo {
            child_num: 3,
            free_slots: 8,
        },
        path_cost: 512,
        channel: 6,
        ext_netid: ExtNetId::from_bytes([1, 2, 3, 4, 5, 6]),
        mode: Mode::SUPER | Mode::RX_ON,
        rsid: Some(Rsid::new(3)),
    }
}

// ===== Mesh header =====

#[test]
fn test_fixed_header_layout() {
    let header = MeshHeader::new(
        FrameKind::Command,
        MeshNetId::new(0xabcd),
        Sid::new(0x1000),
        Sid::BCAST,
        10,
    );
    let mut buf = Vec::new();
    header.encode(&mut buf);
    assert_eq!(buf.len(), MESH_HEADER_FIXED_SIZE);
    assert_eq!(buf[0], 0b1011_0001);
    assert_eq!(buf[1], 0);
    assert_eq!(buf[2], 10);
    assert_eq!(&buf[3..], &[0xab, 0xcd, 0x10, 0x00, 0xff, 0xff]);
    assert!(header.is_broadcast());
}

#[test]
fn test_header_with_every_option() {
    let mut header = MeshHeader::new(
        FrameKind::Data,
        MeshNetId::new(1),
        Sid::new(0x1100),
        Sid::new(0x2000),
        3,
    );
    header.src_ext = Some(ext(1));
    header.dest_ext = Some(ext(2));
    header.mcast = Some(McastInfo {
        scope: McastScope::Mesh,
        seq: 77,
    });
    header.frag = Some(FragmentHeader {
        size: 600,
        tag: 9,
        offset: 232,
    });
    header.key_epoch = Some(4);

    let mut frame = MeshFrame::new(header.clone(), vec![0xaa; 20]);
    frame.mic = Some([1, 2, 3, 4]);
    let bytes = frame.encode();
    assert_eq!(
        bytes.len(),
        MESH_HEADER_FIXED_SIZE + 8 + 8 + 2 + FRAG_N_SIZE + 1 + 20 + MIC_SIZE
    );
    assert_eq!(bytes[1], 0x1f);

    let decoded = MeshFrame::decode(&bytes).unwrap();
    assert_eq!(decoded.header, header);
    assert_eq!(decoded.payload, vec![0xaa; 20]);
    assert_eq!(decoded.mic, Some([1, 2, 3, 4]));
}

#[test]
fn test_header_rejects_wrong_dispatch_and_version() {
    let mut buf = vec![0u8; MESH_HEADER_FIXED_SIZE];
    assert!(matches!(
        MeshHeader::decode(&buf),
        Err(ProtocolError::InvalidDispatch(0))
    ));
    buf[0] = 0b1010_0010;
    assert!(matches!(
        MeshHeader::decode(&buf),
        Err(ProtocolError::UnsupportedVersion(2))
    ));
}

#[test]
fn test_header_truncated_optional_part() {
    let mut header = MeshHeader::new(FrameKind::Data, MeshNetId::new(1), Sid::LEADER, Sid::new(1), 1);
    header.src_ext = Some(ext(1));
    let mut buf = Vec::new();
    header.encode(&mut buf);
    buf.truncate(MESH_HEADER_FIXED_SIZE + 4);
    assert!(matches!(
        MeshHeader::decode(&buf),
        Err(ProtocolError::MessageTooShort { .. })
    ));
}

#[test]
fn test_secured_frame_without_room_for_mic() {
    let mut header = MeshHeader::new(FrameKind::Data, MeshNetId::new(1), Sid::LEADER, Sid::new(1), 1);
    header.key_epoch = Some(1);
    let mut buf = Vec::new();
    header.encode(&mut buf);
    buf.extend_from_slice(&[1, 2]);
    assert!(MeshFrame::decode(&buf).is_err());
}

// ===== Commands =====

#[test]
fn test_command_header_layout() {
    let cmd = Command::new(
        0x0102,
        CommandBody::LinkRequest(LinkRequest { wakeup: true }),
    );
    let bytes = cmd.encode();
    assert_eq!(&bytes[..COMMAND_HEADER_SIZE], &[0x07, 0x01, 0x02]);
    assert_eq!(Command::decode(&bytes).unwrap(), cmd);
}

#[test]
fn test_advertisement_decodes_with_unknown_tlv() {
    let cmd = Command::new(5, CommandBody::Advertisement(sample_advertisement()));
    let mut bytes = cmd.encode();
    bytes.extend_from_slice(&[0xfe, 2, 0xde, 0xad]);
    assert_eq!(Command::decode(&bytes).unwrap(), cmd);
}

#[test]
fn test_advertisement_missing_tlv() {
    let bytes = [CommandType::Advertisement.to_byte(), 0, 1];
    assert!(matches!(
        Command::decode(&bytes),
        Err(ProtocolError::MissingTlv(_))
    ));
}

#[test]
fn test_unknown_command_type() {
    assert_eq!(
        Command::decode(&[0x7f, 0, 0]),
        Err(ProtocolError::InvalidCommandType(0x7f))
    );
    assert!(CommandType::from_byte(0x0e).is_none());
}

#[test]
fn test_attach_response_carries_stable_data() {
    let resp = AttachResponse {
        status: AllocStatus::Ok,
        sid: Sid::new(0x1100),
        node_type: NodeType::Router,
        net_info: NetInfo::default(),
        stable: StableNetworkData::new(MeshNetId::new(0x1234)),
        leader: LeaderPriority::new(3, ext(1)),
        path_cost: 256,
        ext_netid: ExtNetId::default(),
        channel: 11,
    };
    let cmd = Command::new(1, CommandBody::AttachResponse(resp.clone()));
    match Command::decode(&cmd.encode()).unwrap().body {
        CommandBody::AttachResponse(decoded) => {
            assert_eq!(decoded, resp);
            assert_eq!(decoded.stable.mcast_addr[12..14], [0x12, 0x34]);
        }
        other => panic!("unexpected body {:?}", other),
    }
}

#[test]
fn test_network_data_update_with_records() {
    let record = NetworkDataRecord {
        origin: Sid::new(0x1000),
        prefix: [0xfd; 16],
        prefix_len: 64,
        border_router: true,
        cost: 3,
        seq: 40,
    };
    let update = NetworkDataUpdate {
        net_info: None,
        stable: None,
        records: vec![record, NetworkDataRecord { seq: 41, ..record }],
    };
    let cmd = Command::new(2, CommandBody::NetworkDataUpdate(update.clone()));
    assert_eq!(
        Command::decode(&cmd.encode()).unwrap().body,
        CommandBody::NetworkDataUpdate(update)
    );
}

#[test]
fn test_routing_info_requires_router_id_first() {
    let cmd = Command::new(
        3,
        CommandBody::RoutingInfo(RoutingInfo {
            router: RouterId::VectorRouter,
            body: vec![0x1a, 1, 2],
        }),
    );
    let bytes = cmd.encode();
    assert_eq!(&bytes[3..6], &[0x10, 1, 2]);
    assert_eq!(Command::decode(&bytes).unwrap(), cmd);

    let bad = [CommandType::RoutingInfo.to_byte(), 0, 0, 0x05, 1, 1];
    assert!(Command::decode(&bad).is_err());
}

#[test]
fn test_auth_commands() {
    let code = AuthCode {
        joiner: ext(4),
        code: [7; CHALLENGE_SIZE],
    };
    let relay = Command::new(9, CommandBody::AuthCodeRelay(code.clone()));
    let direct = Command::new(9, CommandBody::AuthCode(code));
    assert_ne!(relay.encode()[0], direct.encode()[0]);
    assert_eq!(Command::decode(&relay.encode()).unwrap(), relay);

    let short = [CommandType::AuthChallenge.to_byte(), 0, 0, 0x16, 8, 0, 0, 0, 0, 0, 0, 0, 1, 0x13, 2, 1, 2];
    assert!(matches!(
        Command::decode(&short),
        Err(ProtocolError::Malformed(_))
    ));
}

#[test]
fn test_admission_filter() {
    assert!(CommandType::AuthStart.allowed_before_admission());
    assert!(CommandType::Advertisement.allowed_before_admission());
    assert!(!CommandType::NetworkDataUpdate.allowed_before_admission());
    assert!(!CommandType::AttachResponse.allowed_before_admission());
}
