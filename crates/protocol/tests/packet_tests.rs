//! Round-trip and byte-layout tests for the wire codec
//!
//! Every packet type is encoded and decoded both with literal expected byte
//! strings and with generated field values.

use bytes::Bytes;
use proptest::prelude::*;
use protocol::{
    BusId, CmdSubmit, CmdUnlink, DevicePath, DevlistReply, DevlistReplyHeader, DevlistRequest,
    Direction, ImportReply, ImportRequest, InterfaceRecord, OpCommand, OpHeader, ProtocolError,
    RetSubmit, RetUnlink, SetupPacket, UrbHeader, UrbCommand,
};

fn encode<F: Fn(&mut Vec<u8>) -> std::io::Result<()>>(write: F) -> Vec<u8> {
    let mut buf = Vec::new();
    write(&mut buf).expect("encoding into a Vec cannot fail");
    buf
}

#[test]
fn test_devlist_request_wire_bytes() {
    let bytes = encode(|buf| DevlistRequest.write_to(buf));
    assert_eq!(bytes, [0x01, 0x11, 0x80, 0x05, 0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn test_setup_packet_wire_bytes() {
    let setup = SetupPacket {
        request_type: 0x80,
        request: 0x06,
        value: 0x0100,
        index: 0,
        length: 0x0012,
    };
    assert_eq!(setup.pack(), [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);
}

#[test]
fn test_urb_header_is_network_order() {
    let header = UrbHeader {
        command: UrbCommand::CmdSubmit,
        seqnum: 1,
        devid: 0x0001_0002,
        direction: Direction::In,
        ep: 1,
    };
    let bytes = encode(|buf| header.write_to(buf));
    assert_eq!(
        bytes,
        [
            0x00, 0x00, 0x00, 0x01, // command
            0x00, 0x00, 0x00, 0x01, // seqnum
            0x00, 0x01, 0x00, 0x02, // devid
            0x00, 0x00, 0x00, 0x01, // direction
            0x00, 0x00, 0x00, 0x01, // ep
        ]
    );
}

#[test]
fn test_import_request_wire_layout() {
    let request = ImportRequest {
        busid: BusId::new("1-1"),
    };
    let bytes = encode(|buf| request.write_to(buf));
    assert_eq!(bytes.len(), 40);
    assert_eq!(&bytes[..8], [0x01, 0x11, 0x80, 0x03, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(&bytes[8..11], b"1-1");
    assert!(bytes[11..].iter().all(|&b| b == 0));
}

#[test]
fn test_declared_sizes() {
    assert_eq!(OpHeader::SIZE, 8);
    assert_eq!(DevlistRequest::SIZE, 8);
    assert_eq!(DevlistReplyHeader::SIZE, 12);
    assert_eq!(DevicePath::SIZE, 312);
    assert_eq!(InterfaceRecord::SIZE, 4);
    assert_eq!(ImportRequest::SIZE, 40);
    assert_eq!(ImportReply::SIZE, 320);
    assert_eq!(UrbHeader::SIZE, 20);
    assert_eq!(CmdSubmit::PREFIX_SIZE, 48);
    assert_eq!(RetSubmit::SIZE, 48);
    assert_eq!(CmdUnlink::SIZE, 48);
    assert_eq!(RetUnlink::SIZE, 48);
}

#[test]
fn test_device_path_roundtrip() {
    let path = DevicePath {
        path: "/sys/devices/pci0000:00/0000:00:01.2/usb1/1-1".to_string(),
        busid: BusId::new("1-1"),
        busnum: 1,
        devnum: 1,
        speed: 2,
        id_vendor: 0x0525,
        id_product: 0xA4A7,
        bcd_device: 0x0404,
        device_class: 0x02,
        device_subclass: 0x00,
        device_protocol: 0x00,
        configuration_value: 1,
        num_configurations: 1,
        num_interfaces: 0,
        interfaces: Vec::new(),
    };
    let bytes = encode(|buf| path.write_to(buf));
    assert_eq!(bytes.len(), DevicePath::SIZE);
    assert_eq!(DevicePath::from_bytes(&bytes).unwrap(), path);
}

#[test]
fn test_devlist_reply_roundtrip() {
    let mut path = DevicePath {
        path: "/sys/devices/usb1/1-1".to_string(),
        busid: BusId::new("1-1"),
        busnum: 1,
        devnum: 1,
        id_vendor: 0x0525,
        id_product: 0xA4A7,
        num_interfaces: 2,
        ..DevicePath::default()
    };
    path.interfaces = vec![
        InterfaceRecord {
            interface_class: 0x02,
            interface_subclass: 0x02,
            interface_protocol: 0x01,
            alignment: 0,
        },
        InterfaceRecord {
            interface_class: 0x0A,
            interface_subclass: 0x00,
            interface_protocol: 0x00,
            alignment: 0,
        },
    ];
    let reply = DevlistReply {
        status: 0,
        paths: vec![path],
    };
    let bytes = encode(|buf| reply.write_to(buf));
    assert_eq!(bytes.len(), 12 + 312 + 2 * 4);
    assert_eq!(DevlistReply::from_bytes(&bytes).unwrap(), reply);
}

#[test]
fn test_import_reply_roundtrip() {
    let reply = ImportReply {
        status: 0,
        device: DevicePath {
            path: "/sys/devices/usb1/1-1".to_string(),
            busid: BusId::new("1-1"),
            busnum: 1,
            devnum: 1,
            id_vendor: 0x0525,
            id_product: 0xA4A7,
            num_interfaces: 2,
            ..DevicePath::default()
        },
    };
    let bytes = encode(|buf| reply.write_to(buf));
    assert_eq!(bytes.len(), ImportReply::SIZE);
    assert_eq!(ImportReply::from_bytes(&bytes).unwrap(), reply);
}

#[test]
fn test_truncated_errors_carry_sizes() {
    let err = RetSubmit::from_bytes(&[0u8; 20]).unwrap_err();
    match err {
        ProtocolError::Truncated { expected, actual } => {
            assert_eq!(expected, 48);
            assert_eq!(actual, 20);
        }
        other => panic!("expected Truncated, got {other:?}"),
    }
}

#[test]
fn test_bad_magic_on_unknown_op_command() {
    let mut bytes = Vec::new();
    OpHeader::request(OpCommand::ReqDevlist)
        .write_to(&mut bytes)
        .unwrap();
    bytes[2] = 0x7F; // unknown command high byte
    assert!(matches!(
        OpHeader::from_bytes(&bytes).unwrap_err(),
        ProtocolError::BadMagic { .. }
    ));
}

#[test]
fn test_bad_magic_on_unknown_urb_command() {
    let mut bytes = Vec::new();
    UrbHeader {
        command: UrbCommand::CmdSubmit,
        seqnum: 1,
        devid: 0,
        direction: Direction::Out,
        ep: 0,
    }
    .write_to(&mut bytes)
    .unwrap();
    bytes[3] = 0x63;
    assert!(matches!(
        UrbHeader::from_bytes(&bytes).unwrap_err(),
        ProtocolError::BadMagic { command: 0x63, .. }
    ));
}

#[test]
fn test_unexpected_reply_command_is_bad_magic() {
    // an import reply where a devlist reply was expected
    let mut bytes = Vec::new();
    OpHeader {
        command: OpCommand::RepImport,
        status: 0,
    }
    .write_to(&mut bytes)
    .unwrap();
    bytes.extend_from_slice(&[0u8; 4]);
    assert!(matches!(
        DevlistReplyHeader::from_bytes(&bytes).unwrap_err(),
        ProtocolError::BadMagic { .. }
    ));
}

proptest! {
    #[test]
    fn prop_busid_padding(id in "[a-zA-Z0-9._-]{0,32}") {
        let busid = BusId::new(&id);
        let bytes = busid.as_bytes();
        prop_assert_eq!(&bytes[..id.len()], id.as_bytes());
        prop_assert!(bytes[id.len()..].iter().all(|&b| b == 0));
        prop_assert_eq!(busid.to_string(), id);
    }

    #[test]
    fn prop_urb_header_roundtrip(
        seqnum in any::<u32>(),
        devid in any::<u32>(),
        direction in prop_oneof![Just(Direction::Out), Just(Direction::In)],
        ep in 0u32..16,
    ) {
        let header = UrbHeader {
            command: UrbCommand::RetSubmit,
            seqnum,
            devid,
            direction,
            ep,
        };
        let bytes = encode(|buf| header.write_to(buf));
        prop_assert_eq!(UrbHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn prop_cmd_submit_roundtrip(
        seqnum in any::<u32>(),
        devid in any::<u32>(),
        ep in 0u32..16,
        payload in proptest::collection::vec(any::<u8>(), 0..128),
    ) {
        let cmd = CmdSubmit::bulk_out(seqnum, devid, ep, Bytes::from(payload), 0);
        let bytes = encode(|buf| cmd.write_to(buf));
        let decoded = CmdSubmit::from_bytes(&bytes).unwrap();
        prop_assert_eq!(decoded, cmd);
        // encode of decode is byte identical
        let reencoded = {
            let decoded = CmdSubmit::from_bytes(&bytes).unwrap();
            encode(|buf| decoded.write_to(buf))
        };
        prop_assert_eq!(reencoded, bytes);
    }

    #[test]
    fn prop_ret_submit_roundtrip(
        seqnum in any::<u32>(),
        devid in any::<u32>(),
        status in -200i32..1,
        actual_length in 0i32..0x10000,
    ) {
        let ret = RetSubmit {
            seqnum,
            devid,
            direction: Direction::In,
            ep: 0,
            status,
            actual_length,
            start_frame: 0,
            number_of_packets: 0,
            error_count: 0,
            padding: [0u8; 8],
        };
        let bytes = encode(|buf| ret.write_to(buf));
        prop_assert_eq!(RetSubmit::from_bytes(&bytes).unwrap(), ret);
    }

    #[test]
    fn prop_unlink_roundtrip(
        seqnum in any::<u32>(),
        unlink_seqnum in any::<u32>(),
        status in -200i32..1,
    ) {
        let unlink = CmdUnlink {
            seqnum,
            devid: 0x0001_0001,
            direction: Direction::In,
            ep: 1,
            unlink_seqnum,
        };
        let bytes = encode(|buf| unlink.write_to(buf));
        prop_assert_eq!(CmdUnlink::from_bytes(&bytes).unwrap(), unlink);

        let ret = RetUnlink {
            seqnum,
            devid: 0x0001_0001,
            direction: Direction::In,
            ep: 1,
            status,
        };
        let bytes = encode(|buf| ret.write_to(buf));
        prop_assert_eq!(RetUnlink::from_bytes(&bytes).unwrap(), ret);
    }

    #[test]
    fn prop_setup_packet_roundtrip(
        request_type in any::<u8>(),
        request in any::<u8>(),
        value in any::<u16>(),
        index in any::<u16>(),
        length in any::<u16>(),
    ) {
        let setup = SetupPacket { request_type, request, value, index, length };
        prop_assert_eq!(SetupPacket::from_bytes(&setup.pack()).unwrap(), setup);
    }
}
