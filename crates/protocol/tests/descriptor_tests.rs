//! Decoding tests for a realistic CDC-ACM configuration blob

use protocol::{
    interface_class, parse, parse_configuration, FunctionalDescriptor, ProtocolError,
    TypedDescriptor,
};

/// A full CDC-ACM configuration: interface association, communications
/// interface with its functional descriptors and notification endpoint,
/// then the data interface with one bulk endpoint pair. wTotalLength 75.
fn cdc_acm_configuration() -> Vec<u8> {
    let mut blob = Vec::new();
    // configuration header
    blob.extend_from_slice(&[0x09, 0x02, 0x4B, 0x00, 0x02, 0x01, 0x00, 0xC0, 0x32]);
    // interface association: interfaces 0..2, CDC
    blob.extend_from_slice(&[0x08, 0x0B, 0x00, 0x02, 0x02, 0x02, 0x01, 0x00]);
    // interface 0: communications, one notification endpoint
    blob.extend_from_slice(&[0x09, 0x04, 0x00, 0x00, 0x01, 0x02, 0x02, 0x01, 0x00]);
    // header functional, bcdCDC 1.10
    blob.extend_from_slice(&[0x05, 0x24, 0x00, 0x10, 0x01]);
    // call management, data interface 1
    blob.extend_from_slice(&[0x05, 0x24, 0x01, 0x00, 0x01]);
    // abstract control management
    blob.extend_from_slice(&[0x04, 0x24, 0x02, 0x02]);
    // union, master 0 slave 1
    blob.extend_from_slice(&[0x05, 0x24, 0x06, 0x00, 0x01]);
    // notification endpoint 0x83, interrupt, 8 bytes, interval 10
    blob.extend_from_slice(&[0x07, 0x05, 0x83, 0x03, 0x08, 0x00, 0x0A]);
    // interface 1: CDC data, two bulk endpoints
    blob.extend_from_slice(&[0x09, 0x04, 0x01, 0x00, 0x02, 0x0A, 0x00, 0x00, 0x00]);
    // bulk OUT endpoint 0x02, 64 bytes
    blob.extend_from_slice(&[0x07, 0x05, 0x02, 0x02, 0x40, 0x00, 0x00]);
    // bulk IN endpoint 0x81, 64 bytes
    blob.extend_from_slice(&[0x07, 0x05, 0x81, 0x02, 0x40, 0x00, 0x00]);
    assert_eq!(blob.len(), 75);
    blob
}

#[test]
fn test_short_configuration_read() {
    // the 9-byte short read used to learn wTotalLength
    let blob = cdc_acm_configuration();
    let configuration = parse_configuration(&blob[..9]).unwrap();
    assert_eq!(configuration.total_length, 75);
    assert_eq!(configuration.num_interfaces, 2);
    assert_eq!(configuration.configuration_value, 1);
    // nothing beyond the header was available
    assert!(configuration.interfaces.is_empty());
}

#[test]
fn test_full_configuration_walk() {
    let blob = cdc_acm_configuration();
    let configuration = match parse(&blob).unwrap() {
        TypedDescriptor::Configuration(c) => c,
        other => panic!("expected configuration, got {other:?}"),
    };

    assert_eq!(configuration.associations.len(), 1);
    assert_eq!(configuration.associations[0].interface_count, 2);

    assert_eq!(configuration.interfaces.len(), 2);
    let comm = &configuration.interfaces[0];
    assert_eq!(comm.interface_class, interface_class::COMM);
    assert_eq!(comm.endpoints.len(), 1);
    assert_eq!(comm.endpoints[0].number(), 3);
    assert!(!comm.endpoints[0].is_output());
    assert_eq!(comm.functionals.len(), 4);
    assert!(matches!(
        comm.functionals[0],
        FunctionalDescriptor::Header { bcd_cdc: 0x0110, .. }
    ));
    assert!(matches!(
        comm.functionals[3],
        FunctionalDescriptor::Union {
            master_interface: 0,
            slave_interface: 1,
            ..
        }
    ));

    let data = &configuration.interfaces[1];
    assert_eq!(data.interface_class, interface_class::CDC_DATA);
    assert_eq!(data.endpoints.len(), 2);
    assert!(data.endpoints[0].is_output());
    assert_eq!(data.endpoints[0].number(), 2);
    assert!(!data.endpoints[1].is_output());
    assert_eq!(data.endpoints[1].number(), 1);
    assert!(data.functionals.is_empty());
}

#[test]
fn test_string_descriptor_inside_configuration_is_skipped() {
    let mut blob = cdc_acm_configuration();
    // splice a string descriptor between the association and interface 0
    blob.splice(17..17, [0x04, 0x03, 0x09, 0x04]);
    let configuration = parse_configuration(&blob).unwrap();
    assert_eq!(configuration.interfaces.len(), 2);
    assert_eq!(configuration.associations.len(), 1);
}

#[test]
fn test_invalid_descriptor_fails_the_walk() {
    let mut blob = cdc_acm_configuration();
    blob[18] = 0x00; // interface 0's type byte becomes INVALID
    let err = parse_configuration(&blob).unwrap_err();
    assert!(matches!(err, ProtocolError::MalformedDescriptor(_)));
}

#[test]
fn test_truncated_interface_tail_ends_walk() {
    let blob = cdc_acm_configuration();
    // chop the blob inside the data interface's endpoints
    let err = parse_configuration(&blob[..70]).unwrap_err();
    assert!(matches!(err, ProtocolError::Truncated { .. }));
}

#[test]
fn test_standalone_dispatch() {
    // endpoint
    let endpoint = parse(&[0x07, 0x05, 0x81, 0x02, 0x40, 0x00, 0x00]).unwrap();
    assert!(matches!(endpoint, TypedDescriptor::Endpoint(e) if e.number() == 1));
    // interface association
    let association = parse(&[0x08, 0x0B, 0x00, 0x02, 0x02, 0x02, 0x01, 0x00]).unwrap();
    assert!(matches!(
        association,
        TypedDescriptor::InterfaceAssociation(a) if a.first_interface == 0
    ));
    // functional
    let functional = parse(&[0x04, 0x24, 0x02, 0x06]).unwrap();
    assert!(matches!(
        functional,
        TypedDescriptor::Functional(FunctionalDescriptor::Acm { capabilities: 6, .. })
    ));
}
