//! USB/IP wire protocol for the serial client
//!
//! This crate defines the bit-exact packet layouts spoken with a usbipd
//! daemon and the USB descriptor structures returned during enumeration.
//! The operation layer (device list, import) and the URB headers are network
//! byte order; setup packets and descriptors are little-endian. Both
//! orderings are applied per field by the codecs here, never per packet.
//!
//! # Example
//!
//! ```
//! use protocol::{DevlistRequest, OpHeader, OpCommand};
//!
//! let mut request = Vec::new();
//! DevlistRequest.write_to(&mut request).unwrap();
//! assert_eq!(request, [0x01, 0x11, 0x80, 0x05, 0x00, 0x00, 0x00, 0x00]);
//!
//! let header = OpHeader::from_bytes(&request).unwrap();
//! assert_eq!(header.command, OpCommand::ReqDevlist);
//! ```

pub mod descriptors;
pub mod error;
pub mod packets;
pub mod setup;
pub mod types;

pub use descriptors::{
    parse, parse_configuration, parse_interface, ConfigurationDescriptor, DeviceDescriptor,
    EndpointDescriptor, FunctionalDescriptor, InterfaceAssociation, InterfaceDescriptor,
    StringDescriptor, TypedDescriptor,
};
pub use error::{ProtocolError, Result};
pub use packets::{
    BusId, CmdSubmit, CmdUnlink, DevicePath, DevlistReply, DevlistReplyHeader, DevlistRequest,
    ImportReply, ImportRequest, InterfaceRecord, OpHeader, RetSubmit, RetUnlink, UrbHeader,
    NON_ISO_PACKETS,
};
pub use setup::{LineCoding, SetupPacket};
pub use types::{
    cdc_control, errno, interface_class, transfer_flags, CdcRequest, CdcSubtype, DescriptorType,
    DeviceSpeed, Direction, OpCommand, OpStatus, StandardRequest, TransferKind, UrbCommand,
    DEFAULT_PORT, USBIP_VERSION,
};
