//! Protocol constants and enumerations
//!
//! Command codes, direction flags, status values and the USB constant
//! families (standard requests, CDC requests, transfer flags) shared by the
//! operation and URB layers. The protocol is documented at
//! <https://docs.kernel.org/usb/usbip_protocol.html>.

use crate::error::{ProtocolError, Result};

/// USB/IP protocol version
pub const USBIP_VERSION: u16 = 0x0111; // Version 1.1.1

/// Default TCP port of the usbipd daemon
pub const DEFAULT_PORT: u16 = 3240;

/// Operation-layer command codes
///
/// These appear in the 16-bit command field that follows the protocol
/// version in every operation packet.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCommand {
    /// Request the list of exported devices
    ReqDevlist = 0x8005,
    /// Reply carrying the device list
    RepDevlist = 0x0005,
    /// Request import of an exported device
    ReqImport = 0x8003,
    /// Reply to an import request
    RepImport = 0x0003,
}

impl OpCommand {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x8005 => Some(Self::ReqDevlist),
            0x0005 => Some(Self::RepDevlist),
            0x8003 => Some(Self::ReqImport),
            0x0003 => Some(Self::RepImport),
            _ => None,
        }
    }
}

/// URB-layer command codes (first field of the basic header)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrbCommand {
    /// Submit a USB request block
    CmdSubmit = 0x0001,
    /// Cancel a previously submitted, still pending URB
    CmdUnlink = 0x0002,
    /// Completion of a submitted URB
    RetSubmit = 0x0003,
    /// Completion of an unlink
    RetUnlink = 0x0004,
}

impl UrbCommand {
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0x0001 => Ok(Self::CmdSubmit),
            0x0002 => Ok(Self::CmdUnlink),
            0x0003 => Ok(Self::RetSubmit),
            0x0004 => Ok(Self::RetUnlink),
            _ => Err(ProtocolError::BadMagic {
                version: USBIP_VERSION,
                command: value,
            }),
        }
    }
}

/// Direction of a transfer, from the client's perspective
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Host to device (write)
    #[default]
    Out = 0,
    /// Device to host (read)
    In = 1,
}

impl Direction {
    /// Any nonzero wire value is treated as IN.
    pub fn from_u32(value: u32) -> Self {
        if value == 0 { Self::Out } else { Self::In }
    }
}

/// Operation-layer status codes
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Success = 0,
    Error = 1,
    /// Device is already attached to another client
    Busy = 2,
}

/// Reported USB device speed
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSpeed {
    #[default]
    Unknown = 0,
    Low = 1,
    /// USB 1.1
    Full = 2,
    /// USB 2.0
    High = 3,
    /// Wireless (USB 2.5)
    Variable = 4,
}

impl DeviceSpeed {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Low,
            2 => Self::Full,
            3 => Self::High,
            4 => Self::Variable,
            _ => Self::Unknown,
        }
    }
}

/// URB transfer flags from the kernel's usb.h
pub mod transfer_flags {
    /// Report short reads as errors
    pub const URB_SHORT_NOT_OK: u32 = 0x0001;
    /// Finish bulk OUT with a short packet
    pub const URB_ZERO_PACKET: u32 = 0x0040;
    /// No non-error completion interrupt needed
    pub const URB_NO_INTERRUPT: u32 = 0x0080;
    /// Transfer from device to host
    pub const URB_DIR_IN: u32 = 0x0200;
    /// Transfer from host to device
    pub const URB_DIR_OUT: u32 = 0;
}

/// Bit fields of the setup packet's bmRequestType byte
pub mod request_type {
    pub const HOST_TO_DEVICE: u8 = 0 << 7;
    pub const DEVICE_TO_HOST: u8 = 1 << 7;
    pub const TYPE_STANDARD: u8 = 0 << 5;
    pub const TYPE_CLASS: u8 = 1 << 5;
    pub const TYPE_VENDOR: u8 = 2 << 5;
    pub const RECIPIENT_DEVICE: u8 = 0x0;
    pub const RECIPIENT_INTERFACE: u8 = 0x1;
    pub const RECIPIENT_ENDPOINT: u8 = 0x2;
}

/// Standard device requests (bRequest)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardRequest {
    GetStatus = 0x0,
    ClearFeature = 0x1,
    SetFeature = 0x3,
    SetAddress = 0x5,
    GetDescriptor = 0x6,
    SetDescriptor = 0x7,
    GetConfiguration = 0x8,
    SetConfiguration = 0x9,
}

/// Standard interface request SET_INTERFACE (bRequest)
pub const SET_INTERFACE: u8 = 0x11;

/// Class requests specific to CDC devices (bRequest)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdcRequest {
    /// Configure baud rate, stop bits, parity and character size
    SetLineCoding = 0x20,
    /// Query the current line coding
    GetLineCoding = 0x21,
    /// RS-232 signals telling the DCE the DTE is present
    SetControlLineState = 0x22,
}

/// Control bits for SET_CONTROL_LINE_STATE
pub mod cdc_control {
    pub const DTR: u16 = 1 << 0;
    pub const RTS: u16 = 1 << 1;
}

/// Descriptor type codes (bDescriptorType)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorType {
    Invalid,
    Device,
    Configuration,
    String,
    Interface,
    Endpoint,
    InterfaceAssociation,
    /// Class-specific interface descriptor (CDC functional descriptors)
    CsInterface,
    Unknown(u8),
}

impl DescriptorType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Invalid,
            0x01 => Self::Device,
            0x02 => Self::Configuration,
            0x03 => Self::String,
            0x04 => Self::Interface,
            0x05 => Self::Endpoint,
            0x0B => Self::InterfaceAssociation,
            0x24 => Self::CsInterface,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Invalid => 0x00,
            Self::Device => 0x01,
            Self::Configuration => 0x02,
            Self::String => 0x03,
            Self::Interface => 0x04,
            Self::Endpoint => 0x05,
            Self::InterfaceAssociation => 0x0B,
            Self::CsInterface => 0x24,
            Self::Unknown(other) => other,
        }
    }
}

/// CDC functional descriptor subtypes (bDescriptorSubType)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdcSubtype {
    Header = 0x0,
    CallManagement = 0x1,
    AbstractControlManagement = 0x2,
    Union = 0x6,
}

impl CdcSubtype {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Header),
            0x1 => Some(Self::CallManagement),
            0x2 => Some(Self::AbstractControlManagement),
            0x6 => Some(Self::Union),
            _ => None,
        }
    }
}

/// Device and interface class codes used by this client
pub mod interface_class {
    /// Communications and CDC control
    pub const COMM: u8 = 0x02;
    /// CDC data interface
    pub const CDC_DATA: u8 = 0x0A;
    /// Class information lives in the interface descriptors
    pub const PER_INTERFACE: u8 = 0x00;
    /// Multi-interface function (devices carrying interface associations)
    pub const MISC: u8 = 0xEF;
}

/// Transfer kind encoded in bits [1:0] of an endpoint's bmAttributes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control = 0x0,
    Isochronous = 0x1,
    Bulk = 0x2,
    Interrupt = 0x3,
}

impl TransferKind {
    pub fn from_attributes(attributes: u8) -> Self {
        match attributes & 0x3 {
            0x0 => Self::Control,
            0x1 => Self::Isochronous,
            0x2 => Self::Bulk,
            _ => Self::Interrupt,
        }
    }
}

/// POSIX errno values and descriptions for URB completion statuses
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const ENXIO: i32 = 6;
    pub const ENOMEM: i32 = 12;
    pub const EBUSY: i32 = 16;
    pub const EXDEV: i32 = 18;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
    pub const EFBIG: i32 = 27;
    pub const EPIPE: i32 = 32;
    pub const ENOSPC: i32 = 28;
    pub const EMSGSIZE: i32 = 90;
    pub const ESHUTDOWN: i32 = 108;
    pub const EPERM: i32 = 1;
    pub const EHOSTUNREACH: i32 = 113;
    pub const ENOEXEC: i32 = 8;
    pub const ETIMEDOUT: i32 = 110;

    /// Statuses that signal the remote device went away
    pub fn is_disconnect(err: i32) -> bool {
        matches!(err.abs(), ENOENT | ENODEV)
    }

    /// Readable explanation of a URB errno, following the kernel's
    /// documentation of URB submission failures.
    pub fn describe(err: i32) -> &'static str {
        match err.abs() {
            ENOMEM => "no memory for allocation of internal structures",
            EBUSY => "the URB is already active",
            ENODEV => "specified USB device or bus does not exist",
            ENOENT => "specified interface or endpoint does not exist or is not enabled",
            ENXIO => "host controller driver does not support queuing of this type of URB",
            EINVAL => "invalid transfer type, interval or packet count",
            EXDEV => "all frames the isochronous URB would be scheduled in have expired",
            EFBIG => "host controller driver cannot schedule that many isochronous frames",
            EPIPE => "the pipe type specified in the URB does not match the endpoint type",
            EMSGSIZE => "endpoint max packet size is zero or the transfer length is invalid",
            ENOSPC => "request would overcommit the bandwidth reserved for periodic transfers",
            ESHUTDOWN => "the device or host controller has been disabled",
            EPERM => "submission failed because the URB was rejected",
            EHOSTUNREACH => "URB was rejected because the device is suspended",
            ENOEXEC => "a control URB does not contain a setup packet",
            ETIMEDOUT => "the request timed out",
            _ => "unrecognized URB error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_command_codes() {
        assert_eq!(OpCommand::ReqDevlist as u16, 0x8005);
        assert_eq!(OpCommand::RepDevlist as u16, 0x0005);
        assert_eq!(OpCommand::ReqImport as u16, 0x8003);
        assert_eq!(OpCommand::RepImport as u16, 0x0003);
        assert_eq!(OpCommand::from_u16(0x8005), Some(OpCommand::ReqDevlist));
        assert_eq!(OpCommand::from_u16(0xBEEF), None);
    }

    #[test]
    fn test_urb_command_codes() {
        assert_eq!(UrbCommand::from_u32(1).unwrap(), UrbCommand::CmdSubmit);
        assert_eq!(UrbCommand::from_u32(2).unwrap(), UrbCommand::CmdUnlink);
        assert_eq!(UrbCommand::from_u32(3).unwrap(), UrbCommand::RetSubmit);
        assert_eq!(UrbCommand::from_u32(4).unwrap(), UrbCommand::RetUnlink);
        assert!(UrbCommand::from_u32(99).is_err());
    }

    #[test]
    fn test_descriptor_type_roundtrip() {
        for code in [0x00u8, 0x01, 0x02, 0x03, 0x04, 0x05, 0x0B, 0x24, 0x29] {
            assert_eq!(DescriptorType::from_u8(code).to_u8(), code);
        }
        assert_eq!(DescriptorType::from_u8(0x29), DescriptorType::Unknown(0x29));
    }

    #[test]
    fn test_disconnect_errnos() {
        assert!(errno::is_disconnect(errno::ENOENT));
        assert!(errno::is_disconnect(-errno::ENODEV));
        assert!(!errno::is_disconnect(errno::EPIPE));
    }

    #[test]
    fn test_transfer_kind() {
        assert_eq!(TransferKind::from_attributes(0x02), TransferKind::Bulk);
        assert_eq!(TransferKind::from_attributes(0x03), TransferKind::Interrupt);
        // upper bits do not change the kind
        assert_eq!(TransferKind::from_attributes(0xFE), TransferKind::Bulk);
    }
}
