//! Control-transfer setup packets
//!
//! The 8-byte setup packet is little-endian, unlike the network-byte-order
//! URB headers that carry it. Direction and descriptor type are derived from
//! the request fields rather than stored.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;

use crate::error::{ProtocolError, Result};
use crate::types::{
    request_type, CdcRequest, DescriptorType, Direction, StandardRequest, SET_INTERFACE,
};

/// The 8-byte header of a USB control transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub const SIZE: usize = 8;

    /// GET_DESCRIPTOR for the given descriptor type and index.
    pub fn get_descriptor(descriptor: DescriptorType, index: u8, length: u16) -> Self {
        Self {
            request_type: request_type::DEVICE_TO_HOST,
            request: StandardRequest::GetDescriptor as u8,
            value: u16::from(descriptor.to_u8()) << 8 | u16::from(index),
            index: 0,
            length,
        }
    }

    /// SET_CONFIGURATION enabling the configuration named by `value`.
    pub fn set_configuration(value: u8) -> Self {
        Self {
            request_type: request_type::HOST_TO_DEVICE,
            request: StandardRequest::SetConfiguration as u8,
            value: u16::from(value),
            index: 0,
            length: 0,
        }
    }

    /// Class request addressed to the interface recipient.
    pub fn class_interface(request: CdcRequest, value: u16, length: u16) -> Self {
        Self {
            request_type: request_type::HOST_TO_DEVICE
                | request_type::TYPE_CLASS
                | request_type::RECIPIENT_INTERFACE,
            request: request as u8,
            value,
            index: 0,
            length,
        }
    }

    /// Serialize to the wire layout (little-endian).
    pub fn pack(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.request_type;
        buf[1] = self.request;
        buf[2..4].copy_from_slice(&self.value.to_le_bytes());
        buf[4..6].copy_from_slice(&self.index.to_le_bytes());
        buf[6..8].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(ProtocolError::Truncated {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut reader = &data[2..];
        Ok(Self {
            request_type: data[0],
            request: data[1],
            value: reader.read_u16::<LittleEndian>()?,
            index: reader.read_u16::<LittleEndian>()?,
            length: reader.read_u16::<LittleEndian>()?,
        })
    }

    /// Direction implied by the request: the SET family writes to the
    /// device, everything else reads from it.
    pub fn direction(&self) -> Direction {
        const OUT_REQUESTS: [u8; 5] = [
            StandardRequest::SetFeature as u8,
            SET_INTERFACE,
            StandardRequest::SetConfiguration as u8,
            StandardRequest::SetDescriptor as u8,
            CdcRequest::SetLineCoding as u8,
        ];
        if OUT_REQUESTS.contains(&self.request) {
            Direction::Out
        } else {
            Direction::In
        }
    }

    /// Descriptor type named by `value` for the requests that carry one.
    pub fn descriptor_type(&self) -> DescriptorType {
        if self.request == StandardRequest::GetDescriptor as u8
            || self.request == StandardRequest::SetConfiguration as u8
        {
            DescriptorType::from_u8((self.value >> 8) as u8)
        } else {
            DescriptorType::Invalid
        }
    }

    fn request_name(&self) -> String {
        match self.request {
            0x0 => "GET_STATUS".into(),
            0x1 => "CLEAR_FEATURE".into(),
            0x3 => "SET_FEATURE".into(),
            0x5 => "SET_ADDRESS".into(),
            0x6 => "GET_DESCRIPTOR".into(),
            0x7 => "SET_DESCRIPTOR".into(),
            0x8 => "GET_CONFIGURATION".into(),
            0x9 => "SET_CONFIGURATION".into(),
            0x20 => "SET_LINE_CODING".into(),
            0x21 => "GET_LINE_CODING".into(),
            0x22 => "SET_CONTROL_LINE_STATE".into(),
            other => format!("{:#04x}", other),
        }
    }
}

impl fmt::Display for SetupPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bmRequestType={:#04x} bRequest={} wValue={:#06x} wIndex={} wLength={} ({:?})",
            self.request_type,
            self.request_name(),
            self.value,
            self.index,
            self.length,
            self.direction(),
        )
    }
}

/// CDC line coding payload for SET_LINE_CODING (little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCoding {
    pub baud_rate: u32,
    pub stop_bits: u8,
    pub parity: u8,
    pub data_bits: u8,
}

impl LineCoding {
    pub const SIZE: usize = 7;

    pub fn pack(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..4].copy_from_slice(&self.baud_rate.to_le_bytes());
        buf[4] = self.stop_bits;
        buf[5] = self.parity;
        buf[6] = self.data_bits;
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(ProtocolError::Truncated {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut reader = data;
        Ok(Self {
            baud_rate: reader.read_u32::<LittleEndian>()?,
            stop_bits: reader.read_u8()?,
            parity: reader.read_u8()?,
            data_bits: reader.read_u8()?,
        })
    }
}

impl Default for LineCoding {
    /// 9600 baud, one stop bit, no parity, eight data bits.
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            stop_bits: 0,
            parity: 0,
            data_bits: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_device_descriptor_bytes() {
        let setup = SetupPacket::get_descriptor(DescriptorType::Device, 0, 0x0012);
        assert_eq!(
            setup.pack(),
            [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]
        );
        assert_eq!(setup.direction(), Direction::In);
        assert_eq!(setup.descriptor_type(), DescriptorType::Device);
    }

    #[test]
    fn test_set_configuration_is_out() {
        let setup = SetupPacket::set_configuration(1);
        assert_eq!(setup.direction(), Direction::Out);
        assert_eq!(setup.pack()[..4], [0x00, 0x09, 0x01, 0x00]);
    }

    #[test]
    fn test_set_line_coding_setup() {
        let setup = SetupPacket::class_interface(CdcRequest::SetLineCoding, 0, 7);
        assert_eq!(setup.request_type, 0x21);
        assert_eq!(setup.direction(), Direction::Out);
        assert_eq!(setup.descriptor_type(), DescriptorType::Invalid);
    }

    #[test]
    fn test_control_line_state_setup_bytes() {
        let setup = SetupPacket::class_interface(CdcRequest::SetControlLineState, 0x0300, 0);
        assert_eq!(setup.pack(), [0x21, 0x22, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00]);
        // no data stage; the request is outside the SET write family
        assert_eq!(setup.direction(), Direction::In);
    }

    #[test]
    fn test_setup_roundtrip() {
        let setup = SetupPacket {
            request_type: 0xA1,
            request: 0x21,
            value: 0x1234,
            index: 0x0002,
            length: 0x0007,
        };
        assert_eq!(SetupPacket::from_bytes(&setup.pack()).unwrap(), setup);
    }

    #[test]
    fn test_line_coding_default_bytes() {
        let coding = LineCoding::default();
        assert_eq!(coding.pack(), [0x80, 0x25, 0x00, 0x00, 0x00, 0x00, 0x08]);
        assert_eq!(LineCoding::from_bytes(&coding.pack()).unwrap(), coding);
    }
}
