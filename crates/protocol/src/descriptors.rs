//! USB descriptor structures and decoder
//!
//! Descriptors are packed little-endian structures. A configuration payload
//! is a flat byte stream: the 9-byte configuration header followed by
//! interface associations, interfaces, class-specific functional descriptors
//! and endpoints. [`parse`] walks such a stream into a typed tree whose
//! parents own their children; lookups go through the owning configuration
//! or interface, there are no back-pointers.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};

use crate::error::{ProtocolError, Result};
use crate::types::{CdcSubtype, DescriptorType, TransferKind};

fn check_len(data: &[u8], size: usize) -> Result<()> {
    if data.len() < size {
        return Err(ProtocolError::Truncated {
            expected: size,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Standard device descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub bcd_usb: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub i_manufacturer: u8,
    pub i_product: u8,
    pub i_serial: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub const SIZE: usize = 18;

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.length)?;
        writer.write_u8(DescriptorType::Device.to_u8())?;
        writer.write_u16::<LittleEndian>(self.bcd_usb)?;
        writer.write_u8(self.device_class)?;
        writer.write_u8(self.device_subclass)?;
        writer.write_u8(self.device_protocol)?;
        writer.write_u8(self.max_packet_size)?;
        writer.write_u16::<LittleEndian>(self.id_vendor)?;
        writer.write_u16::<LittleEndian>(self.id_product)?;
        writer.write_u16::<LittleEndian>(self.bcd_device)?;
        writer.write_u8(self.i_manufacturer)?;
        writer.write_u8(self.i_product)?;
        writer.write_u8(self.i_serial)?;
        writer.write_u8(self.num_configurations)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        let mut reader = data;
        let length = reader.read_u8()?;
        let _descriptor_type = reader.read_u8()?;
        Ok(Self {
            length,
            bcd_usb: reader.read_u16::<LittleEndian>()?,
            device_class: reader.read_u8()?,
            device_subclass: reader.read_u8()?,
            device_protocol: reader.read_u8()?,
            max_packet_size: reader.read_u8()?,
            id_vendor: reader.read_u16::<LittleEndian>()?,
            id_product: reader.read_u16::<LittleEndian>()?,
            bcd_device: reader.read_u16::<LittleEndian>()?,
            i_manufacturer: reader.read_u8()?,
            i_product: reader.read_u8()?,
            i_serial: reader.read_u8()?,
            num_configurations: reader.read_u8()?,
        })
    }
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            length: Self::SIZE as u8,
            bcd_usb: 0,
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            max_packet_size: 0,
            id_vendor: 0,
            id_product: 0,
            bcd_device: 0,
            i_manufacturer: 0,
            i_product: 0,
            i_serial: 0,
            num_configurations: 0,
        }
    }
}

/// Configuration descriptor and its parsed children
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationDescriptor {
    pub length: u8,
    pub total_length: u16,
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub i_configuration: u8,
    pub attributes: u8,
    pub max_power: u8,
    pub interfaces: Vec<InterfaceDescriptor>,
    pub associations: Vec<InterfaceAssociation>,
}

impl ConfigurationDescriptor {
    /// Size of the fixed header; children are counted by `total_length`.
    pub const SIZE: usize = 9;

    /// Write the 9-byte header (children are encoded separately).
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.length)?;
        writer.write_u8(DescriptorType::Configuration.to_u8())?;
        writer.write_u16::<LittleEndian>(self.total_length)?;
        writer.write_u8(self.num_interfaces)?;
        writer.write_u8(self.configuration_value)?;
        writer.write_u8(self.i_configuration)?;
        writer.write_u8(self.attributes)?;
        writer.write_u8(self.max_power)
    }

    /// Decode the fixed header only; `interfaces` and `associations` start
    /// out empty.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        let mut reader = data;
        let length = reader.read_u8()?;
        let _descriptor_type = reader.read_u8()?;
        Ok(Self {
            length,
            total_length: reader.read_u16::<LittleEndian>()?,
            num_interfaces: reader.read_u8()?,
            configuration_value: reader.read_u8()?,
            i_configuration: reader.read_u8()?,
            attributes: reader.read_u8()?,
            max_power: reader.read_u8()?,
            interfaces: Vec::new(),
            associations: Vec::new(),
        })
    }
}

/// Interface descriptor and its parsed endpoints and functional descriptors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub length: u8,
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub i_interface: u8,
    pub endpoints: Vec<EndpointDescriptor>,
    pub functionals: Vec<FunctionalDescriptor>,
}

impl InterfaceDescriptor {
    pub const SIZE: usize = 9;

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.length)?;
        writer.write_u8(DescriptorType::Interface.to_u8())?;
        writer.write_u8(self.interface_number)?;
        writer.write_u8(self.alternate_setting)?;
        writer.write_u8(self.num_endpoints)?;
        writer.write_u8(self.interface_class)?;
        writer.write_u8(self.interface_subclass)?;
        writer.write_u8(self.interface_protocol)?;
        writer.write_u8(self.i_interface)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        let mut reader = data;
        let length = reader.read_u8()?;
        let _descriptor_type = reader.read_u8()?;
        Ok(Self {
            length,
            interface_number: reader.read_u8()?,
            alternate_setting: reader.read_u8()?,
            num_endpoints: reader.read_u8()?,
            interface_class: reader.read_u8()?,
            interface_subclass: reader.read_u8()?,
            interface_protocol: reader.read_u8()?,
            i_interface: reader.read_u8()?,
            endpoints: Vec::new(),
            functionals: Vec::new(),
        })
    }
}

/// Interface association descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceAssociation {
    pub length: u8,
    pub first_interface: u8,
    pub interface_count: u8,
    pub function_class: u8,
    pub function_subclass: u8,
    pub function_protocol: u8,
    pub i_function: u8,
}

impl InterfaceAssociation {
    pub const SIZE: usize = 8;

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.length)?;
        writer.write_u8(DescriptorType::InterfaceAssociation.to_u8())?;
        writer.write_u8(self.first_interface)?;
        writer.write_u8(self.interface_count)?;
        writer.write_u8(self.function_class)?;
        writer.write_u8(self.function_subclass)?;
        writer.write_u8(self.function_protocol)?;
        writer.write_u8(self.i_function)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        Ok(Self {
            length: data[0],
            first_interface: data[2],
            interface_count: data[3],
            function_class: data[4],
            function_subclass: data[5],
            function_protocol: data[6],
            i_function: data[7],
        })
    }
}

/// Endpoint descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    pub const SIZE: usize = 7;

    /// Endpoint number, the low nibble of the address.
    pub fn number(&self) -> u8 {
        self.address & 0x0F
    }

    /// Host-to-device endpoints have the high address bit clear.
    pub fn is_output(&self) -> bool {
        self.address & 0x80 == 0
    }

    pub fn transfer_kind(&self) -> TransferKind {
        TransferKind::from_attributes(self.attributes)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.length)?;
        writer.write_u8(DescriptorType::Endpoint.to_u8())?;
        writer.write_u8(self.address)?;
        writer.write_u8(self.attributes)?;
        writer.write_u16::<LittleEndian>(self.max_packet_size)?;
        writer.write_u8(self.interval)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        let mut reader = &data[2..];
        Ok(Self {
            length: data[0],
            address: reader.read_u8()?,
            attributes: reader.read_u8()?,
            max_packet_size: reader.read_u16::<LittleEndian>()?,
            interval: reader.read_u8()?,
        })
    }
}

impl Default for EndpointDescriptor {
    fn default() -> Self {
        Self {
            length: Self::SIZE as u8,
            address: 0,
            attributes: 0,
            max_packet_size: 0,
            interval: 0,
        }
    }
}

/// Class-specific (CS_INTERFACE) functional descriptor
///
/// The subtype selects the concrete shape; subtypes this client does not
/// interpret are kept as `Generic` with their raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionalDescriptor {
    Header {
        length: u8,
        bcd_cdc: u16,
    },
    CallManagement {
        length: u8,
        capabilities: u8,
        data_interface: u8,
    },
    Acm {
        length: u8,
        capabilities: u8,
    },
    Union {
        length: u8,
        master_interface: u8,
        slave_interface: u8,
    },
    Generic {
        length: u8,
        subtype: u8,
        body: Vec<u8>,
    },
}

impl FunctionalDescriptor {
    /// Minimum size: length, type and subtype bytes.
    pub const HEADER_SIZE: usize = 3;

    pub fn length(&self) -> u8 {
        match *self {
            Self::Header { length, .. }
            | Self::CallManagement { length, .. }
            | Self::Acm { length, .. }
            | Self::Union { length, .. }
            | Self::Generic { length, .. } => length,
        }
    }

    pub fn subtype(&self) -> u8 {
        match *self {
            Self::Header { .. } => CdcSubtype::Header as u8,
            Self::CallManagement { .. } => CdcSubtype::CallManagement as u8,
            Self::Acm { .. } => CdcSubtype::AbstractControlManagement as u8,
            Self::Union { .. } => CdcSubtype::Union as u8,
            Self::Generic { subtype, .. } => subtype,
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.length())?;
        writer.write_u8(DescriptorType::CsInterface.to_u8())?;
        writer.write_u8(self.subtype())?;
        match self {
            Self::Header { bcd_cdc, .. } => writer.write_u16::<LittleEndian>(*bcd_cdc),
            Self::CallManagement {
                capabilities,
                data_interface,
                ..
            } => {
                writer.write_u8(*capabilities)?;
                writer.write_u8(*data_interface)
            }
            Self::Acm { capabilities, .. } => writer.write_u8(*capabilities),
            Self::Union {
                master_interface,
                slave_interface,
                ..
            } => {
                writer.write_u8(*master_interface)?;
                writer.write_u8(*slave_interface)
            }
            Self::Generic { body, .. } => writer.write_all(body),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::HEADER_SIZE)?;
        let length = data[0];
        if (length as usize) < Self::HEADER_SIZE {
            return Err(ProtocolError::MalformedDescriptor(format!(
                "functional descriptor length {} is shorter than its header",
                length
            )));
        }
        check_len(data, length as usize)?;
        let subtype = data[2];
        let descriptor = match CdcSubtype::from_u8(subtype) {
            Some(CdcSubtype::Header) => {
                check_len(data, 5)?;
                let mut reader = &data[3..];
                Self::Header {
                    length,
                    bcd_cdc: reader.read_u16::<LittleEndian>()?,
                }
            }
            Some(CdcSubtype::CallManagement) => {
                check_len(data, 5)?;
                Self::CallManagement {
                    length,
                    capabilities: data[3],
                    data_interface: data[4],
                }
            }
            Some(CdcSubtype::AbstractControlManagement) => {
                check_len(data, 4)?;
                Self::Acm {
                    length,
                    capabilities: data[3],
                }
            }
            Some(CdcSubtype::Union) => {
                check_len(data, 5)?;
                Self::Union {
                    length,
                    master_interface: data[3],
                    slave_interface: data[4],
                }
            }
            None => Self::Generic {
                length,
                subtype,
                body: data[Self::HEADER_SIZE..length as usize].to_vec(),
            },
        };
        Ok(descriptor)
    }
}

/// String descriptor header (first language id only)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StringDescriptor {
    pub length: u8,
    pub language: u16,
}

impl StringDescriptor {
    pub const SIZE: usize = 4;

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.length)?;
        writer.write_u8(DescriptorType::String.to_u8())?;
        writer.write_u16::<LittleEndian>(self.language)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        let mut reader = &data[2..];
        Ok(Self {
            length: data[0],
            language: reader.read_u16::<LittleEndian>()?,
        })
    }
}

/// A decoded descriptor, tagged by its wire type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedDescriptor {
    Device(DeviceDescriptor),
    Configuration(ConfigurationDescriptor),
    Interface(InterfaceDescriptor),
    Endpoint(EndpointDescriptor),
    InterfaceAssociation(InterfaceAssociation),
    Functional(FunctionalDescriptor),
    String(StringDescriptor),
}

/// Decode a standalone descriptor payload into its typed form.
///
/// Configuration payloads are walked in full: nested interfaces collect
/// their endpoints and functional descriptors, associations are gathered on
/// the configuration.
pub fn parse(data: &[u8]) -> Result<TypedDescriptor> {
    check_len(data, 2)?;
    match DescriptorType::from_u8(data[1]) {
        DescriptorType::Device => Ok(TypedDescriptor::Device(DeviceDescriptor::from_bytes(data)?)),
        DescriptorType::Configuration => {
            Ok(TypedDescriptor::Configuration(parse_configuration(data)?))
        }
        DescriptorType::Interface => {
            let (interface, _) = parse_interface(data)?;
            Ok(TypedDescriptor::Interface(interface))
        }
        DescriptorType::Endpoint => Ok(TypedDescriptor::Endpoint(EndpointDescriptor::from_bytes(
            data,
        )?)),
        DescriptorType::InterfaceAssociation => Ok(TypedDescriptor::InterfaceAssociation(
            InterfaceAssociation::from_bytes(data)?,
        )),
        DescriptorType::CsInterface => Ok(TypedDescriptor::Functional(
            FunctionalDescriptor::from_bytes(data)?,
        )),
        DescriptorType::String => Ok(TypedDescriptor::String(StringDescriptor::from_bytes(data)?)),
        other => Err(ProtocolError::MalformedDescriptor(format!(
            "unsupported descriptor type {:#04x}",
            other.to_u8()
        ))),
    }
}

/// Walk a full configuration payload.
///
/// Iterates until `num_interfaces` interfaces have been consumed,
/// dispatching on each descriptor's type byte. A truncated tail ends the
/// walk with the interfaces collected so far; a type byte of zero fails.
pub fn parse_configuration(data: &[u8]) -> Result<ConfigurationDescriptor> {
    let mut configuration = ConfigurationDescriptor::from_bytes(data)?;
    let mut offset = ConfigurationDescriptor::SIZE;
    while configuration.interfaces.len() < configuration.num_interfaces as usize {
        if data.len() < offset + 2 {
            break;
        }
        let b_length = data[offset] as usize;
        match DescriptorType::from_u8(data[offset + 1]) {
            DescriptorType::InterfaceAssociation => {
                let association = InterfaceAssociation::from_bytes(&data[offset..])?;
                configuration.associations.push(association);
                offset += InterfaceAssociation::SIZE;
            }
            DescriptorType::Interface => {
                let (interface, consumed) = parse_interface(&data[offset..])?;
                configuration.interfaces.push(interface);
                offset += consumed;
            }
            DescriptorType::Invalid => {
                return Err(ProtocolError::MalformedDescriptor(format!(
                    "invalid descriptor type at offset {}",
                    offset
                )));
            }
            _ => {
                // string and other descriptor kinds inside a configuration
                // are skipped by their declared length
                if b_length == 0 {
                    return Err(ProtocolError::MalformedDescriptor(format!(
                        "zero-length descriptor at offset {}",
                        offset
                    )));
                }
                offset += b_length;
            }
        }
    }
    Ok(configuration)
}

/// Parse an interface descriptor and the descriptors it owns.
///
/// Consumes class-specific functional descriptors until each of the
/// interface's endpoints is reached. Returns the interface and the number
/// of bytes consumed.
pub fn parse_interface(data: &[u8]) -> Result<(InterfaceDescriptor, usize)> {
    let mut interface = InterfaceDescriptor::from_bytes(data)?;
    let mut offset = InterfaceDescriptor::SIZE;
    for _ in 0..interface.num_endpoints {
        loop {
            check_len(data, offset + 2)?;
            match DescriptorType::from_u8(data[offset + 1]) {
                DescriptorType::Endpoint => {
                    let endpoint = EndpointDescriptor::from_bytes(&data[offset..])?;
                    interface.endpoints.push(endpoint);
                    offset += EndpointDescriptor::SIZE;
                    break;
                }
                DescriptorType::CsInterface => {
                    let functional = FunctionalDescriptor::from_bytes(&data[offset..])?;
                    offset += functional.length() as usize;
                    interface.functionals.push(functional);
                }
                other => {
                    return Err(ProtocolError::MalformedDescriptor(format!(
                        "unexpected descriptor type {:#04x} inside interface at offset {}",
                        other.to_u8(),
                        offset
                    )));
                }
            }
        }
    }
    Ok((interface, offset))
}
