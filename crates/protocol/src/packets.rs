//! USB/IP wire packet codec
//!
//! Implements the operation-layer packets exchanged with the usbipd daemon
//! (device list, import) and the URB packets that carry USB traffic once a
//! device is attached. Every multi-byte field in these packets is network
//! byte order; the little-endian parts of the stream (setup packets and USB
//! descriptors) live in [`crate::setup`] and [`crate::descriptors`].
//!
//! Each packet has a fixed `SIZE` and a packed layout with no padding beyond
//! the explicit padding fields of the protocol itself.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use std::fmt;
use std::io::{self, Write};

use crate::error::{ProtocolError, Result};
use crate::types::{Direction, OpCommand, UrbCommand, USBIP_VERSION};

/// Sentinel packet count for non-isochronous submissions
pub const NON_ISO_PACKETS: u32 = 0xFFFF_FFFF;

/// Verify at least `size` bytes are present before decoding.
fn check_len(data: &[u8], size: usize) -> Result<()> {
    if data.len() < size {
        return Err(ProtocolError::Truncated {
            expected: size,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Write `bytes` into a fixed-width field, NUL padded.
fn write_padded<W: Write>(writer: &mut W, bytes: &[u8], width: usize) -> io::Result<()> {
    const ZEROS: [u8; 256] = [0u8; 256];
    let n = bytes.len().min(width);
    writer.write_all(&bytes[..n])?;
    writer.write_all(&ZEROS[..width - n])
}

/// The 32-byte NUL-padded bus identifier a daemon uses to name an exported
/// device, typically `"<busnum>-<devnum>"`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusId([u8; 32]);

impl BusId {
    pub const SIZE: usize = 32;

    /// Build a bus id from a string, truncated to 32 bytes.
    pub fn new(id: &str) -> Self {
        let mut raw = [0u8; Self::SIZE];
        let bytes = id.as_bytes();
        let n = bytes.len().min(Self::SIZE);
        raw[..n].copy_from_slice(&bytes[..n]);
        Self(raw)
    }

    pub fn from_raw(raw: [u8; 32]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Default for BusId {
    fn default() -> Self {
        Self([0u8; 32])
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(Self::SIZE);
        write!(f, "{}", String::from_utf8_lossy(&self.0[..end]))
    }
}

impl fmt::Debug for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BusId({})", self)
    }
}

/// Common 8-byte header of every operation-layer packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpHeader {
    pub command: OpCommand,
    pub status: u32,
}

impl OpHeader {
    pub const SIZE: usize = 8;

    /// Header for an outgoing request (status zero).
    pub fn request(command: OpCommand) -> Self {
        Self { command, status: 0 }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u16::<BigEndian>(USBIP_VERSION)?;
        writer.write_u16::<BigEndian>(self.command as u16)?;
        writer.write_u32::<BigEndian>(self.status)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        let mut reader = data;
        let version = reader.read_u16::<BigEndian>()?;
        let raw_command = reader.read_u16::<BigEndian>()?;
        if version != USBIP_VERSION {
            return Err(ProtocolError::BadMagic {
                version,
                command: u32::from(raw_command),
            });
        }
        let command = OpCommand::from_u16(raw_command).ok_or(ProtocolError::BadMagic {
            version,
            command: u32::from(raw_command),
        })?;
        let status = reader.read_u32::<BigEndian>()?;
        Ok(Self { command, status })
    }
}

/// OP_REQ_DEVLIST: ask the daemon for its exported devices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DevlistRequest;

impl DevlistRequest {
    pub const SIZE: usize = OpHeader::SIZE;

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        OpHeader::request(OpCommand::ReqDevlist).write_to(writer)
    }
}

/// Fixed prefix of OP_REP_DEVLIST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevlistReplyHeader {
    pub status: u32,
    pub num_exported: u32,
}

impl DevlistReplyHeader {
    pub const SIZE: usize = OpHeader::SIZE + 4;

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        OpHeader {
            command: OpCommand::RepDevlist,
            status: self.status,
        }
        .write_to(writer)?;
        writer.write_u32::<BigEndian>(self.num_exported)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        let header = OpHeader::from_bytes(data)?;
        if header.command != OpCommand::RepDevlist {
            return Err(ProtocolError::BadMagic {
                version: USBIP_VERSION,
                command: header.command as u32,
            });
        }
        let mut reader = &data[OpHeader::SIZE..];
        let num_exported = reader.read_u32::<BigEndian>()?;
        Ok(Self {
            status: header.status,
            num_exported,
        })
    }
}

/// One interface record trailing a device path in OP_REP_DEVLIST
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    /// Explicit alignment byte, always zero on the wire
    pub alignment: u8,
}

impl InterfaceRecord {
    pub const SIZE: usize = 4;

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.interface_class)?;
        writer.write_u8(self.interface_subclass)?;
        writer.write_u8(self.interface_protocol)?;
        writer.write_u8(self.alignment)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        Ok(Self {
            interface_class: data[0],
            interface_subclass: data[1],
            interface_protocol: data[2],
            alignment: data[3],
        })
    }
}

/// One exported device record (OP_REP_DEV_PATH)
///
/// The 312-byte fixed block; interface records follow on the wire and are
/// collected into `interfaces` by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevicePath {
    pub path: String,
    pub busid: BusId,
    pub busnum: u32,
    pub devnum: u32,
    pub speed: u32,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub configuration_value: u8,
    pub num_configurations: u8,
    pub num_interfaces: u8,
    pub interfaces: Vec<InterfaceRecord>,
}

impl DevicePath {
    pub const SIZE: usize = 312;
    const PATH_LEN: usize = 256;

    /// Write the fixed 312-byte block (interfaces are encoded separately).
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_padded(writer, self.path.as_bytes(), Self::PATH_LEN)?;
        writer.write_all(self.busid.as_bytes())?;
        writer.write_u32::<BigEndian>(self.busnum)?;
        writer.write_u32::<BigEndian>(self.devnum)?;
        writer.write_u32::<BigEndian>(self.speed)?;
        writer.write_u16::<BigEndian>(self.id_vendor)?;
        writer.write_u16::<BigEndian>(self.id_product)?;
        writer.write_u16::<BigEndian>(self.bcd_device)?;
        writer.write_u8(self.device_class)?;
        writer.write_u8(self.device_subclass)?;
        writer.write_u8(self.device_protocol)?;
        writer.write_u8(self.configuration_value)?;
        writer.write_u8(self.num_configurations)?;
        writer.write_u8(self.num_interfaces)
    }

    /// Decode the fixed block; `interfaces` starts out empty.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        let path_end = data[..Self::PATH_LEN]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(Self::PATH_LEN);
        let path = String::from_utf8_lossy(&data[..path_end]).into_owned();
        let mut busid_raw = [0u8; BusId::SIZE];
        busid_raw.copy_from_slice(&data[Self::PATH_LEN..Self::PATH_LEN + BusId::SIZE]);
        let mut reader = &data[Self::PATH_LEN + BusId::SIZE..];
        Ok(Self {
            path,
            busid: BusId::from_raw(busid_raw),
            busnum: reader.read_u32::<BigEndian>()?,
            devnum: reader.read_u32::<BigEndian>()?,
            speed: reader.read_u32::<BigEndian>()?,
            id_vendor: reader.read_u16::<BigEndian>()?,
            id_product: reader.read_u16::<BigEndian>()?,
            bcd_device: reader.read_u16::<BigEndian>()?,
            device_class: reader.read_u8()?,
            device_subclass: reader.read_u8()?,
            device_protocol: reader.read_u8()?,
            configuration_value: reader.read_u8()?,
            num_configurations: reader.read_u8()?,
            num_interfaces: reader.read_u8()?,
            interfaces: Vec::new(),
        })
    }
}

/// Assembled OP_REP_DEVLIST: header status plus every exported path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevlistReply {
    pub status: u32,
    pub paths: Vec<DevicePath>,
}

impl DevlistReply {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        DevlistReplyHeader {
            status: self.status,
            num_exported: self.paths.len() as u32,
        }
        .write_to(writer)?;
        for path in &self.paths {
            path.write_to(writer)?;
            for interface in &path.interfaces {
                interface.write_to(writer)?;
            }
        }
        Ok(())
    }

    /// Decode a complete reply held in one buffer.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = DevlistReplyHeader::from_bytes(data)?;
        let mut offset = DevlistReplyHeader::SIZE;
        let mut paths = Vec::with_capacity(header.num_exported as usize);
        for _ in 0..header.num_exported {
            let mut path = DevicePath::from_bytes(&data[offset.min(data.len())..])?;
            offset += DevicePath::SIZE;
            for _ in 0..path.num_interfaces {
                let record = InterfaceRecord::from_bytes(&data[offset.min(data.len())..])?;
                path.interfaces.push(record);
                offset += InterfaceRecord::SIZE;
            }
            paths.push(path);
        }
        Ok(Self {
            status: header.status,
            paths,
        })
    }
}

/// OP_REQ_IMPORT: attach to the device named by `busid`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportRequest {
    pub busid: BusId,
}

impl ImportRequest {
    pub const SIZE: usize = OpHeader::SIZE + BusId::SIZE;

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        OpHeader::request(OpCommand::ReqImport).write_to(writer)?;
        writer.write_all(self.busid.as_bytes())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        let header = OpHeader::from_bytes(data)?;
        if header.command != OpCommand::ReqImport {
            return Err(ProtocolError::BadMagic {
                version: USBIP_VERSION,
                command: header.command as u32,
            });
        }
        let mut busid_raw = [0u8; BusId::SIZE];
        busid_raw.copy_from_slice(&data[OpHeader::SIZE..Self::SIZE]);
        Ok(Self {
            busid: BusId::from_raw(busid_raw),
        })
    }
}

/// OP_REP_IMPORT: operation status plus the imported device's path block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReply {
    pub status: u32,
    pub device: DevicePath,
}

impl ImportReply {
    pub const SIZE: usize = OpHeader::SIZE + DevicePath::SIZE;

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        OpHeader {
            command: OpCommand::RepImport,
            status: self.status,
        }
        .write_to(writer)?;
        self.device.write_to(writer)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        let header = OpHeader::from_bytes(data)?;
        if header.command != OpCommand::RepImport {
            return Err(ProtocolError::BadMagic {
                version: USBIP_VERSION,
                command: header.command as u32,
            });
        }
        let device = DevicePath::from_bytes(&data[OpHeader::SIZE..])?;
        Ok(Self {
            status: header.status,
            device,
        })
    }
}

/// Basic 20-byte header shared by every URB packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrbHeader {
    pub command: UrbCommand,
    pub seqnum: u32,
    /// `busnum << 16 | devnum` of the attached device
    pub devid: u32,
    pub direction: Direction,
    pub ep: u32,
}

impl UrbHeader {
    pub const SIZE: usize = 20;

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<BigEndian>(self.command as u32)?;
        writer.write_u32::<BigEndian>(self.seqnum)?;
        writer.write_u32::<BigEndian>(self.devid)?;
        writer.write_u32::<BigEndian>(self.direction as u32)?;
        writer.write_u32::<BigEndian>(self.ep)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        let mut reader = data;
        let command = UrbCommand::from_u32(reader.read_u32::<BigEndian>()?)?;
        Ok(Self {
            command,
            seqnum: reader.read_u32::<BigEndian>()?,
            devid: reader.read_u32::<BigEndian>()?,
            direction: Direction::from_u32(reader.read_u32::<BigEndian>()?),
            ep: reader.read_u32::<BigEndian>()?,
        })
    }
}

/// USBIP_CMD_SUBMIT: submit one URB
///
/// The 48-byte prefix is followed on the wire by the transfer buffer, but
/// only for OUT transfers; IN submissions announce the wanted length in
/// `transfer_buffer_length` and carry no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdSubmit {
    pub seqnum: u32,
    pub devid: u32,
    pub direction: Direction,
    pub ep: u32,
    pub transfer_flags: u32,
    pub transfer_buffer_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub interval: u32,
    /// Setup bytes for control transfers, zero filled otherwise
    pub setup: [u8; 8],
    pub payload: Bytes,
}

impl CmdSubmit {
    pub const PREFIX_SIZE: usize = 48;

    fn header(&self) -> UrbHeader {
        UrbHeader {
            command: UrbCommand::CmdSubmit,
            seqnum: self.seqnum,
            devid: self.devid,
            direction: self.direction,
            ep: self.ep,
        }
    }

    /// Control transfer on endpoint zero.
    pub fn control(seqnum: u32, devid: u32, direction: Direction, setup: [u8; 8], payload: Bytes, buffer_length: u32, transfer_flags: u32) -> Self {
        Self {
            seqnum,
            devid,
            direction,
            ep: 0,
            transfer_flags,
            transfer_buffer_length: buffer_length,
            start_frame: 0,
            number_of_packets: 0,
            interval: 0,
            setup,
            payload,
        }
    }

    /// Bulk write on the given endpoint.
    pub fn bulk_out(seqnum: u32, devid: u32, ep: u32, payload: Bytes, transfer_flags: u32) -> Self {
        let length = payload.len() as u32;
        Self {
            seqnum,
            devid,
            direction: Direction::Out,
            ep,
            transfer_flags,
            transfer_buffer_length: length,
            start_frame: 0,
            number_of_packets: NON_ISO_PACKETS,
            interval: 0,
            setup: [0u8; 8],
            payload,
        }
    }

    /// Bulk read of up to `size` bytes from the given endpoint.
    pub fn bulk_in(seqnum: u32, devid: u32, ep: u32, size: u32) -> Self {
        Self {
            seqnum,
            devid,
            direction: Direction::In,
            ep,
            transfer_flags: 0,
            transfer_buffer_length: size,
            start_frame: 0,
            number_of_packets: NON_ISO_PACKETS,
            interval: 0,
            setup: [0u8; 8],
            payload: Bytes::new(),
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.header().write_to(writer)?;
        writer.write_u32::<BigEndian>(self.transfer_flags)?;
        writer.write_u32::<BigEndian>(self.transfer_buffer_length)?;
        writer.write_u32::<BigEndian>(self.start_frame)?;
        writer.write_u32::<BigEndian>(self.number_of_packets)?;
        writer.write_u32::<BigEndian>(self.interval)?;
        writer.write_all(&self.setup)?;
        if self.direction == Direction::Out && !self.payload.is_empty() {
            writer.write_all(&self.payload)?;
        }
        Ok(())
    }

    /// Decode the prefix and, for OUT submissions, the trailing payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::PREFIX_SIZE)?;
        let header = UrbHeader::from_bytes(data)?;
        if header.command != UrbCommand::CmdSubmit {
            return Err(ProtocolError::BadMagic {
                version: USBIP_VERSION,
                command: header.command as u32,
            });
        }
        let mut reader = &data[UrbHeader::SIZE..];
        let transfer_flags = reader.read_u32::<BigEndian>()?;
        let transfer_buffer_length = reader.read_u32::<BigEndian>()?;
        let start_frame = reader.read_u32::<BigEndian>()?;
        let number_of_packets = reader.read_u32::<BigEndian>()?;
        let interval = reader.read_u32::<BigEndian>()?;
        let mut setup = [0u8; 8];
        setup.copy_from_slice(&data[Self::PREFIX_SIZE - 8..Self::PREFIX_SIZE]);
        let payload = if header.direction == Direction::Out && transfer_buffer_length > 0 {
            let end = Self::PREFIX_SIZE + transfer_buffer_length as usize;
            check_len(data, end)?;
            Bytes::copy_from_slice(&data[Self::PREFIX_SIZE..end])
        } else {
            Bytes::new()
        };
        Ok(Self {
            seqnum: header.seqnum,
            devid: header.devid,
            direction: header.direction,
            ep: header.ep,
            transfer_flags,
            transfer_buffer_length,
            start_frame,
            number_of_packets,
            interval,
            setup,
            payload,
        })
    }
}

/// USBIP_RET_SUBMIT prefix: completion of a submitted URB
///
/// The transfer buffer of an IN completion follows on the wire and is read
/// separately using `actual_length`. The `ep` field is zero as sent by the
/// server; the session rewrites it from the matching command so responses
/// can be correlated with endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetSubmit {
    pub seqnum: u32,
    pub devid: u32,
    pub direction: Direction,
    pub ep: u32,
    pub status: i32,
    pub actual_length: i32,
    pub start_frame: i32,
    pub number_of_packets: i32,
    pub error_count: i32,
    pub padding: [u8; 8],
}

impl RetSubmit {
    pub const SIZE: usize = 48;

    /// Successful completion transferring `actual_length` bytes.
    pub fn success(seqnum: u32, devid: u32, direction: Direction, actual_length: i32) -> Self {
        Self {
            seqnum,
            devid,
            direction,
            ep: 0,
            status: 0,
            actual_length,
            start_frame: 0,
            number_of_packets: 0,
            error_count: 0,
            padding: [0u8; 8],
        }
    }

    /// Failed completion carrying a negative errno.
    pub fn error(seqnum: u32, devid: u32, status: i32) -> Self {
        Self {
            seqnum,
            devid,
            direction: Direction::Out,
            ep: 0,
            status,
            actual_length: 0,
            start_frame: 0,
            number_of_packets: 0,
            error_count: 0,
            padding: [0u8; 8],
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        UrbHeader {
            command: UrbCommand::RetSubmit,
            seqnum: self.seqnum,
            devid: self.devid,
            direction: self.direction,
            ep: self.ep,
        }
        .write_to(writer)?;
        writer.write_i32::<BigEndian>(self.status)?;
        writer.write_i32::<BigEndian>(self.actual_length)?;
        writer.write_i32::<BigEndian>(self.start_frame)?;
        writer.write_i32::<BigEndian>(self.number_of_packets)?;
        writer.write_i32::<BigEndian>(self.error_count)?;
        writer.write_all(&self.padding)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        let header = UrbHeader::from_bytes(data)?;
        if header.command != UrbCommand::RetSubmit {
            return Err(ProtocolError::BadMagic {
                version: USBIP_VERSION,
                command: header.command as u32,
            });
        }
        let mut reader = &data[UrbHeader::SIZE..];
        let status = reader.read_i32::<BigEndian>()?;
        let actual_length = reader.read_i32::<BigEndian>()?;
        let start_frame = reader.read_i32::<BigEndian>()?;
        let number_of_packets = reader.read_i32::<BigEndian>()?;
        let error_count = reader.read_i32::<BigEndian>()?;
        let mut padding = [0u8; 8];
        padding.copy_from_slice(&data[Self::SIZE - 8..Self::SIZE]);
        Ok(Self {
            seqnum: header.seqnum,
            devid: header.devid,
            direction: header.direction,
            ep: header.ep,
            status,
            actual_length,
            start_frame,
            number_of_packets,
            error_count,
            padding,
        })
    }
}

/// USBIP_CMD_UNLINK: cancel the pending URB named by `unlink_seqnum`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdUnlink {
    pub seqnum: u32,
    pub devid: u32,
    pub direction: Direction,
    pub ep: u32,
    pub unlink_seqnum: u32,
}

impl CmdUnlink {
    pub const SIZE: usize = 48;

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        UrbHeader {
            command: UrbCommand::CmdUnlink,
            seqnum: self.seqnum,
            devid: self.devid,
            direction: self.direction,
            ep: self.ep,
        }
        .write_to(writer)?;
        writer.write_u32::<BigEndian>(self.unlink_seqnum)?;
        writer.write_all(&[0u8; 24])
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        let header = UrbHeader::from_bytes(data)?;
        if header.command != UrbCommand::CmdUnlink {
            return Err(ProtocolError::BadMagic {
                version: USBIP_VERSION,
                command: header.command as u32,
            });
        }
        let mut reader = &data[UrbHeader::SIZE..];
        let unlink_seqnum = reader.read_u32::<BigEndian>()?;
        Ok(Self {
            seqnum: header.seqnum,
            devid: header.devid,
            direction: header.direction,
            ep: header.ep,
            unlink_seqnum,
        })
    }
}

/// USBIP_RET_UNLINK: completion of an unlink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetUnlink {
    pub seqnum: u32,
    pub devid: u32,
    pub direction: Direction,
    pub ep: u32,
    pub status: i32,
}

impl RetUnlink {
    pub const SIZE: usize = 48;

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        UrbHeader {
            command: UrbCommand::RetUnlink,
            seqnum: self.seqnum,
            devid: self.devid,
            direction: self.direction,
            ep: self.ep,
        }
        .write_to(writer)?;
        writer.write_i32::<BigEndian>(self.status)?;
        writer.write_all(&[0u8; 24])
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, Self::SIZE)?;
        let header = UrbHeader::from_bytes(data)?;
        if header.command != UrbCommand::RetUnlink {
            return Err(ProtocolError::BadMagic {
                version: USBIP_VERSION,
                command: header.command as u32,
            });
        }
        let mut reader = &data[UrbHeader::SIZE..];
        let status = reader.read_i32::<BigEndian>()?;
        Ok(Self {
            seqnum: header.seqnum,
            devid: header.devid,
            direction: header.direction,
            ep: header.ep,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devlist_request_bytes() {
        let mut buf = Vec::new();
        DevlistRequest.write_to(&mut buf).unwrap();
        assert_eq!(buf, [0x01, 0x11, 0x80, 0x05, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_op_header_roundtrip() {
        let header = OpHeader {
            command: OpCommand::ReqImport,
            status: 0,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), OpHeader::SIZE);
        assert_eq!(OpHeader::from_bytes(&buf).unwrap(), header);
    }

    #[test]
    fn test_op_header_rejects_bad_version() {
        let data = [0x01, 0x10, 0x80, 0x05, 0x00, 0x00, 0x00, 0x00];
        let err = OpHeader::from_bytes(&data).unwrap_err();
        assert!(matches!(
            err,
            crate::ProtocolError::BadMagic {
                version: 0x0110,
                ..
            }
        ));
    }

    #[test]
    fn test_busid_padding() {
        let busid = BusId::new("1-1");
        let mut expected = [0u8; 32];
        expected[..3].copy_from_slice(b"1-1");
        assert_eq!(busid.as_bytes(), &expected);
        assert_eq!(busid.to_string(), "1-1");
    }

    #[test]
    fn test_import_request_roundtrip() {
        let request = ImportRequest {
            busid: BusId::new("3-2.1"),
        };
        let mut buf = Vec::new();
        request.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), ImportRequest::SIZE);
        assert_eq!(ImportRequest::from_bytes(&buf).unwrap(), request);
    }

    #[test]
    fn test_urb_header_roundtrip() {
        let header = UrbHeader {
            command: UrbCommand::CmdSubmit,
            seqnum: 42,
            devid: 1 << 16 | 2,
            direction: Direction::In,
            ep: 3,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), UrbHeader::SIZE);
        assert_eq!(UrbHeader::from_bytes(&buf).unwrap(), header);
    }

    #[test]
    fn test_cmd_submit_out_carries_payload() {
        let cmd = CmdSubmit::bulk_out(7, 0x10002, 1, Bytes::from_static(&[1, 2, 3, 4]), 0);
        let mut buf = Vec::new();
        cmd.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), CmdSubmit::PREFIX_SIZE + 4);
        let decoded = CmdSubmit::from_bytes(&buf).unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(decoded.transfer_buffer_length, 4);
    }

    #[test]
    fn test_cmd_submit_in_has_no_payload() {
        let cmd = CmdSubmit::bulk_in(8, 0x10002, 2, 0x1000);
        let mut buf = Vec::new();
        cmd.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), CmdSubmit::PREFIX_SIZE);
        let decoded = CmdSubmit::from_bytes(&buf).unwrap();
        assert_eq!(decoded.transfer_buffer_length, 0x1000);
        assert_eq!(decoded.number_of_packets, NON_ISO_PACKETS);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_ret_submit_roundtrip() {
        let ret = RetSubmit::success(9, 0x10001, Direction::In, 18);
        let mut buf = Vec::new();
        ret.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), RetSubmit::SIZE);
        assert_eq!(RetSubmit::from_bytes(&buf).unwrap(), ret);
    }

    #[test]
    fn test_unlink_roundtrip() {
        let unlink = CmdUnlink {
            seqnum: 11,
            devid: 0x10001,
            direction: Direction::In,
            ep: 1,
            unlink_seqnum: 5,
        };
        let mut buf = Vec::new();
        unlink.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), CmdUnlink::SIZE);
        assert_eq!(CmdUnlink::from_bytes(&buf).unwrap(), unlink);

        let ret = RetUnlink {
            seqnum: 11,
            devid: 0x10001,
            direction: Direction::In,
            ep: 1,
            status: -19,
        };
        let mut buf = Vec::new();
        ret.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), RetUnlink::SIZE);
        assert_eq!(RetUnlink::from_bytes(&buf).unwrap(), ret);
    }

    #[test]
    fn test_truncated_device_path() {
        let err = DevicePath::from_bytes(&[0u8; 100]).unwrap_err();
        assert!(matches!(
            err,
            crate::ProtocolError::Truncated {
                expected: 312,
                actual: 100,
            }
        ));
    }
}
