//! Attached-device session management
//!
//! A [`DeviceConnection`] owns the transport handed over by the client after
//! an import, tracks in-flight URBs by sequence number and correlates the
//! responses the server sends back. All suspension happens in the
//! transport's blocking reads; there are no internal threads.

use bytes::{Bytes, BytesMut};
use protocol::{
    errno, interface_class, transfer_flags, CmdSubmit, CmdUnlink, ConfigurationDescriptor,
    DeviceDescriptor, Direction, EndpointDescriptor, RetSubmit, RetUnlink, SetupPacket,
    UrbCommand, UrbHeader,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::transport::{readall, Transport};

/// Ceiling on waiting for the acknowledgement of an OUT transfer
const WRITE_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Ceiling on draining residual traffic while waiting for a RET_UNLINK
const UNLINK_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-header read budget inside the unlink drain loop
const UNLINK_HEADER_TIMEOUT: Duration = Duration::from_secs(1);

/// Bytes requested by each queued read URB
const READ_REQUEST_SIZE: usize = 0x1000;

/// Vendor and product identity of a device to attach to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareId {
    pub vid: u16,
    pub pid: u16,
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vid: {:#06x}, pid: {:#06x}", self.vid, self.pid)
    }
}

/// Identity of one attached session: which device, on which bus and address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLink {
    pub device: HardwareId,
    pub busnum: u32,
    pub devnum: u32,
}

impl fmt::Display for DeviceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} ({})", self.busnum, self.devnum, self.device)
    }
}

/// One bound endpoint of the attached device
#[derive(Debug, Clone, Copy, Default)]
pub struct UsbEndpoint {
    descriptor: EndpointDescriptor,
}

impl UsbEndpoint {
    pub fn new(descriptor: EndpointDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn number(&self) -> u8 {
        self.descriptor.number()
    }

    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.descriptor
    }
}

/// The endpoints needed to talk to a CDC device
///
/// The control endpoint always exists; input and output appear once a
/// configuration has been bound.
#[derive(Debug, Clone, Default)]
pub struct CdcEndpoints {
    pub control: UsbEndpoint,
    pub input: Option<UsbEndpoint>,
    pub output: Option<UsbEndpoint>,
}

/// A stored URB completion awaiting consumption
#[derive(Debug, Clone)]
pub struct UrbResponse {
    pub prefix: RetSubmit,
    pub payload: Bytes,
}

/// A connection to a device imported from the daemon
pub struct DeviceConnection<T: Transport> {
    busnum: u32,
    devnum: u32,
    device: HardwareId,
    transport: T,
    /// Tracks request/response pairing for all endpoints of the device
    seqnum: u32,
    commands: HashMap<u32, CmdSubmit>,
    responses: BTreeMap<u32, UrbResponse>,
    /// RET_UNLINKs observed while draining submits, keyed by their seqnum
    unlink_replies: HashMap<u32, RetUnlink>,
    endpoints: CdcEndpoints,
    device_descriptor: Option<DeviceDescriptor>,
    configuration: Option<ConfigurationDescriptor>,
    delimiter: Vec<u8>,
    payload_timeout: Duration,
    urb_queue_min: usize,
    urb_queue_max: usize,
    read_buffer_size: usize,
}

impl<T: Transport> DeviceConnection<T> {
    pub(crate) fn new(
        busnum: u32,
        devnum: u32,
        device: HardwareId,
        transport: T,
        config: &ClientConfig,
    ) -> Self {
        Self {
            busnum,
            devnum,
            device,
            transport,
            seqnum: 0,
            commands: HashMap::new(),
            responses: BTreeMap::new(),
            unlink_replies: HashMap::new(),
            endpoints: CdcEndpoints::default(),
            device_descriptor: None,
            configuration: None,
            delimiter: config.serial.delimiter.clone().into_bytes(),
            payload_timeout: config.payload_timeout(),
            urb_queue_min: config.serial.urb_queue_min,
            urb_queue_max: config.serial.urb_queue_max,
            read_buffer_size: config.serial.read_buffer_size,
        }
    }

    pub fn busnum(&self) -> u32 {
        self.busnum
    }

    pub fn devnum(&self) -> u32 {
        self.devnum
    }

    pub fn device(&self) -> HardwareId {
        self.device
    }

    pub fn link(&self) -> DeviceLink {
        DeviceLink {
            device: self.device,
            busnum: self.busnum,
            devnum: self.devnum,
        }
    }

    /// Identifies the device to the usbipd service.
    pub fn devid(&self) -> u32 {
        self.busnum << 16 | self.devnum
    }

    /// Last sequence number handed out.
    pub fn seqnum(&self) -> u32 {
        self.seqnum
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    pub fn set_delimiter(&mut self, delimiter: impl Into<Vec<u8>>) {
        self.delimiter = delimiter.into();
    }

    pub fn endpoints(&self) -> &CdcEndpoints {
        &self.endpoints
    }

    pub fn device_descriptor(&self) -> Option<&DeviceDescriptor> {
        self.device_descriptor.as_ref()
    }

    /// The bound configuration of the device.
    pub fn configuration(&self) -> Result<&ConfigurationDescriptor> {
        self.configuration
            .as_ref()
            .ok_or(ClientError::InvalidState("no configuration for device"))
    }

    /// Number of commands still awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.commands.len()
    }

    /// Sequence numbers of in-flight commands, in submission order.
    pub fn pending_seqnums(&self) -> Vec<u32> {
        let mut seqnums: Vec<u32> = self.commands.keys().copied().collect();
        seqnums.sort_unstable();
        seqnums
    }

    /// Number of read URBs queued on the input endpoint.
    pub fn pending_reads(&self) -> Result<usize> {
        let input = u32::from(self.input_endpoint()?.number());
        Ok(self
            .commands
            .values()
            .filter(|cmd| cmd.ep == input)
            .count())
    }

    fn input_endpoint(&self) -> Result<&UsbEndpoint> {
        self.endpoints
            .input
            .as_ref()
            .ok_or(ClientError::InvalidState("no input endpoint"))
    }

    fn output_endpoint(&self) -> Result<&UsbEndpoint> {
        self.endpoints
            .output
            .as_ref()
            .ok_or(ClientError::InvalidState("no output endpoint"))
    }

    pub(crate) fn set_device_descriptor(&mut self, descriptor: DeviceDescriptor) {
        self.device_descriptor = Some(descriptor);
    }

    /// Bind the configuration and locate the serial endpoints: every
    /// endpoint of a CDC data interface becomes input or output according
    /// to its address direction bit.
    pub(crate) fn bind_configuration(&mut self, configuration: ConfigurationDescriptor) {
        for interface in &configuration.interfaces {
            if interface.interface_class != interface_class::CDC_DATA {
                continue;
            }
            for endpoint in &interface.endpoints {
                if endpoint.is_output() {
                    self.endpoints.output = Some(UsbEndpoint::new(*endpoint));
                } else {
                    self.endpoints.input = Some(UsbEndpoint::new(*endpoint));
                }
            }
        }
        self.configuration = Some(configuration);
    }

    pub(crate) fn next_seqnum(&mut self) -> u32 {
        self.seqnum += 1;
        self.seqnum
    }

    pub(crate) fn send_all(&mut self, data: &[u8]) -> Result<()> {
        let link = self.link();
        self.transport
            .send_all(data)
            .map_err(|e| ClientError::lost(format!("send failed: {e}")).with_link(link))
    }

    /// Read `size` bytes from the transport, bounded by `timeout`.
    pub(crate) fn readall(&mut self, size: usize, timeout: Duration) -> Result<Bytes> {
        let link = self.link();
        readall(&mut self.transport, size, timeout).map_err(|e| e.with_link(link))
    }

    pub(crate) fn shutdown_transport(&mut self) {
        let _ = self.transport.shutdown();
    }

    /// Submit a URB and record it in the in-flight map.
    ///
    /// Writes to the control or output endpoint block until the server
    /// acknowledges them and return how much data was accepted; reads and
    /// unacknowledged commands return zero immediately.
    pub fn send_command(&mut self, command: CmdSubmit) -> Result<usize> {
        let mut buf = Vec::with_capacity(CmdSubmit::PREFIX_SIZE + command.payload.len());
        command
            .write_to(&mut buf)
            .map_err(protocol::ProtocolError::from)?;
        self.send_all(&buf)?;

        let seqnum = command.seqnum;
        let ep = command.ep;
        let direction = command.direction;
        self.commands.insert(seqnum, command);

        if direction == Direction::In && ep != 0 {
            debug!("queued read #{seqnum}");
        }

        // writes wait for confirmation that the data was accepted
        let control = u32::from(self.endpoints.control.number());
        let output = self.endpoints.output.as_ref().map(|e| u32::from(e.number()));
        if direction == Direction::Out && (ep == control || Some(ep) == output) {
            let start = Instant::now();
            while !self.responses.contains_key(&seqnum) && start.elapsed() < WRITE_ACK_TIMEOUT {
                self.wait_for_response(None)?;
            }
            if let Some(response) = self.responses.remove(&seqnum) {
                self.commands.remove(&seqnum);
                return Ok(response.prefix.actual_length.max(0) as usize);
            }
        }
        Ok(0)
    }

    /// Send an unlink and drain traffic until its RET_UNLINK arrives.
    ///
    /// Returns true when the reported status says the device is gone
    /// (ENOENT or ENODEV).
    pub fn send_unlink(&mut self, unlink: CmdUnlink) -> Result<bool> {
        debug!("UNLINK #{}", unlink.unlink_seqnum);
        let mut buf = Vec::with_capacity(CmdUnlink::SIZE);
        unlink
            .write_to(&mut buf)
            .map_err(protocol::ProtocolError::from)?;
        self.send_all(&buf)?;
        let reply = self.wait_for_unlink(unlink.seqnum)?;
        Ok(matches!(reply, Some(ret) if errno::is_disconnect(ret.status)))
    }

    /// Wade through residual packets until the unlink named by `seqnum`
    /// completes.
    fn wait_for_unlink(&mut self, seqnum: u32) -> Result<Option<RetUnlink>> {
        let start = Instant::now();
        loop {
            if let Some(reply) = self.unlink_replies.remove(&seqnum) {
                return Ok(Some(reply));
            }
            if start.elapsed() >= UNLINK_TIMEOUT {
                return Err(ClientError::ResponseTimeout {
                    timeout: UNLINK_TIMEOUT,
                    size: RetUnlink::SIZE,
                });
            }
            let header_data = self.readall(UrbHeader::SIZE, UNLINK_HEADER_TIMEOUT)?;
            if header_data.is_empty() {
                return Ok(None);
            }
            let header = UrbHeader::from_bytes(&header_data)?;
            match header.command {
                UrbCommand::RetUnlink => {
                    let rest =
                        self.readall(RetUnlink::SIZE - UrbHeader::SIZE, self.payload_timeout)?;
                    let mut full = BytesMut::with_capacity(RetUnlink::SIZE);
                    full.extend_from_slice(&header_data);
                    full.extend_from_slice(&rest);
                    let reply = RetUnlink::from_bytes(&full)?;
                    if reply.seqnum == seqnum {
                        return Ok(Some(reply));
                    }
                    self.unlink_replies.insert(reply.seqnum, reply);
                }
                UrbCommand::RetSubmit => {
                    warn!("unlink drain read a RET_SUBMIT #{}", header.seqnum);
                    self.wait_for_response(Some(header_data))?;
                }
                other => {
                    debug!("unlink drain ignoring {:?}", other);
                }
            }
        }
    }

    /// Read exactly one URB completion off the wire and store it.
    ///
    /// An IN completion for the control or input endpoint also carries its
    /// payload, which is read using the reported actual length. A
    /// RET_UNLINK encountered here is parked for the unlink waiter. Returns
    /// true when a response was stored.
    pub fn wait_for_response(&mut self, header_data: Option<Bytes>) -> Result<bool> {
        let input = u32::from(self.input_endpoint()?.number());
        let control = u32::from(self.endpoints.control.number());

        let header_data = match header_data {
            Some(data) => data,
            None => self.readall(UrbHeader::SIZE, self.payload_timeout)?,
        };
        if header_data.is_empty() {
            return Ok(false);
        }
        let header = UrbHeader::from_bytes(&header_data)?;
        match header.command {
            UrbCommand::RetSubmit => {}
            UrbCommand::RetUnlink => {
                let rest = self.readall(RetUnlink::SIZE - UrbHeader::SIZE, self.payload_timeout)?;
                let mut full = BytesMut::with_capacity(RetUnlink::SIZE);
                full.extend_from_slice(&header_data);
                full.extend_from_slice(&rest);
                let reply = RetUnlink::from_bytes(&full)?;
                self.unlink_replies.insert(reply.seqnum, reply);
                return Ok(false);
            }
            _ => return Ok(false),
        }

        let rest = self.readall(RetSubmit::SIZE - UrbHeader::SIZE, self.payload_timeout)?;
        if rest.is_empty() {
            return Ok(false);
        }
        let mut full = BytesMut::with_capacity(RetSubmit::SIZE);
        full.extend_from_slice(&header_data);
        full.extend_from_slice(&rest);
        let mut prefix = RetSubmit::from_bytes(&full)?;

        let Some((ep, direction)) = self
            .commands
            .get(&prefix.seqnum)
            .map(|cmd| (cmd.ep, cmd.direction))
        else {
            // stray acknowledgement with no in-flight command, drop it
            debug!("discarding stray response #{}", prefix.seqnum);
            return Ok(false);
        };

        // rewrite the endpoint from the matching command so responses can
        // be correlated with endpoints
        prefix.ep = ep;
        let payload = if direction == Direction::In
            && (ep == control || ep == input)
            && prefix.actual_length > 0
        {
            self.readall(prefix.actual_length as usize, self.payload_timeout)?
        } else {
            Bytes::new()
        };

        self.responses.insert(prefix.seqnum, UrbResponse { prefix, payload });
        Ok(true)
    }

    /// Collect device data from completed input reads.
    ///
    /// Drains arrived completions, appends their payloads and retires the
    /// matching commands. Returns as soon as `size` bytes are collected,
    /// or, when `size` is zero, as soon as the accumulated data ends with
    /// the session delimiter. Times out with `ResponseTimeout` only when
    /// nothing at all was collected.
    pub fn response_data(&mut self, size: usize, timeout: Duration) -> Result<Bytes> {
        let input = u32::from(self.input_endpoint()?.number());
        let mut data = BytesMut::with_capacity(self.read_buffer_size.max(size));
        let start = Instant::now();
        while start.elapsed() < timeout {
            if !self.wait_for_response(None)? {
                continue;
            }
            let ready: Vec<u32> = self
                .responses
                .iter()
                .filter(|(_, response)| response.prefix.ep == input)
                .map(|(&seqnum, _)| seqnum)
                .collect();
            for seqnum in ready {
                if let Some(response) = self.responses.remove(&seqnum) {
                    data.extend_from_slice(&response.payload);
                }
                self.commands.remove(&seqnum);
                if size > 0 && data.len() >= size {
                    return Ok(data.freeze());
                }
                if size == 0 && !self.delimiter.is_empty() && data.ends_with(&self.delimiter) {
                    return Ok(data.freeze());
                }
            }
        }

        if !data.is_empty() {
            return Ok(data.freeze());
        }
        Err(ClientError::ResponseTimeout { timeout, size })
    }

    /// Top up the queue of pending reads on the input endpoint so response
    /// data always has somewhere to land.
    pub fn queue_urbs(&mut self) -> Result<()> {
        let pending = self.pending_reads()?;
        if pending < self.urb_queue_min {
            for _ in pending..self.urb_queue_max {
                self.read(READ_REQUEST_SIZE)?;
            }
        }
        Ok(())
    }

    /// Send data out the serial channel; returns how much the device
    /// accepted.
    pub fn send(&mut self, data: &[u8]) -> Result<usize> {
        self.queue_urbs()?;
        let ep = u32::from(self.output_endpoint()?.number());
        let seqnum = self.next_seqnum();
        let command = CmdSubmit::bulk_out(
            seqnum,
            self.devid(),
            ep,
            Bytes::copy_from_slice(data),
            transfer_flags::URB_DIR_OUT,
        );
        self.send_command(command)
    }

    /// Enqueue a read URB for up to `size` bytes from the input endpoint.
    pub fn read(&mut self, size: usize) -> Result<()> {
        let ep = u32::from(self.input_endpoint()?.number());
        let seqnum = self.next_seqnum();
        let command = CmdSubmit::bulk_in(seqnum, self.devid(), ep, size as u32);
        self.send_command(command)?;
        Ok(())
    }

    /// Read until the session delimiter is seen, decoding the result as
    /// text with the delimiter stripped. Returns an empty string when the
    /// device stays silent.
    pub fn readline(&mut self) -> Result<String> {
        let mut response = BytesMut::new();
        let timeout = self.payload_timeout;
        let delimiter = self.delimiter.clone();
        let start = Instant::now();
        while start.elapsed() < timeout {
            match self.response_data(0, timeout) {
                Ok(packet) => {
                    let complete = !delimiter.is_empty()
                        && packet
                            .windows(delimiter.len())
                            .any(|window| window == delimiter);
                    response.extend_from_slice(&packet);
                    if complete {
                        break;
                    }
                }
                Err(ClientError::ResponseTimeout { .. }) => return Ok(String::new()),
                Err(e) => return Err(e),
            }
        }
        let delimiter_text = String::from_utf8_lossy(&delimiter).into_owned();
        let text = String::from_utf8_lossy(&response);
        Ok(text
            .trim_matches(|c: char| delimiter_text.contains(c))
            .to_string())
    }

    /// Build and send a control transfer without tracking it in the
    /// in-flight map; enumeration reads its acknowledgements synchronously.
    pub(crate) fn send_setup(&mut self, setup: SetupPacket, data: Option<&[u8]>) -> Result<()> {
        let seqnum = self.next_seqnum();
        let devid = self.devid();
        let direction = setup.direction();
        let flags = if direction == Direction::In {
            transfer_flags::URB_DIR_IN
        } else {
            transfer_flags::URB_DIR_OUT
        };
        let buffer_length = match data {
            Some(payload) => payload.len() as u32,
            None => u32::from(setup.length),
        };
        let payload = data.map(Bytes::copy_from_slice).unwrap_or_default();
        debug!("send_setup(): {setup}");
        let command = CmdSubmit::control(
            seqnum,
            devid,
            direction,
            setup.pack(),
            payload,
            buffer_length,
            flags,
        );
        let mut buf = Vec::with_capacity(CmdSubmit::PREFIX_SIZE + command.payload.len());
        command
            .write_to(&mut buf)
            .map_err(protocol::ProtocolError::from)?;
        self.send_all(&buf)
    }

    /// Unlink every in-flight command, oldest first, then forget them.
    pub fn unlink_all(&mut self) -> Result<()> {
        let mut pending: Vec<CmdSubmit> = self.commands.values().cloned().collect();
        pending.sort_by_key(|cmd| cmd.seqnum);
        if !pending.is_empty() {
            debug!("unlink for {} commands", pending.len());
        }
        for submit in pending {
            let seqnum = self.next_seqnum();
            let unlink = CmdUnlink {
                seqnum,
                devid: submit.devid,
                direction: submit.direction,
                ep: submit.ep,
                unlink_seqnum: submit.seqnum,
            };
            self.send_unlink(unlink)?;
            self.commands.remove(&submit.seqnum);
            self.responses.remove(&submit.seqnum);
        }
        Ok(())
    }
}
