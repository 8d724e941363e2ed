//! Top-level client for a usbipd daemon
//!
//! Owns the daemon-facing transport until an attachment hands it over to a
//! device session. Connections to exported devices are discovered by
//! vendor/product id, imported, enumerated and then tracked for the life of
//! the client.

use bytes::BytesMut;
use protocol::{
    errno, BusId, DevicePath, DevlistReply, DevlistReplyHeader, DevlistRequest, ImportReply,
    ImportRequest, InterfaceRecord, OpHeader, OpStatus,
};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::{DeviceConnection, DeviceLink, HardwareId};
use crate::setup;
use crate::transport::{readall, Connector, TcpConnector, Transport};

/// Budget for the trailing body of an import reply
const IMPORT_BODY_TIMEOUT: Duration = Duration::from_secs(1);

/// Client for a usbipd daemon exporting remote USB devices
pub struct UsbIpClient<C: Connector = TcpConnector> {
    host: String,
    port: u16,
    connector: C,
    daemon: Option<C::Stream>,
    connections: Vec<DeviceConnection<C::Stream>>,
    config: ClientConfig,
}

impl UsbIpClient<TcpConnector> {
    /// Client talking TCP to `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_connector(host, port, TcpConnector)
    }
}

impl<C: Connector> UsbIpClient<C> {
    /// Client over a custom connector, the injection point for tests.
    pub fn with_connector(host: impl Into<String>, port: u16, connector: C) -> Self {
        Self {
            host: host.into(),
            port,
            connector,
            daemon: None,
            connections: Vec::new(),
            config: ClientConfig::default(),
        }
    }

    /// Replace the default configuration.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Override how long reads wait for pieces of a payload.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.config.serial.payload_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sessions currently attached.
    pub fn connections(&self) -> &[DeviceConnection<C::Stream>] {
        &self.connections
    }

    /// Establish the daemon connection if it is not already up.
    pub fn connect_daemon(&mut self) -> Result<()> {
        if self.daemon.is_none() {
            let mut stream =
                self.connector
                    .connect(&self.host, self.port, self.config.connect_timeout())?;
            stream
                .set_read_timeout(Some(self.config.socket_read_timeout()))
                .map_err(|e| ClientError::lost(format!("set_read_timeout failed: {e}")))?;
            debug!("connected to {}:{}", self.host, self.port);
            self.daemon = Some(stream);
        }
        Ok(())
    }

    /// Drop the daemon connection.
    pub fn disconnect_daemon(&mut self) {
        if let Some(mut stream) = self.daemon.take() {
            let _ = stream.shutdown();
            debug!("disconnected from {}:{}", self.host, self.port);
        }
    }

    fn daemon_mut(&mut self) -> Result<&mut C::Stream> {
        self.connect_daemon()?;
        self.daemon
            .as_mut()
            .ok_or(ClientError::InvalidState("daemon socket not connected"))
    }

    /// Detach the daemon socket so it can be handed to a device session.
    ///
    /// Sessions exchange lots of small packets, so Nagle's algorithm is
    /// disabled, and keepalive protects long quiet stretches from the
    /// server's idle teardown.
    fn take_daemon(&mut self) -> Result<C::Stream> {
        let mut stream = self
            .daemon
            .take()
            .ok_or(ClientError::InvalidState("no daemon socket to hand over"))?;
        stream
            .set_nodelay()
            .map_err(|e| ClientError::lost(format!("set_nodelay failed: {e}")))?;
        stream
            .set_keepalive()
            .map_err(|e| ClientError::lost(format!("set_keepalive failed: {e}")))?;
        Ok(stream)
    }

    /// Fetch the daemon's list of exported devices.
    pub fn list_published(&mut self) -> Result<DevlistReply> {
        let payload_timeout = self.config.payload_timeout();
        let daemon = self.daemon_mut()?;

        let mut request = Vec::with_capacity(DevlistRequest::SIZE);
        DevlistRequest
            .write_to(&mut request)
            .map_err(protocol::ProtocolError::from)?;
        daemon
            .send_all(&request)
            .map_err(|e| ClientError::lost(format!("send failed: {e}")))?;

        let data = readall(daemon, DevlistReplyHeader::SIZE, payload_timeout)?;
        let header = DevlistReplyHeader::from_bytes(&data)?;
        let mut reply = DevlistReply {
            status: header.status,
            paths: Vec::with_capacity(header.num_exported as usize),
        };
        for _ in 0..header.num_exported {
            let data = readall(daemon, DevicePath::SIZE, payload_timeout)?;
            let mut path = DevicePath::from_bytes(&data)?;
            for _ in 0..path.num_interfaces {
                let data = readall(daemon, InterfaceRecord::SIZE, payload_timeout)?;
                path.interfaces.push(InterfaceRecord::from_bytes(&data)?);
            }
            reply.paths.push(path);
        }
        debug!("found {} paths published", reply.paths.len());
        Ok(reply)
    }

    /// Import the exported device named by `busid`.
    pub fn import_device(&mut self, busid: &BusId) -> Result<ImportReply> {
        let usbip_timeout = self.config.usbip_timeout();
        let payload_timeout = self.config.payload_timeout();
        let daemon = self.daemon_mut()?;
        daemon
            .set_nodelay()
            .map_err(|e| ClientError::lost(format!("set_nodelay failed: {e}")))?;

        let mut request = Vec::with_capacity(ImportRequest::SIZE);
        ImportRequest { busid: *busid }
            .write_to(&mut request)
            .map_err(protocol::ProtocolError::from)?;
        daemon
            .send_all(&request)
            .map_err(|e| ClientError::lost(format!("send failed: {e}")))?;

        let header_data = readall(daemon, OpHeader::SIZE, usbip_timeout)?;
        let header = OpHeader::from_bytes(&header_data)?;
        if header.status != OpStatus::Success as u32 {
            return Err(ClientError::Attach {
                errno: header.status as i32,
            });
        }

        // the body can trickle in after the status header
        let mut body = BytesMut::with_capacity(ImportReply::SIZE - OpHeader::SIZE);
        let start = Instant::now();
        while body.is_empty() && start.elapsed() < IMPORT_BODY_TIMEOUT {
            let more = readall(daemon, ImportReply::SIZE - OpHeader::SIZE, payload_timeout)?;
            body.extend_from_slice(&more);
        }

        let mut full = BytesMut::with_capacity(ImportReply::SIZE);
        full.extend_from_slice(&header_data);
        full.extend_from_slice(&body);
        let reply = ImportReply::from_bytes(&full)?;
        debug!(
            "imported {} as {}-{}",
            reply.device.busid, reply.device.busnum, reply.device.devnum
        );
        Ok(reply)
    }

    /// Attach to every exported device matching the requested hardware
    /// ids, enumerating each one into a ready serial session.
    ///
    /// Fetches the device list first unless `published` is supplied.
    pub fn attach(&mut self, devices: &[HardwareId], published: Option<DevlistReply>) -> Result<()> {
        // start from a clean daemon connection
        self.disconnect_daemon();
        let published = match published {
            Some(reply) => reply,
            None => self.list_published()?,
        };
        self.disconnect_daemon();

        let mut found = 0usize;
        for device in devices {
            for path in &published.paths {
                if path.id_vendor != device.vid || path.id_product != device.pid {
                    continue;
                }
                debug!("attaching to {} at busid {}", device, path.busid);
                match self.import_and_enumerate(*device, path) {
                    Ok(connection) => {
                        self.connections.push(connection);
                        found += 1;
                    }
                    Err(ClientError::ConnectionLost { detail, .. }) => {
                        // a stream failure mid-attachment is an attach
                        // failure to the caller
                        warn!("connection lost attaching to {device}: {detail}");
                        return Err(ClientError::Attach {
                            errno: errno::EPIPE,
                        });
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        if found == 0 {
            return Err(ClientError::NotFound);
        }
        Ok(())
    }

    fn import_and_enumerate(
        &mut self,
        device: HardwareId,
        path: &DevicePath,
    ) -> Result<DeviceConnection<C::Stream>> {
        let reply = self.import_device(&path.busid)?;
        let transport = self.take_daemon()?;
        let mut connection = DeviceConnection::new(
            reply.device.busnum,
            reply.device.devnum,
            device,
            transport,
            &self.config,
        );
        setup::run(&mut connection)?;
        Ok(connection)
    }

    /// Every attached session whose hardware id matches.
    ///
    /// Several devices can share a vendor/product pair; the caller picks
    /// the one it wants.
    pub fn get_connection(&mut self, device: HardwareId) -> Vec<&mut DeviceConnection<C::Stream>> {
        self.connections
            .iter_mut()
            .filter(|connection| connection.device() == device)
            .collect()
    }

    /// Should the exported `path` be used to replace the lost session?
    fn is_restore_candidate(&self, lost: &DeviceLink, path: &DevicePath) -> bool {
        if path.busnum == lost.busnum && path.devnum == lost.devnum {
            return false;
        }
        for connection in &self.connections {
            if connection.busnum() == path.busnum && connection.devnum() == path.devnum {
                return false;
            }
        }
        path.id_vendor == lost.device.vid && path.id_product == lost.device.pid
    }

    /// Replace a lost session by re-importing the same vendor/product
    /// identity on a fresh path.
    ///
    /// Returns the new session, not registered with the client, or `None`
    /// when the device has not come back yet.
    pub fn restore_connection(
        &mut self,
        lost: DeviceLink,
    ) -> Result<Option<DeviceConnection<C::Stream>>> {
        debug!("restoring connection {lost}");
        self.connections
            .retain(|c| !(c.busnum() == lost.busnum && c.devnum() == lost.devnum));

        let published = self.list_published()?;
        self.disconnect_daemon();
        for path in &published.paths {
            if !self.is_restore_candidate(&lost, path) {
                continue;
            }
            match self.import_and_enumerate(lost.device, path) {
                Ok(connection) => return Ok(Some(connection)),
                Err(ClientError::Attach { errno: code }) if errno::is_disconnect(code) => {
                    warn!("device error on re-attachment, try again later");
                    self.disconnect_daemon();
                    return Ok(None);
                }
                Err(other) => return Err(other),
            }
        }
        warn!("no replacement path published for {lost}");
        Ok(None)
    }

    /// Close the daemon socket and tear down every session, unlinking
    /// whatever is still in flight so the server can free its queued URBs.
    ///
    /// Shutdown failures are swallowed, except a daemon connect timeout.
    pub fn shutdown(&mut self) -> Result<()> {
        self.disconnect_daemon();
        let mut connections: Vec<DeviceConnection<C::Stream>> =
            self.connections.drain(..).collect();
        for connection in &mut connections {
            if let Err(e) = Self::shutdown_connection(connection) {
                match e {
                    ClientError::DaemonTimeout { .. } => return Err(e),
                    other => debug!("ignoring shutdown error: {other}"),
                }
            }
        }
        Ok(())
    }

    fn shutdown_connection(connection: &mut DeviceConnection<C::Stream>) -> Result<()> {
        let result = connection.unlink_all();
        connection.shutdown_transport();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_construction() {
        let client = UsbIpClient::new("localhost", protocol::DEFAULT_PORT);
        assert!(client.connections().is_empty());
        assert_eq!(client.config().daemon.port, 3240);
    }
}
