//! Serial client for USB/IP exported CDC-ACM devices
//!
//! Connects to a usbipd daemon over TCP, imports a remote USB device,
//! performs the enumeration handshake as the host controller would and then
//! provides a bidirectional serial channel by pipelining URBs.
//!
//! The flow: a [`UsbIpClient`] lists the daemon's exported devices, imports
//! the ones matching the requested [`HardwareId`]s and hands each imported
//! stream to a [`DeviceConnection`], which enumerates the device and then
//! carries reads and writes correlated by sequence number.
//!
//! ```no_run
//! use client::{HardwareId, UsbIpClient};
//!
//! fn main() -> client::Result<()> {
//!     let mut client = UsbIpClient::new("localhost", protocol::DEFAULT_PORT);
//!     let gadget = HardwareId { vid: 0x0525, pid: 0xA4A7 };
//!     client.attach(&[gadget], None)?;
//!     for connection in client.get_connection(gadget) {
//!         connection.send(b"*IDN?\r\n")?;
//!         println!("{}", connection.readline()?);
//!     }
//!     client.shutdown()
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
mod setup;
pub mod transport;

pub use client::UsbIpClient;
pub use config::{ClientConfig, DaemonSettings, SerialSettings};
pub use error::{ClientError, Result};
pub use logging::setup_logging;
pub use session::{CdcEndpoints, DeviceConnection, DeviceLink, HardwareId, UrbResponse, UsbEndpoint};
pub use transport::{readall, Connector, TcpConnector, TcpTransport, Transport};
