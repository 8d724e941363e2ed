//! Byte-stream transport to the USB/IP daemon
//!
//! [`Transport`] abstracts an established stream; [`Connector`] produces
//! streams and is the dependency-injection seam for tests. Production code
//! uses [`TcpConnector`]/[`TcpTransport`] over blocking sockets with a short
//! read timeout; outer loops enforce their own deadlines on a monotonic
//! clock.

use bytes::{Bytes, BytesMut};
use std::io;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{ClientError, Result};

/// An established byte stream to the daemon
pub trait Transport: Send {
    /// Write the whole buffer.
    fn send_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read up to `buf.len()` bytes. A return of zero means the peer closed
    /// the stream.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Disable Nagle's algorithm so small URBs go out immediately.
    fn set_nodelay(&mut self) -> io::Result<()>;

    /// Keep quiet periods from tearing the connection down server-side.
    fn set_keepalive(&mut self) -> io::Result<()>;

    /// Tell the peer we are done; the stream is unusable afterwards.
    fn shutdown(&mut self) -> io::Result<()>;
}

/// Produces transports; injectable for tests
pub trait Connector {
    type Stream: Transport;

    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<Self::Stream>;
}

/// Default connector over `std::net::TcpStream`
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpTransport;

    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<TcpTransport> {
        let mut addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| ClientError::DaemonConnect {
                host: host.to_string(),
                port,
                detail: e.to_string(),
            })?;
        let addr = addrs.next().ok_or_else(|| ClientError::DaemonConnect {
            host: host.to_string(),
            port,
            detail: "no addresses resolved".to_string(),
        })?;
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ClientError::DaemonTimeout {
                host: host.to_string(),
                port,
                timeout,
            },
            _ => ClientError::DaemonConnect {
                host: host.to_string(),
                port,
                detail: e.to_string(),
            },
        })?;
        debug!("connected to {addr}");
        Ok(TcpTransport { stream })
    }
}

/// TCP stream transport
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl Transport for TcpTransport {
    fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
        use io::Write;
        self.stream.write_all(data)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use io::Read;
        self.stream.read(buf)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    fn set_nodelay(&mut self) -> io::Result<()> {
        self.stream.set_nodelay(true)
    }

    #[cfg(target_os = "linux")]
    fn set_keepalive(&mut self) -> io::Result<()> {
        nix::sys::socket::setsockopt(&self.stream, nix::sys::socket::sockopt::KeepAlive, &true)
            .map_err(io::Error::from)
    }

    #[cfg(not(target_os = "linux"))]
    fn set_keepalive(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

/// Read until `size` bytes are collected or `timeout` elapses.
///
/// A zero-length read is end of stream and returns what is accumulated, as
/// does running out the clock; stream failures become `ConnectionLost`.
pub fn readall<T: Transport + ?Sized>(
    transport: &mut T,
    size: usize,
    timeout: Duration,
) -> Result<Bytes> {
    let mut data = BytesMut::with_capacity(size);
    let mut chunk = [0u8; 4096];
    let start = Instant::now();
    while data.len() < size {
        let want = (size - data.len()).min(chunk.len());
        match transport.recv(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(n) => data.extend_from_slice(&chunk[..n]),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                if start.elapsed() >= timeout {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(ClientError::lost(format!("recv failed: {e}"))),
        }
    }
    Ok(data.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ChunkedTransport {
        incoming: VecDeque<Vec<u8>>,
        eof: bool,
    }

    impl Transport for ChunkedTransport {
        fn send_all(&mut self, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.incoming.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.incoming.push_front(chunk[n..].to_vec());
                    }
                    Ok(n)
                }
                None if self.eof => Ok(0),
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }

        fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }

        fn set_nodelay(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn set_keepalive(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn shutdown(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_readall_reassembles_chunks() {
        let mut transport = ChunkedTransport {
            incoming: VecDeque::from(vec![vec![1, 2], vec![3], vec![4, 5, 6]]),
            eof: false,
        };
        let data = readall(&mut transport, 6, Duration::from_millis(50)).unwrap();
        assert_eq!(&data[..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_readall_returns_partial_on_eof() {
        let mut transport = ChunkedTransport {
            incoming: VecDeque::from(vec![vec![1, 2, 3]]),
            eof: true,
        };
        let data = readall(&mut transport, 10, Duration::from_millis(50)).unwrap();
        assert_eq!(&data[..], &[1, 2, 3]);
    }

    #[test]
    fn test_readall_times_out_empty() {
        let mut transport = ChunkedTransport {
            incoming: VecDeque::new(),
            eof: false,
        };
        let data = readall(&mut transport, 4, Duration::from_millis(10)).unwrap();
        assert!(data.is_empty());
    }
}
