//! Plain TCP transport for hosted targets.

use super::error::Error;
use super::{Close, Connect, Connection, Read, Write};
use std::io::{ErrorKind, Read as _, Write as _};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

fn timeout(ms: u32) -> Duration {
    // A zero duration is rejected by the socket API.
    Duration::from_millis(u64::from(ms.max(1)))
}

/// A [`TcpStream`] adapted to the timeout-bounded transport traits.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

impl TcpConnection {
    /// Wrap an already connected stream.
    pub fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        Self { stream }
    }
}

impl Read for TcpConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        self.stream
            .set_read_timeout(Some(timeout(timeout_ms)))
            .map_err(|_| Error::Read)?;
        match self.stream.read(buf) {
            Ok(0) if !buf.is_empty() => Err(Error::Closed),
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(0),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(_) => Err(Error::Read),
        }
    }
}

impl Write for TcpConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        self.stream
            .set_write_timeout(Some(timeout(timeout_ms)))
            .map_err(|_| Error::Write)?;
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(0),
            Err(_) => Err(Error::Write),
        }
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.stream.flush().map_err(|_| Error::Write)
    }
}

impl Close for TcpConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(_) => Err(Error::Shutdown),
        }
    }
}

impl Connection for TcpConnection {}

/// Resolves `host:port` and opens a [`TcpConnection`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connect for TcpConnector {
    type Connection = TcpConnection;
    type Error = Error;

    fn connect(
        &mut self,
        host: &str,
        port: u16,
        timeout_ms: u32,
    ) -> Result<Self::Connection, Self::Error> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|_| Error::Resolve)?;

        let mut last = Error::Resolve;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout(timeout_ms)) {
                Ok(stream) => return Ok(TcpConnection::new(stream)),
                Err(e) if e.kind() == ErrorKind::TimedOut => last = Error::ConnectTimeout,
                Err(_) => last = Error::Refused,
            }
        }
        Err(last)
    }
}
