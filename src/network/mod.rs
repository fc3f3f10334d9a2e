//! Transport abstraction consumed by the MQTT session engine.
//!
//! The engine never touches sockets directly. It drives any type that implements
//! [`Connection`], and every read or write carries its own timeout so the engine
//! can keep all blocking inside its deadlines. A plain TCP stream and a TLS
//! session satisfy the same contract, and the engine does not know which one it
//! is talking to.
//!
//! Return conventions for [`Read::read`] and [`Write::write`]:
//!
//! * `Ok(n)` with `n > 0`: `n` bytes were transferred
//! * `Ok(0)`: the timeout elapsed before anything could be transferred
//! * `Err(_)`: the transport failed and should be considered dead

#![deny(unsafe_code)]

/// Common error types for network operations
pub mod error;

/// Protocol implementations layered on top of a [`Connection`]
pub mod application;

/// `std::net` backed transport
#[cfg(feature = "std")]
pub mod tcp;

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Close, Connect, Connection, Read, Write};
}

/// Timeout-bounded byte input.
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms`.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error>;
}

/// Timeout-bounded byte output.
pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write up to `buf.len()` bytes, waiting at most `timeout_ms`.
    fn write(&mut self, buf: &[u8], timeout_ms: u32) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Orderly shutdown of a transport.
pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A bidirectional transport usable by the session engine.
pub trait Connection: Read + Write + Close {}

/// Opens transports to a broker.
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Open a connection to `host:port`, giving up after `timeout_ms`.
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        timeout_ms: u32,
    ) -> Result<Self::Connection, Self::Error>;
}
