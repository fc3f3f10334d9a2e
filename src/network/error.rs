//! Transport errors.

/// Failures reported by the bundled transport backends.
///
/// A read or write that merely times out is not an error: the transport
/// traits report it as `Ok(0)`. Only conditions that leave the stream unusable
/// end up here. Backends for other stacks may bring their own error type; the
/// session engine only needs it to be `Debug`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// The host name did not resolve to any address.
    Resolve,
    /// Every resolved address refused the connection.
    Refused,
    /// No resolved address answered before the connect deadline.
    ConnectTimeout,
    /// The peer closed the stream.
    Closed,
    /// The stream failed while reading.
    Read,
    /// The stream failed while writing or flushing.
    Write,
    /// The stream could not be shut down.
    Shutdown,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Resolve => defmt::write!(f, "Resolve"),
            Error::Refused => defmt::write!(f, "Refused"),
            Error::ConnectTimeout => defmt::write!(f, "ConnectTimeout"),
            Error::Closed => defmt::write!(f, "Closed"),
            Error::Read => defmt::write!(f, "Read"),
            Error::Write => defmt::write!(f, "Write"),
            Error::Shutdown => defmt::write!(f, "Shutdown"),
        }
    }
}
