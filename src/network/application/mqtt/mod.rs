//! MQTT 3.1.1 client for embedded systems.
//!
//! The client is split in two layers:
//!
//! * [`codec`]: pure packet encoding and decoding on caller buffers
//! * [`Session`]: the connection state machine that drives a transport,
//!   acknowledges QoS 1/2 traffic, keeps the connection alive and dispatches
//!   incoming publications to registered handlers
//!
//! Every blocking operation takes a timeout in milliseconds and never blocks
//! past it. The session reads at most one packet per [`Session::yield_now`]
//! call, so an application keeps it alive by calling that in its main loop.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tmlink::network::application::mqtt::{Message, Options, Publish, QoS, Session};
//! # use tmlink::network::{Close, Connection, Read, Write};
//! # use tmlink::time::Clock;
//! # struct Socket;
//! # impl Read for Socket {
//! #     type Error = ();
//! #     fn read(&mut self, _buf: &mut [u8], _t: u32) -> Result<usize, ()> { Ok(0) }
//! # }
//! # impl Write for Socket {
//! #     type Error = ();
//! #     fn write(&mut self, buf: &[u8], _t: u32) -> Result<usize, ()> { Ok(buf.len()) }
//! # }
//! # impl Close for Socket {
//! #     type Error = ();
//! #     fn close(self) -> Result<(), ()> { Ok(()) }
//! # }
//! # impl Connection for Socket {}
//! # #[derive(Clone)]
//! # struct Ticks;
//! # impl Clock for Ticks { fn now_ms(&self) -> u64 { 0 } }
//!
//! fn on_led(count: &mut u32, message: &Message<'_>, _out: &mut dyn Publish) {
//!     *count += 1;
//!     let _ = message.payload;
//! }
//!
//! let mut send = [0u8; 512];
//! let mut recv = [0u8; 512];
//! let mut received = 0u32;
//! let mut session = Session::new(Socket, Ticks, &mut send, &mut recv);
//!
//! session.connect(&mut received, &Options::new("sensor-01"), 5_000).unwrap();
//! session.subscribe(&mut received, "home/led", QoS::AtLeastOnce, on_led, 5_000).unwrap();
//! session.publish(&mut received, "home/temp", b"21.5", QoS::AtMostOnce, false, 1_000).unwrap();
//! loop {
//!     session.yield_now(&mut received, 100).unwrap();
//! }
//! ```

#![deny(unsafe_code)]

pub mod codec;
pub mod packet_id;
pub mod session;
pub mod topic;

pub use codec::{ConnAck, Message, Options, PacketType, Will};
pub use packet_id::PacketIdGenerator;
pub use session::{Event, MessageHandler, Publish, Session, State};

/// Number of topic filters a session can route to distinct handlers.
pub const MAX_MESSAGE_HANDLERS: usize = 5;
/// Longest topic filter a handler slot can store.
pub const MAX_TOPIC_LEN: usize = 128;

/// Quality of Service levels for MQTT messages.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce = 0,
    /// Acknowledged with PUBACK.
    AtLeastOnce = 1,
    /// Four-way PUBREC/PUBREL/PUBCOMP handshake.
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = codec::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            _ => Err(codec::Error::InvalidQoS),
        }
    }
}

/// Errors reported by [`Session`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The transport failed while reading. The session is closed.
    Read,
    /// The transport failed while writing. The session is closed.
    Write,
    /// The operation did not complete before its deadline.
    Timeout,
    /// A packet could not be encoded or decoded.
    Codec(codec::Error),
    /// A packet started arriving but did not complete before the deadline.
    Truncated,
    /// The operation needs a connected session.
    NotConnected,
    /// `connect` was called on a connected session.
    AlreadyConnected,
    /// The broker answered CONNECT with a non-zero return code.
    ConnectionRefused(u8),
    /// The broker answered SUBSCRIBE with the failure return code.
    SubscribeRejected,
    /// Every handler slot is taken by another filter.
    NoHandlerSlot,
    /// A PINGREQ went unanswered for a whole keep-alive interval.
    KeepAliveTimeout,
    /// A topic filter does not fit into a handler slot.
    TopicTooLong,
}

impl From<codec::Error> for Error {
    fn from(e: codec::Error) -> Self {
        Error::Codec(e)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Read => defmt::write!(f, "Read"),
            Error::Write => defmt::write!(f, "Write"),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::Codec(e) => defmt::write!(f, "Codec({})", e),
            Error::Truncated => defmt::write!(f, "Truncated"),
            Error::NotConnected => defmt::write!(f, "NotConnected"),
            Error::AlreadyConnected => defmt::write!(f, "AlreadyConnected"),
            Error::ConnectionRefused(code) => defmt::write!(f, "ConnectionRefused({})", code),
            Error::SubscribeRejected => defmt::write!(f, "SubscribeRejected"),
            Error::NoHandlerSlot => defmt::write!(f, "NoHandlerSlot"),
            Error::KeepAliveTimeout => defmt::write!(f, "KeepAliveTimeout"),
            Error::TopicTooLong => defmt::write!(f, "TopicTooLong"),
        }
    }
}
