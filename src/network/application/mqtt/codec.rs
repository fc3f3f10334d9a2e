//! MQTT 3.1.1 packet encoding and decoding.
//!
//! Everything here is pure: encoders write into a caller buffer and return the
//! encoded length, decoders borrow from a caller buffer that holds one complete
//! packet (fixed header included). All buffer access goes through the
//! bounds-checked [`Writer`] and [`Reader`] cursors, so a short buffer always
//! produces an [`Error`] instead of a partial write or an out-of-bounds read.
//!
//! ```rust
//! use tmlink::network::application::mqtt::codec::{self, Message};
//! use tmlink::network::application::mqtt::QoS;
//!
//! let mut buf = [0u8; 64];
//! let message = Message {
//!     topic: "a/b",
//!     payload: b"hi",
//!     qos: QoS::AtLeastOnce,
//!     retain: false,
//!     dup: false,
//!     packet_id: Some(7),
//! };
//! let len = codec::encode_publish(&mut buf, &message).unwrap();
//! assert_eq!(codec::decode_publish(&buf[..len]).unwrap(), message);
//! ```

use super::QoS;
use heapless::Vec;

/// Largest value a four byte remaining-length field can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;
/// SUBACK return code signalling a refused subscription.
pub const SUBACK_FAILURE: u8 = 0x80;
/// Most topic filters carried by one SUBSCRIBE or UNSUBSCRIBE.
pub const MAX_FILTERS: usize = 8;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

const FLAG_CLEAN_SESSION: u8 = 0x02;
const FLAG_WILL: u8 = 0x04;
const FLAG_WILL_RETAIN: u8 = 0x20;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

/// Errors produced while encoding or decoding packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The output buffer cannot hold the encoded packet.
    BufferTooSmall,
    /// The declared remaining length exceeds the supplied buffer.
    BufferOverflow,
    /// The remaining-length field is longer than four bytes or out of range.
    MalformedLength,
    /// The packet ends before a field is complete.
    Truncated,
    /// The fixed header names an unknown or unexpected packet type.
    InvalidPacketType,
    /// Reserved fixed header flag bits have the wrong value.
    InvalidFlags,
    /// A string field is not valid UTF-8.
    InvalidUtf8,
    /// A QoS field holds the reserved value 3.
    InvalidQoS,
    /// CONNECT carries an unsupported protocol name or level.
    InvalidProtocol,
    /// A packet identifier is zero or missing where one is required.
    InvalidPacketId,
    /// A string or binary field is longer than 65535 bytes.
    StringTooLong,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::BufferTooSmall => defmt::write!(f, "BufferTooSmall"),
            Error::BufferOverflow => defmt::write!(f, "BufferOverflow"),
            Error::MalformedLength => defmt::write!(f, "MalformedLength"),
            Error::Truncated => defmt::write!(f, "Truncated"),
            Error::InvalidPacketType => defmt::write!(f, "InvalidPacketType"),
            Error::InvalidFlags => defmt::write!(f, "InvalidFlags"),
            Error::InvalidUtf8 => defmt::write!(f, "InvalidUtf8"),
            Error::InvalidQoS => defmt::write!(f, "InvalidQoS"),
            Error::InvalidProtocol => defmt::write!(f, "InvalidProtocol"),
            Error::InvalidPacketId => defmt::write!(f, "InvalidPacketId"),
            Error::StringTooLong => defmt::write!(f, "StringTooLong"),
        }
    }
}

/// MQTT control packet types, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketType {
    /// Client request to connect.
    Connect = 1,
    /// Connect acknowledgment.
    ConnAck = 2,
    /// Publish message.
    Publish = 3,
    /// QoS 1 publish acknowledgment.
    PubAck = 4,
    /// QoS 2 publish received.
    PubRec = 5,
    /// QoS 2 publish release.
    PubRel = 6,
    /// QoS 2 publish complete.
    PubComp = 7,
    /// Subscribe request.
    Subscribe = 8,
    /// Subscribe acknowledgment.
    SubAck = 9,
    /// Unsubscribe request.
    Unsubscribe = 10,
    /// Unsubscribe acknowledgment.
    UnsubAck = 11,
    /// Ping request.
    PingReq = 12,
    /// Ping response.
    PingResp = 13,
    /// Client is disconnecting.
    Disconnect = 14,
}

impl PacketType {
    /// Map the upper nibble of a fixed header byte to a packet type.
    pub fn from_header(byte: u8) -> Result<Self, Error> {
        Ok(match byte >> 4 {
            1 => Self::Connect,
            2 => Self::ConnAck,
            3 => Self::Publish,
            4 => Self::PubAck,
            5 => Self::PubRec,
            6 => Self::PubRel,
            7 => Self::PubComp,
            8 => Self::Subscribe,
            9 => Self::SubAck,
            10 => Self::Unsubscribe,
            11 => Self::UnsubAck,
            12 => Self::PingReq,
            13 => Self::PingResp,
            14 => Self::Disconnect,
            _ => return Err(Error::InvalidPacketType),
        })
    }

    // Reserved flag nibble every packet except PUBLISH must carry.
    fn fixed_flags(self) -> Option<u8> {
        match self {
            Self::Publish => None,
            Self::PubRel | Self::Subscribe | Self::Unsubscribe => Some(0x02),
            _ => Some(0x00),
        }
    }

    fn header_byte(self, flags: u8) -> u8 {
        ((self as u8) << 4) | (flags & 0x0F)
    }
}

/// Bounds-checked output cursor.
#[derive(Debug)]
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    /// Start writing at the beginning of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Append raw bytes.
    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let end = self
            .pos
            .checked_add(bytes.len())
            .ok_or(Error::BufferTooSmall)?;
        let dst = self
            .buf
            .get_mut(self.pos..end)
            .ok_or(Error::BufferTooSmall)?;
        dst.copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    /// Append one byte.
    pub fn put_u8(&mut self, value: u8) -> Result<(), Error> {
        self.put_slice(&[value])
    }

    /// Append a big-endian two byte integer.
    pub fn put_u16(&mut self, value: u16) -> Result<(), Error> {
        self.put_slice(&value.to_be_bytes())
    }

    /// Append a length-prefixed binary field.
    pub fn put_binary(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let len = u16::try_from(bytes.len()).map_err(|_| Error::StringTooLong)?;
        self.put_u16(len)?;
        self.put_slice(bytes)
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, value: &str) -> Result<(), Error> {
        self.put_binary(value.as_bytes())
    }

    /// Append a remaining-length varint.
    pub fn put_remaining_length(&mut self, len: usize) -> Result<(), Error> {
        let mut tmp = [0u8; 4];
        let n = encode_remaining_length(&mut tmp, len)?;
        self.put_slice(&tmp[..n])
    }

    /// Finish and return the total number of bytes written.
    pub fn finish(self) -> usize {
        self.pos
    }
}

/// Bounds-checked input cursor.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consume exactly `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos.checked_add(n).ok_or(Error::Truncated)?;
        let bytes = self.buf.get(self.pos..end).ok_or(Error::Truncated)?;
        self.pos = end;
        Ok(bytes)
    }

    /// Consume everything that is left.
    pub fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }

    /// Consume one byte.
    pub fn get_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    /// Consume a big-endian two byte integer.
    pub fn get_u16(&mut self) -> Result<u16, Error> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Consume a length-prefixed binary field.
    pub fn get_binary(&mut self) -> Result<&'a [u8], Error> {
        let len = self.get_u16()?;
        self.take(usize::from(len))
    }

    /// Consume a length-prefixed UTF-8 string.
    pub fn get_str(&mut self) -> Result<&'a str, Error> {
        core::str::from_utf8(self.get_binary()?).map_err(|_| Error::InvalidUtf8)
    }
}

/// Number of bytes the remaining-length field occupies for `len`.
pub fn remaining_length_len(len: usize) -> usize {
    match len {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Encode `len` as a remaining-length varint, returning the bytes used.
pub fn encode_remaining_length(buf: &mut [u8], len: usize) -> Result<usize, Error> {
    if len > MAX_REMAINING_LENGTH {
        return Err(Error::MalformedLength);
    }
    let mut value = len;
    let mut written = 0;
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        *buf.get_mut(written).ok_or(Error::BufferTooSmall)? = byte;
        written += 1;
        if value == 0 {
            return Ok(written);
        }
    }
}

/// Decode a remaining-length varint from the start of `buf`.
///
/// Returns `Ok(None)` when `buf` ends while the field still continues, and
/// `Ok(Some((value, bytes_used)))` once it is complete. A fourth byte with the
/// continuation bit set is malformed.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, &byte) in buf.iter().enumerate() {
        value += usize::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        if i == 3 {
            return Err(Error::MalformedLength);
        }
        multiplier *= 128;
    }
    Ok(None)
}

/// The decoded fixed header of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    /// Packet type from the upper nibble.
    pub packet_type: PacketType,
    /// Flag nibble.
    pub flags: u8,
    /// Length of the variable header plus payload.
    pub remaining_length: usize,
    /// Length of the fixed header itself (2 to 5 bytes).
    pub header_len: usize,
}

impl FixedHeader {
    /// Parse the fixed header at the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        let first = *buf.first().ok_or(Error::Truncated)?;
        let packet_type = PacketType::from_header(first)?;
        let flags = first & 0x0F;
        if let Some(expected) = packet_type.fixed_flags() {
            if flags != expected {
                return Err(Error::InvalidFlags);
            }
        }
        let (remaining_length, used) =
            decode_remaining_length(&buf[1..])?.ok_or(Error::Truncated)?;
        Ok(Self {
            packet_type,
            flags,
            remaining_length,
            header_len: 1 + used,
        })
    }

    /// Total length of the packet this header introduces.
    pub fn packet_len(&self) -> usize {
        self.header_len + self.remaining_length
    }
}

// Parse the fixed header, check the type and hand back a reader over the body.
fn open(buf: &[u8], expected: PacketType) -> Result<(FixedHeader, Reader<'_>), Error> {
    let header = FixedHeader::parse(buf)?;
    if header.packet_type != expected {
        return Err(Error::InvalidPacketType);
    }
    let body = buf
        .get(header.header_len..header.packet_len())
        .ok_or(Error::BufferOverflow)?;
    Ok((header, Reader::new(body)))
}

fn write_header(
    w: &mut Writer<'_>,
    packet_type: PacketType,
    flags: u8,
    remaining: usize,
) -> Result<(), Error> {
    w.put_u8(packet_type.header_byte(flags))?;
    w.put_remaining_length(remaining)
}

/// Last-will message carried in CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will<'a> {
    /// Topic the broker publishes the will on.
    pub topic: &'a str,
    /// Will payload.
    pub message: &'a [u8],
    /// QoS of the will publication.
    pub qos: QoS,
    /// Whether the will is retained.
    pub retain: bool,
}

/// Connection options packed into a CONNECT packet.
///
/// # Examples
///
/// ```rust
/// use tmlink::network::application::mqtt::Options;
///
/// let options = Options {
///     username: Some("product"),
///     password: Some(b"token"),
///     ..Options::new("device-01")
/// };
/// assert!(options.clean_session);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options<'a> {
    /// The client identifier.
    pub client_id: &'a str,
    /// Keep-alive interval in seconds. Zero disables keep-alive.
    pub keep_alive_seconds: u16,
    /// Discard broker-side session state on connect.
    pub clean_session: bool,
    /// Optional user name.
    pub username: Option<&'a str>,
    /// Optional password.
    pub password: Option<&'a [u8]>,
    /// Optional last-will message.
    pub will: Option<Will<'a>>,
}

impl<'a> Options<'a> {
    /// Clean-session options with a 60 second keep-alive and no credentials.
    pub fn new(client_id: &'a str) -> Self {
        Self {
            client_id,
            keep_alive_seconds: 60,
            clean_session: true,
            username: None,
            password: None,
            will: None,
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.clean_session {
            flags |= FLAG_CLEAN_SESSION;
        }
        if let Some(will) = &self.will {
            flags |= FLAG_WILL | ((will.qos as u8) << 3);
            if will.retain {
                flags |= FLAG_WILL_RETAIN;
            }
        }
        if self.username.is_some() {
            flags |= FLAG_USERNAME;
        }
        if self.password.is_some() {
            flags |= FLAG_PASSWORD;
        }
        flags
    }
}

/// Encode a CONNECT packet.
pub fn encode_connect(buf: &mut [u8], options: &Options<'_>) -> Result<usize, Error> {
    let mut remaining = 2 + PROTOCOL_NAME.len() + 1 + 1 + 2;
    remaining += 2 + options.client_id.len();
    if let Some(will) = &options.will {
        remaining += 2 + will.topic.len() + 2 + will.message.len();
    }
    if let Some(username) = options.username {
        remaining += 2 + username.len();
    }
    if let Some(password) = options.password {
        remaining += 2 + password.len();
    }

    let mut w = Writer::new(buf);
    write_header(&mut w, PacketType::Connect, 0, remaining)?;
    w.put_str(PROTOCOL_NAME)?;
    w.put_u8(PROTOCOL_LEVEL)?;
    w.put_u8(options.flags())?;
    w.put_u16(options.keep_alive_seconds)?;
    w.put_str(options.client_id)?;
    if let Some(will) = &options.will {
        w.put_str(will.topic)?;
        w.put_binary(will.message)?;
    }
    if let Some(username) = options.username {
        w.put_str(username)?;
    }
    if let Some(password) = options.password {
        w.put_binary(password)?;
    }
    Ok(w.finish())
}

/// Decode a CONNECT packet.
pub fn decode_connect(buf: &[u8]) -> Result<Options<'_>, Error> {
    let (_, mut r) = open(buf, PacketType::Connect)?;
    if r.get_str()? != PROTOCOL_NAME || r.get_u8()? != PROTOCOL_LEVEL {
        return Err(Error::InvalidProtocol);
    }
    let flags = r.get_u8()?;
    let keep_alive_seconds = r.get_u16()?;
    let client_id = r.get_str()?;
    let will = if flags & FLAG_WILL != 0 {
        Some(Will {
            topic: r.get_str()?,
            message: r.get_binary()?,
            qos: QoS::try_from((flags >> 3) & 0x03)?,
            retain: flags & FLAG_WILL_RETAIN != 0,
        })
    } else {
        None
    };
    let username = if flags & FLAG_USERNAME != 0 {
        Some(r.get_str()?)
    } else {
        None
    };
    let password = if flags & FLAG_PASSWORD != 0 {
        Some(r.get_binary()?)
    } else {
        None
    };
    Ok(Options {
        client_id,
        keep_alive_seconds,
        clean_session: flags & FLAG_CLEAN_SESSION != 0,
        username,
        password,
        will,
    })
}

/// Body of a CONNACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnAck {
    /// The broker resumed a stored session.
    pub session_present: bool,
    /// Zero on success, otherwise the refusal reason.
    pub return_code: u8,
}

/// Encode a CONNACK packet.
pub fn encode_connack(buf: &mut [u8], ack: &ConnAck) -> Result<usize, Error> {
    let mut w = Writer::new(buf);
    write_header(&mut w, PacketType::ConnAck, 0, 2)?;
    w.put_u8(u8::from(ack.session_present))?;
    w.put_u8(ack.return_code)?;
    Ok(w.finish())
}

/// Decode a CONNACK packet.
pub fn decode_connack(buf: &[u8]) -> Result<ConnAck, Error> {
    let (_, mut r) = open(buf, PacketType::ConnAck)?;
    let flags = r.get_u8()?;
    let return_code = r.get_u8()?;
    Ok(ConnAck {
        session_present: flags & 0x01 != 0,
        return_code,
    })
}

/// An application message as carried by PUBLISH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    /// Topic name.
    pub topic: &'a str,
    /// Payload bytes.
    pub payload: &'a [u8],
    /// Delivery QoS.
    pub qos: QoS,
    /// Retain flag.
    pub retain: bool,
    /// Duplicate delivery flag.
    pub dup: bool,
    /// Packet identifier, present exactly when `qos` is above zero.
    pub packet_id: Option<u16>,
}

/// Encode a PUBLISH packet.
pub fn encode_publish(buf: &mut [u8], message: &Message<'_>) -> Result<usize, Error> {
    let packet_id = match (message.qos, message.packet_id) {
        (QoS::AtMostOnce, _) => None,
        (_, Some(id)) if id != 0 => Some(id),
        _ => return Err(Error::InvalidPacketId),
    };

    let mut flags = (message.qos as u8) << 1;
    if message.dup {
        flags |= 0x08;
    }
    if message.retain {
        flags |= 0x01;
    }

    let remaining =
        2 + message.topic.len() + packet_id.map_or(0, |_| 2) + message.payload.len();

    let mut w = Writer::new(buf);
    write_header(&mut w, PacketType::Publish, flags, remaining)?;
    w.put_str(message.topic)?;
    if let Some(id) = packet_id {
        w.put_u16(id)?;
    }
    w.put_slice(message.payload)?;
    Ok(w.finish())
}

/// Decode a PUBLISH packet.
pub fn decode_publish(buf: &[u8]) -> Result<Message<'_>, Error> {
    let (header, mut r) = open(buf, PacketType::Publish)?;
    let qos = QoS::try_from((header.flags >> 1) & 0x03)?;
    let topic = r.get_str()?;
    let packet_id = match qos {
        QoS::AtMostOnce => None,
        _ => match r.get_u16()? {
            0 => return Err(Error::InvalidPacketId),
            id => Some(id),
        },
    };
    Ok(Message {
        topic,
        payload: r.rest(),
        qos,
        retain: header.flags & 0x01 != 0,
        dup: header.flags & 0x08 != 0,
        packet_id,
    })
}

/// A two byte acknowledgment: PUBACK, PUBREC, PUBREL, PUBCOMP or UNSUBACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ack {
    /// Which acknowledgment this is.
    pub packet_type: PacketType,
    /// The acknowledged packet identifier.
    pub packet_id: u16,
}

fn is_ack(packet_type: PacketType) -> bool {
    matches!(
        packet_type,
        PacketType::PubAck
            | PacketType::PubRec
            | PacketType::PubRel
            | PacketType::PubComp
            | PacketType::UnsubAck
    )
}

/// Encode an acknowledgment packet. PUBREL gets its mandatory `0x2` flags.
pub fn encode_ack(
    buf: &mut [u8],
    packet_type: PacketType,
    packet_id: u16,
) -> Result<usize, Error> {
    if !is_ack(packet_type) {
        return Err(Error::InvalidPacketType);
    }
    let flags = packet_type.fixed_flags().unwrap_or(0);
    let mut w = Writer::new(buf);
    write_header(&mut w, packet_type, flags, 2)?;
    w.put_u16(packet_id)?;
    Ok(w.finish())
}

/// Decode any acknowledgment packet.
pub fn decode_ack(buf: &[u8]) -> Result<Ack, Error> {
    let header = FixedHeader::parse(buf)?;
    if !is_ack(header.packet_type) {
        return Err(Error::InvalidPacketType);
    }
    let (_, mut r) = open(buf, header.packet_type)?;
    Ok(Ack {
        packet_type: header.packet_type,
        packet_id: r.get_u16()?,
    })
}

/// Encode a SUBSCRIBE packet for one or more `(filter, qos)` pairs.
pub fn encode_subscribe(
    buf: &mut [u8],
    packet_id: u16,
    filters: &[(&str, QoS)],
) -> Result<usize, Error> {
    if packet_id == 0 {
        return Err(Error::InvalidPacketId);
    }
    let remaining = 2 + filters.iter().map(|(f, _)| 2 + f.len() + 1).sum::<usize>();
    let mut w = Writer::new(buf);
    write_header(&mut w, PacketType::Subscribe, 0x02, remaining)?;
    w.put_u16(packet_id)?;
    for (filter, qos) in filters {
        w.put_str(filter)?;
        w.put_u8(*qos as u8)?;
    }
    Ok(w.finish())
}

/// A decoded SUBSCRIBE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe<'a> {
    /// Packet identifier.
    pub packet_id: u16,
    /// Requested filters with their maximum QoS.
    pub filters: Vec<(&'a str, QoS), MAX_FILTERS>,
}

/// Decode a SUBSCRIBE packet.
pub fn decode_subscribe(buf: &[u8]) -> Result<Subscribe<'_>, Error> {
    let (_, mut r) = open(buf, PacketType::Subscribe)?;
    let packet_id = r.get_u16()?;
    let mut filters = Vec::new();
    while r.remaining() > 0 {
        let filter = r.get_str()?;
        let qos = QoS::try_from(r.get_u8()?)?;
        filters.push((filter, qos)).map_err(|_| Error::BufferOverflow)?;
    }
    Ok(Subscribe { packet_id, filters })
}

/// Body of a SUBACK packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    /// Packet identifier of the SUBSCRIBE being answered.
    pub packet_id: u16,
    /// Granted QoS per filter, or [`SUBACK_FAILURE`].
    pub return_codes: Vec<u8, MAX_FILTERS>,
}

/// Encode a SUBACK packet.
pub fn encode_suback(buf: &mut [u8], ack: &SubAck) -> Result<usize, Error> {
    let mut w = Writer::new(buf);
    write_header(&mut w, PacketType::SubAck, 0, 2 + ack.return_codes.len())?;
    w.put_u16(ack.packet_id)?;
    w.put_slice(&ack.return_codes)?;
    Ok(w.finish())
}

/// Decode a SUBACK packet.
pub fn decode_suback(buf: &[u8]) -> Result<SubAck, Error> {
    let (_, mut r) = open(buf, PacketType::SubAck)?;
    let packet_id = r.get_u16()?;
    let return_codes = Vec::from_slice(r.rest()).map_err(|_| Error::BufferOverflow)?;
    Ok(SubAck {
        packet_id,
        return_codes,
    })
}

/// Encode an UNSUBSCRIBE packet.
pub fn encode_unsubscribe(
    buf: &mut [u8],
    packet_id: u16,
    filters: &[&str],
) -> Result<usize, Error> {
    if packet_id == 0 {
        return Err(Error::InvalidPacketId);
    }
    let remaining = 2 + filters.iter().map(|f| 2 + f.len()).sum::<usize>();
    let mut w = Writer::new(buf);
    write_header(&mut w, PacketType::Unsubscribe, 0x02, remaining)?;
    w.put_u16(packet_id)?;
    for filter in filters {
        w.put_str(filter)?;
    }
    Ok(w.finish())
}

/// A decoded UNSUBSCRIBE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe<'a> {
    /// Packet identifier.
    pub packet_id: u16,
    /// Filters to remove.
    pub filters: Vec<&'a str, MAX_FILTERS>,
}

/// Decode an UNSUBSCRIBE packet.
pub fn decode_unsubscribe(buf: &[u8]) -> Result<Unsubscribe<'_>, Error> {
    let (_, mut r) = open(buf, PacketType::Unsubscribe)?;
    let packet_id = r.get_u16()?;
    let mut filters = Vec::new();
    while r.remaining() > 0 {
        filters.push(r.get_str()?).map_err(|_| Error::BufferOverflow)?;
    }
    Ok(Unsubscribe { packet_id, filters })
}

/// Encode PINGREQ, PINGRESP or DISCONNECT.
pub fn encode_header_only(buf: &mut [u8], packet_type: PacketType) -> Result<usize, Error> {
    if !matches!(
        packet_type,
        PacketType::PingReq | PacketType::PingResp | PacketType::Disconnect
    ) {
        return Err(Error::InvalidPacketType);
    }
    let mut w = Writer::new(buf);
    write_header(&mut w, packet_type, 0, 0)?;
    Ok(w.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_length_boundaries() {
        let cases: [(usize, &[u8]); 6] = [
            (0, &[0x00]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (16_383, &[0xFF, 0x7F]),
            (16_384, &[0x80, 0x80, 0x01]),
            (MAX_REMAINING_LENGTH, &[0xFF, 0xFF, 0xFF, 0x7F]),
        ];
        for (len, bytes) in cases {
            let mut buf = [0u8; 4];
            let n = encode_remaining_length(&mut buf, len).unwrap();
            assert_eq!(&buf[..n], bytes, "encoding {len}");
            assert_eq!(remaining_length_len(len), n);
            assert_eq!(decode_remaining_length(bytes).unwrap(), Some((len, n)));
        }
    }

    #[test]
    fn five_byte_remaining_length_is_rejected() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert_eq!(decode_remaining_length(&bytes), Err(Error::MalformedLength));
        assert_eq!(
            encode_remaining_length(&mut [0u8; 8], MAX_REMAINING_LENGTH + 1),
            Err(Error::MalformedLength)
        );
    }

    #[test]
    fn incomplete_remaining_length_asks_for_more() {
        assert_eq!(decode_remaining_length(&[0x80, 0x80]), Ok(None));
        assert_eq!(decode_remaining_length(&[]), Ok(None));
    }

    #[test]
    fn connect_sets_credential_and_session_flags() {
        let options = Options {
            username: Some("dev"),
            password: Some(b"tok123"),
            keep_alive_seconds: 120,
            ..Options::new("client")
        };
        let mut buf = [0u8; 64];
        let len = encode_connect(&mut buf, &options).unwrap();

        assert_eq!(buf[0], 0x10);
        // protocol name (6) + level (1) puts the flags at body offset 7
        assert_eq!(buf[2 + 7], 0x02 | 0x40 | 0x80);
        assert_eq!(decode_connect(&buf[..len]).unwrap(), options);
    }

    #[test]
    fn connect_with_will_round_trips() {
        let options = Options {
            will: Some(Will {
                topic: "dev/status",
                message: b"offline",
                qos: QoS::AtLeastOnce,
                retain: true,
            }),
            clean_session: false,
            ..Options::new("c")
        };
        let mut buf = [0u8; 64];
        let len = encode_connect(&mut buf, &options).unwrap();
        assert_eq!(buf[9], FLAG_WILL | FLAG_WILL_RETAIN | (1 << 3));
        assert_eq!(decode_connect(&buf[..len]).unwrap(), options);
    }

    #[test]
    fn encoder_refuses_to_overrun_the_buffer() {
        let mut buf = [0u8; 12];
        assert_eq!(
            encode_connect(&mut buf, &Options::new("much-too-long-client")),
            Err(Error::BufferTooSmall)
        );
    }

    #[test]
    fn connack_decodes_session_present_and_code() {
        let ack = decode_connack(&[0x20, 0x02, 0x01, 0x05]).unwrap();
        assert!(ack.session_present);
        assert_eq!(ack.return_code, 5);
    }

    #[test]
    fn publish_declaring_more_than_the_buffer_overflows() {
        // Claims 10 bytes of body but only 5 follow.
        let buf = [0x30, 0x0A, 0x00, 0x01, b'a', b'x', b'y'];
        assert_eq!(decode_publish(&buf), Err(Error::BufferOverflow));
    }

    #[test]
    fn publish_with_qos_needs_a_packet_id() {
        let message = Message {
            topic: "t",
            payload: b"",
            qos: QoS::ExactlyOnce,
            retain: false,
            dup: false,
            packet_id: None,
        };
        assert_eq!(
            encode_publish(&mut [0u8; 16], &message),
            Err(Error::InvalidPacketId)
        );
    }

    #[test]
    fn publish_flags_survive_decoding() {
        let message = Message {
            topic: "a/b",
            payload: b"hi",
            qos: QoS::ExactlyOnce,
            retain: true,
            dup: true,
            packet_id: Some(0xBEEF),
        };
        let mut buf = [0u8; 32];
        let len = encode_publish(&mut buf, &message).unwrap();
        assert_eq!(buf[0], 0x3D);
        assert_eq!(decode_publish(&buf[..len]).unwrap(), message);
    }

    #[test]
    fn pubrel_carries_reserved_flags() {
        let mut buf = [0u8; 4];
        let len = encode_ack(&mut buf, PacketType::PubRel, 9).unwrap();
        assert_eq!(&buf[..len], &[0x62, 0x02, 0x00, 0x09]);
        assert_eq!(
            decode_ack(&buf[..len]).unwrap(),
            Ack {
                packet_type: PacketType::PubRel,
                packet_id: 9
            }
        );
        assert_eq!(decode_ack(&[0x60, 0x02, 0x00, 0x09]), Err(Error::InvalidFlags));
    }

    #[test]
    fn subscribe_and_suback() {
        let mut buf = [0u8; 32];
        let len = encode_subscribe(&mut buf, 3, &[("a/+", QoS::AtLeastOnce)]).unwrap();
        assert_eq!(buf[0], 0x82);
        let sub = decode_subscribe(&buf[..len]).unwrap();
        assert_eq!(sub.packet_id, 3);
        assert_eq!(&sub.filters[..], &[("a/+", QoS::AtLeastOnce)]);

        let ack = decode_suback(&[0x90, 0x03, 0x00, 0x03, SUBACK_FAILURE]).unwrap();
        assert_eq!(ack.packet_id, 3);
        assert_eq!(&ack.return_codes[..], &[SUBACK_FAILURE]);
    }

    #[test]
    fn unsubscribe_layout() {
        let mut buf = [0u8; 16];
        let len = encode_unsubscribe(&mut buf, 4, &["x/#"]).unwrap();
        assert_eq!(&buf[..len], &[0xA2, 0x07, 0x00, 0x04, 0x00, 0x03, b'x', b'/', b'#']);
        let unsub = decode_unsubscribe(&buf[..len]).unwrap();
        assert_eq!(&unsub.filters[..], &["x/#"]);
    }

    #[test]
    fn header_only_packets() {
        let mut buf = [0u8; 2];
        assert_eq!(encode_header_only(&mut buf, PacketType::PingReq), Ok(2));
        assert_eq!(buf, [0xC0, 0x00]);
        assert_eq!(encode_header_only(&mut buf, PacketType::Disconnect), Ok(2));
        assert_eq!(buf, [0xE0, 0x00]);
        assert_eq!(
            encode_header_only(&mut buf, PacketType::PubAck),
            Err(Error::InvalidPacketType)
        );
    }

    #[test]
    fn unknown_packet_type_is_rejected() {
        assert_eq!(FixedHeader::parse(&[0xF0, 0x00]), Err(Error::InvalidPacketType));
        assert_eq!(FixedHeader::parse(&[0x00, 0x00]), Err(Error::InvalidPacketType));
    }
}
