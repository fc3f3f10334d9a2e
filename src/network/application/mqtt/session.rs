//! The MQTT connection state machine.

use super::codec::{
    self, ConnAck, FixedHeader, Message, Options, PacketType, SUBACK_FAILURE,
};
use super::packet_id::PacketIdGenerator;
use super::{Error, MAX_MESSAGE_HANDLERS, MAX_TOPIC_LEN, QoS, topic};
use crate::network::{Connection, Read, Write};
use crate::time::{Clock, Countdown};
use core::fmt;
use heapless::{String, Vec};

/// Budget for a PINGREQ write.
const PING_TIMEOUT_MS: u32 = 2_000;
/// Budget for a publication issued from inside a message handler.
const HANDLER_PUBLISH_TIMEOUT_MS: u32 = 2_000;

/// Connection state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// No broker connection.
    Disconnected,
    /// CONNECT sent, waiting for CONNACK.
    Connecting,
    /// CONNACK accepted.
    Connected,
}

/// Outbound QoS 0 publishing available to message handlers.
///
/// A handler runs while the incoming message still borrows the receive
/// buffer, so replies go through this instead of the session itself.
pub trait Publish {
    /// Publish `payload` on `topic` at QoS 0.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Error>;
}

/// Callback invoked for an incoming publication.
///
/// `X` is the context the caller lends to every session call that may
/// dispatch (`connect`, `yield_now`, `publish`, ...).
pub type MessageHandler<X> = fn(&mut X, &Message<'_>, &mut dyn Publish);

/// One packet consumed by a session cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// CONNACK.
    ConnAck(ConnAck),
    /// An incoming publication, already dispatched and acknowledged.
    Publish,
    /// PUBACK for the given packet id.
    PubAck(u16),
    /// PUBREC for the given packet id, answered with PUBREL.
    PubRec(u16),
    /// PUBREL for the given packet id, answered with PUBCOMP.
    PubRel(u16),
    /// PUBCOMP for the given packet id.
    PubComp(u16),
    /// SUBACK with the first granted QoS (or `0x80`).
    SubAck {
        /// Acknowledged packet id.
        packet_id: u16,
        /// First return code.
        granted: u8,
    },
    /// UNSUBACK for the given packet id.
    UnsubAck(u16),
    /// PINGRESP.
    PingResp,
}

struct Slot<X> {
    filter: String<MAX_TOPIC_LEN>,
    handler: MessageHandler<X>,
}

/// A single MQTT connection over a caller supplied transport.
///
/// The session owns its transport, if one is attached, and borrows its send
/// and receive buffers from the caller. Handlers registered for topic filters are plain function
/// pointers that receive a `&mut X` lent by the caller on each blocking call.
/// The session is single threaded; callers sharing it must serialize access.
pub struct Session<'b, C, K, X> {
    transport: Option<C>,
    clock: K,
    send_buf: &'b mut [u8],
    recv_buf: &'b mut [u8],
    packet_ids: PacketIdGenerator,
    state: State,
    clean_session: bool,
    keep_alive_seconds: u16,
    ping_outstanding: bool,
    keepalive: Countdown<K>,
    handlers: Vec<Slot<X>, MAX_MESSAGE_HANDLERS>,
    default_handler: Option<MessageHandler<X>>,
}

impl<C, K, X> fmt::Debug for Session<'_, C, K, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("attached", &self.transport.is_some())
            .field("clean_session", &self.clean_session)
            .field("keep_alive_seconds", &self.keep_alive_seconds)
            .field("ping_outstanding", &self.ping_outstanding)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl<'b, C, K, X> Session<'b, C, K, X>
where
    C: Connection,
    K: Clock + Clone,
{
    /// Create a disconnected session over `transport`.
    pub fn new(
        transport: C,
        clock: K,
        send_buf: &'b mut [u8],
        recv_buf: &'b mut [u8],
    ) -> Self {
        let mut session = Self::detached(clock, send_buf, recv_buf);
        session.transport = Some(transport);
        session
    }

    /// Create a disconnected session with no transport yet; see
    /// [`attach`](Self::attach).
    pub fn detached(clock: K, send_buf: &'b mut [u8], recv_buf: &'b mut [u8]) -> Self {
        let keepalive = Countdown::start(clock.clone(), 0);
        Self {
            transport: None,
            clock,
            send_buf,
            recv_buf,
            packet_ids: PacketIdGenerator::new(),
            state: State::Disconnected,
            clean_session: true,
            keep_alive_seconds: 0,
            ping_outstanding: false,
            keepalive,
            handlers: Vec::new(),
            default_handler: None,
        }
    }

    /// Tear the session down and hand the transport back.
    pub fn into_transport(self) -> Option<C> {
        self.transport
    }

    /// Attach a freshly opened transport, handing back the one it replaces.
    ///
    /// Only a disconnected session takes a new transport; a connected one
    /// returns `transport` untouched as the error.
    pub fn attach(&mut self, transport: C) -> Result<Option<C>, C> {
        if self.state != State::Disconnected {
            return Err(transport);
        }
        Ok(self.transport.replace(transport))
    }

    /// Close the session without a DISCONNECT and take the transport out.
    pub fn detach(&mut self) -> Option<C> {
        self.close_session();
        self.transport.take()
    }

    /// `true` while a transport is attached.
    pub fn is_attached(&self) -> bool {
        self.transport.is_some()
    }

    /// Current connection state.
    pub fn state(&self) -> State {
        self.state
    }

    /// `true` while the broker connection is established.
    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    /// Keep-alive interval negotiated by the last `connect`.
    pub fn keep_alive(&self) -> u16 {
        self.keep_alive_seconds
    }

    /// `true` while a PINGREQ is waiting for its PINGRESP.
    pub fn ping_outstanding(&self) -> bool {
        self.ping_outstanding
    }

    /// Open the MQTT session.
    ///
    /// Sends CONNECT and pumps the session until CONNACK arrives or
    /// `timeout_ms` elapses. A non-zero CONNACK return code is reported as
    /// [`Error::ConnectionRefused`].
    pub fn connect(
        &mut self,
        ctx: &mut X,
        options: &Options<'_>,
        timeout_ms: u32,
    ) -> Result<ConnAck, Error> {
        if self.state == State::Connected {
            return Err(Error::AlreadyConnected);
        }
        if self.transport.is_none() {
            return Err(Error::NotConnected);
        }

        info!("mqtt connecting as {}", options.client_id);
        let timer = Countdown::start(self.clock.clone(), timeout_ms);
        self.keep_alive_seconds = options.keep_alive_seconds;
        self.clean_session = options.clean_session;
        self.state = State::Connecting;

        let ack = match self.send_connect(ctx, options, &timer) {
            Ok(ack) => ack,
            Err(e) => {
                error!("mqtt connect failed: {:?}", e);
                self.state = State::Disconnected;
                return Err(e);
            }
        };

        if ack.return_code != 0 {
            warn!("mqtt connection refused, code {}", ack.return_code);
            self.state = State::Disconnected;
            return Err(Error::ConnectionRefused(ack.return_code));
        }

        self.state = State::Connected;
        self.ping_outstanding = false;
        self.keepalive.reset(self.keep_alive_ms());
        info!("mqtt connected");
        Ok(ack)
    }

    fn send_connect(
        &mut self,
        ctx: &mut X,
        options: &Options<'_>,
        timer: &Countdown<K>,
    ) -> Result<ConnAck, Error> {
        let len = codec::encode_connect(self.send_buf, options)?;
        self.send(len, timer)?;
        match self.wait_for(ctx, timer, |event| matches!(event, Event::ConnAck(_)))? {
            Event::ConnAck(ack) => Ok(ack),
            _ => Err(Error::Codec(codec::Error::InvalidPacketType)),
        }
    }

    /// Run one session cycle.
    ///
    /// Reads at most one packet within `timeout_ms`, performs the protocol
    /// reaction it requires and then services the keep-alive. `Ok(None)` means
    /// nothing arrived in time, which is not an error.
    #[doc(alias = "step")]
    pub fn yield_now(&mut self, ctx: &mut X, timeout_ms: u32) -> Result<Option<Event>, Error> {
        self.ensure_connected()?;
        let timer = Countdown::start(self.clock.clone(), timeout_ms);
        self.cycle(ctx, &timer)
    }

    /// Publish `payload` on `topic`.
    ///
    /// QoS 0 returns once the packet is written. QoS 1 waits for the PUBACK
    /// carrying the same packet id, QoS 2 for the matching PUBCOMP.
    pub fn publish(
        &mut self,
        ctx: &mut X,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        self.ensure_connected()?;
        let timer = Countdown::start(self.clock.clone(), timeout_ms);

        let packet_id = match qos {
            QoS::AtMostOnce => None,
            _ => Some(self.packet_ids.next_id()),
        };
        let message = Message {
            topic,
            payload,
            qos,
            retain,
            dup: false,
            packet_id,
        };
        let len = codec::encode_publish(self.send_buf, &message)?;
        self.send(len, &timer)?;

        let expected = match (qos, packet_id) {
            (QoS::AtLeastOnce, Some(id)) => Event::PubAck(id),
            (QoS::ExactlyOnce, Some(id)) => Event::PubComp(id),
            _ => return Ok(()),
        };
        self.wait_for(ctx, &timer, |event| *event == expected)?;
        Ok(())
    }

    /// Subscribe to `filter` and route matching publications to `handler`.
    ///
    /// A free handler slot (or an existing slot for the same filter) is
    /// required before anything is sent. Returns the QoS granted by the broker.
    pub fn subscribe(
        &mut self,
        ctx: &mut X,
        filter: &str,
        qos: QoS,
        handler: MessageHandler<X>,
        timeout_ms: u32,
    ) -> Result<QoS, Error> {
        self.ensure_connected()?;
        let key: String<MAX_TOPIC_LEN> =
            String::try_from(filter).map_err(|_| Error::TopicTooLong)?;
        if !self.has_slot_for(filter) {
            return Err(Error::NoHandlerSlot);
        }

        let timer = Countdown::start(self.clock.clone(), timeout_ms);
        let id = self.packet_ids.next_id();
        let len = codec::encode_subscribe(self.send_buf, id, &[(filter, qos)])?;
        self.send(len, &timer)?;

        let event = self.wait_for(ctx, &timer, |event| {
            matches!(event, Event::SubAck { packet_id, .. } if *packet_id == id)
        })?;
        let granted = match event {
            Event::SubAck { granted, .. } => granted,
            _ => SUBACK_FAILURE,
        };
        if granted == SUBACK_FAILURE {
            warn!("subscription to {} rejected", filter);
            return Err(Error::SubscribeRejected);
        }
        let granted = QoS::try_from(granted)?;

        self.register(key, handler)?;
        debug!("subscribed to {}", filter);
        Ok(granted)
    }

    /// Unsubscribe from `filter` and drop its handler slot.
    pub fn unsubscribe(
        &mut self,
        ctx: &mut X,
        filter: &str,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        self.ensure_connected()?;
        let timer = Countdown::start(self.clock.clone(), timeout_ms);
        let id = self.packet_ids.next_id();
        let len = codec::encode_unsubscribe(self.send_buf, id, &[filter])?;
        self.send(len, &timer)?;

        self.wait_for(ctx, &timer, |event| *event == Event::UnsubAck(id))?;
        self.remove_handler(filter);
        Ok(())
    }

    /// Send DISCONNECT and close the session.
    ///
    /// The session ends up disconnected even when the write fails; the write
    /// error is still reported.
    pub fn disconnect(&mut self, timeout_ms: u32) -> Result<(), Error> {
        if self.state == State::Disconnected {
            return Ok(());
        }
        let timer = Countdown::start(self.clock.clone(), timeout_ms);
        let result = codec::encode_header_only(self.send_buf, PacketType::Disconnect)
            .map_err(Error::from)
            .and_then(|len| match self.transport.as_mut() {
                Some(transport) => send_packet(transport, &self.send_buf[..len], &timer),
                None => Err(Error::NotConnected),
            });
        self.close_session();
        info!("mqtt disconnected");
        result
    }

    /// Register, replace or (with `None`) remove the handler for `filter`
    /// without talking to the broker.
    pub fn set_message_handler(
        &mut self,
        filter: &str,
        handler: Option<MessageHandler<X>>,
    ) -> Result<(), Error> {
        match handler {
            Some(handler) => {
                let key = String::try_from(filter).map_err(|_| Error::TopicTooLong)?;
                self.register(key, handler)
            }
            None => {
                self.remove_handler(filter);
                Ok(())
            }
        }
    }

    /// Set the handler for publications no filter matches.
    pub fn set_default_handler(&mut self, handler: Option<MessageHandler<X>>) {
        self.default_handler = handler;
    }

    fn keep_alive_ms(&self) -> u32 {
        u32::from(self.keep_alive_seconds) * 1_000
    }

    fn ensure_connected(&self) -> Result<(), Error> {
        if self.state == State::Connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn has_slot_for(&self, filter: &str) -> bool {
        !self.handlers.is_full() || self.handlers.iter().any(|slot| slot.filter == filter)
    }

    fn register(
        &mut self,
        filter: String<MAX_TOPIC_LEN>,
        handler: MessageHandler<X>,
    ) -> Result<(), Error> {
        if let Some(slot) = self.handlers.iter_mut().find(|slot| slot.filter == filter) {
            slot.handler = handler;
            return Ok(());
        }
        self.handlers
            .push(Slot { filter, handler })
            .map_err(|_| Error::NoHandlerSlot)
    }

    fn remove_handler(&mut self, filter: &str) {
        if let Some(index) = self.handlers.iter().position(|slot| slot.filter == filter) {
            self.handlers.remove(index);
        }
    }

    fn close_session(&mut self) {
        self.ping_outstanding = false;
        self.state = State::Disconnected;
        if self.clean_session {
            self.handlers.clear();
        }
    }

    // Write the first `len` bytes of the send buffer. A failed or partial
    // write leaves the stream unusable, so the session is closed.
    fn send(&mut self, len: usize, timer: &Countdown<K>) -> Result<(), Error> {
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        let result = send_packet(transport, &self.send_buf[..len], timer);
        if let Err(Error::Write) = result {
            self.close_session();
        }
        result
    }

    fn wait_for(
        &mut self,
        ctx: &mut X,
        timer: &Countdown<K>,
        done: impl Fn(&Event) -> bool,
    ) -> Result<Event, Error> {
        loop {
            if timer.is_expired() {
                return Err(Error::Timeout);
            }
            if let Some(event) = self.cycle(ctx, timer)? {
                if done(&event) {
                    return Ok(event);
                }
            }
        }
    }

    fn cycle(&mut self, ctx: &mut X, timer: &Countdown<K>) -> Result<Option<Event>, Error> {
        let result = self.cycle_inner(ctx, timer);
        if let Err(e) = result {
            if self.state != State::Disconnected {
                warn!("closing mqtt session: {:?}", e);
                self.close_session();
            }
        }
        result
    }

    fn cycle_inner(
        &mut self,
        ctx: &mut X,
        timer: &Countdown<K>,
    ) -> Result<Option<Event>, Error> {
        let event = match self.read_packet(timer)? {
            Some(len) => {
                if self.keep_alive_seconds > 0 {
                    self.keepalive.reset(self.keep_alive_ms());
                }
                Some(self.handle_packet(ctx, len, timer)?)
            }
            None => None,
        };
        if self.state == State::Connected {
            self.service_keep_alive()?;
        }
        Ok(event)
    }

    // Read one whole packet into the receive buffer. `Ok(None)` when not even
    // the first byte arrived before the deadline.
    fn read_packet(&mut self, timer: &Countdown<K>) -> Result<Option<usize>, Error> {
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        let buf = &mut *self.recv_buf;
        if buf.len() < 2 {
            return Err(Error::Codec(codec::Error::BufferTooSmall));
        }

        if transport.read(&mut buf[..1], timer.left()).map_err(|_| Error::Read)? == 0 {
            return Ok(None);
        }

        let mut header_len = 1;
        let remaining = loop {
            let slot = buf
                .get_mut(header_len..header_len + 1)
                .ok_or(Error::Codec(codec::Error::BufferTooSmall))?;
            if read_fill(transport, slot, timer)? == 0 {
                return Err(Error::Truncated);
            }
            header_len += 1;
            if let Some((remaining, _)) = codec::decode_remaining_length(&buf[1..header_len])? {
                break remaining;
            }
        };

        let total = header_len + remaining;
        let body = buf
            .get_mut(header_len..total)
            .ok_or(Error::Codec(codec::Error::BufferOverflow))?;
        if read_fill(transport, body, timer)? < remaining {
            return Err(Error::Truncated);
        }
        Ok(Some(total))
    }

    fn handle_packet(
        &mut self,
        ctx: &mut X,
        len: usize,
        timer: &Countdown<K>,
    ) -> Result<Event, Error> {
        let packet = &self.recv_buf[..len];
        let header = FixedHeader::parse(packet)?;
        trace!("received {:?}", header.packet_type);

        let event = match header.packet_type {
            PacketType::ConnAck => Event::ConnAck(codec::decode_connack(packet)?),
            PacketType::PubAck => Event::PubAck(codec::decode_ack(packet)?.packet_id),
            PacketType::PubComp => Event::PubComp(codec::decode_ack(packet)?.packet_id),
            PacketType::UnsubAck => Event::UnsubAck(codec::decode_ack(packet)?.packet_id),
            PacketType::SubAck => {
                let ack = codec::decode_suback(packet)?;
                Event::SubAck {
                    packet_id: ack.packet_id,
                    granted: ack.return_codes.first().copied().unwrap_or(SUBACK_FAILURE),
                }
            }
            PacketType::PubRec => {
                let id = codec::decode_ack(packet)?.packet_id;
                self.acknowledge(PacketType::PubRel, id, timer)?;
                Event::PubRec(id)
            }
            PacketType::PubRel => {
                let id = codec::decode_ack(packet)?.packet_id;
                self.acknowledge(PacketType::PubComp, id, timer)?;
                Event::PubRel(id)
            }
            PacketType::PingResp => {
                debug!("keep alive ok");
                self.ping_outstanding = false;
                Event::PingResp
            }
            PacketType::Publish => {
                let ack = self.deliver(ctx, len)?;
                if let Some((kind, id)) = ack {
                    self.acknowledge(kind, id, timer)?;
                }
                Event::Publish
            }
            _ => return Err(Error::Codec(codec::Error::InvalidPacketType)),
        };
        Ok(event)
    }

    // Dispatch the publication in the receive buffer and return the
    // acknowledgment it calls for.
    fn deliver(&mut self, ctx: &mut X, len: usize) -> Result<Option<(PacketType, u16)>, Error> {
        let Self {
            transport,
            clock,
            send_buf,
            recv_buf,
            handlers,
            default_handler,
            ..
        } = self;

        let message = codec::decode_publish(&recv_buf[..len])?;
        let handler = handlers
            .iter()
            .find(|slot| topic::matches(&slot.filter, message.topic))
            .map(|slot| slot.handler)
            .or(*default_handler);

        match (handler, transport.as_mut()) {
            (Some(handler), Some(transport)) => {
                let mut out = Responder {
                    transport,
                    clock: &*clock,
                    buf: &mut **send_buf,
                    failed: false,
                };
                handler(ctx, &message, &mut out);
                if out.failed {
                    return Err(Error::Write);
                }
            }
            (Some(_), None) => return Err(Error::NotConnected),
            (None, _) => trace!("no handler for {}", message.topic),
        }

        Ok(match (message.qos, message.packet_id) {
            (QoS::AtLeastOnce, Some(id)) => Some((PacketType::PubAck, id)),
            (QoS::ExactlyOnce, Some(id)) => Some((PacketType::PubRec, id)),
            _ => None,
        })
    }

    fn acknowledge(
        &mut self,
        kind: PacketType,
        id: u16,
        timer: &Countdown<K>,
    ) -> Result<(), Error> {
        let len = codec::encode_ack(self.send_buf, kind, id)?;
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        send_packet(transport, &self.send_buf[..len], timer)
    }

    fn service_keep_alive(&mut self) -> Result<(), Error> {
        if self.keep_alive_seconds == 0 || !self.keepalive.is_expired() {
            return Ok(());
        }
        if self.ping_outstanding {
            error!("mqtt keep alive timed out");
            return Err(Error::KeepAliveTimeout);
        }

        let len = codec::encode_header_only(self.send_buf, PacketType::PingReq)?;
        let timer = Countdown::start(self.clock.clone(), PING_TIMEOUT_MS);
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        send_packet(transport, &self.send_buf[..len], &timer)?;
        self.ping_outstanding = true;
        self.keepalive.reset(self.keep_alive_ms());
        trace!("ping sent");
        Ok(())
    }
}

struct Responder<'a, C, K> {
    transport: &'a mut C,
    clock: &'a K,
    buf: &'a mut [u8],
    failed: bool,
}

impl<C: Write, K: Clock + Clone> Publish for Responder<'_, C, K> {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Error> {
        let message = Message {
            topic,
            payload,
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            packet_id: None,
        };
        let len = codec::encode_publish(self.buf, &message)?;
        let timer = Countdown::start(self.clock.clone(), HANDLER_PUBLISH_TIMEOUT_MS);
        let result = send_packet(self.transport, &self.buf[..len], &timer);
        if result == Err(Error::Write) {
            self.failed = true;
        }
        result
    }
}

// Write all of `bytes`, retrying partial writes until the deadline. At least
// one attempt is made even when the deadline has already passed.
fn send_packet<C: Write, K: Clock>(
    transport: &mut C,
    bytes: &[u8],
    timer: &Countdown<K>,
) -> Result<(), Error> {
    let mut sent = 0;
    loop {
        sent += transport
            .write(&bytes[sent..], timer.left())
            .map_err(|_| Error::Write)?;
        if sent >= bytes.len() {
            break;
        }
        if timer.is_expired() {
            // Nothing on the wire yet means the stream is still intact.
            return Err(if sent == 0 { Error::Timeout } else { Error::Write });
        }
    }
    transport.flush().map_err(|_| Error::Write)
}

// Read until `buf` is full or the deadline passes; returns the bytes read.
fn read_fill<C: Read, K: Clock>(
    transport: &mut C,
    buf: &mut [u8],
    timer: &Countdown<K>,
) -> Result<usize, Error> {
    let mut got = 0;
    while got < buf.len() {
        got += transport
            .read(&mut buf[got..], timer.left())
            .map_err(|_| Error::Read)?;
        if got < buf.len() && timer.is_expired() {
            break;
        }
    }
    Ok(got)
}
