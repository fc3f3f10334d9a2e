//! Scripted transport and clock shared by the integration tests.
//!
//! `MockClock` is a handle onto one shared millisecond counter. `MockConnection`
//! delivers scripted inbound chunks at given instants: a read waits (advances
//! the clock) until the next chunk is due, or for the whole timeout when
//! nothing is due in time, and then reports a timeout. `MockConnector` hands
//! out connections onto the same wire and records where it was asked to go.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tmlink::network::application::mqtt::codec::{self, ConnAck, FixedHeader, Message, PacketType, SubAck};
use tmlink::network::application::mqtt::QoS;
use tmlink::network::error::Error;
use tmlink::network::{Close, Connect, Connection, Read, Write};
use tmlink::time::Clock;

#[derive(Debug, Clone, Default)]
pub struct MockClock(Rc<Cell<u64>>);

impl MockClock {
    pub fn set(&self, ms: u64) {
        self.0.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

#[derive(Debug, Default)]
pub struct Wire {
    inbound: VecDeque<(u64, Vec<u8>)>,
    pub sent: Vec<u8>,
    pub fail_writes: bool,
    pub fail_reads: bool,
    pub closed: bool,
    pub closes: usize,
    pub dials: Vec<(String, u16)>,
    pub refuse_connects: bool,
}

/// Test side of the connection.
#[derive(Debug, Clone)]
pub struct Peer {
    wire: Rc<RefCell<Wire>>,
    pub clock: MockClock,
}

impl Peer {
    /// Queue `bytes` for delivery at `at` milliseconds.
    pub fn deliver_at(&self, at: u64, bytes: &[u8]) {
        self.wire.borrow_mut().inbound.push_back((at, bytes.to_vec()));
    }

    /// Queue `bytes` for delivery as soon as they are read.
    pub fn deliver(&self, bytes: &[u8]) {
        self.deliver_at(0, bytes);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.wire.borrow_mut().fail_writes = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.wire.borrow_mut().fail_reads = fail;
    }

    pub fn pending_inbound(&self) -> usize {
        self.wire.borrow().inbound.len()
    }

    /// Everything the client wrote so far, split into packets.
    pub fn sent_packets(&self) -> Vec<Vec<u8>> {
        let wire = self.wire.borrow();
        let mut packets = Vec::new();
        let mut rest = wire.sent.as_slice();
        while !rest.is_empty() {
            let header = FixedHeader::parse(rest).expect("client wrote a malformed packet");
            let (packet, tail) = rest.split_at(header.packet_len());
            packets.push(packet.to_vec());
            rest = tail;
        }
        packets
    }

    /// Packet types written so far.
    pub fn sent_types(&self) -> Vec<PacketType> {
        self.sent_packets()
            .iter()
            .map(|p| PacketType::from_header(p[0]).unwrap())
            .collect()
    }

    /// Publications written so far as `(topic, payload)`.
    pub fn sent_publishes(&self) -> Vec<(String, String)> {
        self.sent_packets()
            .iter()
            .filter(|p| PacketType::from_header(p[0]).unwrap() == PacketType::Publish)
            .map(|p| {
                let message = codec::decode_publish(p).unwrap();
                (
                    message.topic.to_string(),
                    String::from_utf8(message.payload.to_vec()).unwrap(),
                )
            })
            .collect()
    }

    pub fn clear_sent(&self) {
        self.wire.borrow_mut().sent.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.wire.borrow().closed
    }

    /// How many connections were closed so far.
    pub fn closes(&self) -> usize {
        self.wire.borrow().closes
    }

    /// `(host, port)` of every connect attempt.
    pub fn dials(&self) -> Vec<(String, u16)> {
        self.wire.borrow().dials.clone()
    }

    pub fn refuse_connects(&self, refuse: bool) {
        self.wire.borrow_mut().refuse_connects = refuse;
    }
}

#[derive(Debug)]
pub struct MockConnection {
    wire: Rc<RefCell<Wire>>,
    clock: MockClock,
}

/// A connected transport/peer pair over a fresh clock at t = 0.
pub fn pair() -> (MockConnection, Peer) {
    let wire = Rc::new(RefCell::new(Wire::default()));
    let clock = MockClock::default();
    (
        MockConnection {
            wire: wire.clone(),
            clock: clock.clone(),
        },
        Peer { wire, clock },
    )
}

/// Opens `MockConnection`s onto one wire.
#[derive(Debug)]
pub struct MockConnector {
    wire: Rc<RefCell<Wire>>,
    clock: MockClock,
}

/// A connector/peer pair over a fresh clock at t = 0. Nothing is connected
/// until the connector is asked to.
pub fn dialer() -> (MockConnector, Peer) {
    let (conn, peer) = pair();
    (
        MockConnector {
            wire: conn.wire,
            clock: conn.clock,
        },
        peer,
    )
}

impl Connect for MockConnector {
    type Connection = MockConnection;
    type Error = Error;

    fn connect(&mut self, host: &str, port: u16, _timeout_ms: u32) -> Result<MockConnection, Error> {
        let mut wire = self.wire.borrow_mut();
        wire.dials.push((host.to_string(), port));
        if wire.refuse_connects {
            return Err(Error::Refused);
        }
        wire.closed = false;
        Ok(MockConnection {
            wire: self.wire.clone(),
            clock: self.clock.clone(),
        })
    }
}

impl Read for MockConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        let mut wire = self.wire.borrow_mut();
        if wire.fail_reads {
            return Err(Error::Read);
        }
        let now = self.clock.now_ms();
        let deadline = now + u64::from(timeout_ms);
        match wire.inbound.front_mut() {
            Some((at, chunk)) if *at <= deadline => {
                self.clock.set(now.max(*at));
                let n = buf.len().min(chunk.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                chunk.drain(..n);
                if chunk.is_empty() {
                    wire.inbound.pop_front();
                }
                Ok(n)
            }
            _ => {
                self.clock.set(deadline);
                Ok(0)
            }
        }
    }
}

impl Write for MockConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8], _timeout_ms: u32) -> Result<usize, Self::Error> {
        let mut wire = self.wire.borrow_mut();
        if wire.fail_writes {
            return Err(Error::Write);
        }
        wire.sent.extend_from_slice(buf);
        Ok(buf.len())
    }
}

impl Close for MockConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        let mut wire = self.wire.borrow_mut();
        wire.closed = true;
        wire.closes += 1;
        Ok(())
    }
}

impl Connection for MockConnection {}

// Broker side packets.

pub fn connack(return_code: u8) -> Vec<u8> {
    let mut buf = [0u8; 8];
    let len = codec::encode_connack(
        &mut buf,
        &ConnAck {
            session_present: false,
            return_code,
        },
    )
    .unwrap();
    buf[..len].to_vec()
}

pub fn suback(packet_id: u16, granted: u8) -> Vec<u8> {
    let mut buf = [0u8; 8];
    let ack = SubAck {
        packet_id,
        return_codes: heapless::Vec::from_slice(&[granted]).unwrap(),
    };
    let len = codec::encode_suback(&mut buf, &ack).unwrap();
    buf[..len].to_vec()
}

pub fn ack(kind: PacketType, packet_id: u16) -> Vec<u8> {
    let mut buf = [0u8; 4];
    let len = codec::encode_ack(&mut buf, kind, packet_id).unwrap();
    buf[..len].to_vec()
}

pub fn header_only(kind: PacketType) -> Vec<u8> {
    let mut buf = [0u8; 2];
    let len = codec::encode_header_only(&mut buf, kind).unwrap();
    buf[..len].to_vec()
}

pub fn publish(topic: &str, payload: &[u8], qos: QoS, packet_id: Option<u16>) -> Vec<u8> {
    let mut buf = vec![0u8; 16 + topic.len() + payload.len()];
    let message = Message {
        topic,
        payload,
        qos,
        retain: false,
        dup: false,
        packet_id,
    };
    let len = codec::encode_publish(&mut buf, &message).unwrap();
    buf.truncate(len);
    buf
}
