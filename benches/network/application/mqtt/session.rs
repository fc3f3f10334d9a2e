use criterion::{Criterion, Throughput};
use tmlink::network::application::mqtt::codec::{self, ConnAck};
use tmlink::network::application::mqtt::{Message, Options, Publish, QoS, Session};
use tmlink::network::error::Error;
use tmlink::network::{Close, Connection, Read, Write};
use tmlink::time::Clock;

/// Replays `script[..]` once, then `script[loop_from..]` forever. Writes are
/// discarded.
struct Replay {
    script: Vec<u8>,
    pos: usize,
    loop_from: usize,
}

impl Replay {
    fn new(repeat: &[u8]) -> Self {
        let mut script = vec![0u8; 4];
        let len = codec::encode_connack(
            &mut script,
            &ConnAck {
                session_present: false,
                return_code: 0,
            },
        )
        .unwrap();
        script.truncate(len);
        script.extend_from_slice(repeat);
        Self {
            script,
            pos: 0,
            loop_from: len,
        }
    }
}

impl Read for Replay {
    type Error = Error;
    fn read(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<usize, Self::Error> {
        if self.pos == self.script.len() {
            if self.loop_from == self.script.len() {
                return Ok(0);
            }
            self.pos = self.loop_from;
        }
        let n = buf.len().min(self.script.len() - self.pos);
        buf[..n].copy_from_slice(&self.script[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for Replay {
    type Error = Error;
    fn write(&mut self, buf: &[u8], _timeout_ms: u32) -> Result<usize, Self::Error> {
        Ok(buf.len())
    }
}

impl Close for Replay {
    type Error = Error;
    fn close(self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Connection for Replay {}

#[derive(Clone, Copy)]
struct Frozen;

impl Clock for Frozen {
    fn now_ms(&self) -> u64 {
        0
    }
}

fn count(received: &mut usize, _message: &Message<'_>, _out: &mut dyn Publish) {
    *received += 1;
}

pub fn bench_publish_qos0(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_publish_qos0");
    let payload = b"hello from publish";
    group.throughput(Throughput::Bytes(payload.len() as u64));

    let (mut send, mut recv) = ([0u8; 256], [0u8; 256]);
    let mut session: Session<'_, _, _, ()> =
        Session::new(Replay::new(&[]), Frozen, &mut send, &mut recv);
    session
        .connect(&mut (), &Options::new("tmlink-bench-publish"), 1_000)
        .expect("Failed to connect");

    group.bench_function("publish", |b| {
        b.iter(|| {
            session
                .publish(&mut (), "tmlink/bench-topic", payload, QoS::AtMostOnce, false, 1_000)
                .expect("Failed to publish")
        })
    });
    group.finish();
}

pub fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_dispatch");
    let payload = b"hello world from bench";
    group.throughput(Throughput::Bytes(payload.len() as u64 * 50));

    let mut packet = [0u8; 128];
    let len = codec::encode_publish(
        &mut packet,
        &Message {
            topic: "tmlink/bench-topic",
            payload,
            qos: QoS::AtLeastOnce,
            retain: false,
            dup: false,
            packet_id: Some(7),
        },
    )
    .unwrap();

    group.bench_function("yield_qos1", |b| {
        b.iter(|| {
            let (mut send, mut recv) = ([0u8; 256], [0u8; 256]);
            let mut session: Session<'_, _, _, usize> =
                Session::new(Replay::new(&packet[..len]), Frozen, &mut send, &mut recv);
            let mut received = 0;
            session
                .connect(&mut received, &Options::new("tmlink-bench-dispatch"), 1_000)
                .expect("Failed to connect");
            session
                .set_message_handler("tmlink/#", Some(count))
                .expect("Failed to register");
            for _ in 0..50 {
                session.yield_now(&mut received, 1_000).expect("Failed to yield");
            }
            received
        })
    });
    group.finish();
}
