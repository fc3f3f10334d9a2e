use criterion::{Criterion, Throughput, black_box};
use tmlink::network::application::mqtt::codec;
use tmlink::network::application::mqtt::topic::matches;
use tmlink::network::application::mqtt::{Message, QoS};

const TOPIC: &str = "$sys/bench-product/bench-device/thing/property/post";
const PAYLOAD: &[u8] = br#"{"id":"65521","version":"1.0","params":{"temp":{"value":21.5}}}"#;

fn message() -> Message<'static> {
    Message {
        topic: TOPIC,
        payload: PAYLOAD,
        qos: QoS::AtLeastOnce,
        retain: false,
        dup: false,
        packet_id: Some(42),
    }
}

pub fn bench_encode_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_publish");
    group.throughput(Throughput::Bytes(PAYLOAD.len() as u64));
    let message = message();
    let mut buf = [0u8; 256];
    group.bench_function("encode_publish", |b| {
        b.iter(|| codec::encode_publish(black_box(&mut buf), black_box(&message)).unwrap())
    });
    group.finish();
}

pub fn bench_decode_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_publish");
    group.throughput(Throughput::Bytes(PAYLOAD.len() as u64));
    let mut buf = [0u8; 256];
    let len = codec::encode_publish(&mut buf, &message()).unwrap();
    group.bench_function("decode_publish", |b| {
        b.iter(|| codec::decode_publish(black_box(&buf[..len])).unwrap())
    });
    group.finish();
}

pub fn bench_topic_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("topic_match");
    group.bench_function("multi_level", |b| {
        b.iter(|| matches(black_box("$sys/bench-product/bench-device/thing/#"), black_box(TOPIC)))
    });
    group.bench_function("single_level_miss", |b| {
        b.iter(|| matches(black_box("$sys/+/+/thing/event/post"), black_box(TOPIC)))
    });
    group.finish();
}
