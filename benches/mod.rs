use criterion::{criterion_group, criterion_main};

mod network;
mod thing;

criterion_group!(
    benches,
    network::application::mqtt::codec::bench_encode_publish,
    network::application::mqtt::codec::bench_decode_publish,
    network::application::mqtt::codec::bench_topic_match,
    network::application::mqtt::session::bench_publish_qos0,
    network::application::mqtt::session::bench_dispatch,
    thing::bench_parse_reply,
    thing::bench_classify
);
criterion_main!(benches);
