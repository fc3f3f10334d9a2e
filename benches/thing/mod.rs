use criterion::{Criterion, black_box};
use tmlink::thing::onejson;
use tmlink::thing::router::classify;

const PREFIX: &str = "$sys/bench-product/bench-device/thing";

pub fn bench_parse_reply(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_reply");
    let text = r#"{"id":"65521","code":200,"msg":"success","data":{"temp":{"value":25,"version":3}}}"#;
    group.bench_function("json_data", |b| {
        b.iter(|| onejson::parse_reply(black_box(text), false).unwrap())
    });
    let raw = r#"{"id":"65521","code":200,"msg":"success","data":"stored"}"#;
    group.bench_function("raw_data", |b| {
        b.iter(|| onejson::parse_reply(black_box(raw), true).unwrap())
    });
    group.finish();
}

pub fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    for (name, topic) in [
        ("property_set", "$sys/bench-product/bench-device/thing/property/set"),
        ("reply", "$sys/bench-product/bench-device/thing/history/post/reply"),
        ("service", "$sys/bench-product/bench-device/thing/service/reboot/invoke"),
    ] {
        group.bench_function(name, |b| b.iter(|| classify(black_box(PREFIX), black_box(topic))));
    }
    group.finish();
}
