use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tmlink::network::application::mqtt::codec::{self, MAX_REMAINING_LENGTH};
use tmlink::network::application::mqtt::topic::matches;
use tmlink::network::application::mqtt::{Message, PacketIdGenerator, QoS};

fn random_level(rng: &mut StdRng) -> String {
    let len = rng.gen_range(1..6);
    (0..len)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect()
}

fn random_topic(rng: &mut StdRng) -> String {
    let levels = rng.gen_range(1..6);
    (0..levels)
        .map(|_| random_level(rng))
        .collect::<Vec<_>>()
        .join("/")
}

#[test]
fn test_remaining_length_agrees_with_its_size() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut buf = [0u8; 4];
    for _ in 0..10_000 {
        let len = rng.gen_range(0..=MAX_REMAINING_LENGTH);
        let written = codec::encode_remaining_length(&mut buf, len).unwrap();
        assert_eq!(written, codec::remaining_length_len(len));
        assert_eq!(
            codec::decode_remaining_length(&buf[..written]).unwrap(),
            Some((len, written))
        );
        if written > 1 {
            assert_eq!(codec::decode_remaining_length(&buf[..written - 1]).unwrap(), None);
        }
    }
}

#[test]
fn test_remaining_length_above_limit_is_rejected() {
    let mut buf = [0u8; 8];
    assert!(codec::encode_remaining_length(&mut buf, MAX_REMAINING_LENGTH + 1).is_err());
    assert_eq!(
        codec::decode_remaining_length(&[0xff, 0xff, 0xff, 0xff]),
        Err(codec::Error::MalformedLength)
    );
}

#[test]
fn test_random_publications_decode_to_what_was_sent() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut buf = [0u8; 512];
    for _ in 0..1_000 {
        let topic = random_topic(&mut rng);
        let payload: Vec<u8> = (0..rng.gen_range(0..200)).map(|_| rng.r#gen()).collect();
        let qos = QoS::try_from(rng.gen_range(0..3u8)).unwrap();
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            _ => Some(rng.gen_range(1..=u16::MAX)),
        };
        let message = Message {
            topic: &topic,
            payload: &payload,
            qos,
            retain: rng.r#gen(),
            dup: false,
            packet_id,
        };

        let len = codec::encode_publish(&mut buf, &message).unwrap();
        assert_eq!(codec::decode_publish(&buf[..len]).unwrap(), message);
    }
}

#[test]
fn test_garbage_is_rejected_without_panicking() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..10_000 {
        let bytes: Vec<u8> = (0..rng.gen_range(0..32)).map(|_| rng.r#gen()).collect();
        let _ = codec::FixedHeader::parse(&bytes);
        let _ = codec::decode_publish(&bytes);
        let _ = codec::decode_connect(&bytes);
        let _ = codec::decode_suback(&bytes);
        let _ = codec::decode_ack(&bytes);
    }
}

#[test]
fn test_packet_ids_are_never_zero() {
    let mut ids = PacketIdGenerator::new();
    assert_eq!(ids.next_id(), 2);
    let mut previous = 2;
    for _ in 0..(2 * u32::from(u16::MAX)) {
        let id = ids.next_id();
        assert_ne!(id, 0);
        if previous == u16::MAX {
            assert_eq!(id, 1);
        } else {
            assert_eq!(id, previous + 1);
        }
        previous = id;
    }
}

#[test]
fn test_wildcards_against_random_topics() {
    let mut rng = StdRng::seed_from_u64(1234);
    for _ in 0..1_000 {
        let topic = random_topic(&mut rng);
        let levels: Vec<&str> = topic.split('/').collect();

        assert!(matches(&topic, &topic));
        assert!(matches("#", &topic));

        let plus = vec!["+"; levels.len()].join("/");
        assert!(matches(&plus, &topic));

        let deeper = format!("{topic}/{}", random_level(&mut rng));
        assert!(!matches(&topic, &deeper));
        assert!(matches(&format!("{topic}/#"), &deeper));
        assert!(!matches(&format!("{topic}/#"), &topic));
    }
}
