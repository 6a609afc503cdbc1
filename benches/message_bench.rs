use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use realtime_protocol::core::message::{Message, Route};
use realtime_protocol::protobuf::SchemaStore;
use realtime_protocol::protocol::{MessageCoder, RouteDictionary};
use serde_json::json;
use std::sync::Arc;

#[allow(clippy::unwrap_used)]
fn bench_message_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_envelope");
    let messages = vec![
        Message::request(1, "connector.entryHandler.entry", b"{}".to_vec()),
        Message::request(300_000, Route::Code(42), vec![7u8; 256]),
        Message::notify("chat.chatHandler.send", b"{\"msg\":\"hello world\"}".to_vec()),
        Message::push("onChat", vec![b'a'; 1024]),
    ];

    group.bench_function("encode", |b| {
        b.iter_batched(
            || messages.clone(),
            |msgs| {
                for m in msgs {
                    let _ = m.encode().unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });

    let blob = messages[1].encode().unwrap();
    group.bench_function("decode", |b| {
        b.iter(|| {
            let _ = Message::decode(&blob).unwrap();
        })
    });

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_message_bodies(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_bodies");
    let route = "area.playerHandler.move";
    let schema = json!({
        route: {
            "required uInt32 entityId": 1,
            "repeated sInt32 path": 2,
            "optional string reason": 3
        }
    })
    .to_string();
    let payload = json!({ "entityId": 77, "path": [1, -2, 3, -4, 5, -6], "reason": "walk" });

    let dictionary = Arc::new(RouteDictionary::new([route]).unwrap());
    let json_coder = MessageCoder::new().with_dictionary(Arc::clone(&dictionary));
    let schema_coder = MessageCoder::new()
        .with_dictionary(dictionary)
        .with_schemas(Arc::new(SchemaStore::from_sources(&schema, &schema).unwrap()));

    group.bench_function("push_json", |b| {
        b.iter(|| json_coder.encode_push(route, &payload).unwrap())
    });
    group.bench_function("push_schema", |b| {
        b.iter(|| schema_coder.encode_push(route, &payload).unwrap())
    });

    let json_request = Message::request(9, route, payload.to_string().into_bytes())
        .encode()
        .unwrap();
    group.bench_function("decode_json_request", |b| {
        b.iter(|| json_coder.decode(&json_request).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_message_envelope, bench_message_bodies);
criterion_main!(benches);
