#![no_main]

use libfuzzer_sys::fuzz_target;
use realtime_protocol::protobuf::SchemaStore;

const SCHEMA: &str = r#"{
    "area.playerHandler.move": {
        "required uInt32 entityId": 1,
        "optional string reason": 2,
        "repeated Point path": 3,
        "repeated sInt32 deltas": 4,
        "optional double speed": 5,
        "message Point": { "required sInt32 x": 1, "required sInt32 y": 2 }
    }
}"#;

fuzz_target!(|data: &[u8]| {
    if let Ok(store) = SchemaStore::from_sources("{}", SCHEMA) {
        let _ = store.decode("area.playerHandler.move", data);
    }
});
