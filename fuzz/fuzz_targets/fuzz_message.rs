#![no_main]

use libfuzzer_sys::fuzz_target;
use realtime_protocol::Message;

fuzz_target!(|data: &[u8]| {
    // A decoded envelope re-encodes to the bytes it came from
    if let Ok(message) = Message::decode(data) {
        if let Ok(encoded) = message.encode() {
            assert_eq!(Message::decode(&encoded).ok(), Some(message));
        }
    }
});
