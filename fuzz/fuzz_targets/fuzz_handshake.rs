#![no_main]

use libfuzzer_sys::fuzz_target;
use realtime_protocol::protocol::{HandshakeCommand, HandshakeRequest};

fuzz_target!(|data: &[u8]| {
    // Any handshake body yields a response
    let request = HandshakeRequest::parse(data);
    let command = HandshakeCommand::new(10);
    assert!(command.respond(&request).is_ok());
});
