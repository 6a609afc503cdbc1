#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use realtime_protocol::core::codec::PackageCodec;
use realtime_protocol::Package;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Whole-frame and streaming decoders must agree on valid input
    let framed = Package::decode_all(data);

    let mut codec = PackageCodec;
    let mut buf = BytesMut::from(data);
    let mut streamed = Vec::new();
    while let Ok(Some(package)) = codec.decode(&mut buf) {
        streamed.push(package);
    }

    if let Ok(packages) = framed {
        assert_eq!(packages, streamed);
    }
});
