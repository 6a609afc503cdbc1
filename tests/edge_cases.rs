#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Boundary conditions of the wire formats: route limits, id widths, truncated
//! and malformed input.

use bytes::BytesMut;
use realtime_protocol::core::codec::PackageCodec;
use realtime_protocol::core::message::{decode_id, encode_id, id_len, Message, MessageType, Route};
use realtime_protocol::core::package::{Package, PackageType, MAX_BODY_SIZE};
use realtime_protocol::error::ProtocolError;
use tokio_util::codec::Decoder;

// ============================================================================
// PACKAGE EDGE CASES
// ============================================================================

#[test]
fn test_request_wrapped_in_data_package() {
    let message = Message::request(300, "user.login", vec![1, 2]).encode().unwrap();
    let mut expected = vec![0x00, 0x82, 0x2C, 10];
    expected.extend_from_slice(b"user.login");
    expected.extend_from_slice(&[1, 2]);
    assert_eq!(message, expected);

    let package = Package::encode(PackageType::Data, &message).unwrap();
    assert_eq!(&package[..4], &[4, 0, 0, 16]);

    let decoded = Package::from_bytes(&package).unwrap();
    let decoded = Message::decode(&decoded.body).unwrap();
    assert_eq!(decoded.id, 300);
    assert_eq!(decoded.kind, MessageType::Request);
    assert_eq!(decoded.route, Some(Route::Name("user.login".into())));
    assert_eq!(decoded.body, vec![1, 2]);
}

#[test]
fn test_empty_body_packages() {
    assert_eq!(Package::encode(PackageType::Heartbeat, &[]).unwrap(), vec![3, 0, 0, 0]);
    let ack = Package::from_bytes(&[2, 0, 0, 0]).unwrap();
    assert_eq!(ack, Package::empty(PackageType::HandshakeAck));
}

#[test]
fn test_body_length_limit() {
    let at_limit = vec![0u8; MAX_BODY_SIZE];
    let bytes = Package::encode(PackageType::Data, &at_limit).unwrap();
    assert_eq!(&bytes[..4], &[4, 0xFF, 0xFF, 0xFF]);

    let over = vec![0u8; MAX_BODY_SIZE + 1];
    match Package::encode(PackageType::Data, &over) {
        Err(ProtocolError::OversizedPackage(len)) => assert_eq!(len, MAX_BODY_SIZE + 1),
        other => panic!("Unexpected result: {other:?}"),
    }
}

#[test]
fn test_truncated_and_unknown_packages() {
    assert!(matches!(
        Package::from_bytes(&[4, 0, 0]),
        Err(ProtocolError::MalformedPackage(_))
    ));
    assert!(matches!(
        Package::from_bytes(&[4, 0, 0, 5, 1, 2]),
        Err(ProtocolError::MalformedPackage(_))
    ));
    assert!(matches!(
        Package::from_bytes(&[9, 0, 0, 0]),
        Err(ProtocolError::UnknownPackageType(9))
    ));
    assert!(matches!(
        Package::from_bytes(&[3, 0, 0, 0, 0xAA]),
        Err(ProtocolError::MalformedPackage(_))
    ));
}

#[test]
fn test_several_packages_in_one_frame() {
    let mut frame = Package::encode(PackageType::Heartbeat, &[]).unwrap();
    frame.extend(Package::encode(PackageType::Data, b"abc").unwrap());
    let packages = Package::decode_all(&frame).unwrap();
    assert_eq!(packages.len(), 2);
    assert_eq!(packages[0].kind, PackageType::Heartbeat);
    assert_eq!(packages[1].body, b"abc");
}

#[test]
fn test_stream_codec_byte_at_a_time() {
    let mut stream = Package::encode(PackageType::Handshake, br#"{"sys":{}}"#).unwrap();
    stream.extend(Package::encode(PackageType::Heartbeat, &[]).unwrap());

    let mut codec = PackageCodec;
    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();
    for byte in stream {
        buf.extend_from_slice(&[byte]);
        while let Some(package) = codec.decode(&mut buf).unwrap() {
            decoded.push(package);
        }
    }

    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].kind, PackageType::Handshake);
    assert_eq!(decoded[1].kind, PackageType::Heartbeat);
}

#[test]
fn test_stream_codec_rejects_unknown_type_early() {
    let mut codec = PackageCodec;
    let mut buf = BytesMut::from(&[0x47u8, 0x45, 0x54, 0x20][..]);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::UnknownPackageType(0x47))
    ));
}

// ============================================================================
// MESSAGE EDGE CASES
// ============================================================================

#[test]
fn test_route_name_length_limit() {
    let route = "r".repeat(255);
    let encoded = Message::notify(route.as_str(), vec![]).encode().unwrap();
    assert_eq!(encoded[1], 255);
    assert_eq!(Message::decode(&encoded).unwrap().route_name(), Some(route.as_str()));

    let too_long = "r".repeat(256);
    assert!(matches!(
        Message::notify(too_long.as_str(), vec![]).encode(),
        Err(ProtocolError::RouteOverflow(_))
    ));
}

#[test]
fn test_route_length_counts_encoded_bytes() {
    // 128 two-byte characters encode to 256 bytes.
    let route = "é".repeat(128);
    assert!(matches!(
        Message::push(route.as_str(), vec![]).encode(),
        Err(ProtocolError::RouteOverflow(_))
    ));
}

#[test]
fn test_route_code_limit() {
    let encoded = Message::request(1, Route::Code(65535), vec![]).encode().unwrap();
    assert_eq!(encoded, vec![0x01, 0x01, 0xFF, 0xFF]);
    assert_eq!(Message::decode(&encoded).unwrap().route, Some(Route::Code(65535)));

    assert!(matches!(
        Message::request(1, Route::Code(65536), vec![]).encode(),
        Err(ProtocolError::RouteOverflow(_))
    ));
}

#[test]
fn test_response_has_no_route() {
    let encoded = Message::response(7, b"{}".to_vec()).encode().unwrap();
    assert_eq!(encoded, vec![0x04, 0x07, b'{', b'}']);
    let decoded = Message::decode(&encoded).unwrap();
    assert_eq!(decoded.route, None);
    assert_eq!(decoded.kind, MessageType::Response);
}

#[test]
fn test_push_and_notify_have_no_id() {
    let push = Message::push("onChat", b"x".to_vec()).encode().unwrap();
    assert_eq!(push[0], 0x06);
    assert_eq!(push[1], 6);
    assert_eq!(Message::decode(&push).unwrap().id, 0);

    let notify = Message::notify("a.b.c", vec![]).encode().unwrap();
    assert_eq!(notify, vec![0x02, 5, b'a', b'.', b'b', b'.', b'c']);
}

#[test]
fn test_unknown_message_type() {
    assert!(matches!(
        Message::decode(&[0x0E]),
        Err(ProtocolError::UnknownMessageType(7))
    ));
}

#[test]
fn test_truncated_messages() {
    assert!(matches!(Message::decode(&[]), Err(ProtocolError::MalformedMessage(_))));
    // Id continuation bit with nothing after it.
    assert!(matches!(Message::decode(&[0x00, 0x81]), Err(ProtocolError::MalformedMessage(_))));
    // Route length longer than the remaining bytes.
    assert!(matches!(
        Message::decode(&[0x02, 5, b'a']),
        Err(ProtocolError::MalformedMessage(_))
    ));
    // Compressed route with a single code byte.
    assert!(matches!(Message::decode(&[0x03, 0x01]), Err(ProtocolError::MalformedMessage(_))));
}

// ============================================================================
// ID VARINT EDGE CASES
// ============================================================================

#[test]
fn test_id_group_boundaries() {
    let cases: [(u64, &[u8]); 6] = [
        (0, &[0x00]),
        (127, &[0x7F]),
        (128, &[0x81, 0x00]),
        (16_383, &[0xFF, 0x7F]),
        (16_384, &[0x81, 0x80, 0x00]),
        (300, &[0x82, 0x2C]),
    ];
    for (id, expected) in cases {
        let mut out = Vec::new();
        encode_id(id, &mut out);
        assert_eq!(out, expected, "id {id}");
        assert_eq!(id_len(id), expected.len());
        assert_eq!(decode_id(&out).unwrap(), (id, expected.len()));
    }
}

#[test]
fn test_id_full_width() {
    let mut out = Vec::new();
    encode_id(u64::MAX, &mut out);
    assert_eq!(out.len(), 10);
    assert_eq!(decode_id(&out).unwrap(), (u64::MAX, 10));

    // Eleven groups cannot fit in 64 bits.
    let overflow = [0xFFu8, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
    assert!(matches!(decode_id(&overflow), Err(ProtocolError::MalformedMessage(_))));
}
