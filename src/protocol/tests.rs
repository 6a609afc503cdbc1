// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use serde_json::{json, Value};

use crate::core::package::{Package, PackageType};
use crate::error::ProtocolError;
use crate::protobuf::SchemaStore;
use crate::protocol::dictionary::RouteDictionary;
use crate::protocol::handshake::*;
use crate::protocol::state::{ConnectionState, ProtocolEvent, StateMachine};

fn handshake_package(body: &str) -> Package {
    Package::new(PackageType::Handshake, body.as_bytes().to_vec())
}

fn response_json(reply: &HandshakeReply) -> Value {
    serde_json::from_slice(&reply.package.body).unwrap()
}

#[test]
fn test_full_lifecycle() {
    let mut machine = StateMachine::new();
    assert_eq!(machine.state(), ConnectionState::Inited);

    let event = machine
        .handle(handshake_package(
            r#"{"sys":{"type":"rust-tcp","version":"1.0.0"},"user":{"name":"ann"}}"#,
        ))
        .unwrap();
    match event {
        Some(ProtocolEvent::Handshake(request)) => {
            assert_eq!(request.client_type(), Some("rust-tcp"));
            assert_eq!(request.client_version(), Some("1.0.0"));
            assert_eq!(request.user, json!({"name": "ann"}));
        }
        other => panic!("expected handshake event, got {other:?}"),
    }
    assert_eq!(machine.state(), ConnectionState::WaitAck);

    let event = machine.handle(Package::empty(PackageType::HandshakeAck)).unwrap();
    assert_eq!(event, Some(ProtocolEvent::Heartbeat));
    assert_eq!(machine.state(), ConnectionState::Working);

    let event = machine.handle(Package::empty(PackageType::Heartbeat)).unwrap();
    assert_eq!(event, Some(ProtocolEvent::Heartbeat));

    let event = machine
        .handle(Package::new(PackageType::Data, vec![1, 2, 3]))
        .unwrap();
    assert_eq!(event, Some(ProtocolEvent::Message(vec![1, 2, 3])));

    assert!(machine.close());
    assert!(!machine.close());
    assert_eq!(
        machine.handle(Package::new(PackageType::Data, vec![1])).unwrap(),
        None
    );
}

#[test]
fn test_out_of_state_packages_are_dropped() {
    let mut machine = StateMachine::new();
    assert_eq!(machine.handle(Package::empty(PackageType::Heartbeat)).unwrap(), None);
    assert_eq!(machine.handle(Package::new(PackageType::Data, vec![9])).unwrap(), None);
    assert_eq!(machine.handle(Package::empty(PackageType::HandshakeAck)).unwrap(), None);
    assert_eq!(machine.state(), ConnectionState::Inited);

    machine.handle(handshake_package("{}")).unwrap();
    machine.handle(Package::empty(PackageType::HandshakeAck)).unwrap();
    assert_eq!(machine.state(), ConnectionState::Working);

    assert_eq!(machine.handle(Package::empty(PackageType::HandshakeAck)).unwrap(), None);
    assert_eq!(machine.handle(handshake_package("{}")).unwrap(), None);
    assert_eq!(machine.state(), ConnectionState::Working);
}

#[test]
fn test_kick_from_peer_closes() {
    let mut machine = StateMachine::new();
    let result = machine.handle(Package::empty(PackageType::Kick));
    assert!(matches!(result, Err(ProtocolError::UnexpectedPackage(5))));
    assert!(machine.is_closed());
}

#[test]
fn test_malformed_handshake_body_proceeds() {
    let mut machine = StateMachine::new();
    let event = machine.handle(handshake_package("{ not json")).unwrap();
    match event {
        Some(ProtocolEvent::Handshake(request)) => assert_eq!(request, HandshakeRequest::default()),
        other => panic!("expected handshake event, got {other:?}"),
    }
    assert_eq!(machine.state(), ConnectionState::WaitAck);

    let invalid_utf8 = Package::new(PackageType::Handshake, vec![0xFF, 0xFE]);
    let mut machine = StateMachine::new();
    assert!(matches!(
        machine.handle(invalid_utf8).unwrap(),
        Some(ProtocolEvent::Handshake(_))
    ));
}

#[test]
fn test_handshake_response_advertises_heartbeat() {
    let command = HandshakeCommand::new(10);
    let reply = command.respond(&HandshakeRequest::default()).unwrap();
    assert!(reply.accepted());
    assert_eq!(reply.package.kind, PackageType::Handshake);
    assert_eq!(response_json(&reply), json!({"code": 200, "sys": {"heartbeat": 10}}));
}

#[test]
fn test_handshake_client_check_rejects() {
    let command = HandshakeCommand::new(0)
        .with_client_check(|_, version| version.is_some_and(|v| v >= "1.0.0"));

    let old = HandshakeRequest::parse(br#"{"sys":{"type":"js","version":"0.9.0"}}"#);
    let reply = command.respond(&old).unwrap();
    assert_eq!(reply.code, CODE_OLD_CLIENT);
    assert_eq!(response_json(&reply), json!({"code": 501}));
    assert!(matches!(
        reply.ensure_accepted(),
        Err(ProtocolError::HandshakeRejected(501))
    ));

    let current = HandshakeRequest::parse(br#"{"sys":{"type":"js","version":"1.2.0"}}"#);
    assert!(command.respond(&current).unwrap().accepted());
}

#[test]
fn test_handshake_sends_dictionary_and_protos_when_stale() {
    let dictionary = Arc::new(RouteDictionary::new(["area.move.run"]).unwrap());
    let schemas = Arc::new(
        SchemaStore::from_sources(r#"{"onMove": {"required uInt32 x": 1}}"#, "{}").unwrap(),
    );
    let command = HandshakeCommand::new(5)
        .with_dictionary(Arc::clone(&dictionary))
        .with_schemas(Arc::clone(&schemas))
        .with_user_handshake(|_| Some(json!({"motd": "hello"})));

    let stale = command.respond(&HandshakeRequest::default()).unwrap();
    let body = response_json(&stale);
    assert_eq!(body["sys"]["dict"], json!({"area.move.run": 1}));
    assert_eq!(body["sys"]["codeToRoute"], json!({"1": "area.move.run"}));
    assert_eq!(body["sys"]["protos"]["version"], json!(schemas.version().unwrap()));
    assert_eq!(body["user"], json!({"motd": "hello"}));

    let fresh_body = format!(
        r#"{{"sys":{{"dictVersion":"{}","protoVersion":"{}"}}}}"#,
        dictionary.version(),
        schemas.version().unwrap()
    );
    let fresh = command
        .respond(&HandshakeRequest::parse(fresh_body.as_bytes()))
        .unwrap();
    let body = response_json(&fresh);
    assert!(body["sys"].get("dict").is_none());
    assert!(body["sys"].get("protos").is_none());
    assert_eq!(body["sys"]["useDict"], json!(true));
    assert_eq!(body["sys"]["useProto"], json!(true));
}
