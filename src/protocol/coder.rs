//! Message bodies in and out of the wire envelope.
//!
//! Inbound bodies go through the client schema table when the route has one
//! and are parsed as JSON otherwise. Outbound RESPONSE and PUSH bodies go
//! through the server schema table, falling back to JSON.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::core::message::{Message, MessageType, Route};
use crate::core::utf8;
use crate::error::{ProtocolError, Result};
use crate::protobuf::SchemaStore;
use crate::protocol::dictionary::RouteDictionary;

/// A decoded client message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    pub id: u64,
    pub kind: MessageType,
    pub route: String,
    pub body: Value,
}

impl InboundRequest {
    /// Requests expect a response; notifies do not.
    pub fn expects_response(&self) -> bool {
        self.kind == MessageType::Request && self.id > 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageCoder {
    dictionary: Option<Arc<RouteDictionary>>,
    schemas: Option<Arc<SchemaStore>>,
}

impl MessageCoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dictionary(mut self, dictionary: Arc<RouteDictionary>) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    pub fn with_schemas(mut self, schemas: Arc<SchemaStore>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn dictionary(&self) -> Option<&Arc<RouteDictionary>> {
        self.dictionary.as_ref()
    }

    pub fn schemas(&self) -> Option<&Arc<SchemaStore>> {
        self.schemas.as_ref()
    }

    /// Decode the body of a DATA package.
    pub fn decode(&self, data: &[u8]) -> Result<InboundRequest> {
        let message = Message::decode(data)?;
        let route = match &message.route {
            Some(Route::Code(code)) => match &self.dictionary {
                Some(dictionary) => dictionary.resolve(&Route::Code(*code))?,
                None => return Err(ProtocolError::UnknownRouteCode(*code)),
            },
            Some(Route::Name(name)) => name.clone(),
            None => String::new(),
        };

        let schema_body = match &self.schemas {
            Some(schemas) if !route.is_empty() => schemas.decode(&route, &message.body)?,
            _ => None,
        };
        let body = match schema_body {
            Some(body) => body,
            None => json_body(&message.body),
        };

        Ok(InboundRequest {
            id: message.id,
            kind: message.kind,
            route,
            body,
        })
    }

    /// Encode a RESPONSE to request `id`, which was sent on `route`.
    pub fn encode_response(&self, id: u64, route: &str, body: &Value) -> Result<Vec<u8>> {
        let body = self.encode_body(route, body)?;
        Message::response(id, body).encode()
    }

    /// Encode a server PUSH, compressing the route when the dictionary knows it.
    pub fn encode_push(&self, route: &str, body: &Value) -> Result<Vec<u8>> {
        let payload = self.encode_body(route, body)?;
        let wire_route = match &self.dictionary {
            Some(dictionary) => dictionary.compress(route),
            None => Route::Name(route.to_string()),
        };
        Message::push(wire_route, payload).encode()
    }

    fn encode_body(&self, route: &str, body: &Value) -> Result<Vec<u8>> {
        if let Some(schemas) = &self.schemas {
            if let Some(bytes) = schemas.encode(route, body)? {
                return Ok(bytes);
            }
        }
        Ok(utf8::encode(&serde_json::to_string(body)?))
    }
}

fn json_body(data: &[u8]) -> Value {
    if data.is_empty() {
        return Value::Object(Map::new());
    }
    match utf8::decode(data)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
    {
        Some(value) => value,
        None => {
            debug!(len = data.len(), "Message body is not JSON, using empty object");
            Value::Object(Map::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_json_request() {
        let coder = MessageCoder::new();
        let bytes = Message::request(5, "chat.chatHandler.send", br#"{"msg":"hi"}"#.to_vec())
            .encode()
            .unwrap();
        let request = coder.decode(&bytes).unwrap();
        assert_eq!(request.id, 5);
        assert_eq!(request.route, "chat.chatHandler.send");
        assert_eq!(request.body, json!({"msg": "hi"}));
        assert!(request.expects_response());
    }

    #[test]
    fn compressed_route_needs_dictionary() {
        let bytes = Message::notify(Route::Code(1), b"{}".to_vec()).encode().unwrap();
        assert!(matches!(
            MessageCoder::new().decode(&bytes),
            Err(ProtocolError::UnknownRouteCode(1))
        ));

        let dictionary = Arc::new(RouteDictionary::new(["area.move.run"]).unwrap());
        let coder = MessageCoder::new().with_dictionary(dictionary);
        let request = coder.decode(&bytes).unwrap();
        assert_eq!(request.route, "area.move.run");
        assert!(!request.expects_response());
    }

    #[test]
    fn push_uses_schema_and_dictionary() {
        let schemas = Arc::new(
            SchemaStore::from_sources(r#"{"onMove": {"required uInt32 x": 1}}"#, "{}").unwrap(),
        );
        let dictionary = Arc::new(RouteDictionary::from_json_str(r#"["onMove"]"#).unwrap());
        let coder = MessageCoder::new()
            .with_schemas(schemas)
            .with_dictionary(dictionary);

        let bytes = coder.encode_push("onMove", &json!({"x": 3})).unwrap();
        let message = Message::decode(&bytes).unwrap();
        assert_eq!(message.kind, MessageType::Push);
        assert_eq!(message.route, Some(Route::Code(1)));
        assert_eq!(message.body, vec![0x08, 0x03]);
    }

    #[test]
    fn response_falls_back_to_json() {
        let coder = MessageCoder::new();
        let bytes = coder
            .encode_response(9, "a.b.c", &json!({"code": 200}))
            .unwrap();
        let message = Message::decode(&bytes).unwrap();
        assert_eq!(message.id, 9);
        assert_eq!(message.body, br#"{"code":200}"#.to_vec());
    }
}
