//! Handshake request parsing and response building.
//!
//! The client opens with a HANDSHAKE package carrying UTF-8 JSON:
//!
//! ```json
//! {"sys": {"type": "js-websocket", "version": "0.0.1", "dictVersion": "...", "protoVersion": "..."},
//!  "user": {}}
//! ```
//!
//! The server answers with its own HANDSHAKE package:
//!
//! ```json
//! {"code": 200, "sys": {"heartbeat": 10, "dict": {...}, "protos": {...}}, "user": {...}}
//! ```
//!
//! A body that is not valid JSON is treated as an empty request; the
//! connection proceeds.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::core::package::{Package, PackageType};
use crate::core::utf8;
use crate::error::{ProtocolError, Result};
use crate::protobuf::SchemaStore;
use crate::protocol::dictionary::RouteDictionary;

pub const CODE_OK: u16 = 200;
pub const CODE_USE_ERROR: u16 = 500;
pub const CODE_OLD_CLIENT: u16 = 501;

/// `sys` section of a client handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSys {
    #[serde(rename = "type", default)]
    pub client_type: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub heartbeat: Option<u64>,
    #[serde(default)]
    pub dict_version: Option<String>,
    #[serde(default)]
    pub proto_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    #[serde(default)]
    pub sys: Option<ClientSys>,
    #[serde(default)]
    pub user: Value,
}

impl HandshakeRequest {
    /// Parse a handshake body, substituting an empty request when the body is
    /// not valid UTF-8 JSON of the expected shape.
    pub fn parse(body: &[u8]) -> Self {
        let parsed = utf8::decode(body)
            .ok()
            .and_then(|text| serde_json::from_str::<HandshakeRequest>(&text).ok());
        match parsed {
            Some(request) => request,
            None => {
                debug!(len = body.len(), "Malformed handshake body, continuing with empty payload");
                HandshakeRequest::default()
            }
        }
    }

    pub fn client_type(&self) -> Option<&str> {
        self.sys.as_ref().and_then(|s| s.client_type.as_deref())
    }

    pub fn client_version(&self) -> Option<&str> {
        self.sys.as_ref().and_then(|s| s.version.as_deref())
    }
}

/// Hook deciding whether a client type/version may connect.
pub type ClientCheck = dyn Fn(Option<&str>, Option<&str>) -> bool + Send + Sync;

/// Hook adding application data to the `user` section of the response.
pub type UserHandshake = dyn Fn(&HandshakeRequest) -> Option<Value> + Send + Sync;

/// Outcome of processing a handshake request.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeReply {
    pub code: u16,
    pub package: Package,
}

impl HandshakeReply {
    pub fn accepted(&self) -> bool {
        self.code == CODE_OK
    }

    /// `Err(HandshakeRejected)` unless the handshake was accepted.
    pub fn ensure_accepted(&self) -> Result<()> {
        if self.accepted() {
            Ok(())
        } else {
            Err(ProtocolError::HandshakeRejected(self.code))
        }
    }
}

/// Builds handshake responses from the server's heartbeat, dictionary and
/// schema settings.
#[derive(Clone, Default)]
pub struct HandshakeCommand {
    heartbeat_secs: u64,
    dictionary: Option<Arc<RouteDictionary>>,
    schemas: Option<Arc<SchemaStore>>,
    check_client: Option<Arc<ClientCheck>>,
    user_handshake: Option<Arc<UserHandshake>>,
}

impl std::fmt::Debug for HandshakeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeCommand")
            .field("heartbeat_secs", &self.heartbeat_secs)
            .field("use_dict", &self.dictionary.is_some())
            .field("use_protobuf", &self.schemas.is_some())
            .field("check_client", &self.check_client.is_some())
            .finish()
    }
}

impl HandshakeCommand {
    pub fn new(heartbeat_secs: u64) -> Self {
        Self {
            heartbeat_secs,
            ..Default::default()
        }
    }

    /// Advertise the route dictionary to clients with a stale copy.
    pub fn with_dictionary(mut self, dictionary: Arc<RouteDictionary>) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    /// Advertise schema tables to clients with a stale copy.
    pub fn with_schemas(mut self, schemas: Arc<SchemaStore>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn with_client_check<F>(mut self, check: F) -> Self
    where
        F: Fn(Option<&str>, Option<&str>) -> bool + Send + Sync + 'static,
    {
        self.check_client = Some(Arc::new(check));
        self
    }

    pub fn with_user_handshake<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HandshakeRequest) -> Option<Value> + Send + Sync + 'static,
    {
        self.user_handshake = Some(Arc::new(hook));
        self
    }

    /// Build the response package for `request`.
    pub fn respond(&self, request: &HandshakeRequest) -> Result<HandshakeReply> {
        if let Some(check) = &self.check_client {
            if !check(request.client_type(), request.client_version()) {
                warn!(
                    client_type = ?request.client_type(),
                    version = ?request.client_version(),
                    "Rejecting outdated client"
                );
                return error_reply(CODE_OLD_CLIENT);
            }
        }

        let client_sys = request.sys.clone().unwrap_or_default();
        let mut sys = Map::new();
        sys.insert("heartbeat".into(), Value::from(self.heartbeat_secs));

        if let Some(dictionary) = &self.dictionary {
            if client_sys.dict_version.as_deref() != Some(dictionary.version()) {
                sys.insert("dict".into(), dictionary.route_to_code_json());
                sys.insert("routeToCode".into(), dictionary.route_to_code_json());
                sys.insert("codeToRoute".into(), dictionary.code_to_route_json());
                sys.insert("dictVersion".into(), Value::from(dictionary.version()));
            }
            sys.insert("useDict".into(), Value::Bool(true));
        }

        if let Some(schemas) = &self.schemas {
            let version = schemas.version()?;
            if client_sys.proto_version.as_deref() != Some(version.as_str()) {
                sys.insert("protos".into(), schemas.protos()?);
            }
            sys.insert("useProto".into(), Value::Bool(true));
        }

        let mut response = Map::new();
        response.insert("code".into(), Value::from(CODE_OK));
        response.insert("sys".into(), Value::Object(sys));
        if let Some(user) = self.user_handshake.as_ref().and_then(|hook| hook(request)) {
            response.insert("user".into(), user);
        }

        Ok(HandshakeReply {
            code: CODE_OK,
            package: json_package(&Value::Object(response))?,
        })
    }
}

fn error_reply(code: u16) -> Result<HandshakeReply> {
    let mut body = Map::new();
    body.insert("code".into(), Value::from(code));
    Ok(HandshakeReply {
        code,
        package: json_package(&Value::Object(body))?,
    })
}

fn json_package(value: &Value) -> Result<Package> {
    let text = serde_json::to_string(value)?;
    Ok(Package::new(PackageType::Handshake, utf8::encode(&text)))
}
