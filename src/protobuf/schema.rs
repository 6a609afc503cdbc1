//! Schema tables for the structured codec.
//!
//! The schema source is JSON keyed by route. Each route maps to a message
//! description whose keys are either field declarations or nested messages:
//!
//! ```json
//! {
//!   "area.playerHandler.move": {
//!     "required uInt32 entityId": 1,
//!     "optional string reason": 2,
//!     "repeated Point path": 3,
//!     "message Point": { "required sInt32 x": 1, "required sInt32 y": 2 }
//!   },
//!   "message Item": { "required uInt32 id": 1 }
//! }
//! ```
//!
//! Top-level `message <Name>` entries are shared by every route.

use std::collections::HashMap;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};
use crate::protobuf::wire::WireType;

/// Largest field tag expressible in a 32-bit key.
pub const MAX_FIELD_TAG: u64 = (1 << 29) - 1;

const MESSAGE_PREFIX: &str = "message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Required,
    Optional,
    Repeated,
}

impl FromStr for Cardinality {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "required" => Ok(Cardinality::Required),
            "optional" => Ok(Cardinality::Optional),
            "repeated" => Ok(Cardinality::Repeated),
            other => Err(ProtocolError::InvalidSchema(format!(
                "unknown cardinality '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    UInt32,
    UInt64,
    Int32,
    Int64,
    SInt32,
    SInt64,
    Bool,
    Float,
    Double,
    String,
    /// Reference to a nested or shared message by name.
    Message(String),
}

impl FieldType {
    pub fn parse(name: &str) -> Self {
        match name {
            "uInt32" => FieldType::UInt32,
            "uInt64" => FieldType::UInt64,
            "int32" => FieldType::Int32,
            "int64" => FieldType::Int64,
            "sInt32" => FieldType::SInt32,
            "sInt64" => FieldType::SInt64,
            "bool" => FieldType::Bool,
            "float" => FieldType::Float,
            "double" => FieldType::Double,
            "string" => FieldType::String,
            other => FieldType::Message(other.to_string()),
        }
    }

    pub fn wire_type(&self) -> WireType {
        match self {
            FieldType::Double => WireType::Fixed64,
            FieldType::Float => WireType::Fixed32,
            FieldType::String | FieldType::Message(_) => WireType::LengthDelimited,
            _ => WireType::Varint,
        }
    }

    /// Numeric types are written as one key, a count and the inline values
    /// when repeated.
    pub fn is_packed(&self) -> bool {
        !matches!(self, FieldType::String | FieldType::Message(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub tag: u32,
    pub kind: FieldType,
    pub cardinality: Cardinality,
}

/// Field list of one message plus the messages declared inside it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageSchema {
    fields: Vec<FieldDescriptor>,
    by_tag: HashMap<u32, usize>,
    messages: HashMap<String, MessageSchema>,
}

impl MessageSchema {
    /// Parse a message description object.
    pub fn parse(description: &Map<String, Value>) -> Result<Self> {
        let mut schema = MessageSchema::default();

        for (key, value) in description {
            let parts: Vec<&str> = key.split_whitespace().collect();
            match parts.as_slice() {
                [MESSAGE_PREFIX, name] => {
                    let nested = value.as_object().ok_or_else(|| {
                        ProtocolError::InvalidSchema(format!("message '{name}' must be an object"))
                    })?;
                    schema
                        .messages
                        .insert((*name).to_string(), MessageSchema::parse(nested)?);
                }
                [cardinality, kind, name] => {
                    let tag = value
                        .as_u64()
                        .filter(|tag| (1..=MAX_FIELD_TAG).contains(tag))
                        .ok_or_else(|| {
                            ProtocolError::InvalidSchema(format!(
                                "field '{name}' needs a tag between 1 and {MAX_FIELD_TAG}"
                            ))
                        })? as u32;
                    schema.push(FieldDescriptor {
                        name: (*name).to_string(),
                        tag,
                        kind: FieldType::parse(kind),
                        cardinality: cardinality.parse()?,
                    })?;
                }
                _ => {
                    return Err(ProtocolError::InvalidSchema(format!(
                        "cannot parse declaration '{key}'"
                    )))
                }
            }
        }

        schema.fields.sort_by_key(|f| f.tag);
        schema.by_tag = schema
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.tag, i))
            .collect();
        Ok(schema)
    }

    fn push(&mut self, field: FieldDescriptor) -> Result<()> {
        if self.fields.iter().any(|f| f.tag == field.tag) {
            return Err(ProtocolError::InvalidSchema(format!(
                "duplicate tag {} on field '{}'",
                field.tag, field.name
            )));
        }
        if self.fields.iter().any(|f| f.name == field.name) {
            return Err(ProtocolError::InvalidSchema(format!(
                "duplicate field '{}'",
                field.name
            )));
        }
        self.fields.push(field);
        Ok(())
    }

    /// Fields in tag order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_by_tag(&self, tag: u32) -> Option<&FieldDescriptor> {
        self.by_tag.get(&tag).map(|&i| &self.fields[i])
    }

    pub fn nested(&self, name: &str) -> Option<&MessageSchema> {
        self.messages.get(name)
    }
}

/// Route name to message schema, plus messages shared across routes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaTable {
    routes: HashMap<String, MessageSchema>,
    messages: HashMap<String, MessageSchema>,
    source: Value,
}

impl SchemaTable {
    pub fn empty() -> Self {
        Self {
            source: Value::Object(Map::new()),
            ..Default::default()
        }
    }

    /// Parse a whole table. Nothing is returned unless every entry parses.
    pub fn parse(source: &Value) -> Result<Self> {
        let entries = source.as_object().ok_or_else(|| {
            ProtocolError::InvalidSchema("schema source must be a JSON object".to_string())
        })?;

        let mut table = SchemaTable {
            source: source.clone(),
            ..Default::default()
        };

        for (key, value) in entries {
            let description = value.as_object().ok_or_else(|| {
                ProtocolError::InvalidSchema(format!("entry '{key}' must be an object"))
            })?;
            let schema = MessageSchema::parse(description)?;
            match key.split_whitespace().collect::<Vec<_>>().as_slice() {
                [MESSAGE_PREFIX, name] => {
                    table.messages.insert((*name).to_string(), schema);
                }
                _ => {
                    table.routes.insert(key.clone(), schema);
                }
            }
        }

        Ok(table)
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(source)
            .map_err(|e| ProtocolError::InvalidSchema(format!("schema is not valid JSON: {e}")))?;
        Self::parse(&value)
    }

    pub fn route(&self, route: &str) -> Option<&MessageSchema> {
        self.routes.get(route)
    }

    pub fn has_route(&self, route: &str) -> bool {
        self.routes.contains_key(route)
    }

    /// Message shared at table level.
    pub fn message(&self, name: &str) -> Option<&MessageSchema> {
        self.messages.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// The JSON this table was parsed from.
    pub fn source(&self) -> &Value {
        &self.source
    }

    /// Resolve a message type from inside `scopes` (outermost first): the
    /// innermost declaring message wins, then the table-level messages.
    pub(crate) fn resolve<'a>(
        &'a self,
        scopes: &[&'a MessageSchema],
        name: &str,
    ) -> Option<&'a MessageSchema> {
        scopes
            .iter()
            .rev()
            .find_map(|scope| scope.nested(name))
            .or_else(|| self.message(name))
    }
}
