//! Schema-driven decoder producing JSON payloads.

use serde_json::{Map, Number, Value};

use crate::core::utf8;
use crate::error::{ProtocolError, Result};
use crate::protobuf::schema::{Cardinality, FieldDescriptor, FieldType, MessageSchema, SchemaTable};
use crate::protobuf::wire::{read_tag, read_varint, skip_field, take, zigzag_decode};
use crate::protobuf::MAX_NESTING_DEPTH;

/// Decode `data` for `route` using `table`.
pub fn decode(table: &SchemaTable, route: &str, data: &[u8]) -> Result<Value> {
    let schema = table
        .route(route)
        .ok_or_else(|| ProtocolError::SchemaViolation(format!("no schema for route '{route}'")))?;
    let mut scopes = vec![schema];
    let object = decode_message(table, &mut scopes, data)?;
    Ok(Value::Object(object))
}

fn decode_message<'a>(
    table: &'a SchemaTable,
    scopes: &mut Vec<&'a MessageSchema>,
    data: &[u8],
) -> Result<Map<String, Value>> {
    let mut object = Map::new();
    let Some(schema) = scopes.last().copied() else {
        return Ok(object);
    };

    let mut pos = 0;
    while pos < data.len() {
        let (tag, wire) = read_tag(data, &mut pos)?;

        let Some(field) = schema.field_by_tag(tag) else {
            skip_field(data, &mut pos, wire)?;
            continue;
        };

        if wire != field.kind.wire_type() {
            return Err(ProtocolError::MalformedMessage(format!(
                "field '{}' arrived with wire type {:?}",
                field.name, wire
            )));
        }

        if field.cardinality == Cardinality::Repeated {
            let slot = object
                .entry(field.name.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            let mut items = Vec::new();
            if field.kind.is_packed() {
                let count = read_varint(data, &mut pos)?;
                for _ in 0..count {
                    items.push(decode_value(table, scopes, field, data, &mut pos)?);
                }
            } else {
                items.push(decode_value(table, scopes, field, data, &mut pos)?);
            }
            if let Value::Array(existing) = slot {
                existing.extend(items);
            }
        } else {
            let value = decode_value(table, scopes, field, data, &mut pos)?;
            object.insert(field.name.clone(), value);
        }
    }

    Ok(object)
}

fn decode_value<'a>(
    table: &'a SchemaTable,
    scopes: &mut Vec<&'a MessageSchema>,
    field: &FieldDescriptor,
    data: &[u8],
    pos: &mut usize,
) -> Result<Value> {
    let value = match &field.kind {
        FieldType::UInt32 => Value::from(read_varint(data, pos)? as u32),
        FieldType::UInt64 => Value::from(read_varint(data, pos)?),
        FieldType::Int32 => Value::from(read_varint(data, pos)? as i64 as i32),
        FieldType::Int64 => Value::from(read_varint(data, pos)? as i64),
        FieldType::SInt32 => Value::from(zigzag_decode(read_varint(data, pos)?) as i32),
        FieldType::SInt64 => Value::from(zigzag_decode(read_varint(data, pos)?)),
        FieldType::Bool => Value::Bool(read_varint(data, pos)? != 0),
        FieldType::Float => {
            let raw = take(data, pos, 4)?;
            let f = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            float(f as f64)
        }
        FieldType::Double => {
            let raw = take(data, pos, 8)?;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            float(f64::from_le_bytes(bytes))
        }
        FieldType::String => {
            let len = read_varint(data, pos)? as usize;
            Value::String(utf8::decode(take(data, pos, len)?)?)
        }
        FieldType::Message(type_name) => {
            let nested = table.resolve(scopes, type_name).ok_or_else(|| {
                ProtocolError::MalformedMessage(format!("unknown message type '{type_name}'"))
            })?;
            if scopes.len() >= MAX_NESTING_DEPTH {
                return Err(ProtocolError::MalformedMessage(format!(
                    "field '{}' nested deeper than {MAX_NESTING_DEPTH} messages",
                    field.name
                )));
            }
            let len = read_varint(data, pos)? as usize;
            let inner = take(data, pos, len)?;
            scopes.push(nested);
            let result = decode_message(table, scopes, inner);
            scopes.pop();
            Value::Object(result?)
        }
    };
    Ok(value)
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}
