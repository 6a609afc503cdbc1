//! Schema-driven encoder for JSON payloads.

use serde_json::{Map, Value};

use crate::core::utf8;
use crate::error::{ProtocolError, Result};
use crate::protobuf::schema::{Cardinality, FieldDescriptor, FieldType, MessageSchema, SchemaTable};
use crate::protobuf::wire::{write_tag, write_varint, zigzag_encode};
use crate::protobuf::MAX_NESTING_DEPTH;

/// Encode `payload` for `route` using `table`.
///
/// The payload is validated against the schema first; a missing required
/// field or a value of the wrong type fails the call with
/// `ProtocolError::SchemaViolation` and no bytes are produced.
pub fn encode(table: &SchemaTable, route: &str, payload: &Value) -> Result<Vec<u8>> {
    let schema = table
        .route(route)
        .ok_or_else(|| ProtocolError::SchemaViolation(format!("no schema for route '{route}'")))?;
    let object = as_object(payload, route)?;

    let mut scopes = vec![schema];
    validate(table, &mut scopes, object, route)?;

    let mut out = Vec::new();
    let mut scopes = vec![schema];
    encode_message(table, &mut scopes, object, &mut out)?;
    Ok(out)
}

/// Check that every required field is present, recursing into message-typed
/// fields.
pub fn validate<'a>(
    table: &'a SchemaTable,
    scopes: &mut Vec<&'a MessageSchema>,
    object: &Map<String, Value>,
    path: &str,
) -> Result<()> {
    let Some(schema) = scopes.last().copied() else {
        return Ok(());
    };

    for field in schema.fields() {
        let value = object.get(&field.name).filter(|v| !v.is_null());
        let field_path = format!("{path}.{}", field.name);

        let Some(value) = value else {
            if field.cardinality == Cardinality::Required {
                return Err(ProtocolError::SchemaViolation(format!(
                    "missing required field '{field_path}'"
                )));
            }
            continue;
        };

        let FieldType::Message(type_name) = &field.kind else {
            continue;
        };
        let nested = table.resolve(scopes, type_name).ok_or_else(|| {
            ProtocolError::SchemaViolation(format!("unknown message type '{type_name}'"))
        })?;
        if scopes.len() >= MAX_NESTING_DEPTH {
            return Err(ProtocolError::SchemaViolation(format!(
                "'{field_path}' nested deeper than {MAX_NESTING_DEPTH} messages"
            )));
        }

        let items: Vec<&Value> = if field.cardinality == Cardinality::Repeated {
            as_array(value, &field_path)?.iter().collect()
        } else {
            vec![value]
        };

        for item in items {
            scopes.push(nested);
            let result = validate(table, scopes, as_object(item, &field_path)?, &field_path);
            scopes.pop();
            result?;
        }
    }

    Ok(())
}

fn encode_message<'a>(
    table: &'a SchemaTable,
    scopes: &mut Vec<&'a MessageSchema>,
    object: &Map<String, Value>,
    out: &mut Vec<u8>,
) -> Result<()> {
    let Some(schema) = scopes.last().copied() else {
        return Ok(());
    };

    for field in schema.fields() {
        let Some(value) = object.get(&field.name).filter(|v| !v.is_null()) else {
            continue;
        };

        if field.cardinality == Cardinality::Repeated {
            let items = as_array(value, &field.name)?;
            if items.is_empty() {
                continue;
            }
            if field.kind.is_packed() {
                write_tag(field.tag, field.kind.wire_type(), out);
                write_varint(items.len() as u64, out);
                for item in items {
                    encode_value(table, scopes, field, item, out)?;
                }
            } else {
                for item in items {
                    write_tag(field.tag, field.kind.wire_type(), out);
                    encode_value(table, scopes, field, item, out)?;
                }
            }
        } else {
            write_tag(field.tag, field.kind.wire_type(), out);
            encode_value(table, scopes, field, value, out)?;
        }
    }

    Ok(())
}

fn encode_value<'a>(
    table: &'a SchemaTable,
    scopes: &mut Vec<&'a MessageSchema>,
    field: &FieldDescriptor,
    value: &Value,
    out: &mut Vec<u8>,
) -> Result<()> {
    match &field.kind {
        FieldType::UInt32 => {
            let n = value
                .as_u64()
                .filter(|n| *n <= u32::MAX as u64)
                .ok_or_else(|| mismatch(field, value))?;
            write_varint(n, out);
        }
        FieldType::UInt64 => {
            let n = value.as_u64().ok_or_else(|| mismatch(field, value))?;
            write_varint(n, out);
        }
        FieldType::Int32 => {
            let n = signed(field, value, 0, i32::MAX as i64)?;
            write_varint(n as u64, out);
        }
        FieldType::Int64 => {
            let n = signed(field, value, 0, i64::MAX)?;
            write_varint(n as u64, out);
        }
        FieldType::SInt32 => {
            let n = signed(field, value, i32::MIN as i64, i32::MAX as i64)?;
            write_varint(zigzag_encode(n), out);
        }
        FieldType::SInt64 => {
            let n = value.as_i64().ok_or_else(|| mismatch(field, value))?;
            write_varint(zigzag_encode(n), out);
        }
        FieldType::Bool => {
            let b = value.as_bool().ok_or_else(|| mismatch(field, value))?;
            write_varint(b as u64, out);
        }
        FieldType::Float => {
            let f = value.as_f64().ok_or_else(|| mismatch(field, value))?;
            out.extend_from_slice(&(f as f32).to_le_bytes());
        }
        FieldType::Double => {
            let f = value.as_f64().ok_or_else(|| mismatch(field, value))?;
            out.extend_from_slice(&f.to_le_bytes());
        }
        FieldType::String => {
            let s = value.as_str().ok_or_else(|| mismatch(field, value))?;
            write_varint(utf8::encoded_len(s) as u64, out);
            utf8::encode_into(s, out);
        }
        FieldType::Message(type_name) => {
            let nested = table.resolve(scopes, type_name).ok_or_else(|| {
                ProtocolError::SchemaViolation(format!("unknown message type '{type_name}'"))
            })?;
            let object = as_object(value, &field.name)?;
            let mut inner = Vec::new();
            scopes.push(nested);
            let result = encode_message(table, scopes, object, &mut inner);
            scopes.pop();
            result?;
            write_varint(inner.len() as u64, out);
            out.extend_from_slice(&inner);
        }
    }
    Ok(())
}

fn signed(field: &FieldDescriptor, value: &Value, min: i64, max: i64) -> Result<i64> {
    value
        .as_i64()
        .filter(|n| (min..=max).contains(n))
        .ok_or_else(|| mismatch(field, value))
}

fn mismatch(field: &FieldDescriptor, value: &Value) -> ProtocolError {
    ProtocolError::SchemaViolation(format!(
        "field '{}' expects {:?}, got {value}",
        field.name, field.kind
    ))
}

fn as_object<'v>(value: &'v Value, path: &str) -> Result<&'v Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| ProtocolError::SchemaViolation(format!("'{path}' must be an object")))
}

fn as_array<'v>(value: &'v Value, path: &str) -> Result<&'v Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| ProtocolError::SchemaViolation(format!("'{path}' must be an array")))
}
