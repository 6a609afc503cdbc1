//! # Structured Message Codec
//!
//! Schema-driven binary encoding of application payloads, used instead of JSON
//! for routes that have a registered schema.
//!
//! ## Encoding
//! - Field key: `(tag << 3) | wire_type` as a varint. Wire types are 0 for
//!   integers and booleans, 1 for doubles, 2 for strings and messages, 5 for floats
//! - Unsigned and plain integers: varint. Signed (`sInt32`/`sInt64`): zig-zag
//!   then varint. Plain `int32`/`int64` take non-negative values only; use the
//!   zig-zag types for negative numbers
//! - `float`/`double`: little-endian IEEE-754
//! - Strings and nested messages: varint byte length followed by the bytes
//! - Repeated numeric fields: one key, a varint count, then the values.
//!   Repeated strings and messages: one key/value pair per element
//! - Messages nest at most [`MAX_NESTING_DEPTH`] levels deep, counting the
//!   route's own message
//!
//! Payloads are `serde_json::Value` objects, matching what the JSON fallback
//! produces, so handlers see the same shape either way.

pub mod decoder;
pub mod encoder;
pub mod schema;
pub mod store;
pub mod wire;

pub use schema::{Cardinality, FieldDescriptor, FieldType, MessageSchema, SchemaTable};
pub use store::{SchemaSet, SchemaStore};

/// Deepest chain of nested messages accepted by the encoder and decoder.
pub const MAX_NESTING_DEPTH: usize = 64;
