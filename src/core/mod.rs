//! # Core Protocol Components
//!
//! Low-level framing: packages, messages and their byte-level helpers.
//!
//! ## Components
//! - **Package**: outer frame with a type byte and 24-bit body length
//! - **Message**: envelope carried in DATA packages (id, type, route, body)
//! - **Codec**: Tokio codec for framing packages over byte streams
//! - **UTF-8**: code-point level string encoding used by the wire format
//!
//! ## Wire Format
//! ```text
//! Package := [Type(1)] [Length(3, BE)] [Body(N)]
//! Message := [Flag(1)] [Id(varint)]? [Route]? [Body(rest)]
//! ```
//!
//! ## Security
//! - Maximum body size: 16MB - 1 (24-bit length)
//! - Length validation before copying
//! - Unknown type bytes are rejected on the head

pub mod codec;
pub mod message;
pub mod package;
pub mod utf8;
