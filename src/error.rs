//! # Error Types
//!
//! Error handling for the transport and session core.
//!
//! This module defines every error variant that can occur while framing bytes,
//! decoding structured payloads, driving the connection lifecycle or running
//! per-session tasks.
//!
//! ## Error Categories
//! - **Protocol Errors**: malformed or truncated packages and messages, unknown
//!   package/message types. The offending connection is closed.
//! - **Schema Errors**: structured payload does not match its schema. The encode
//!   call fails and nothing is sent.
//! - **Route Errors**: route string or code exceeds the wire limits.
//! - **Liveness Errors**: heartbeat and task timeouts.
//! - **I/O and Transport Errors**: socket and WebSocket failures.
//!
//! ## Example Usage
//! ```rust
//! use realtime_protocol::core::package::{Package, PackageType};
//! use realtime_protocol::error::{ProtocolError, Result};
//!
//! fn frame(body: &[u8]) -> Result<Vec<u8>> {
//!     Package::encode(PackageType::Data, body)
//! }
//!
//! match Package::from_bytes(&[4, 0, 0, 9, 1]) {
//!     Err(ProtocolError::MalformedPackage(reason)) => assert!(reason.contains("truncated")),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! # let _ = frame(b"ok");
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_TRUNCATED_HEADER: &str = "truncated package header";
    pub const ERR_TRUNCATED_BODY: &str = "truncated package body";
    pub const ERR_TRAILING_BYTES: &str = "trailing bytes after package";

    /// Message errors
    pub const ERR_EMPTY_MESSAGE: &str = "empty message";
    pub const ERR_TRUNCATED_ID: &str = "truncated message id";
    pub const ERR_ID_OVERFLOW: &str = "message id exceeds 64 bits";
    pub const ERR_TRUNCATED_ROUTE: &str = "truncated route";
    pub const ERR_INVALID_UTF8: &str = "invalid utf-8 sequence";

    /// Structured codec errors
    pub const ERR_TRUNCATED_VARINT: &str = "truncated varint";
    pub const ERR_TRUNCATED_FIELD: &str = "truncated field value";

    /// Synchronisation errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
    pub const ERR_TASK_DROPPED: &str = "serial task dropped before activation";

    /// Connection errors
    pub const ERR_HEARTBEAT_TIMEOUT: &str = "heartbeat timeout";
    pub const ERR_SETUP_TIMEOUT: &str = "connection setup timed out";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed package: {0}")]
    MalformedPackage(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unknown package type: {0}")]
    UnknownPackageType(u8),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Package body too large: {0} bytes")]
    OversizedPackage(usize),

    #[error("Unexpected package type {0} from peer")]
    UnexpectedPackage(u8),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Route overflow: {0}")]
    RouteOverflow(String),

    #[error("Unknown route code: {0}")]
    UnknownRouteCode(u32),

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Task timeout: {0}")]
    TaskTimeout(String),

    #[error("Task queue closed")]
    QueueClosed,

    #[error("Too many pending requests (limit {0})")]
    TooManyRequests(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Handshake rejected with code {0}")]
    HandshakeRejected(u16),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Errors that indicate a protocol violation by the peer. The connection that
    /// produced one of these is force-closed.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedPackage(_)
                | ProtocolError::MalformedMessage(_)
                | ProtocolError::UnknownPackageType(_)
                | ProtocolError::UnknownMessageType(_)
                | ProtocolError::OversizedPackage(_)
                | ProtocolError::UnexpectedPackage(_)
                | ProtocolError::UnknownRouteCode(_)
                | ProtocolError::TooManyRequests(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
