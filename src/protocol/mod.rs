//! # Protocol Layer
//!
//! Connection lifecycle on top of the wire codec.
//!
//! ## Components
//! - **State**: the `INITED → WAIT_ACK → WORKING → CLOSED` state machine
//! - **Handshake**: client handshake parsing and the server response
//! - **Heartbeat**: heartbeat replies and liveness deadlines
//! - **Kick**: the notice sent before the server drops a connection
//! - **Dictionary**: route compression codes
//! - **Coder**: message bodies through schemas or JSON
//! - **Route**: `serverType.handler.method` records

pub mod coder;
pub mod dictionary;
pub mod handshake;
pub mod heartbeat;
pub mod kick;
pub mod route;
pub mod state;

pub use coder::{InboundRequest, MessageCoder};
pub use dictionary::RouteDictionary;
pub use handshake::{HandshakeCommand, HandshakeReply, HandshakeRequest};
pub use heartbeat::{HeartbeatMonitor, HeartbeatSettings};
pub use kick::KickReason;
pub use route::RouteRecord;
pub use state::{ConnectionState, ProtocolEvent, StateMachine};

#[cfg(test)]
mod tests;
