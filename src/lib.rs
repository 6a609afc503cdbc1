//! # realtime-protocol
//!
//! Transport and session core for real-time game and chat servers.
//!
//! Clients connect over raw TCP, WebSocket (both on one port) or UDP and speak
//! a small binary protocol: typed packages carrying handshakes, heartbeats,
//! kicks and application messages. Message routes may be compressed through a
//! shared dictionary and bodies encoded through per-route schemas.
//!
//! ## Layers
//! - [`core`]: package and message wire formats
//! - [`protobuf`]: schema-driven body encoding
//! - [`protocol`]: connection state machine, handshake, heartbeat and routes
//! - [`transport`]: TCP, WebSocket and UDP processors
//! - [`filters`]: per-request before/after hooks
//! - [`service`]: the connector that runs it all
//! - [`utils`]: per-key task queues, logging and metrics
//!
//! ## Quick start
//! ```no_run
//! use std::sync::Arc;
//! use realtime_protocol::config::NetworkConfig;
//! use realtime_protocol::service::{Connector, HandlerRegistry};
//! use serde_json::json;
//!
//! # async fn run() -> realtime_protocol::error::Result<()> {
//! let registry = Arc::new(HandlerRegistry::new());
//! registry.register("chat.chatHandler.send", |call| async move {
//!     Ok(Some(json!({ "code": 200, "echo": call.body })))
//! })?;
//!
//! let (connector, _events) = Connector::builder(NetworkConfig::default())
//!     .handlers(registry)?
//!     .build()?;
//! let addr = connector.start().await?;
//! println!("listening on {addr}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod filters;
pub mod protobuf;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::NetworkConfig;
pub use crate::core::message::{Message, MessageType, Route};
pub use crate::core::package::{Package, PackageType};
pub use crate::error::{ProtocolError, Result};
pub use crate::service::{Connector, HandlerRegistry, SessionEvent};
