//! # Session Service
//!
//! Ties transports and the protocol layer into a running server.
//!
//! ## Components
//! - **Connector**: listeners, per-connection tasks, push and kick
//! - **Dispatcher**: request context, the route dispatch boundary and a
//!   closure-based handler registry

pub mod connector;
pub mod dispatcher;

pub use connector::{Connector, ConnectorBuilder, DisconnectReason, SessionEvent};
pub use dispatcher::{HandlerCall, HandlerRegistry, RequestContext, RouteDispatcher};
