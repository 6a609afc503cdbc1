//! Per-connection protocol state machine.
//!
//! ```text
//! INITED --HANDSHAKE--> WAIT_ACK --HANDSHAKE_ACK--> WORKING --(close)--> CLOSED
//! ```
//!
//! A package that arrives in a state that does not expect it is dropped
//! silently; this absorbs retransmits and connect/disconnect races. A package
//! type the server never accepts from a peer is a protocol violation and
//! closes the connection. `CLOSED` is absorbing.

use tracing::{debug, error};

use crate::core::package::{Package, PackageType};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::HandshakeRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Inited,
    WaitAck,
    Working,
    Closed,
}

/// Typed event produced by a valid package in the right state.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    Handshake(HandshakeRequest),
    /// Emitted on the handshake ack (heartbeat start) and on every client
    /// heartbeat.
    Heartbeat,
    /// DATA package body, still to be decoded as a message.
    Message(Vec<u8>),
}

#[derive(Debug)]
pub struct StateMachine {
    state: ConnectionState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Inited,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Feed one package.
    ///
    /// # Errors
    /// Returns `ProtocolError::UnexpectedPackage` for a package type peers may
    /// not send; the machine is closed when that happens.
    pub fn handle(&mut self, package: Package) -> Result<Option<ProtocolEvent>> {
        use ConnectionState::*;

        if self.state == Closed {
            return Ok(None);
        }

        let event = match (package.kind, self.state) {
            (PackageType::Handshake, Inited) => {
                let request = HandshakeRequest::parse(&package.body);
                self.state = WaitAck;
                Some(ProtocolEvent::Handshake(request))
            }
            (PackageType::HandshakeAck, WaitAck) => {
                self.state = Working;
                Some(ProtocolEvent::Heartbeat)
            }
            (PackageType::Heartbeat, Working) => Some(ProtocolEvent::Heartbeat),
            (PackageType::Data, Working) => Some(ProtocolEvent::Message(package.body)),
            (PackageType::Kick, _) => {
                error!(state = ?self.state, "Peer sent a package type the server does not accept");
                self.state = Closed;
                return Err(ProtocolError::UnexpectedPackage(package.kind.as_u8()));
            }
            (kind, state) => {
                debug!(?kind, ?state, "Dropping package outside its state");
                None
            }
        };

        Ok(event)
    }

    /// Move to `CLOSED`. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Closed;
        true
    }
}
