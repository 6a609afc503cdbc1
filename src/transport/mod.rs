//! # Transport Layer
//!
//! Turns raw sockets into [`Connection`]s: a package stream in, a package sink
//! out. Upstream code drives every connection the same way whether it came
//! from a TCP stream, an upgraded WebSocket or a UDP peer.
//!
//! ## Processors
//! - **TCP**: length-prefixed framing over a byte stream
//! - **WebSocket**: one or more packages per binary frame
//! - **UDP**: virtual per-peer connections keyed by source address
//! - **Hybrid**: one TCP listener that routes HTTP upgrades to the WebSocket
//!   processor and everything else to the TCP processor
//!
//! Each processor reports new connections on the channel it was built with.

pub mod hybrid;
pub mod tcp;
pub mod udp;
pub mod ws;

use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::core::package::Package;
use crate::error::{ProtocolError, Result};

pub use hybrid::HybridListener;
pub use tcp::TcpProcessor;
pub use udp::UdpProcessor;
pub use ws::WsProcessor;

/// How long an accepted stream may take to send its first byte and, for
/// WebSocket clients, to finish the HTTP upgrade.
pub const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Inbound packages in network order. The stream ends when the peer goes away.
pub type PackageStream = Pin<Box<dyn Stream<Item = Result<Package>> + Send>>;

/// Outbound packages.
pub type PackageSink = Pin<Box<dyn Sink<Package, Error = ProtocolError> + Send>>;

/// Channel on which processors publish accepted connections.
pub type ConnectionSender = tokio::sync::mpsc::Sender<Connection>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    WebSocket,
    Udp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Tcp => "tcp",
            TransportKind::WebSocket => "websocket",
            TransportKind::Udp => "udp",
        })
    }
}

/// A peer connection with its transport details hidden.
pub struct Connection {
    pub id: ConnectionId,
    pub remote: SocketAddr,
    pub transport: TransportKind,
    pub inbound: PackageStream,
    pub outbound: PackageSink,
}

impl Connection {
    pub fn new(
        remote: SocketAddr,
        transport: TransportKind,
        inbound: PackageStream,
        outbound: PackageSink,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            remote,
            transport,
            inbound,
            outbound,
        }
    }

    pub fn into_parts(self) -> (PackageStream, PackageSink) {
        (self.inbound, self.outbound)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("transport", &self.transport)
            .finish()
    }
}

/// Adapter from one kind of raw socket to [`Connection`]s.
#[async_trait]
pub trait Processor: Send + Sync {
    /// What `add` accepts: a stream for TCP and WebSocket, a datagram for UDP.
    type Socket: Send;

    fn kind(&self) -> TransportKind;

    /// Hand a raw socket to the processor.
    ///
    /// # Errors
    /// `ProtocolError::ConnectionClosed` once the processor is closed.
    async fn add(&self, socket: Self::Socket) -> Result<()>;

    /// Stop accepting sockets. Calling it again is a no-op.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
