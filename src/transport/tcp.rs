//! Raw TCP processor.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use crate::core::codec::PackageCodec;
use crate::error::{ProtocolError, Result};
use crate::transport::{Connection, ConnectionSender, Processor, TransportKind};

pub struct TcpProcessor {
    connections: ConnectionSender,
    closed: AtomicBool,
}

impl TcpProcessor {
    pub fn new(connections: ConnectionSender) -> Self {
        Self {
            connections,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Processor for TcpProcessor {
    type Socket = TcpStream;

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    async fn add(&self, stream: TcpStream) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let remote = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        let (sink, stream) = Framed::new(stream, PackageCodec).split();
        let connection = Connection::new(remote, TransportKind::Tcp, Box::pin(stream), Box::pin(sink));
        debug!(id = %connection.id, %remote, "TCP connection framed");

        self.connections
            .send(connection)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("TCP processor closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
