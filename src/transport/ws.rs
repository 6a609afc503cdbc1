//! WebSocket processor.
//!
//! The upgrade happens here; after that each binary frame carries one or more
//! whole packages, so no extra framing is needed. Text frames and control
//! frames carry no packages and are skipped.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{future, stream, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{debug, info};

use crate::core::package::Package;
use crate::error::{constants, ProtocolError, Result};
use crate::transport::{Connection, ConnectionSender, Processor, TransportKind, SETUP_TIMEOUT};

pub struct WsProcessor {
    connections: ConnectionSender,
    closed: AtomicBool,
}

impl WsProcessor {
    pub fn new(connections: ConnectionSender) -> Self {
        Self {
            connections,
            closed: AtomicBool::new(false),
        }
    }
}

fn frame_packages(frame: std::result::Result<WsMessage, tungstenite::Error>) -> Vec<Result<Package>> {
    match frame {
        Ok(WsMessage::Binary(data)) => match Package::decode_all(&data) {
            Ok(packages) => packages.into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        },
        Ok(_) => Vec::new(),
        Err(e) => vec![Err(ProtocolError::TransportError(e.to_string()))],
    }
}

#[async_trait]
impl Processor for WsProcessor {
    type Socket = TcpStream;

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn add(&self, stream: TcpStream) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let remote = stream.peer_addr()?;
        let socket = tokio::time::timeout(SETUP_TIMEOUT, tokio_tungstenite::accept_async(stream))
            .await
            .map_err(|_| ProtocolError::TransportError(constants::ERR_SETUP_TIMEOUT.into()))?
            .map_err(|e| ProtocolError::TransportError(e.to_string()))?;

        let (sink, frames) = socket.split();
        let inbound = frames.flat_map(|frame| stream::iter(frame_packages(frame)));
        let outbound = sink
            .sink_map_err(|e| ProtocolError::TransportError(e.to_string()))
            .with(|package: Package| future::ready(package.to_bytes().map(WsMessage::binary)));

        let connection = Connection::new(
            remote,
            TransportKind::WebSocket,
            Box::pin(inbound),
            Box::pin(outbound),
        );
        debug!(id = %connection.id, %remote, "WebSocket upgraded");

        self.connections
            .send(connection)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("WebSocket processor closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::package::PackageType;

    #[test]
    fn binary_frame_may_hold_several_packages() {
        let mut data = Package::encode(PackageType::Heartbeat, &[]).unwrap();
        data.extend(Package::encode(PackageType::Data, &[1, 2]).unwrap());
        let packages = frame_packages(Ok(WsMessage::binary(data)));
        assert_eq!(packages.len(), 2);
        assert_eq!(
            packages[1].as_ref().unwrap(),
            &Package::new(PackageType::Data, vec![1, 2])
        );
        assert!(frame_packages(Ok(WsMessage::text("hi"))).is_empty());
    }
}
