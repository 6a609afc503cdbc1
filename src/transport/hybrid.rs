//! One TCP port for both raw TCP and WebSocket clients.
//!
//! A raw client's first byte is a package type (1..=5); a WebSocket client
//! opens with an HTTP `GET`. The listener peeks at the first byte without
//! consuming it and hands the stream to the matching processor.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{constants, ProtocolError, Result};
use crate::transport::{ConnectionSender, Processor, TcpProcessor, WsProcessor, SETUP_TIMEOUT};

/// First byte of an HTTP upgrade request.
const HTTP_GET: u8 = b'G';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Tcp,
    WebSocket,
    Closed,
}

/// Decide which processor gets `stream` without consuming any bytes.
pub async fn sniff(stream: &TcpStream) -> Result<StreamKind> {
    let mut first = [0u8; 1];
    let read = stream.peek(&mut first).await?;
    Ok(match (read, first[0]) {
        (0, _) => StreamKind::Closed,
        (_, HTTP_GET) => StreamKind::WebSocket,
        _ => StreamKind::Tcp,
    })
}

pub struct HybridListener {
    listener: TcpListener,
    tcp: Arc<TcpProcessor>,
    ws: Arc<WsProcessor>,
    shutdown: CancellationToken,
}

impl HybridListener {
    pub async fn bind(addr: &str, connections: ConnectionSender) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            tcp: Arc::new(TcpProcessor::new(connections.clone())),
            ws: Arc::new(WsProcessor::new(connections)),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Token that stops [`serve`](Self::serve) and closes both processors.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until shut down. Each accepted stream is sniffed and
    /// handed off on its own task so a silent client cannot stall the loop.
    #[instrument(skip(self), fields(local = ?self.listener.local_addr().ok()))]
    pub async fn serve(self) -> Result<()> {
        info!("Hybrid listener accepting");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.tcp.close();
                    self.ws.close();
                    info!("Hybrid listener stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, remote)) => {
                            let tcp = Arc::clone(&self.tcp);
                            let ws = Arc::clone(&self.ws);
                            tokio::spawn(async move {
                                if let Err(e) = dispatch(stream, &tcp, &ws).await {
                                    warn!(%remote, error = %e, "Failed to set up connection");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept failed");
                        }
                    }
                }
            }
        }
    }
}

async fn dispatch(stream: TcpStream, tcp: &TcpProcessor, ws: &WsProcessor) -> Result<()> {
    let kind = tokio::time::timeout(SETUP_TIMEOUT, sniff(&stream))
        .await
        .map_err(|_| ProtocolError::TransportError(constants::ERR_SETUP_TIMEOUT.into()))??;
    match kind {
        StreamKind::WebSocket => ws.add(stream).await,
        StreamKind::Tcp => tcp.add(stream).await,
        StreamKind::Closed => {
            debug!("Peer closed before sending data");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn silent_client_is_dropped_after_setup_timeout() {
        let (tx, mut rx) = mpsc::channel(1);
        let listener = HybridListener::bind("127.0.0.1:0", tx).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = listener.shutdown_token();
        tokio::spawn(listener.serve());

        let mut client = TcpStream::connect(addr).await.unwrap();
        let started = Instant::now();
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
        assert!(started.elapsed() >= SETUP_TIMEOUT);
        assert!(rx.try_recv().is_err());
        shutdown.cancel();
    }
}
