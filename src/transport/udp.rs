//! UDP processor with virtual per-peer connections.
//!
//! The first datagram from an unseen `address:port` allocates a connection and
//! registers it in the peer table; later datagrams from the same address are
//! routed to it. When the connection's inbound stream is dropped (disconnect,
//! kick or heartbeat timeout) its entry is removed, so the next datagram from
//! that address starts a fresh connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use futures::{sink, stream, StreamExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::core::package::Package;
use crate::error::{ProtocolError, Result};
use crate::transport::{Connection, ConnectionId, ConnectionSender, Processor, TransportKind};

/// Largest datagram read from the socket.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Datagrams buffered per peer before new ones are dropped.
pub const PEER_BUFFER: usize = 256;

struct Peer {
    id: ConnectionId,
    datagrams: mpsc::Sender<Vec<u8>>,
}

type PeerTable = Mutex<HashMap<SocketAddr, Peer>>;

fn lock(peers: &PeerTable) -> MutexGuard<'_, HashMap<SocketAddr, Peer>> {
    peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a peer entry when its connection goes away.
struct PeerRelease {
    peers: Weak<PeerTable>,
    remote: SocketAddr,
    id: ConnectionId,
}

impl Drop for PeerRelease {
    fn drop(&mut self) {
        let Some(peers) = self.peers.upgrade() else {
            return;
        };
        let mut table = lock(&peers);
        // A newer connection may already own the address.
        if table.get(&self.remote).is_some_and(|peer| peer.id == self.id) {
            table.remove(&self.remote);
            debug!(id = %self.id, remote = %self.remote, "UDP peer released");
        }
    }
}

pub struct UdpProcessor {
    socket: Arc<UdpSocket>,
    peers: Arc<PeerTable>,
    connections: ConnectionSender,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl UdpProcessor {
    pub fn new(socket: Arc<UdpSocket>, connections: ConnectionSender) -> Self {
        Self {
            socket,
            peers: Arc::new(Mutex::new(HashMap::new())),
            connections,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Number of live virtual connections.
    pub fn peer_count(&self) -> usize {
        lock(&self.peers).len()
    }

    /// Connection currently bound to `remote`.
    pub fn peer_id(&self, remote: &SocketAddr) -> Option<ConnectionId> {
        lock(&self.peers).get(remote).map(|peer| peer.id)
    }

    /// Read datagrams until the processor is closed.
    #[instrument(skip(self), fields(local = ?self.socket.local_addr().ok()))]
    pub async fn serve(&self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        info!("UDP processor receiving");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("UDP processor stopped");
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, remote)) => {
                            if let Err(e) = self.add((remote, buf[..len].to_vec())).await {
                                if self.is_closed() {
                                    return Ok(());
                                }
                                warn!(%remote, error = %e, "Dropping datagram");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "UDP receive failed");
                            return Err(e.into());
                        }
                    }
                }
            }
        }
    }

    /// Route a datagram to its peer, or build the peer's connection if this
    /// is the first datagram from `remote`.
    fn route(&self, remote: SocketAddr, datagram: Vec<u8>) -> Option<Connection> {
        let mut table = lock(&self.peers);

        let datagram = match table.get(&remote) {
            Some(peer) => match peer.datagrams.try_send(datagram) {
                Ok(()) => return None,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(id = %peer.id, %remote, "UDP peer backlog full, dropping datagram");
                    return None;
                }
                // The connection is gone but its release has not run yet.
                Err(mpsc::error::TrySendError::Closed(datagram)) => datagram,
            },
            None => datagram,
        };

        let (tx, rx) = mpsc::channel(PEER_BUFFER);
        // Capacity is fresh, so the first datagram always fits.
        let _ = tx.try_send(datagram);

        let connection = self.connection(remote, rx);
        table.insert(
            remote,
            Peer {
                id: connection.id,
                datagrams: tx,
            },
        );
        debug!(id = %connection.id, %remote, peers = table.len(), "UDP peer registered");
        Some(connection)
    }

    fn connection(&self, remote: SocketAddr, datagrams: mpsc::Receiver<Vec<u8>>) -> Connection {
        let id = ConnectionId::next();
        let release = PeerRelease {
            peers: Arc::downgrade(&self.peers),
            remote,
            id,
        };

        // The release guard lives in the stream state, so dropping the
        // inbound stream frees the peer entry.
        let inbound = stream::unfold((datagrams, release), |(mut datagrams, release)| async move {
            let datagram = datagrams.recv().await?;
            let packages: Vec<Result<Package>> = match Package::decode_all(&datagram) {
                Ok(packages) => packages.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            Some((stream::iter(packages), (datagrams, release)))
        })
        .flatten();

        let outbound = sink::unfold(Arc::clone(&self.socket), move |socket, package: Package| async move {
            let bytes = package.to_bytes()?;
            socket.send_to(&bytes, remote).await?;
            Ok::<_, ProtocolError>(socket)
        });

        Connection {
            id,
            remote,
            transport: TransportKind::Udp,
            inbound: Box::pin(inbound),
            outbound: Box::pin(outbound),
        }
    }
}

#[async_trait]
impl Processor for UdpProcessor {
    type Socket = (SocketAddr, Vec<u8>);

    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    async fn add(&self, (remote, datagram): (SocketAddr, Vec<u8>)) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        match self.route(remote, datagram) {
            Some(connection) => self
                .connections
                .send(connection)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Ok(()),
        }
    }

    /// Stops the receive loop and drops every peer, ending their streams.
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        let dropped = {
            let mut table = lock(&self.peers);
            let count = table.len();
            table.clear();
            count
        };
        info!(peers = dropped, "UDP processor closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
