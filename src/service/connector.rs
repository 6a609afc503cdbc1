//! # Connector
//!
//! Owns the listeners and drives every accepted connection:
//!
//! 1. A processor turns the raw socket into a [`Connection`]
//! 2. One task per connection feeds inbound packages through the state machine
//!    and writes outbound packages, heartbeat replies and kicks
//! 3. Each request is decoded and handed to the connection's request worker,
//!    which runs the before filters in arrival order and then dispatches the
//!    request on its own task; the response returns through the connection's
//!    outbound queue
//!
//! Lifecycle changes are published as [`SessionEvent`]s.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{NetworkConfig, TransportMode};
use crate::core::message::MessageType;
use crate::core::package::{Package, PackageType, HEADER_SIZE};
use crate::error::{constants, ProtocolError, Result};
use crate::filters::{FilterChain, Outcome};
use crate::protobuf::SchemaStore;
use crate::protocol::coder::{InboundRequest, MessageCoder};
use crate::protocol::dictionary::RouteDictionary;
use crate::protocol::handshake::{HandshakeCommand, HandshakeRequest};
use crate::protocol::heartbeat::{sleep_until_deadline, HeartbeatMonitor, HeartbeatSettings};
use crate::protocol::kick::KickReason;
use crate::protocol::route::RouteRecord;
use crate::protocol::state::{ProtocolEvent, StateMachine};
use crate::service::dispatcher::{HandlerRegistry, RequestContext, RouteDispatcher};
use crate::transport::{
    Connection, ConnectionId, HybridListener, PackageSink, PackageStream, Processor, TransportKind,
    UdpProcessor,
};
use crate::utils::metrics::Metrics;

/// Accepted connections waiting for a connection task.
const ACCEPT_BACKLOG: usize = 1024;

/// Outbound packages queued per connection.
const OUTBOUND_BUFFER: usize = 256;

/// How long a closing connection may spend flushing its sink.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Code sent in the response body when a request fails.
pub const RESPONSE_ERROR_CODE: u16 = 500;

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    PeerClosed,
    Kicked(String),
    HeartbeatTimeout,
    HandshakeRejected(u16),
    ProtocolError(String),
    TransportError(String),
    Shutdown,
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connect {
        id: ConnectionId,
        remote: SocketAddr,
        transport: TransportKind,
    },
    Handshake {
        id: ConnectionId,
        request: HandshakeRequest,
    },
    Heartbeat {
        id: ConnectionId,
    },
    Message {
        id: ConnectionId,
        request: InboundRequest,
    },
    Kick {
        id: ConnectionId,
        reason: String,
    },
    Disconnect {
        id: ConnectionId,
        reason: DisconnectReason,
    },
}

enum Outbound {
    Package(Package),
    Kick(String),
}

pub struct ConnectorBuilder {
    config: NetworkConfig,
    dispatcher: Option<Arc<dyn RouteDispatcher>>,
    handler_routes: Vec<String>,
    filters: Option<FilterChain>,
    dictionary: Option<Arc<RouteDictionary>>,
    schemas: Option<Arc<SchemaStore>>,
    handshake: Option<HandshakeCommand>,
    check_client: Option<Box<dyn Fn(Option<&str>, Option<&str>) -> bool + Send + Sync>>,
    user_handshake: Option<Box<dyn Fn(&HandshakeRequest) -> Option<Value> + Send + Sync>>,
}

impl ConnectorBuilder {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            dispatcher: None,
            handler_routes: Vec::new(),
            filters: None,
            dictionary: None,
            schemas: None,
            handshake: None,
            check_client: None,
            user_handshake: None,
        }
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn RouteDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Dispatch through `registry`; its routes seed the route dictionary.
    pub fn handlers(mut self, registry: Arc<HandlerRegistry>) -> Result<Self> {
        self.handler_routes = registry.routes()?;
        self.dispatcher = Some(registry);
        Ok(self)
    }

    /// Replace the filter chain built from the configuration.
    pub fn filters(mut self, filters: FilterChain) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn dictionary(mut self, dictionary: Arc<RouteDictionary>) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    /// Use `schemas` instead of loading the configured schema files. Leave
    /// `use_protobuf` off in the configuration when supplying them here.
    pub fn schemas(mut self, schemas: Arc<SchemaStore>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    /// Reject handshakes from clients for which `check` returns `false`.
    pub fn client_check<F>(mut self, check: F) -> Self
    where
        F: Fn(Option<&str>, Option<&str>) -> bool + Send + Sync + 'static,
    {
        self.check_client = Some(Box::new(check));
        self
    }

    /// Add a `user` object to accepted handshake responses.
    pub fn user_handshake<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HandshakeRequest) -> Option<Value> + Send + Sync + 'static,
    {
        self.user_handshake = Some(Box::new(hook));
        self
    }

    /// Use a preconfigured handshake command. Heartbeat, dictionary and schema
    /// settings from the builder are not applied to it.
    pub fn handshake(mut self, handshake: HandshakeCommand) -> Self {
        self.handshake = Some(handshake);
        self
    }

    pub fn build(self) -> Result<(Arc<Connector>, mpsc::UnboundedReceiver<SessionEvent>)> {
        self.config.validate_strict()?;
        let server = &self.config.server;

        let dictionary = match self.dictionary {
            Some(dictionary) => Some(dictionary),
            None if server.use_dict => {
                let mut dictionary = RouteDictionary::new(self.handler_routes.iter().cloned())?;
                if let Some(path) = &server.dictionary_path {
                    let source = std::fs::read_to_string(path)?;
                    let user_routes: Vec<String> = serde_json::from_str(&source)?;
                    dictionary = dictionary.with_user_routes(user_routes)?;
                }
                info!(routes = dictionary.len(), version = dictionary.version(), "Route dictionary built");
                Some(Arc::new(dictionary))
            }
            None => None,
        };

        let schemas = match self.schemas {
            Some(schemas) => Some(schemas),
            None if server.use_protobuf => {
                let store = SchemaStore::new();
                if let Some(path) = &server.server_protos_path {
                    store.load_server_file(path)?;
                }
                if let Some(path) = &server.client_protos_path {
                    store.load_client_file(path)?;
                }
                Some(Arc::new(store))
            }
            None => None,
        };

        let heartbeat = server.heartbeat_settings();

        let handshake = match self.handshake {
            Some(handshake) => handshake,
            None => {
                let mut handshake = HandshakeCommand::new(heartbeat.interval_secs());
                if let Some(dictionary) = &dictionary {
                    handshake = handshake.with_dictionary(Arc::clone(dictionary));
                }
                if let Some(schemas) = &schemas {
                    handshake = handshake.with_schemas(Arc::clone(schemas));
                }
                if let Some(check) = self.check_client {
                    handshake = handshake.with_client_check(check);
                }
                if let Some(hook) = self.user_handshake {
                    handshake = handshake.with_user_handshake(hook);
                }
                handshake
            }
        };

        let mut coder = MessageCoder::new();
        if let Some(dictionary) = dictionary {
            coder = coder.with_dictionary(dictionary);
        }
        if let Some(schemas) = schemas {
            coder = coder.with_schemas(schemas);
        }

        let filters = self
            .filters
            .unwrap_or_else(|| FilterChain::from_config(&self.config.filters));
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(HandlerRegistry::new()) as Arc<dyn RouteDispatcher>);

        let (events, receiver) = mpsc::unbounded_channel();
        let connector = Arc::new(Connector {
            config: self.config,
            heartbeat,
            handshake,
            coder,
            filters,
            dispatcher,
            metrics: Arc::new(Metrics::new()),
            sessions: Mutex::new(HashMap::new()),
            events,
            shutdown: CancellationToken::new(),
        });
        Ok((connector, receiver))
    }
}

pub struct Connector {
    config: NetworkConfig,
    heartbeat: HeartbeatSettings,
    handshake: HandshakeCommand,
    coder: MessageCoder,
    filters: FilterChain,
    dispatcher: Arc<dyn RouteDispatcher>,
    metrics: Arc<Metrics>,
    sessions: Mutex<HashMap<ConnectionId, mpsc::Sender<Outbound>>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    shutdown: CancellationToken,
}

impl Connector {
    pub fn builder(config: NetworkConfig) -> ConnectorBuilder {
        ConnectorBuilder::new(config)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn coder(&self) -> &MessageCoder {
        &self.coder
    }

    pub fn heartbeat(&self) -> HeartbeatSettings {
        self.heartbeat
    }

    pub fn connection_count(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.sessions().contains_key(&id)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<ConnectionId, mpsc::Sender<Outbound>>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Bind the configured listener and start accepting. Returns the bound
    /// address.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let (connections, accepted) = mpsc::channel(ACCEPT_BACKLOG);
        let address = self.config.server.bind_address();
        let stop = self.shutdown.clone();

        let local = match self.config.server.transport {
            TransportMode::Hybrid => {
                let listener = HybridListener::bind(&address, connections).await?;
                let local = listener.local_addr()?;
                let token = listener.shutdown_token();
                tokio::spawn(async move {
                    stop.cancelled().await;
                    token.cancel();
                });
                tokio::spawn(async move {
                    if let Err(e) = listener.serve().await {
                        error!(error = %e, "Hybrid listener failed");
                    }
                });
                local
            }
            TransportMode::Udp => {
                let socket = UdpSocket::bind(&address).await?;
                let processor = Arc::new(UdpProcessor::new(Arc::new(socket), connections));
                let local = processor.local_addr()?;
                let serving = Arc::clone(&processor);
                tokio::spawn(async move {
                    if let Err(e) = serving.serve().await {
                        error!(error = %e, "UDP processor failed");
                    }
                });
                tokio::spawn(async move {
                    stop.cancelled().await;
                    processor.close();
                });
                local
            }
        };

        info!(%local, transport = ?self.config.server.transport, "Connector started");
        tokio::spawn(Arc::clone(self).accept_loop(accepted));
        Ok(local)
    }

    async fn accept_loop(self: Arc<Self>, mut accepted: mpsc::Receiver<Connection>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                connection = accepted.recv() => {
                    let Some(connection) = connection else { break };
                    self.accept(connection);
                }
            }
        }
        debug!("Accept loop finished");
    }

    /// Register `connection` and spawn its task. Connections over the limit
    /// are dropped.
    pub fn accept(self: &Arc<Self>, connection: Connection) {
        let (commands_tx, commands) = mpsc::channel(OUTBOUND_BUFFER);
        {
            let mut sessions = self.sessions();
            if sessions.len() >= self.config.server.max_connections {
                self.metrics.connection_rejected();
                warn!(
                    id = %connection.id,
                    remote = %connection.remote,
                    max = self.config.server.max_connections,
                    "Connection limit reached, dropping connection"
                );
                return;
            }
            sessions.insert(connection.id, commands_tx.clone());
        }
        tokio::spawn(Arc::clone(self).run_connection(connection, commands, commands_tx));
    }

    /// Encode and queue a PUSH message for connection `id`.
    pub async fn push(&self, id: ConnectionId, route: &str, body: &Value) -> Result<()> {
        let bytes = self.coder.encode_push(route, body)?;
        self.send(id, Outbound::Package(Package::new(PackageType::Data, bytes)))
            .await
    }

    /// Send a KICK to connection `id` and close it.
    pub async fn kick(&self, id: ConnectionId, reason: &str) -> Result<()> {
        self.send(id, Outbound::Kick(reason.to_string())).await
    }

    async fn send(&self, id: ConnectionId, command: Outbound) -> Result<()> {
        let sender = self
            .sessions()
            .get(&id)
            .cloned()
            .ok_or(ProtocolError::ConnectionClosed)?;
        sender
            .send(command)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Stop listening, close every connection and wait up to the configured
    /// shutdown timeout for the connection tasks to finish.
    pub async fn shutdown(&self) {
        info!("Shutting down connector. Waiting for connections to close...");
        self.shutdown.cancel();

        let deadline = tokio::time::sleep(self.config.server.shutdown_timeout);
        tokio::pin!(deadline);
        loop {
            let connections = self.connection_count();
            if connections == 0 {
                info!("All connections closed");
                break;
            }
            tokio::select! {
                _ = &mut deadline => {
                    warn!(connections, "Shutdown timeout reached, abandoning connections");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
        }
        self.metrics.log_metrics();
    }

    #[instrument(
        skip_all,
        fields(id = %connection.id, remote = %connection.remote, transport = %connection.transport)
    )]
    async fn run_connection(
        self: Arc<Self>,
        connection: Connection,
        commands: mpsc::Receiver<Outbound>,
        responder: mpsc::Sender<Outbound>,
    ) {
        let id = connection.id;
        self.metrics.connection_established();
        self.emit(SessionEvent::Connect {
            id,
            remote: connection.remote,
            transport: connection.transport,
        });
        debug!("Connection opened");

        let limit = self.config.server.max_pending_requests;
        let (requests, pending) = mpsc::channel(limit);
        let closed = CancellationToken::new();
        let worker = RequestWorker {
            connector: Arc::clone(&self),
            id,
            remote: connection.remote,
            transport: connection.transport,
            responder,
        };
        tokio::spawn(worker.run(pending, closed.clone()));

        let (inbound, outbound) = connection.into_parts();
        let mut heartbeat = HeartbeatMonitor::new(self.heartbeat);
        heartbeat.start();
        let mut task = ConnectionTask {
            connector: Arc::clone(&self),
            id,
            outbound,
            machine: StateMachine::new(),
            heartbeat,
            requests,
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        };

        let reason = task.run(inbound, commands).await;

        closed.cancel();
        task.machine.close();
        task.heartbeat.clear();
        self.sessions().remove(&id);
        self.filters.connection_closed(id);
        self.metrics.connection_closed();

        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, task.outbound.close())
            .await
            .is_err()
        {
            debug!("Timed out flushing outbound packages");
        }

        info!(?reason, "Connection closed");
        self.emit(SessionEvent::Disconnect { id, reason });
    }
}

/// A decoded request holding one of its connection's pending-request permits.
struct PendingRequest {
    request: InboundRequest,
    permit: OwnedSemaphorePermit,
}

struct ConnectionTask {
    connector: Arc<Connector>,
    id: ConnectionId,
    outbound: PackageSink,
    machine: StateMachine,
    heartbeat: HeartbeatMonitor,
    requests: mpsc::Sender<PendingRequest>,
    permits: Arc<Semaphore>,
    limit: usize,
}

impl ConnectionTask {
    async fn run(&mut self, mut inbound: PackageStream, mut commands: mpsc::Receiver<Outbound>) -> DisconnectReason {
        let shutdown = self.connector.shutdown.clone();
        loop {
            let deadline = self.heartbeat.deadline();
            tokio::select! {
                _ = shutdown.cancelled() => return DisconnectReason::Shutdown,

                command = commands.recv() => match command {
                    Some(Outbound::Package(package)) => {
                        if let Err(e) = self.send(package).await {
                            return DisconnectReason::TransportError(e.to_string());
                        }
                    }
                    Some(Outbound::Kick(reason)) => {
                        self.send_kick(&reason).await;
                        self.connector.metrics.kick();
                        self.connector.emit(SessionEvent::Kick { id: self.id, reason: reason.clone() });
                        return DisconnectReason::Kicked(reason);
                    }
                    None => return DisconnectReason::Shutdown,
                },

                _ = sleep_until_deadline(deadline) => {
                    info!(error = %ProtocolError::HeartbeatTimeout, "Closing connection");
                    self.connector.metrics.heartbeat_timeout();
                    self.send_kick(constants::ERR_HEARTBEAT_TIMEOUT).await;
                    return DisconnectReason::HeartbeatTimeout;
                }

                package = inbound.next() => match package {
                    None => return DisconnectReason::PeerClosed,
                    Some(Err(e)) => return self.fail(e),
                    Some(Ok(package)) => {
                        if let Err(reason) = self.on_package(package).await {
                            return reason;
                        }
                    }
                },
            }
        }
    }

    fn fail(&self, error: ProtocolError) -> DisconnectReason {
        if error.is_protocol_violation() {
            self.connector.metrics.protocol_error();
            warn!(error = %error, "Protocol violation, closing connection");
            DisconnectReason::ProtocolError(error.to_string())
        } else {
            debug!(error = %error, "Transport failed");
            DisconnectReason::TransportError(error.to_string())
        }
    }

    async fn send(&mut self, package: Package) -> Result<()> {
        let size = (HEADER_SIZE + package.body.len()) as u64;
        self.outbound.send(package).await?;
        self.connector.metrics.message_sent(size);
        Ok(())
    }

    async fn send_kick(&mut self, reason: &str) {
        match KickReason::new(reason).to_package() {
            Ok(package) => {
                if let Err(e) = self.send(package).await {
                    debug!(error = %e, "Failed to deliver kick");
                }
            }
            Err(e) => error!(error = %e, "Failed to encode kick"),
        }
    }

    async fn on_package(&mut self, package: Package) -> std::result::Result<(), DisconnectReason> {
        self.connector
            .metrics
            .message_received((HEADER_SIZE + package.body.len()) as u64);
        self.heartbeat.on_package();

        match self.machine.handle(package) {
            Ok(Some(event)) => self.on_event(event).await,
            Ok(None) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Queue `request` for the request worker in arrival order. A client with
    /// `limit` requests already pending is disconnected.
    fn enqueue(&self, request: InboundRequest) -> std::result::Result<(), DisconnectReason> {
        let overloaded = || self.fail(ProtocolError::TooManyRequests(self.limit));
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| overloaded())?;
        self.requests
            .try_send(PendingRequest { request, permit })
            .map_err(|_| overloaded())
    }

    async fn on_event(&mut self, event: ProtocolEvent) -> std::result::Result<(), DisconnectReason> {
        match event {
            ProtocolEvent::Handshake(request) => {
                self.connector.metrics.handshake_attempt();
                let reply = self
                    .connector
                    .handshake
                    .respond(&request)
                    .map_err(|e| DisconnectReason::ProtocolError(e.to_string()))?;
                self.send(reply.package.clone())
                    .await
                    .map_err(|e| DisconnectReason::TransportError(e.to_string()))?;

                if let Err(e) = reply.ensure_accepted() {
                    self.connector.metrics.handshake_rejected();
                    info!(error = %e, "Closing connection");
                    return Err(DisconnectReason::HandshakeRejected(reply.code));
                }
                self.connector.emit(SessionEvent::Handshake { id: self.id, request });
            }

            ProtocolEvent::Heartbeat => {
                if let Some(reply) = self.heartbeat.on_heartbeat() {
                    self.send(reply)
                        .await
                        .map_err(|e| DisconnectReason::TransportError(e.to_string()))?;
                }
                self.connector.emit(SessionEvent::Heartbeat { id: self.id });
            }

            ProtocolEvent::Message(body) => {
                let request = match self.connector.coder.decode(&body) {
                    Ok(request) => request,
                    Err(e) if e.is_protocol_violation() => return Err(self.fail(e)),
                    Err(e) => {
                        warn!(error = %e, "Dropping undecodable message");
                        return Ok(());
                    }
                };
                self.connector.emit(SessionEvent::Message {
                    id: self.id,
                    request: request.clone(),
                });

                match request.kind {
                    MessageType::Request | MessageType::Notify => self.enqueue(request)?,
                    kind => debug!(?kind, "Ignoring server-bound message of server-only type"),
                }
            }
        }
        Ok(())
    }
}

/// Runs the requests of one connection.
///
/// Before filters run here, one request at a time in arrival order; dispatch
/// and after filters run on a task per request.
#[derive(Clone)]
struct RequestWorker {
    connector: Arc<Connector>,
    id: ConnectionId,
    remote: SocketAddr,
    transport: TransportKind,
    responder: mpsc::Sender<Outbound>,
}

impl RequestWorker {
    async fn run(self, mut pending: mpsc::Receiver<PendingRequest>, closed: CancellationToken) {
        loop {
            let next = tokio::select! {
                _ = closed.cancelled() => break,
                next = pending.recv() => next,
            };
            let Some(PendingRequest { request, permit }) = next else {
                break;
            };

            let route = match RouteRecord::parse(&request.route) {
                Ok(route) => route,
                Err(e) => {
                    self.respond(&request, Err(e)).await;
                    continue;
                }
            };

            let mut ctx = RequestContext::new(self.id, self.remote, self.transport, route, request);
            let admitted = tokio::select! {
                _ = closed.cancelled() => break,
                admitted = self.connector.filters.before(&mut ctx) => admitted,
            };
            tokio::spawn(self.clone().finish(ctx, admitted, permit));
        }
        debug!(connection = %self.id, "Request worker finished");
    }

    async fn finish(self, mut ctx: RequestContext, admitted: Result<()>, permit: OwnedSemaphorePermit) {
        let outcome = self
            .connector
            .filters
            .complete(&mut ctx, admitted, self.connector.dispatcher.as_ref())
            .await;
        self.respond(&ctx.request, outcome).await;
        // Filter state, including the serial slot, is released only once the
        // response is queued.
        drop(ctx);
        drop(permit);
    }

    async fn respond(&self, request: &InboundRequest, outcome: Outcome) {
        let connector = &self.connector;
        let id = self.id;

        if let Err(ProtocolError::TaskTimeout(_)) = &outcome {
            connector.metrics.task_timeout();
        }

        let body = match outcome {
            Ok(Some(body)) => body,
            Ok(None) => Value::Object(Map::new()),
            Err(e) => {
                warn!(connection = %id, route = %request.route, error = %e, "Request failed");
                json!({ "code": RESPONSE_ERROR_CODE })
            }
        };

        if !request.expects_response() {
            return;
        }

        match connector.coder.encode_response(request.id, &request.route, &body) {
            Ok(bytes) => {
                let package = Package::new(PackageType::Data, bytes);
                if self.responder.send(Outbound::Package(package)).await.is_err() {
                    debug!(connection = %id, "Connection closed before response");
                }
            }
            Err(e) => error!(connection = %id, route = %request.route, error = %e, "Failed to encode response"),
        }
    }
}
