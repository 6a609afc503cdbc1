use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::error::{ProtocolError, Result};
use crate::protocol::coder::InboundRequest;
use crate::protocol::route::RouteRecord;
use crate::transport::{ConnectionId, TransportKind};

/// Per-request state threaded through the filter chain and the dispatcher.
pub struct RequestContext {
    pub connection_id: ConnectionId,
    pub remote: SocketAddr,
    pub transport: TransportKind,
    pub route: RouteRecord,
    pub request: InboundRequest,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl RequestContext {
    pub fn new(
        connection_id: ConnectionId,
        remote: SocketAddr,
        transport: TransportKind,
        route: RouteRecord,
        request: InboundRequest,
    ) -> Self {
        Self {
            connection_id,
            remote,
            transport,
            route,
            request,
            extensions: HashMap::new(),
        }
    }

    /// Attach filter state, replacing any value of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast().ok())
            .map(|value| *value)
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("connection_id", &self.connection_id)
            .field("remote", &self.remote)
            .field("route", &self.route.route)
            .field("id", &self.request.id)
            .finish()
    }
}

/// Route dispatch boundary. Returns the response body, if any.
#[async_trait]
pub trait RouteDispatcher: Send + Sync {
    async fn dispatch(&self, ctx: &RequestContext) -> Result<Option<Value>>;
}

/// Owned view of a request handed to registered handlers.
#[derive(Debug, Clone)]
pub struct HandlerCall {
    pub connection_id: ConnectionId,
    pub remote: SocketAddr,
    pub route: RouteRecord,
    pub body: Value,
}

type HandlerFn = dyn Fn(HandlerCall) -> BoxFuture<'static, Result<Option<Value>>> + Send + Sync;

/// Route-to-handler table.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<HandlerFn>>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` for a `serverType.handler.method` route.
    pub fn register<F, Fut>(&self, route: &str, handler: F) -> Result<()>
    where
        F: Fn(HandlerCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
    {
        let record = RouteRecord::parse(route)?;
        let mut handlers = self.handlers.write().map_err(|_| {
            ProtocolError::Custom("Failed to acquire write lock on handler registry".to_string())
        })?;

        let handler: Arc<HandlerFn> = Arc::new(move |call| handler(call).boxed());
        handlers.insert(record.route, handler);
        Ok(())
    }

    /// Registered routes, sorted. Feeds the route dictionary.
    pub fn routes(&self) -> Result<Vec<String>> {
        let handlers = self.handlers.read().map_err(|_| {
            ProtocolError::Custom("Failed to acquire read lock on handler registry".to_string())
        })?;
        let mut routes: Vec<String> = handlers.keys().cloned().collect();
        routes.sort();
        Ok(routes)
    }

    fn lookup(&self, route: &str) -> Result<Arc<HandlerFn>> {
        let handlers = self.handlers.read().map_err(|_| {
            ProtocolError::Custom("Failed to acquire read lock on handler registry".to_string())
        })?;
        handlers
            .get(route)
            .cloned()
            .ok_or_else(|| ProtocolError::Handler(format!("no handler for route '{route}'")))
    }
}

#[async_trait]
impl RouteDispatcher for HandlerRegistry {
    async fn dispatch(&self, ctx: &RequestContext) -> Result<Option<Value>> {
        let handler = self.lookup(&ctx.route.route)?;
        handler(HandlerCall {
            connection_id: ctx.connection_id,
            remote: ctx.remote,
            route: ctx.route.clone(),
            body: ctx.request.body.clone(),
        })
        .await
    }
}
