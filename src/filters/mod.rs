//! # Handler Filters
//!
//! Hooks that run before and after each request is dispatched.
//!
//! Before filters run in registration order; the first failure skips the
//! dispatcher. After filters always run, in registration order, and see the
//! outcome so far. An after filter that fails turns a successful outcome into
//! that error.
//!
//! ## Filters
//! - **Serial**: one request at a time per connection, in arrival order
//! - **Timeout**: warn about requests that take too long
//! - **Time**: log the time used by each request

pub mod serial;
pub mod time;
pub mod timeout;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::FilterConfig;
use crate::error::Result;
use crate::service::dispatcher::{RequestContext, RouteDispatcher};
use crate::transport::ConnectionId;

pub use serial::SerialFilter;
pub use time::TimeFilter;
pub use timeout::TimeoutFilter;

/// Outcome of a dispatched request: the response body, if any.
pub type Outcome = Result<Option<Value>>;

#[async_trait]
pub trait HandlerFilter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn before(&self, _ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    async fn after(&self, _ctx: &mut RequestContext, _outcome: &Outcome) -> Result<()> {
        Ok(())
    }

    /// The connection is gone; drop any state kept for it.
    fn connection_closed(&self, _id: ConnectionId) {}
}

#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn HandlerFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain with the filters enabled in `config`.
    pub fn from_config(config: &FilterConfig) -> Self {
        let mut chain = Self::new();
        if config.serial {
            chain.push(SerialFilter::new(config.serial_timeout));
        }
        if config.timeout {
            chain.push(TimeoutFilter::new(config.request_timeout, config.max_size));
        }
        if config.time {
            chain.push(TimeFilter);
        }
        chain
    }

    pub fn push<F: HandlerFilter + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn with<F: HandlerFilter + 'static>(mut self, filter: F) -> Self {
        self.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Run before filters, the dispatcher and after filters for one request.
    pub async fn process(&self, ctx: &mut RequestContext, dispatcher: &dyn RouteDispatcher) -> Outcome {
        let admitted = self.before(ctx).await;
        self.complete(ctx, admitted, dispatcher).await
    }

    /// Run the before filters in order, stopping at the first failure.
    ///
    /// The connector awaits this for each request of a connection in arrival
    /// order before dispatching any later request, so filters that queue work
    /// here (the serial filter) see requests in network order.
    pub async fn before(&self, ctx: &mut RequestContext) -> Result<()> {
        for filter in &self.filters {
            if let Err(e) = filter.before(ctx).await {
                debug!(filter = filter.name(), route = %ctx.route, error = %e, "Before filter rejected request");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Dispatch a request that passed [`before`](Self::before), then run the
    /// after filters. A rejected request skips the dispatcher and its outcome
    /// is the rejection.
    pub async fn complete(
        &self,
        ctx: &mut RequestContext,
        admitted: Result<()>,
        dispatcher: &dyn RouteDispatcher,
    ) -> Outcome {
        let mut outcome = match admitted {
            Ok(()) => dispatcher.dispatch(ctx).await,
            Err(e) => Err(e),
        };

        for filter in &self.filters {
            if let Err(e) = filter.after(ctx, &outcome).await {
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }

    pub fn connection_closed(&self, id: ConnectionId) {
        for filter in &self.filters {
            filter.connection_closed(id);
        }
    }
}
