//! Slow request warnings.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Result;
use crate::filters::{HandlerFilter, Outcome};
use crate::service::dispatcher::RequestContext;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(3000);
pub const DEFAULT_MAX_SIZE: usize = 500;

/// Timer attached to a tracked request. Dropping it stops tracking.
struct Tracked {
    timer: CancellationToken,
    outstanding: Arc<AtomicUsize>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.timer.cancel();
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Logs requests that are still running after `timeout`. At most `max_size`
/// requests are tracked at once; beyond that, new requests pass untracked.
pub struct TimeoutFilter {
    timeout: Duration,
    max_size: usize,
    outstanding: Arc<AtomicUsize>,
}

impl Default for TimeoutFilter {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT, DEFAULT_MAX_SIZE)
    }
}

impl TimeoutFilter {
    pub fn new(timeout: Duration, max_size: usize) -> Self {
        Self {
            timeout,
            max_size,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Requests currently tracked.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

#[async_trait]
impl HandlerFilter for TimeoutFilter {
    fn name(&self) -> &'static str {
        "timeout"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<()> {
        let count = self.outstanding.load(Ordering::Acquire);
        if count >= self.max_size {
            warn!(count, max_size = self.max_size, "Timeout filter is full, request not tracked");
            return Ok(());
        }
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        let timer = CancellationToken::new();
        let route = ctx.route.route.clone();
        let id = ctx.request.id;
        let timeout = self.timeout;
        let cancelled = timer.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    warn!(%route, id, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                }
            }
        });

        ctx.insert(Tracked {
            timer,
            outstanding: Arc::clone(&self.outstanding),
        });
        Ok(())
    }

    async fn after(&self, ctx: &mut RequestContext, _outcome: &Outcome) -> Result<()> {
        drop(ctx.remove::<Tracked>());
        Ok(())
    }
}
