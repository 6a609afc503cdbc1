//! Per-request timing log.

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::info;

use crate::error::Result;
use crate::filters::{HandlerFilter, Outcome};
use crate::service::dispatcher::RequestContext;

struct RequestStart(Instant);

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeFilter;

#[async_trait]
impl HandlerFilter for TimeFilter {
    fn name(&self) -> &'static str {
        "time"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<()> {
        ctx.insert(RequestStart(Instant::now()));
        Ok(())
    }

    async fn after(&self, ctx: &mut RequestContext, outcome: &Outcome) -> Result<()> {
        if let Some(RequestStart(start)) = ctx.remove::<RequestStart>() {
            info!(
                route = %ctx.route,
                connection = %ctx.connection_id,
                time_used_ms = start.elapsed().as_millis() as u64,
                ok = outcome.is_ok(),
                "Request handled"
            );
        }
        Ok(())
    }
}
