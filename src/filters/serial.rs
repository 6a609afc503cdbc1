//! Per-connection request ordering.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::error;

use crate::error::{constants, ProtocolError, Result};
use crate::filters::{HandlerFilter, Outcome};
use crate::service::dispatcher::RequestContext;
use crate::transport::ConnectionId;
use crate::utils::task_manager::{TaskHandle, TaskManager, DEFAULT_TASK_TIMEOUT};

/// Holds the connection's queue slot until the request context is dropped,
/// which the connector does after the response has been queued.
struct SerialTask(TaskHandle<ConnectionId>);

impl Drop for SerialTask {
    fn drop(&mut self) {
        self.0.done();
    }
}

/// Holds each request until the previous request on the same connection has
/// finished or timed out.
pub struct SerialFilter {
    tasks: TaskManager<ConnectionId>,
    timeout: Duration,
}

impl Default for SerialFilter {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_TIMEOUT)
    }
}

impl SerialFilter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tasks: TaskManager::new(),
            timeout,
        }
    }

    pub fn tasks(&self) -> &TaskManager<ConnectionId> {
        &self.tasks
    }
}

#[async_trait]
impl HandlerFilter for SerialFilter {
    fn name(&self) -> &'static str {
        "serial"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let route = ctx.route.route.clone();
        let id = ctx.request.id;

        self.tasks.add_task(
            ctx.connection_id,
            move |task| {
                // Nobody is waiting any more; release the key right away.
                if let Err(task) = tx.send(task) {
                    task.done();
                }
            },
            Some(move || error!(%route, id, "Serial task timed out")),
            self.timeout,
        )?;

        let task = rx
            .await
            .map_err(|_| ProtocolError::Custom(constants::ERR_TASK_DROPPED.into()))?;
        ctx.insert(SerialTask(task));
        Ok(())
    }

    async fn after(&self, ctx: &mut RequestContext, _outcome: &Outcome) -> Result<()> {
        match ctx.get::<SerialTask>() {
            Some(SerialTask(task)) if task.timed_out() => {
                Err(ProtocolError::TaskTimeout(ctx.route.route.clone()))
            }
            _ => Ok(()),
        }
    }

    fn connection_closed(&self, id: ConnectionId) {
        self.tasks.close_queue(&id, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::tests::context;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn second_request_waits_for_first() {
        let filter = Arc::new(SerialFilter::new(Duration::from_secs(3)));
        let mut first = context(1);
        filter.before(&mut first).await.unwrap();

        let waiting = Arc::clone(&filter);
        let second = tokio::spawn(async move {
            let mut ctx = context(1);
            waiting.before(&mut ctx).await.unwrap();
            ctx
        });

        while filter.tasks().pending(&ConnectionId(1)) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!second.is_finished());

        filter.after(&mut first, &Ok(None)).await.unwrap();
        assert_eq!(filter.tasks().pending(&ConnectionId(1)), 1);
        drop(first);

        let mut second = second.await.unwrap();
        filter.after(&mut second, &Ok(None)).await.unwrap();
        drop(second);
        assert!(!filter.tasks().has_queue(&ConnectionId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn late_completion_is_a_task_timeout() {
        let filter = SerialFilter::new(Duration::from_millis(100));
        let mut ctx = context(2);
        filter.before(&mut ctx).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let result = filter.after(&mut ctx, &Ok(None)).await;
        assert!(matches!(result, Err(ProtocolError::TaskTimeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn other_connections_do_not_wait() {
        let filter = SerialFilter::default();
        let mut a = context(3);
        let mut b = context(4);
        filter.before(&mut a).await.unwrap();
        filter.before(&mut b).await.unwrap();
        assert_eq!(filter.tasks().queue_count(), 2);
        filter.after(&mut a, &Ok(None)).await.unwrap();
        filter.after(&mut b, &Ok(None)).await.unwrap();
        drop((a, b));
        assert_eq!(filter.tasks().queue_count(), 0);
    }
}
