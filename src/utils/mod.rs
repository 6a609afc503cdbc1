//! # Utility Modules
//!
//! Supporting pieces shared by the protocol and service layers.
//!
//! ## Components
//! - **Task Manager**: per-key serial task queues with timeouts
//! - **Logging**: `tracing` subscriber setup
//! - **Metrics**: atomic connection and message counters

pub mod logging;
pub mod metrics;
pub mod task_manager;

pub use metrics::{Metrics, MetricsSnapshot};
pub use task_manager::{TaskHandle, TaskManager};
