//! Task channel abstraction.

use async_trait::async_trait;
use imgtier_models::ProcessingTask;

use crate::delivery::TaskStream;
use crate::error::QueueResult;

/// Durable at-least-once channel carrying processing tasks.
#[async_trait]
pub trait TaskChannel: Send + Sync {
    /// Publish a task. Returns once the broker has accepted it, or fails
    /// within the configured publish budget.
    async fn publish(&self, task: &ProcessingTask) -> QueueResult<()>;

    /// Start consuming. The stream is infinite while the channel is open
    /// and cannot be restarted; open a new channel to consume again.
    async fn consume(&self) -> QueueResult<TaskStream>;

    /// Close the channel. Unsettled deliveries return to the queue.
    async fn close(&self) -> QueueResult<()>;

    fn is_connected(&self) -> bool;
}
