//! Structured task logging.

use imgtier_models::ProcessingTask;
use tracing::{error, info, warn, Span};

/// Logs task lifecycle events with consistent `task_id` and `operation`
/// fields.
#[derive(Debug, Clone)]
pub struct TaskLogger {
    task_id: String,
    operation: String,
}

impl TaskLogger {
    pub fn new(task: &ProcessingTask, operation: &str) -> Self {
        Self {
            task_id: task.id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, source_path: &str, redelivered: bool) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            source_path = %source_path,
            redelivered,
            "Task started"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task warning: {}", message
        );
    }

    pub fn log_failure(&self, stage: &str, attempt: Option<u32>, message: &str) {
        error!(
            task_id = %self.task_id,
            operation = %self.operation,
            stage,
            attempt,
            "Task failed: {}", message
        );
    }

    pub fn log_completion(&self, variants: usize, bytes: u64, elapsed_ms: u128) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            variants,
            bytes,
            elapsed_ms = elapsed_ms as u64,
            "Task completed"
        );
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "task",
            task_id = %self.task_id,
            operation = %self.operation
        )
    }
}
