//! Quality variant worker.
//!
//! This crate provides:
//! - Task executor consuming from a `TaskChannel`
//! - Variant generation and persistence for each task
//! - Retry cap with per-task attempt tracking
//! - Backoff when (re)opening the task channel
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod reconnect;

pub use config::{AttemptTrackerKind, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::{failure_disposition, Disposition, ShutdownHandle, StopReason, TaskExecutor};
pub use logging::TaskLogger;
pub use processor::{ProcessOutcome, VariantProcessor};
