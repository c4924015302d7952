//! Task executor.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use imgtier_queue::{AttemptTracker, Delivery, Rejection, TaskChannel};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::TaskLogger;
use crate::metrics;
use crate::processor::VariantProcessor;

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Requeued,
    Discarded,
    /// Settling failed; the broker redelivers once the channel drops.
    Unsettled,
}

/// Why `TaskExecutor::run` returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    /// The consumer stream ended without a shutdown request.
    StreamEnded,
}

/// Requests a graceful stop of the executor.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Trigger on ctrl-c, or on SIGTERM where available.
    ///
    /// The SIGTERM handler is installed before this returns.
    pub fn trigger_on_signal(&self) -> std::io::Result<JoinHandle<()>> {
        #[cfg(unix)]
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let handle = self.clone();

        Ok(tokio::spawn(async move {
            let interrupted = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for ctrl-c: {}", e);
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminated = async move {
                terminate.recv().await;
            };
            #[cfg(not(unix))]
            let terminated = std::future::pending::<()>();

            tokio::select! {
                _ = interrupted => info!("Received SIGINT"),
                _ = terminated => info!("Received SIGTERM"),
            }
            handle.trigger();
        }))
    }
}

/// Choose the rejection for a failed task.
///
/// `attempt` is the failure count including this one, when known. Once it
/// reaches `max_attempts` the task is discarded regardless of `on_failure`.
/// A `max_attempts` of zero never discards on count alone.
pub fn failure_disposition(attempt: Option<u32>, max_attempts: u32, on_failure: Rejection) -> Rejection {
    match attempt {
        Some(count) if max_attempts > 0 && count >= max_attempts => Rejection::Discard,
        _ => on_failure,
    }
}

/// Consumes tasks one at a time and settles each before taking the next.
pub struct TaskExecutor {
    config: WorkerConfig,
    processor: VariantProcessor,
    tracker: Arc<dyn AttemptTracker>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl TaskExecutor {
    pub fn new(config: WorkerConfig, processor: VariantProcessor, tracker: Arc<dyn AttemptTracker>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            processor,
            tracker,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Consume from `channel` until shutdown, stream end or channel error.
    ///
    /// A shutdown request stops the loop from taking new deliveries; a task
    /// already in progress runs to completion and is settled first.
    pub async fn run(&self, channel: &dyn TaskChannel) -> WorkerResult<StopReason> {
        let mut stream = channel.consume().await?;
        let mut shutdown_rx = self.shutdown.subscribe();

        info!(
            qualities = ?self.processor.qualities(),
            max_attempts = self.config.max_attempts,
            "Task executor running"
        );

        loop {
            if *shutdown_rx.borrow_and_update() {
                info!("Shutdown requested, stopping executor");
                return Ok(StopReason::Shutdown);
            }

            let next = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        return Ok(StopReason::Shutdown);
                    }
                    continue;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    self.handle_delivery(delivery).await;
                }
                Some(Err(e)) => return Err(WorkerError::Queue(e)),
                None => return Ok(StopReason::StreamEnded),
            }
        }
    }

    /// Process one delivery and settle it.
    pub async fn handle_delivery(&self, delivery: Delivery) -> Disposition {
        let logger = TaskLogger::new(&delivery.task, "generate_variants");
        let span = logger.create_span();
        self.settle(delivery, logger).instrument(span).await
    }

    async fn settle(&self, delivery: Delivery, logger: TaskLogger) -> Disposition {
        let Delivery { task, handle } = delivery;
        logger.log_start(&task.source_path, handle.is_redelivered());

        let started = Instant::now();
        let result = match self.config.task_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.processor.process(&task))
                .await
                .unwrap_or_else(|_| {
                    Err(WorkerError::Timeout {
                        id: task.id.clone(),
                        timeout,
                    })
                }),
            None => self.processor.process(&task).await,
        };

        match result {
            Ok(outcome) => {
                if let Err(e) = self.tracker.clear(&task.id).await {
                    logger.log_warning(&format!("failed to clear attempt count: {}", e));
                }

                match handle.ack().await {
                    Ok(()) => {
                        let elapsed = started.elapsed();
                        metrics::record_task_completed(elapsed.as_secs_f64());
                        logger.log_completion(
                            outcome.locators.len(),
                            outcome.bytes_written,
                            elapsed.as_millis(),
                        );
                        Disposition::Acked
                    }
                    Err(e) => {
                        logger.log_warning(&format!("ack failed, task will be redelivered: {}", e));
                        Disposition::Unsettled
                    }
                }
            }
            Err(e) => {
                metrics::record_task_failed(e.stage());

                let attempt = if self.config.max_attempts == 0 {
                    None
                } else {
                    match self.tracker.record_failure(&task.id).await {
                        Ok(count) => Some(count),
                        Err(te) => {
                            logger.log_warning(&format!("failed to record attempt: {}", te));
                            None
                        }
                    }
                };
                logger.log_failure(e.stage(), attempt, &e.to_string());

                let rejection =
                    failure_disposition(attempt, self.config.max_attempts, self.config.failure_policy);

                if rejection == Rejection::Discard {
                    metrics::record_task_discarded();
                    logger.log_warning(&format!(
                        "discarding task after {} failed attempt(s)",
                        attempt.unwrap_or(1)
                    ));
                    if let Err(te) = self.tracker.clear(&task.id).await {
                        logger.log_warning(&format!("failed to clear attempt count: {}", te));
                    }
                }

                match handle.reject(rejection).await {
                    Ok(()) => match rejection {
                        Rejection::Requeue => Disposition::Requeued,
                        Rejection::Discard => Disposition::Discarded,
                    },
                    Err(re) => {
                        logger.log_warning(&format!("reject failed: {}", re));
                        Disposition::Unsettled
                    }
                }
            }
        }
    }
}
