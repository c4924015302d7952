//! Quality variant worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use imgtier_media::JpegCodec;
use imgtier_queue::{
    AmqpChannel, AttemptTracker, ChannelConfig, MemoryAttemptTracker, RedisAttemptTracker,
    TaskChannel,
};
use imgtier_storage::{open_store, StorageConfig};
use imgtier_worker::reconnect::{with_backoff, Backoff, GaveUp};
use imgtier_worker::{metrics, AttemptTrackerKind, StopReason, TaskExecutor, VariantProcessor, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("imgtier=info,imgtier_worker=info,lapin=warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("Starting imgtier-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Err(e) = metrics::init_metrics(config.metrics_port) {
        error!("Failed to initialize metrics: {}", e);
        std::process::exit(1);
    }

    let store = match StorageConfig::from_env().and_then(|c| open_store(&c)) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open blob store: {}", e);
            std::process::exit(1);
        }
    };

    let tracker: Arc<dyn AttemptTracker> = match config.attempt_tracker {
        AttemptTrackerKind::Memory => Arc::new(MemoryAttemptTracker::new()),
        AttemptTrackerKind::Redis => match RedisAttemptTracker::new(&config.redis_url) {
            Ok(tracker) => Arc::new(tracker),
            Err(e) => {
                error!("Failed to create attempt tracker: {}", e);
                std::process::exit(1);
            }
        },
    };

    let processor = VariantProcessor::new(store, Arc::new(JpegCodec::new()), config.qualities.clone());
    let executor = TaskExecutor::new(config.clone(), processor, tracker);

    // Setup signal handlers
    if let Err(e) = executor.shutdown_handle().trigger_on_signal() {
        error!("Failed to install signal handlers: {}", e);
        std::process::exit(1);
    }

    let channel_config = ChannelConfig::from_env();
    let backoff = Backoff::new(config.connect_retries);

    while !executor.is_shutting_down() {
        let channel = match with_backoff(&backoff, "amqp", || AmqpChannel::open(channel_config.clone())).await {
            Ok(channel) => channel,
            Err(GaveUp { error, attempts }) => {
                error!("Failed to open task channel after {} attempts: {}", attempts, error);
                std::process::exit(1);
            }
        };

        let outcome = executor.run(&channel).await;

        // Unsettled deliveries go back to the queue on close
        if let Err(e) = channel.close().await {
            warn!("Failed to close task channel: {}", e);
        }

        match outcome {
            Ok(StopReason::Shutdown) => break,
            Ok(StopReason::StreamEnded) => warn!("Consumer stream ended, reconnecting"),
            Err(e) => warn!("Task channel lost, reconnecting: {}", e),
        }
    }

    info!("Worker shutdown complete");
}
