//! Application state.

use std::sync::Arc;

use imgtier_media::{Codec, JpegCodec};
use imgtier_queue::{AmqpChannel, ChannelConfig, TaskChannel};
use imgtier_storage::{open_store, BlobStore, StorageConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn BlobStore>,
    pub channel: Arc<dyn TaskChannel>,
    pub codec: Arc<dyn Codec>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn BlobStore>,
        channel: Arc<dyn TaskChannel>,
        codec: Arc<dyn Codec>,
    ) -> Self {
        Self {
            config,
            store,
            channel,
            codec,
        }
    }

    /// Create state from environment: configured blob store, AMQP task
    /// channel and the JPEG codec.
    pub async fn from_env(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = open_store(&StorageConfig::from_env()?)?;
        let channel = AmqpChannel::open(ChannelConfig::from_env()).await?;

        Ok(Self::new(
            config,
            store,
            Arc::new(channel),
            Arc::new(JpegCodec::new()),
        ))
    }
}
