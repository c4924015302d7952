//! Queue error types.

use std::time::Duration;

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Publish not confirmed within {0:?}")]
    PublishTimeout(Duration),

    #[error("Consume failed: {0}")]
    ConsumeFailed(String),

    #[error("Acknowledgement failed: {0}")]
    AckFailed(String),

    #[error("Channel closed")]
    Closed,

    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn publish_failed(msg: impl Into<String>) -> Self {
        Self::PublishFailed(msg.into())
    }

    pub fn consume_failed(msg: impl Into<String>) -> Self {
        Self::ConsumeFailed(msg.into())
    }

    pub fn ack_failed(msg: impl Into<String>) -> Self {
        Self::AckFailed(msg.into())
    }
}
