//! Broker-backed channel tests.
//!
//! Run with a local RabbitMQ (and Redis for the tracker test):
//! `cargo test -p imgtier-queue -- --ignored`

use std::time::Duration;

use futures_util::StreamExt;
use imgtier_models::{ImageId, ProcessingTask};
use imgtier_queue::{
    AmqpChannel, AttemptTracker, ChannelConfig, RedisAttemptTracker, Rejection, TaskChannel,
};

fn isolated_config() -> ChannelConfig {
    let suffix = ImageId::new();
    ChannelConfig {
        exchange: format!("imgtier_test_exchange_{}", suffix),
        queue: format!("imgtier_test_queue_{}", suffix),
        routing_key: "imgtier_test".to_string(),
        ..ChannelConfig::from_env()
    }
}

#[tokio::test]
#[ignore = "requires RabbitMQ"]
async fn test_publish_consume_ack() {
    let channel = AmqpChannel::open(isolated_config()).await.unwrap();
    let task = ProcessingTask::new(ImageId::from("a1b2"), "/storage/a1/a1b2_100.jpg");
    channel.publish(&task).await.unwrap();

    let mut stream = channel.consume().await.unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(delivery.task, task);
    delivery.handle.ack().await.unwrap();

    channel.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires RabbitMQ"]
async fn test_requeued_task_is_redelivered() {
    let channel = AmqpChannel::open(isolated_config()).await.unwrap();
    let task = ProcessingTask::new(ImageId::from("c3d4"), "/storage/c3/c3d4_100.jpg");
    channel.publish(&task).await.unwrap();

    let mut stream = channel.consume().await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    first.handle.reject(Rejection::Requeue).await.unwrap();

    let second = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(second.task, task);
    assert!(second.handle.is_redelivered());
    second.handle.ack().await.unwrap();

    channel.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_attempt_tracker() {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let tracker = RedisAttemptTracker::new(&url).unwrap().with_ttl_secs(60);
    let id = ImageId::new();

    assert_eq!(tracker.record_failure(&id).await.unwrap(), 1);
    assert_eq!(tracker.record_failure(&id).await.unwrap(), 2);
    tracker.clear(&id).await.unwrap();
    assert_eq!(tracker.record_failure(&id).await.unwrap(), 1);
    tracker.clear(&id).await.unwrap();
}
