//! Task channel for image processing work.
//!
//! This crate provides:
//! - The `TaskChannel` trait with publish/consume/close
//! - `AmqpChannel`: durable RabbitMQ topology via lapin, publisher confirms
//! - `MemoryChannel`: in-process channel for tests and local runs
//! - Delivery handles whose terminal actions consume the handle
//! - Per-task attempt tracking (in-process or Redis)

pub mod amqp;
pub mod attempts;
pub mod channel;
pub mod config;
pub mod delivery;
pub mod error;
pub mod memory;

pub use amqp::AmqpChannel;
pub use attempts::{AttemptTracker, MemoryAttemptTracker, RedisAttemptTracker};
pub use channel::TaskChannel;
pub use config::ChannelConfig;
pub use delivery::{Acknowledger, Delivery, DeliveryHandle, Rejection, TaskStream};
pub use error::{QueueError, QueueResult};
pub use memory::MemoryChannel;
