//! RabbitMQ channel via lapin.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use imgtier_models::{ProcessingTask, TASK_CONTENT_TYPE};
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, info};

use crate::channel::TaskChannel;
use crate::config::ChannelConfig;
use crate::delivery::{decode_delivery, Acknowledger, DeliveryHandle, RawDelivery, Rejection, TaskStream};
use crate::error::{QueueError, QueueResult};

/// AMQP delivery mode for messages that survive broker restarts.
const PERSISTENT: u8 = 2;

const REPLY_SUCCESS: u16 = 200;

/// Task channel backed by one AMQP connection.
pub struct AmqpChannel {
    connection: Connection,
    channel: Channel,
    config: ChannelConfig,
}

impl AmqpChannel {
    /// Connect and declare the topology.
    ///
    /// Declarations are idempotent, so every producer and consumer calls
    /// this with the same config.
    pub async fn open(config: ChannelConfig) -> QueueResult<Self> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        let channel = connection.create_channel().await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        if let Some(dlx) = &config.dead_letter_exchange {
            declare_dead_letter(&channel, dlx, config.dead_letter_queue.as_deref()).await?;
        }

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let mut queue_args = FieldTable::default();
        if let Some(dlx) = &config.dead_letter_exchange {
            queue_args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(dlx.as_str().into()),
            );
        }

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_args,
            )
            .await?;

        channel
            .queue_bind(
                &config.queue,
                &config.exchange,
                &config.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        channel
            .basic_qos(config.prefetch, BasicQosOptions::default())
            .await?;

        info!(
            exchange = %config.exchange,
            queue = %config.queue,
            routing_key = %config.routing_key,
            "AMQP channel open"
        );

        Ok(Self {
            connection,
            channel,
            config,
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }
}

async fn declare_dead_letter(channel: &Channel, exchange: &str, queue: Option<&str>) -> QueueResult<()> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    if let Some(queue) = queue {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                queue,
                exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }

    debug!("Declared dead-letter exchange {}", exchange);
    Ok(())
}

/// Await a publish confirmation, failing with `PublishTimeout` once `budget`
/// has elapsed.
async fn confirm_within<T>(
    budget: Duration,
    confirmed: impl Future<Output = QueueResult<T>>,
) -> QueueResult<T> {
    tokio::time::timeout(budget, confirmed)
        .await
        .map_err(|_| QueueError::PublishTimeout(budget))?
}

#[async_trait]
impl TaskChannel for AmqpChannel {
    async fn publish(&self, task: &ProcessingTask) -> QueueResult<()> {
        let payload = task.to_payload()?;
        let properties = BasicProperties::default()
            .with_content_type(TASK_CONTENT_TYPE.into())
            .with_delivery_mode(PERSISTENT);

        let confirmed = async {
            let confirmation = self
                .channel
                .basic_publish(
                    &self.config.exchange,
                    &self.config.routing_key,
                    BasicPublishOptions::default(),
                    &payload,
                    properties,
                )
                .await?
                .await?;
            Ok::<_, QueueError>(confirmation)
        };

        let confirmation = confirm_within(self.config.publish_timeout, confirmed).await?;

        if matches!(confirmation, Confirmation::Nack(_)) {
            return Err(QueueError::publish_failed(format!(
                "broker rejected task {}",
                task.id
            )));
        }

        debug!(task_id = %task.id, "Published task");
        Ok(())
    }

    async fn consume(&self) -> QueueResult<TaskStream> {
        let consumer = self
            .channel
            .basic_consume(
                &self.config.queue,
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::consume_failed(e.to_string()))?;

        info!(queue = %self.config.queue, "Consuming tasks");

        let policy = self.config.malformed_policy;
        let stream = consumer
            .map(|item| {
                item.map_err(QueueError::from).map(|delivery| {
                    let lapin::message::Delivery {
                        delivery_tag,
                        redelivered,
                        data,
                        acker,
                        ..
                    } = delivery;
                    RawDelivery {
                        payload: data,
                        handle: DeliveryHandle::new(AmqpAcker(acker), delivery_tag, redelivered),
                    }
                })
            })
            .filter_map(move |raw| decode_delivery(raw, policy))
            .boxed();

        Ok(stream)
    }

    async fn close(&self) -> QueueResult<()> {
        self.channel.close(REPLY_SUCCESS, "closing").await?;
        self.connection.close(REPLY_SUCCESS, "closing").await?;
        info!("AMQP channel closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> QueueResult<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| QueueError::ack_failed(e.to_string()))
    }

    async fn reject(&self, rejection: Rejection) -> QueueResult<()> {
        self.0
            .reject(BasicRejectOptions {
                requeue: rejection.requeue(),
            })
            .await
            .map(|_| ())
            .map_err(|e| QueueError::ack_failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfirmed_publish_times_out() {
        let budget = Duration::from_millis(20);
        let err = confirm_within(budget, futures_util::future::pending::<QueueResult<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::PublishTimeout(d) if d == budget));
    }

    #[tokio::test]
    async fn test_confirmation_within_budget() {
        let confirmed = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, QueueError>(7)
        };
        assert_eq!(confirm_within(Duration::from_secs(2), confirmed).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_publish_error_passes_through() {
        let failed = async { Err::<(), _>(QueueError::publish_failed("channel closed")) };
        let err = confirm_within(Duration::from_secs(2), failed).await.unwrap_err();
        assert!(matches!(err, QueueError::PublishFailed(_)));
    }
}
