//! RabbitMQ queue client
//!
//! Declares the full topology on connect: the main queue, a direct durable
//! dead-letter exchange named `{queue}.dlx`, and a dead-letter queue
//! `{queue}.dlq` bound to it. The main queue dead-letters into that pair.
//!
//! Publications use persistent delivery and block on publisher confirms
//! with a 5-second deadline. Consumption never auto-acks: handler errors
//! are republished with an incremented `x-retries` header until the retry
//! budget is exhausted, then nacked without requeue so the broker forwards
//! the message to the DLQ.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{error, info, warn};

use nfe_common::{NfeError, Result};

use super::{Job, JobHandler, JobPublisher};

/// Deadline for a broker publish acknowledgment.
const PUBLISH_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry counter carried in the message headers.
const RETRIES_HEADER: &str = "x-retries";

/// Connection settings for the queue client.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub url: String,
    pub queue_name: String,
    pub max_retries: u32,
    pub prefetch: u16,
}

/// RabbitMQ-backed job queue with publisher confirms, bounded retries
/// and dead-letter routing.
pub struct RabbitMqQueue {
    _connection: Connection,
    channel: Channel,
    queue_name: String,
    max_retries: u32,
}

impl RabbitMqQueue {
    /// Connect and declare the queue topology.
    pub async fn connect(settings: &QueueSettings) -> Result<Self> {
        let connection =
            Connection::connect(&settings.url, ConnectionProperties::default())
                .await
                .map_err(|e| NfeError::queue("connect", e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| NfeError::queue("open channel", e.to_string()))?;

        let dlx_name = dlx_name(&settings.queue_name);
        let dlq_name = dlq_name(&settings.queue_name);

        channel
            .exchange_declare(
                &dlx_name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| NfeError::queue(format!("declare exchange {}", dlx_name), e.to_string()))?;

        channel
            .queue_declare(
                &dlq_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| NfeError::queue(format!("declare queue {}", dlq_name), e.to_string()))?;

        channel
            .queue_bind(
                &dlq_name,
                &dlx_name,
                &dlq_name,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| NfeError::queue(format!("bind {} to {}", dlq_name, dlx_name), e.to_string()))?;

        let mut arguments = FieldTable::default();
        arguments.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(dlx_name.clone().into()),
        );
        arguments.insert(
            ShortString::from("x-dead-letter-routing-key"),
            AMQPValue::LongString(dlq_name.clone().into()),
        );

        channel
            .queue_declare(
                &settings.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                arguments,
            )
            .await
            .map_err(|e| {
                NfeError::queue(format!("declare queue {}", settings.queue_name), e.to_string())
            })?;

        channel
            .basic_qos(settings.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| {
                NfeError::queue(format!("set prefetch {}", settings.prefetch), e.to_string())
            })?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| NfeError::queue("enable publisher confirms", e.to_string()))?;

        info!(
            queue = %settings.queue_name,
            dlx = %dlx_name,
            dlq = %dlq_name,
            prefetch = settings.prefetch,
            max_retries = settings.max_retries,
            "queue topology declared"
        );

        Ok(Self {
            _connection: connection,
            channel,
            queue_name: settings.queue_name.clone(),
            max_retries: settings.max_retries,
        })
    }

    /// Stream deliveries to `handler` until `shutdown` resolves.
    ///
    /// Each delivery is dispatched on its own task, so up to `prefetch`
    /// handlers run concurrently (the broker withholds further deliveries
    /// while that many are unacknowledged). When `shutdown` fires, no new
    /// deliveries are accepted; in-flight handlers finish naturally.
    pub async fn consume<H>(
        &self,
        handler: Arc<H>,
        shutdown: impl std::future::Future<Output = ()> + Send,
    ) -> Result<()>
    where
        H: JobHandler + 'static,
    {
        let mut consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                "nfe-drop-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| NfeError::queue("start consume", e.to_string()))?;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(queue = %self.queue_name, "shutdown requested, stopping consumer");
                    return Ok(());
                }
                delivery = consumer.next() => {
                    let delivery = match delivery {
                        Some(Ok(delivery)) => delivery,
                        Some(Err(e)) => {
                            return Err(NfeError::queue("receive delivery", e.to_string()));
                        }
                        None => {
                            return Err(NfeError::queue("receive delivery", "message stream closed"));
                        }
                    };

                    let channel = self.channel.clone();
                    let queue_name = self.queue_name.clone();
                    let max_retries = self.max_retries;
                    let handler = Arc::clone(&handler);

                    tokio::spawn(async move {
                        process_delivery(channel, queue_name, max_retries, delivery, handler).await;
                    });
                }
            }
        }
    }
}

#[async_trait]
impl JobPublisher for RabbitMqQueue {
    async fn publish(&self, job: &Job) -> Result<()> {
        let body = serde_json::to_vec(job)?;
        publish_with_confirm(&self.channel, &self.queue_name, &body, 0).await
    }
}

async fn process_delivery<H>(
    channel: Channel,
    queue_name: String,
    max_retries: u32,
    delivery: lapin::message::Delivery,
    handler: Arc<H>,
) where
    H: JobHandler,
{
    let job: Job = match serde_json::from_slice(&delivery.data) {
        Ok(job) => job,
        Err(e) => {
            error!(error = %e, "failed to decode job envelope, dropping message");
            ack(&delivery).await;
            return;
        }
    };

    match handler.handle(job.clone()).await {
        Ok(()) => {
            ack(&delivery).await;
        }
        Err(e) => {
            let retries = extract_retries(delivery.properties.headers().as_ref());

            if retries < max_retries {
                warn!(
                    path = %job.path,
                    filename = %job.filename,
                    kind = %job.kind,
                    retries,
                    max_retries,
                    error = %e,
                    "job failed, republishing for retry"
                );

                if let Err(publish_err) =
                    publish_with_confirm(&channel, &queue_name, &delivery.data, retries + 1).await
                {
                    // Still ack the original below: leaving it unacked
                    // would redeliver it and loop on broker failures.
                    error!(error = %publish_err, "failed to republish job");
                }

                ack(&delivery).await;
            } else {
                error!(
                    path = %job.path,
                    filename = %job.filename,
                    kind = %job.kind,
                    retries,
                    max_retries,
                    error = %e,
                    "job failed, routing to dead-letter queue"
                );

                if let Err(nack_err) = delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await
                {
                    error!(error = %nack_err, "failed to nack delivery");
                }
            }
        }
    }
}

async fn ack(delivery: &lapin::message::Delivery) {
    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
        error!(error = %e, "failed to ack delivery");
    }
}

/// Publish with persistent delivery and wait for the broker confirm,
/// bounded by [`PUBLISH_CONFIRM_TIMEOUT`].
async fn publish_with_confirm(
    channel: &Channel,
    queue_name: &str,
    body: &[u8],
    retries: u32,
) -> Result<()> {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(RETRIES_HEADER),
        AMQPValue::LongInt(retries as i32),
    );

    let properties = BasicProperties::default()
        .with_content_type("application/json".into())
        .with_delivery_mode(2)
        .with_headers(headers);

    let confirmation = tokio::time::timeout(PUBLISH_CONFIRM_TIMEOUT, async {
        let confirm = channel
            .basic_publish(
                "",
                queue_name,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| NfeError::queue("publish", e.to_string()))?;

        confirm
            .await
            .map_err(|e| NfeError::queue("await confirm", e.to_string()))
    })
    .await
    .map_err(|_| NfeError::queue("publish", "timed out waiting for broker confirmation"))??;

    match confirmation {
        Confirmation::Nack(_) => Err(NfeError::queue(
            "publish",
            "message not confirmed by broker",
        )),
        _ => Ok(()),
    }
}

/// Read the retry counter from the delivery headers, treating a missing
/// header as zero and accepting any numeric representation.
fn extract_retries(headers: Option<&FieldTable>) -> u32 {
    let Some(headers) = headers else {
        return 0;
    };

    match headers.inner().get(&ShortString::from(RETRIES_HEADER)) {
        Some(AMQPValue::ShortShortInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::ShortShortUInt(v)) => *v as u32,
        Some(AMQPValue::ShortInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::ShortUInt(v)) => *v as u32,
        Some(AMQPValue::LongInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::LongUInt(v)) => *v,
        Some(AMQPValue::LongLongInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::Float(v)) => (*v).max(0.0) as u32,
        Some(AMQPValue::Double(v)) => (*v).max(0.0) as u32,
        _ => 0,
    }
}

/// Dead-letter exchange name derived from the main queue name.
pub fn dlx_name(queue_name: &str) -> String {
    format!("{}.dlx", queue_name)
}

/// Dead-letter queue name derived from the main queue name.
pub fn dlq_name(queue_name: &str) -> String {
    format!("{}.dlq", queue_name)
}
