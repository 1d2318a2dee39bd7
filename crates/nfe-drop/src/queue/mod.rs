//! Durable work distribution
//!
//! The watcher publishes [`job::Job`] envelopes through a [`JobPublisher`];
//! the worker consumes them through a [`JobHandler`]. The production
//! implementation is the RabbitMQ client in [`rabbitmq`], with bounded
//! retries and dead-letter routing; tests substitute in-memory
//! implementations of the same traits.

pub mod job;
pub mod rabbitmq;

use async_trait::async_trait;

use nfe_common::Result;

pub use job::Job;
pub use rabbitmq::RabbitMqQueue;

/// Publishes jobs into the durable queue.
///
/// Publication must await broker acknowledgment; implementations are
/// expected to enforce a deadline and surface confirmation failures.
#[async_trait]
pub trait JobPublisher: Send + Sync {
    async fn publish(&self, job: &Job) -> Result<()>;
}

/// Handles one delivered job.
///
/// Deterministic per-invoice outcomes (parse errors, duplicates) are
/// resolved inside the handler and reported as metrics; only
/// infrastructure failures should be returned as errors, which engages
/// the broker's retry and dead-letter policy.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> anyhow::Result<()>;
}
