//! Work queue abstraction (mechanics only).
//!
//! This module provides the **work queue pattern** that coordinates the pipeline
//! stages: every stage consumes from exactly one named queue and publishes into
//! others. No stage ever calls another directly.
//!
//! ## Delivery Guarantees
//!
//! - **At-least-once**: a message may be delivered more than once (redelivery after a
//!   crash, an explicit `nack`, or a lost ack); consumers must be idempotent
//! - **Manual acknowledgment**: a delivery stays owned by the consumer until it is
//!   acked, nacked or dead-lettered
//! - **Competing consumers**: several instances on one queue share its deliveries;
//!   FIFO holds per consumer only
//!
//! ## Dead Letters
//!
//! A delivery that can never succeed (e.g. an unparseable body) is moved to the
//! queue's dead-letter side channel instead of being redelivered forever.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::delivery::Delivery;

/// Work queue operation error.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The delivery is not (or no longer) owned by this consumer.
    #[error("unknown delivery {tag} on queue {queue}")]
    UnknownDelivery { queue: String, tag: String },

    /// Internal lock poisoning (in-process implementations).
    #[error("queue state poisoned")]
    Poisoned,
}

/// Domain-agnostic durable work queue.
///
/// Implementations must be `Send + Sync`; a single instance is shared by the
/// consumer loop and the publishing side of a stage.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Declare a durable queue (idempotent).
    async fn declare(&self, queue: &str) -> Result<(), QueueError>;

    /// Append a message to a queue.
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError>;

    /// Wait up to `wait` for the next delivery on `queue`.
    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Mark a delivery as processed.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Reject a delivery; with `requeue` it will be delivered again.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;

    /// Move a delivery to the dead-letter queue and acknowledge it.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;
}

#[async_trait]
impl<Q> WorkQueue for Arc<Q>
where
    Q: WorkQueue + ?Sized,
{
    async fn declare(&self, queue: &str) -> Result<(), QueueError> {
        (**self).declare(queue).await
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError> {
        (**self).publish(queue, body).await
    }

    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        (**self).receive(queue, wait).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        (**self).ack(delivery).await
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        (**self).nack(delivery, requeue).await
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        (**self).dead_letter(delivery, reason).await
    }
}

/// JSON convenience on top of any `WorkQueue`.
#[async_trait]
pub trait WorkQueueExt: WorkQueue {
    async fn publish_json<T>(&self, queue: &str, message: &T) -> Result<(), QueueError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let body =
            serde_json::to_vec(message).map_err(|e| QueueError::Serialization(e.to_string()))?;
        self.publish(queue, body).await
    }
}

impl<Q> WorkQueueExt for Q where Q: WorkQueue + ?Sized {}
