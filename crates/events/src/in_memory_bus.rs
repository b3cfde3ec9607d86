//! In-memory work queue for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::bus::{QueueError, WorkQueue};
use crate::delivery::Delivery;
use crate::queues::dead_letter_queue;

const POLL_TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
struct Message {
    body: Vec<u8>,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    unacked: HashMap<String, Message>,
}

/// A message parked on a dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub body: Vec<u8>,
    pub reason: String,
    pub attempts: u32,
}

/// In-memory competing-consumer queue.
///
/// - No IO; `receive` polls until the wait elapses
/// - Requeued deliveries go to the back of the queue
/// - Unacked deliveries stay owned until acked/nacked (no visibility timeout)
#[derive(Debug, Default)]
pub struct InMemoryWorkQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    dead_letters: Mutex<HashMap<String, Vec<DeadLetter>>>,
    next_tag: AtomicU64,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting for delivery.
    pub fn ready_len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .map(|q| q.get(queue).map_or(0, |s| s.ready.len()))
            .unwrap_or(0)
    }

    /// Deliveries handed out but not yet settled.
    pub fn unacked_len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .map(|q| q.get(queue).map_or(0, |s| s.unacked.len()))
            .unwrap_or(0)
    }

    /// Decode every waiting message without consuming it.
    pub fn peek_json<T: DeserializeOwned>(&self, queue: &str) -> Vec<T> {
        let Ok(queues) = self.queues.lock() else {
            return Vec::new();
        };
        queues
            .get(queue)
            .map(|s| {
                s.ready
                    .iter()
                    .filter_map(|m| serde_json::from_slice(&m.body).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dead_letters(&self, queue: &str) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .map(|d| d.get(&dead_letter_queue(queue)).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn try_take(&self, queue: &str) -> Result<Option<Delivery>, QueueError> {
        let mut queues = self.queues.lock().map_err(|_| QueueError::Poisoned)?;
        let state = queues.entry(queue.to_string()).or_default();

        let Some(mut message) = state.ready.pop_front() else {
            return Ok(None);
        };
        message.deliveries += 1;

        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed).to_string();
        let delivery = Delivery::new(queue, tag.clone(), message.body.clone(), message.deliveries);
        state.unacked.insert(tag, message);

        Ok(Some(delivery))
    }

    fn settle(&self, delivery: &Delivery) -> Result<Message, QueueError> {
        let mut queues = self.queues.lock().map_err(|_| QueueError::Poisoned)?;
        queues
            .get_mut(delivery.queue())
            .and_then(|s| s.unacked.remove(delivery.tag()))
            .ok_or_else(|| unknown(delivery))
    }
}

fn unknown(delivery: &Delivery) -> QueueError {
    QueueError::UnknownDelivery {
        queue: delivery.queue().to_string(),
        tag: delivery.tag().to_string(),
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn declare(&self, queue: &str) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().map_err(|_| QueueError::Poisoned)?;
        queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().map_err(|_| QueueError::Poisoned)?;
        queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(Message {
                body,
                deliveries: 0,
            });
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_take(queue)? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_TICK.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.settle(delivery).map(|_| ())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().map_err(|_| QueueError::Poisoned)?;
        let state = queues
            .get_mut(delivery.queue())
            .ok_or_else(|| unknown(delivery))?;
        let message = state.unacked.remove(delivery.tag()).ok_or_else(|| unknown(delivery))?;
        if requeue {
            state.ready.push_back(message);
        }
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let message = self.settle(delivery)?;
        let mut dead = self.dead_letters.lock().map_err(|_| QueueError::Poisoned)?;
        dead.entry(dead_letter_queue(delivery.queue()))
            .or_default()
            .push(DeadLetter {
                body: message.body,
                reason: reason.to_string(),
                attempts: message.deliveries,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::WorkQueueExt;

    const Q: &str = "work";

    #[tokio::test]
    async fn deliveries_are_fifo_and_owned_until_acked() {
        let bus = InMemoryWorkQueue::new();
        bus.publish(Q, b"a".to_vec()).await.unwrap();
        bus.publish(Q, b"b".to_vec()).await.unwrap();

        let first = bus.receive(Q, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.body(), b"a");
        assert_eq!(first.attempt(), 1);
        assert_eq!(bus.unacked_len(Q), 1);

        bus.ack(&first).await.unwrap();
        assert_eq!(bus.unacked_len(Q), 0);
        assert_eq!(bus.ready_len(Q), 1);
    }

    #[tokio::test]
    async fn requeued_delivery_comes_back_with_higher_attempt() {
        let bus = InMemoryWorkQueue::new();
        bus.publish_json(Q, &"payload").await.unwrap();

        let d = bus.receive(Q, Duration::ZERO).await.unwrap().unwrap();
        bus.nack(&d, true).await.unwrap();

        let again = bus.receive(Q, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.body(), d.body());
        assert_eq!(again.attempt(), 2);
        assert!(again.is_redelivery());
    }

    #[tokio::test]
    async fn nack_without_requeue_drops() {
        let bus = InMemoryWorkQueue::new();
        bus.publish(Q, b"x".to_vec()).await.unwrap();
        let d = bus.receive(Q, Duration::ZERO).await.unwrap().unwrap();

        bus.nack(&d, false).await.unwrap();
        assert!(bus.receive(Q, Duration::from_millis(20)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dead_letter_parks_the_body() {
        let bus = InMemoryWorkQueue::new();
        bus.publish(Q, b"{not json".to_vec()).await.unwrap();
        let d = bus.receive(Q, Duration::ZERO).await.unwrap().unwrap();

        bus.dead_letter(&d, "malformed body").await.unwrap();

        let dead = bus.dead_letters(Q);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "malformed body");
        assert_eq!(bus.unacked_len(Q), 0);
    }

    #[tokio::test]
    async fn settling_twice_is_an_error() {
        let bus = InMemoryWorkQueue::new();
        bus.publish(Q, b"x".to_vec()).await.unwrap();
        let d = bus.receive(Q, Duration::ZERO).await.unwrap().unwrap();

        bus.ack(&d).await.unwrap();
        assert!(matches!(
            bus.ack(&d).await,
            Err(QueueError::UnknownDelivery { .. })
        ));
    }
}
