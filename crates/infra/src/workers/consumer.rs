use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use fbwatch_events::{Delivery, QueueError, WorkQueue};

use super::backoff::Backoff;
use super::shutdown::Shutdown;

/// How a handled delivery is settled with the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Deliver again later (transient failure).
    Requeue,
    /// Park on the dead-letter queue; it can never succeed.
    DeadLetter(String),
}

/// A stage's per-delivery logic.
///
/// Handlers must be idempotent: the bus delivers at least once.
#[async_trait]
pub trait DeliveryHandler: Send {
    type Message: DeserializeOwned + Send;

    async fn handle(&mut self, message: Self::Message, delivery: &Delivery) -> Disposition;
}

/// Counters reported when a consumer loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acked: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
}

impl ConsumerStats {
    fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::Ack => self.acked += 1,
            Disposition::Requeue => self.requeued += 1,
            Disposition::DeadLetter(_) => self.dead_lettered += 1,
        }
    }
}

/// Sequential consumer of one queue.
///
/// - One delivery at a time, settled before the next is received
/// - Malformed bodies are dead-lettered, never fatal
/// - Bus errors are logged and retried with backoff
/// - Shutdown stops receiving; an in-flight delivery always finishes
pub struct Consumer<Q> {
    tag: String,
    queue: Q,
    queue_name: String,
    poll_wait: Duration,
    backoff: Backoff,
}

impl<Q> Consumer<Q>
where
    Q: WorkQueue,
{
    pub fn new(tag: impl Into<String>, queue: Q, queue_name: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            queue,
            queue_name: queue_name.into(),
            poll_wait: Duration::from_secs(1),
            backoff: Backoff::default(),
        }
    }

    pub fn with_poll_wait(mut self, wait: Duration) -> Self {
        self.poll_wait = wait;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Receive and settle at most one delivery.
    pub async fn process_next<H>(&self, handler: &mut H) -> Result<Option<Disposition>, QueueError>
    where
        H: DeliveryHandler,
    {
        match self.queue.receive(&self.queue_name, self.poll_wait).await? {
            Some(delivery) => self.dispatch(&delivery, handler).await.map(Some),
            None => Ok(None),
        }
    }

    /// Consume until `shutdown` is triggered.
    pub async fn run<H>(&self, mut handler: H, shutdown: Shutdown) -> ConsumerStats
    where
        H: DeliveryHandler,
    {
        info!(consumer = %self.tag, queue = %self.queue_name, "ready to receive deliveries");
        let mut stats = ConsumerStats::default();
        let mut failures = 0u32;

        loop {
            if shutdown.is_triggered() {
                break;
            }

            let received = tokio::select! {
                _ = shutdown.wait() => break,
                received = self.queue.receive(&self.queue_name, self.poll_wait) => received,
            };

            let result = match received {
                Ok(Some(delivery)) => self.dispatch(&delivery, &mut handler).await.map(Some),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            };

            match result {
                Ok(disposition) => {
                    failures = 0;
                    if let Some(d) = disposition {
                        stats.record(&d);
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.backoff.delay_for_attempt(failures + 1);
                    error!(
                        consumer = %self.tag,
                        queue = %self.queue_name,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "bus operation failed"
                    );
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(
            consumer = %self.tag,
            queue = %self.queue_name,
            acked = stats.acked,
            requeued = stats.requeued,
            dead_lettered = stats.dead_lettered,
            "consumer stopped"
        );
        stats
    }

    async fn dispatch<H>(&self, delivery: &Delivery, handler: &mut H) -> Result<Disposition, QueueError>
    where
        H: DeliveryHandler,
    {
        debug!(
            queue = %self.queue_name,
            tag = %delivery.tag(),
            attempt = delivery.attempt(),
            bytes = delivery.body().len(),
            "got delivery"
        );

        let disposition = match delivery.decode::<H::Message>() {
            Ok(message) => handler.handle(message, delivery).await,
            Err(e) => {
                warn!(queue = %self.queue_name, tag = %delivery.tag(), error = %e, "cannot read message");
                Disposition::DeadLetter(format!("malformed body: {e}"))
            }
        };

        self.settle(delivery, &disposition).await?;
        Ok(disposition)
    }

    async fn settle(&self, delivery: &Delivery, disposition: &Disposition) -> Result<(), QueueError> {
        match disposition {
            Disposition::Ack => self.queue.ack(delivery).await,
            Disposition::Requeue => {
                let delay = self.backoff.delay_for_attempt(delivery.attempt());
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                self.queue.nack(delivery, true).await
            }
            Disposition::DeadLetter(reason) => {
                warn!(queue = %self.queue_name, tag = %delivery.tag(), %reason, "dead-lettering delivery");
                self.queue.dead_letter(delivery, reason).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fbwatch_events::{InMemoryWorkQueue, WorkQueueExt};
    use serde::Deserialize;

    const Q: &str = "work";

    #[derive(Debug, Deserialize)]
    struct Job {
        n: u32,
    }

    /// Requeues odd numbers once, acks everything else.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<(u32, u32)>,
    }

    #[async_trait]
    impl DeliveryHandler for Recorder {
        type Message = Job;

        async fn handle(&mut self, message: Job, delivery: &Delivery) -> Disposition {
            self.seen.push((message.n, delivery.attempt()));
            if message.n % 2 == 1 && delivery.attempt() == 1 {
                Disposition::Requeue
            } else {
                Disposition::Ack
            }
        }
    }

    fn consumer(bus: Arc<InMemoryWorkQueue>) -> Consumer<Arc<InMemoryWorkQueue>> {
        Consumer::new("test", bus, Q)
            .with_poll_wait(Duration::ZERO)
            .with_backoff(Backoff::new(Duration::from_millis(1), Duration::from_millis(2)))
    }

    #[tokio::test]
    async fn malformed_body_is_dead_lettered_not_fatal() {
        let bus = Arc::new(InMemoryWorkQueue::new());
        bus.publish(Q, b"not json".to_vec()).await.unwrap();
        bus.publish_json(Q, &serde_json::json!({"n": 2})).await.unwrap();

        let consumer = consumer(bus.clone());
        let mut handler = Recorder::default();

        let first = consumer.process_next(&mut handler).await.unwrap();
        assert!(matches!(first, Some(Disposition::DeadLetter(_))));
        let second = consumer.process_next(&mut handler).await.unwrap();
        assert_eq!(second, Some(Disposition::Ack));

        assert_eq!(bus.dead_letters(Q).len(), 1);
        assert_eq!(handler.seen, vec![(2, 1)]);
    }

    #[tokio::test]
    async fn requeued_delivery_is_retried() {
        let bus = Arc::new(InMemoryWorkQueue::new());
        bus.publish_json(Q, &serde_json::json!({"n": 1})).await.unwrap();

        let consumer = consumer(bus.clone());
        let mut handler = Recorder::default();
        consumer.process_next(&mut handler).await.unwrap();
        consumer.process_next(&mut handler).await.unwrap();

        assert_eq!(handler.seen, vec![(1, 1), (1, 2)]);
        assert_eq!(bus.ready_len(Q), 0);
        assert_eq!(bus.unacked_len(Q), 0);
    }

    #[tokio::test]
    async fn run_drains_then_stops_on_shutdown() {
        let bus = Arc::new(InMemoryWorkQueue::new());
        for n in [2, 3, 4] {
            bus.publish_json(Q, &serde_json::json!({"n": n})).await.unwrap();
        }

        let shutdown = Shutdown::new();
        let stopper = shutdown.clone();
        let watcher = bus.clone();
        tokio::spawn(async move {
            while watcher.ready_len(Q) > 0 || watcher.unacked_len(Q) > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            stopper.trigger();
        });

        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            consumer(bus.clone())
                .with_poll_wait(Duration::from_millis(10))
                .run(Recorder::default(), shutdown),
        )
        .await
        .unwrap();

        assert_eq!(stats.acked, 3);
        assert_eq!(stats.requeued, 1);
    }
}
