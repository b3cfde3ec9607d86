//! Redis Streams-backed work queue (durable, at-least-once delivery).
//!
//! ## Layout
//!
//! - **Stream key**: `fbwatch:<queue>`, one stream per named queue
//! - **Consumer group**: `<queue>.workers`; competing consumers share it
//! - **Consumer name**: the daemon's consumer tag
//! - **Dead letters**: `fbwatch:<queue>.dlq`
//!
//! Each entry carries `payload` and `retry_count`. A requeue re-appends the
//! payload with an incremented `retry_count` and acks the original, so the
//! attempt number survives redelivery. Entries left pending by a crashed
//! consumer are claimed by the next receive once idle long enough.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use tracing::{debug, instrument, warn};

use fbwatch_events::{dead_letter_queue, Delivery, QueueError, WorkQueue};

const KEY_PREFIX: &str = "fbwatch";

pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Pending entries idle longer than this are reclaimed from dead consumers.
pub const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("malformed stream entry {id}: {reason}")]
    Entry { id: String, reason: String },
}

impl From<RedisStreamsError> for QueueError {
    fn from(value: RedisStreamsError) -> Self {
        match value {
            RedisStreamsError::Connection(e) => QueueError::Connection(e),
            RedisStreamsError::Command(e) => QueueError::Command(e),
            e @ RedisStreamsError::Entry { .. } => QueueError::Serialization(e.to_string()),
        }
    }
}

fn command_error(command: &str, e: redis::RedisError) -> RedisStreamsError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        RedisStreamsError::Connection(format!("{command}: {e}"))
    } else {
        RedisStreamsError::Command(format!("{command} failed: {e}"))
    }
}

pub fn stream_key(queue: &str) -> String {
    format!("{KEY_PREFIX}:{queue}")
}

pub fn group_name(queue: &str) -> String {
    format!("{queue}.workers")
}

#[derive(Clone)]
pub struct RedisStreamsWorkQueue {
    /// Publishes, acks and group management.
    conn: MultiplexedConnection,
    /// Blocking reads only, so they never stall other commands.
    reader: MultiplexedConnection,
    consumer: String,
    max_retries: u32,
    claim_idle: Duration,
}

impl RedisStreamsWorkQueue {
    /// Connect and identify as `consumer` within every queue's group.
    pub async fn connect(
        redis_url: &str,
        consumer: impl Into<String>,
        max_retries: u32,
    ) -> Result<Self, RedisStreamsError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        let reader = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            conn,
            reader,
            consumer: consumer.into(),
            max_retries: max_retries.max(1),
            claim_idle: DEFAULT_CLAIM_IDLE,
        })
    }

    pub fn with_claim_idle(mut self, idle: Duration) -> Self {
        self.claim_idle = idle;
        self
    }

    /// Take over one entry another consumer left pending too long.
    async fn reclaim(&self, queue: &str) -> Result<Option<Delivery>, RedisStreamsError> {
        let key = stream_key(queue);
        let group = group_name(queue);
        let idle_ms = self.claim_idle.as_millis() as u64;
        let mut conn = self.conn.clone();

        loop {
            let pending: StreamPendingCountReply = redis::cmd("XPENDING")
                .arg(&key)
                .arg(&group)
                .arg("IDLE")
                .arg(idle_ms)
                .arg("-")
                .arg("+")
                .arg(1)
                .query_async(&mut conn)
                .await
                .map_err(|e| command_error("XPENDING", e))?;

            let Some(stale) = pending.ids.into_iter().next() else {
                return Ok(None);
            };

            let claimed: StreamClaimReply = redis::cmd("XCLAIM")
                .arg(&key)
                .arg(&group)
                .arg(&self.consumer)
                .arg(idle_ms)
                .arg(&stale.id)
                .query_async(&mut conn)
                .await
                .map_err(|e| command_error("XCLAIM", e))?;

            let Some(entry) = claimed.ids.into_iter().next() else {
                // Someone else claimed it first.
                continue;
            };

            warn!(
                queue,
                id = %entry.id,
                previous_consumer = %stale.consumer,
                times_delivered = stale.times_delivered,
                "reclaimed stale delivery"
            );
            match claim(queue, &entry, stale.times_delivered as u32, self.max_retries) {
                Claimed::Deliver(delivery) => return Ok(Some(delivery)),
                Claimed::Reject(rejected) => self.reject(queue, &rejected).await?,
            }
        }
    }

    async fn read_new(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>, RedisStreamsError> {
        let key = stream_key(queue);
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(group_name(queue))
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1);
        if !wait.is_zero() {
            cmd.arg("BLOCK").arg(wait.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(&key).arg(">");

        let mut reader = self.reader.clone();
        let reply: Option<StreamReadReply> = cmd
            .query_async(&mut reader)
            .await
            .map_err(|e| command_error("XREADGROUP", e))?;

        let Some(entry) = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next()
        else {
            return Ok(None);
        };

        match claim(queue, &entry, 1, self.max_retries) {
            Claimed::Deliver(delivery) => Ok(Some(delivery)),
            Claimed::Reject(rejected) => {
                self.reject(queue, &rejected).await?;
                Ok(None)
            }
        }
    }

    async fn settle(&self, delivery: &Delivery) -> Result<(), RedisStreamsError> {
        let mut conn = self.conn.clone();
        let acked: u64 = redis::cmd("XACK")
            .arg(stream_key(delivery.queue()))
            .arg(group_name(delivery.queue()))
            .arg(delivery.tag())
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("XACK", e))?;

        if acked == 0 {
            debug!(queue = %delivery.queue(), id = %delivery.tag(), "entry was not pending");
        }
        Ok(())
    }

    /// Copy an entry to the queue's dead-letter stream and ack the original.
    async fn reject(&self, queue: &str, rejected: &Rejected) -> Result<(), RedisStreamsError> {
        let key = stream_key(queue);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("XADD")
            .arg(stream_key(&dead_letter_queue(queue)))
            .arg("*")
            .arg("original_message_id")
            .arg(&rejected.id)
            .arg("reason")
            .arg(&rejected.reason)
            .arg("attempts")
            .arg(rejected.attempts)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339());
        if let Some(payload) = &rejected.payload {
            pipe.arg("payload").arg(payload.as_slice());
        }
        pipe.ignore()
            .cmd("XACK")
            .arg(&key)
            .arg(group_name(queue))
            .arg(&rejected.id)
            .ignore();

        let mut conn = self.conn.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("dead-letter", e))?;

        warn!(queue, id = %rejected.id, attempts = rejected.attempts, reason = %rejected.reason, "message sent to dead-letter queue");
        Ok(())
    }
}

/// An entry this consumer will not hand to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rejected {
    id: String,
    reason: String,
    attempts: u32,
    payload: Option<Vec<u8>>,
}

impl Rejected {
    fn from_delivery(delivery: &Delivery, reason: &str) -> Self {
        Self {
            id: delivery.tag().to_string(),
            reason: reason.to_string(),
            attempts: delivery.attempt(),
            payload: Some(delivery.body().to_vec()),
        }
    }
}

#[derive(Debug)]
enum Claimed {
    Deliver(Delivery),
    Reject(Rejected),
}

/// Decide the fate of an entry just read or claimed by this consumer.
fn claim(queue: &str, entry: &StreamId, times_delivered: u32, max_retries: u32) -> Claimed {
    match to_delivery(queue, entry, times_delivered) {
        Ok(delivery) if delivery.attempt() > max_retries => {
            Claimed::Reject(Rejected::from_delivery(&delivery, "delivery attempts exhausted"))
        }
        Ok(delivery) => Claimed::Deliver(delivery),
        Err(e) => Claimed::Reject(Rejected {
            id: entry.id.clone(),
            reason: e.to_string(),
            attempts: times_delivered.max(1),
            payload: None,
        }),
    }
}

/// `attempt` = retries already spent + deliveries of this stream entry.
fn to_delivery(queue: &str, entry: &StreamId, times_delivered: u32) -> Result<Delivery, RedisStreamsError> {
    let payload: Vec<u8> = entry.get("payload").ok_or_else(|| RedisStreamsError::Entry {
        id: entry.id.clone(),
        reason: "missing payload field".to_string(),
    })?;
    let retry_count = entry
        .get::<String>("retry_count")
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(0);

    Ok(Delivery::new(
        queue,
        entry.id.clone(),
        payload,
        retry_count + times_delivered.max(1),
    ))
}

fn is_busy_group(e: &redis::RedisError) -> bool {
    e.code() == Some("BUSYGROUP")
}

#[async_trait]
impl WorkQueue for RedisStreamsWorkQueue {
    #[instrument(skip(self), err)]
    async fn declare(&self, queue: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream_key(queue))
            .arg(group_name(queue))
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(e) if is_busy_group(&e) => Ok(()),
            Err(e) => Err(command_error("XGROUP CREATE", e).into()),
        }
    }

    #[instrument(skip(self, body), fields(bytes = body.len()), err)]
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(stream_key(queue))
            .arg("*")
            .arg("payload")
            .arg(body)
            .arg("retry_count")
            .arg(0)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("XADD", e))?;
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        if let Some(delivery) = self.reclaim(queue).await? {
            return Ok(Some(delivery));
        }
        Ok(self.read_new(queue, wait).await?)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        Ok(self.settle(delivery).await?)
    }

    #[instrument(skip(self, delivery), fields(queue = %delivery.queue(), id = %delivery.tag()), err)]
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        if !requeue {
            return Ok(self.settle(delivery).await?);
        }
        if delivery.attempt() >= self.max_retries {
            return self.dead_letter(delivery, "retries exhausted").await;
        }

        let key = stream_key(delivery.queue());
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(&key)
            .arg("*")
            .arg("payload")
            .arg(delivery.body())
            .arg("retry_count")
            .arg(delivery.attempt())
            .ignore()
            .cmd("XACK")
            .arg(&key)
            .arg(group_name(delivery.queue()))
            .arg(delivery.tag())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("requeue", e))?;
        Ok(())
    }

    #[instrument(skip(self, delivery), fields(queue = %delivery.queue(), id = %delivery.tag()), err)]
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        Ok(self.reject(delivery.queue(), &Rejected::from_delivery(delivery, reason)).await?)
    }
}
