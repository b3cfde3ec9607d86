//! Scheduler: leases stale objects and publishes fetch work for them.

use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::{debug, error, info, warn};

use fbwatch_core::{Clock, Lease, QueueEntry};
use fbwatch_events::{QueueError, WorkQueue, WorkQueueExt, COMMENT_FETCH, PAGE_FETCH};

use super::shutdown::Shutdown;
use crate::config::Config;
use crate::metadata_store::{MetadataStore, MetadataStoreError, ScheduledObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub feed_interval: Duration,
    pub comments_interval: Duration,
    pub lease_ttl: Duration,
    pub poll_interval: StdDuration,
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            feed_interval: config.fb.feed_interval(),
            comments_interval: config.fb.comments_interval(),
            lease_ttl: config.scheduler.lease_ttl(),
            poll_interval: config.scheduler.poll_interval(),
        }
    }
}

/// Outcome of one scheduling cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub pages: usize,
    pub threads: usize,
    /// Objects whose publish failed; they stay eligible for the next cycle.
    pub unpublished: usize,
    /// Objects published but not marked; they may be dispatched twice.
    pub unmarked: usize,
}

pub struct Scheduler<S, Q, C> {
    store: S,
    queue: Q,
    clock: C,
    settings: SchedulerSettings,
}

impl<S, Q, C> Scheduler<S, Q, C>
where
    S: MetadataStore,
    Q: WorkQueue,
    C: Clock,
{
    pub fn new(store: S, queue: Q, clock: C, settings: SchedulerSettings) -> Self {
        Self {
            store,
            queue,
            clock,
            settings,
        }
    }

    pub async fn declare_queues(&self) -> Result<(), QueueError> {
        for name in [PAGE_FETCH, COMMENT_FETCH] {
            self.queue.declare(name).await?;
            info!(queue = name, "declared queue");
        }
        Ok(())
    }

    /// Dispatch every stale page feed, then every stale thread.
    pub async fn run_cycle(&self) -> Result<CycleReport, MetadataStoreError> {
        let now = self.clock.now();
        let mut report = CycleReport::default();

        let pages = self.store.stale_pages(self.settings.feed_interval, now).await?;
        report.pages = self.dispatch(pages, PAGE_FETCH, &mut report).await;

        let threads = self.store.stale_threads(self.settings.comments_interval, now).await?;
        report.threads = self.dispatch(threads, COMMENT_FETCH, &mut report).await;

        Ok(report)
    }

    /// Publish-then-mark for each object; returns how many were published.
    async fn dispatch(&self, objects: Vec<ScheduledObject>, queue: &str, report: &mut CycleReport) -> usize {
        let mut published = 0;

        for scheduled in objects {
            let lease = Lease::grant(self.clock.now(), self.settings.lease_ttl);
            let entry = QueueEntry::new(&scheduled.object, scheduled.last_checked, lease.token);

            if let Err(e) = self.queue.publish_json(queue, &entry).await {
                warn!(queue, object_id = %entry.object_id, error = %e, "cannot publish fetch work");
                report.unpublished += 1;
                continue;
            }
            published += 1;
            debug!(
                queue,
                object_id = %entry.object_id,
                object_type = %entry.object_type,
                last_checked = entry.last_checked.as_epoch_secs(),
                "published fetch work"
            );

            match self
                .store
                .mark_dispatched(&scheduled.object, lease, scheduled.last_checked)
                .await
            {
                Ok(true) => {}
                Ok(false) => debug!(object_id = %entry.object_id, "checked before the lease was recorded"),
                Err(e) => {
                    error!(object_id = %entry.object_id, error = %e, "published but cannot mark dispatched");
                    report.unmarked += 1;
                }
            }
        }

        published
    }

    /// Run cycles on a fixed interval until shutdown.
    pub async fn run(&self, shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_ms = self.settings.poll_interval.as_millis() as u64, "scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            match self.run_cycle().await {
                Ok(report) if report.pages + report.threads > 0 => info!(
                    pages = report.pages,
                    threads = report.threads,
                    unpublished = report.unpublished,
                    unmarked = report.unmarked,
                    "dispatched fetch work"
                ),
                Ok(report) => debug!(unpublished = report.unpublished, "nothing to dispatch"),
                Err(e) => error!(error = %e, "scheduling cycle failed"),
            }
        }

        info!("scheduler stopped");
    }
}
