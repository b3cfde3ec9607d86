//! Fetcher: pulls new content for one leased object and fans it out.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use fbwatch_core::{
    split_composite, Clock, Comment, ContentRecord, LastChecked, ObjectKind, ObjectRef, Post, QueueEntry,
};
use fbwatch_events::{Delivery, QueueError, WorkQueue, WorkQueueExt, COMMENTS_CLASSIFY, COMMENTS_STORE, COMMENT_FETCH, PAGE_FETCH};

use super::consumer::{DeliveryHandler, Disposition};
use crate::content_source::{ContentSource, ContentSourceError};
use crate::metadata_store::{CommentRow, MetadataStore};

/// Which fetch queue a fetcher consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Page feeds, yielding posts.
    Posts,
    /// Post and comment threads, yielding comments.
    Comments,
}

impl FetchKind {
    pub fn queue(&self) -> &'static str {
        match self {
            FetchKind::Posts => PAGE_FETCH,
            FetchKind::Comments => COMMENT_FETCH,
        }
    }

    fn accepts(&self, kind: ObjectKind) -> bool {
        match self {
            FetchKind::Posts => kind == ObjectKind::Page,
            FetchKind::Comments => matches!(kind, ObjectKind::Post | ObjectKind::Comment),
        }
    }
}

impl fmt::Display for FetchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetchKind::Posts => "posts",
            FetchKind::Comments => "comments",
        })
    }
}

impl FromStr for FetchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posts" => Ok(FetchKind::Posts),
            "comments" => Ok(FetchKind::Comments),
            other => Err(format!("unknown fetch type '{other}' (expected posts or comments)")),
        }
    }
}

pub struct Fetcher<S, Q, Src, C> {
    kind: FetchKind,
    store: S,
    queue: Q,
    source: Src,
    clock: C,
    feed_max_items: usize,
}

impl<S, Q, Src, C> Fetcher<S, Q, Src, C>
where
    S: MetadataStore,
    Q: WorkQueue,
    Src: ContentSource,
    C: Clock,
{
    pub fn new(kind: FetchKind, store: S, queue: Q, source: Src, clock: C, feed_max_items: usize) -> Self {
        Self {
            kind,
            store,
            queue,
            source,
            clock,
            feed_max_items,
        }
    }

    pub fn kind(&self) -> FetchKind {
        self.kind
    }

    /// Declare the consumed queue and both downstream queues.
    pub async fn declare_queues(&self) -> Result<(), QueueError> {
        for name in [self.kind.queue(), COMMENTS_STORE, COMMENTS_CLASSIFY] {
            self.queue.declare(name).await?;
        }
        Ok(())
    }

    async fn load(&self, object: &ObjectRef, entry: &QueueEntry) -> Result<Vec<ContentRecord>, ContentSourceError> {
        match object {
            ObjectRef::Page { page_id } => Ok(self
                .source
                .load_feed(page_id, entry.last_checked, self.feed_max_items)
                .await?
                .into_iter()
                .map(ContentRecord::Post)
                .collect()),
            _ => Ok(self
                .source
                .load_comments(&entry.object_id, entry.last_checked)
                .await?
                .into_iter()
                .map(ContentRecord::Comment)
                .collect()),
        }
    }

    /// Insert the tracking row for a discovered record. Duplicates are fine.
    async fn track(&self, object: &ObjectRef, record: &ContentRecord) {
        let result = match record {
            ContentRecord::Post(post) => {
                let (page_id, post_id) = post_row(object, post);
                self.store.insert_post(page_id, post_id).await
            }
            ContentRecord::Comment(comment) => match comment_row(object, comment) {
                Some(row) => self.store.insert_comment(&row).await,
                None => {
                    warn!(record = %comment.id, "comment has no owning post; not tracked");
                    return;
                }
            },
        };

        match result {
            Ok(()) => debug!(record = %record.id(), kind = %record.kind(), "tracking new object"),
            Err(e) if e.is_duplicate() => debug!(record = %record.id(), "object already tracked"),
            Err(e) => error!(record = %record.id(), error = %e, "cannot track object"),
        }
    }

    /// Publish to the store and classify queues; returns false if either failed.
    async fn fan_out(&self, record: &ContentRecord) -> bool {
        let mut delivered = true;
        for queue in [COMMENTS_STORE, COMMENTS_CLASSIFY] {
            if let Err(e) = self.queue.publish_json(queue, record).await {
                error!(queue, record = %record.id(), error = %e, "cannot publish record");
                delivered = false;
            }
        }
        delivered
    }

    async fn give_back(&self, object: &ObjectRef, entry: &QueueEntry) {
        let Some(token) = entry.lease_token else {
            return;
        };
        match self.store.release(object, token).await {
            Ok(true) => debug!(object_id = %entry.object_id, "released lease"),
            Ok(false) => debug!(object_id = %entry.object_id, "lease already superseded"),
            Err(e) => warn!(object_id = %entry.object_id, error = %e, "cannot release lease"),
        }
    }

    async fn fetch(&self, entry: QueueEntry) -> Disposition {
        let object = match entry.object() {
            Ok(object) => object,
            Err(e) => return Disposition::DeadLetter(e.to_string()),
        };
        if !self.kind.accepts(object.kind()) {
            return Disposition::DeadLetter(format!(
                "{} fetcher cannot load {} '{}'",
                self.kind, entry.object_type, entry.object_id
            ));
        }

        let started = self.clock.now();
        let records = match self.load(&object, &entry).await {
            Ok(records) => records,
            Err(e) => {
                warn!(object_id = %entry.object_id, error = %e, "content source failed; leaving for next cycle");
                self.give_back(&object, &entry).await;
                return Disposition::Ack;
            }
        };

        if let Err(e) = self.store.record_check(&object, LastChecked::At(started)).await {
            error!(object_id = %entry.object_id, error = %e, "cannot record check");
        }

        let mut undelivered = 0usize;
        for record in &records {
            self.track(&object, record).await;
            if !self.fan_out(record).await {
                undelivered += 1;
            }
        }

        if undelivered > 0 {
            // Roll the check back so the same window is fetched again.
            warn!(object_id = %entry.object_id, undelivered, "restoring previous check time");
            if let Err(e) = self.store.record_check(&object, entry.last_checked).await {
                error!(object_id = %entry.object_id, error = %e, "cannot restore check time");
            }
        }

        info!(
            object_id = %entry.object_id,
            object_type = %entry.object_type,
            since = entry.last_checked.as_epoch_secs(),
            fetched = records.len(),
            undelivered,
            "fetched"
        );
        Disposition::Ack
    }
}

/// `(page_id, post_id)` for a post found on a page feed.
fn post_row<'a>(page: &'a ObjectRef, post: &'a Post) -> (&'a str, &'a str) {
    match split_composite(&post.id) {
        Some((page_id, post_id)) => (page_id, post_id),
        None => (page.page_id().unwrap_or_default(), post.id.as_str()),
    }
}

/// Tracking row for a comment found under `thread`.
fn comment_row(thread: &ObjectRef, comment: &Comment) -> Option<CommentRow> {
    let post_id = thread.owning_post_id()?;
    let comment_id = split_composite(&comment.id).map_or(comment.id.as_str(), |(_, child)| child);
    Some(CommentRow {
        comment_id: comment_id.to_string(),
        post_id: post_id.to_string(),
        parent_id: comment.parent_local_id().map(str::to_string),
        user_id: comment.from.id.clone(),
    })
}

#[async_trait]
impl<S, Q, Src, C> DeliveryHandler for Fetcher<S, Q, Src, C>
where
    S: MetadataStore,
    Q: WorkQueue,
    Src: ContentSource,
    C: Clock,
{
    type Message = QueueEntry;

    async fn handle(&mut self, entry: QueueEntry, _delivery: &Delivery) -> Disposition {
        self.fetch(entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use fbwatch_core::{Author, Lease, ManualClock, ParentRef};
    use fbwatch_events::InMemoryWorkQueue;

    use crate::content_source::InMemoryContentSource;
    use crate::metadata_store::InMemoryMetadataStore;

    type TestFetcher =
        Fetcher<Arc<InMemoryMetadataStore>, Arc<InMemoryWorkQueue>, Arc<InMemoryContentSource>, Arc<ManualClock>>;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryMetadataStore>,
        bus: Arc<InMemoryWorkQueue>,
        source: Arc<InMemoryContentSource>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryMetadataStore::new()),
                bus: Arc::new(InMemoryWorkQueue::new()),
                source: Arc::new(InMemoryContentSource::new()),
            }
        }

        fn fetcher(&self, kind: FetchKind) -> TestFetcher {
            Fetcher::new(
                kind,
                self.store.clone(),
                self.bus.clone(),
                self.source.clone(),
                Arc::new(ManualClock::new(now())),
                5,
            )
        }

        /// Lease `object` the way the scheduler would and build its entry.
        async fn leased_entry(&self, object: &ObjectRef, last_checked: LastChecked) -> QueueEntry {
            let lease = Lease::grant(now(), Duration::seconds(600));
            let current = self.store.row(object).unwrap().last_checked;
            assert!(self.store.mark_dispatched(object, lease, current).await.unwrap());
            QueueEntry::new(object, last_checked, lease.token)
        }
    }

    fn post(id: &str, message: &str) -> Post {
        Post {
            id: id.into(),
            message: message.into(),
            ..Post::default()
        }
    }

    fn comment(id: &str, parent: Option<&str>) -> Comment {
        Comment {
            id: id.into(),
            message: format!("text of {id}"),
            from: Author {
                id: "u1".into(),
                ..Author::default()
            },
            parent: parent.map(|p| ParentRef {
                id: p.into(),
                ..ParentRef::default()
            }),
            ..Comment::default()
        }
    }

    #[test]
    fn fetch_kind_parses_cli_names() {
        assert_eq!("posts".parse::<FetchKind>(), Ok(FetchKind::Posts));
        assert_eq!("comments".parse::<FetchKind>(), Ok(FetchKind::Comments));
        assert!("pages".parse::<FetchKind>().is_err());
        assert_eq!(FetchKind::Comments.queue(), COMMENT_FETCH);
    }

    #[tokio::test]
    async fn feed_fetch_tracks_posts_and_fans_out() {
        let f = Fixture::new();
        f.store.add_page("p").await.unwrap();
        f.source.set_feed("p", vec![post("p_1", "one"), post("p_2", "two")]);
        let page = ObjectRef::page("p");
        let entry = f.leased_entry(&page, LastChecked::Never).await;

        let outcome = f.fetcher(FetchKind::Posts).fetch(entry).await;

        assert_eq!(outcome, Disposition::Ack);
        assert!(f.store.row(&ObjectRef::post("p", "1")).is_some());
        assert!(f.store.row(&ObjectRef::post("p", "2")).is_some());
        assert_eq!(f.bus.ready_len(COMMENTS_STORE), 2);
        assert_eq!(f.bus.ready_len(COMMENTS_CLASSIFY), 2);

        let row = f.store.row(&page).unwrap();
        assert_eq!(row.last_checked, LastChecked::At(now()));
        assert!(!row.is_dispatched(now()));
    }

    #[tokio::test]
    async fn thread_fetch_passes_since_and_records_parents() {
        let f = Fixture::new();
        f.store.insert_post("p", "10").await.unwrap();
        f.source
            .set_comments("p_10", vec![comment("10_20", None), comment("10_21", Some("10_20"))]);
        let thread = ObjectRef::post("p", "10");
        let since = LastChecked::from_epoch_secs(1_700_000_000);
        let entry = f.leased_entry(&thread, since).await;

        f.fetcher(FetchKind::Comments).fetch(entry).await;

        assert_eq!(f.source.calls()[0].since, since);
        let top = f.store.row(&ObjectRef::comment("10", "20")).unwrap();
        assert_eq!(top.parent_id, None);
        assert_eq!(top.user_id.as_deref(), Some("u1"));
        let reply = f.store.row(&ObjectRef::comment("10", "21")).unwrap();
        assert_eq!(reply.parent_id.as_deref(), Some("20"));

        let published: Vec<ContentRecord> = f.bus.peek_json(COMMENTS_STORE);
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|r| r.kind() == ObjectKind::Comment));
    }

    #[tokio::test]
    async fn refetched_content_is_republished_but_tracked_once() {
        let f = Fixture::new();
        f.store.add_page("p").await.unwrap();
        f.source.set_feed("p", vec![post("p_1", "one")]);
        let page = ObjectRef::page("p");
        let fetcher = f.fetcher(FetchKind::Posts);

        let entry = f.leased_entry(&page, LastChecked::Never).await;
        fetcher.fetch(entry).await;
        let entry = f.leased_entry(&page, LastChecked::Never).await;
        assert_eq!(fetcher.fetch(entry).await, Disposition::Ack);

        assert_eq!(f.store.rows_of_kind(ObjectKind::Post).len(), 1);
        assert_eq!(f.bus.ready_len(COMMENTS_STORE), 2);
    }

    #[tokio::test]
    async fn source_failure_releases_lease_and_keeps_last_checked() {
        let f = Fixture::new();
        f.store.add_page("p").await.unwrap();
        f.source.fail("p");
        let page = ObjectRef::page("p");
        let before = LastChecked::from_epoch_secs(1_600_000_000);
        f.store.set_last_checked(&page, before);
        let entry = f.leased_entry(&page, before).await;

        assert_eq!(f.fetcher(FetchKind::Posts).fetch(entry).await, Disposition::Ack);

        let row = f.store.row(&page).unwrap();
        assert_eq!(row.last_checked, before);
        assert!(!row.is_dispatched(now()));
        assert_eq!(f.bus.ready_len(COMMENTS_STORE), 0);
    }

    /// Bus that refuses every publish to one queue.
    struct RefusingBus {
        inner: Arc<InMemoryWorkQueue>,
        refused: &'static str,
    }

    #[async_trait]
    impl WorkQueue for RefusingBus {
        async fn declare(&self, queue: &str) -> Result<(), QueueError> {
            self.inner.declare(queue).await
        }
        async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError> {
            if queue == self.refused {
                return Err(QueueError::Connection(format!("{queue} unavailable")));
            }
            self.inner.publish(queue, body).await
        }
        async fn receive(&self, queue: &str, wait: std::time::Duration) -> Result<Option<Delivery>, QueueError> {
            self.inner.receive(queue, wait).await
        }
        async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
            self.inner.ack(delivery).await
        }
        async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
            self.inner.nack(delivery, requeue).await
        }
        async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
            self.inner.dead_letter(delivery, reason).await
        }
    }

    #[tokio::test]
    async fn undelivered_record_restores_previous_check() {
        let f = Fixture::new();
        f.store.add_page("p").await.unwrap();
        f.source.set_feed("p", vec![post("p_1", "one")]);
        let page = ObjectRef::page("p");
        let before = LastChecked::from_epoch_secs(1_600_000_000);
        f.store.set_last_checked(&page, before);
        let entry = f.leased_entry(&page, before).await;
        let bus = RefusingBus {
            inner: f.bus.clone(),
            refused: COMMENTS_CLASSIFY,
        };
        let fetcher = Fetcher::new(
            FetchKind::Posts,
            f.store.clone(),
            bus,
            f.source.clone(),
            Arc::new(ManualClock::new(now())),
            5,
        );

        assert_eq!(fetcher.fetch(entry).await, Disposition::Ack);

        let row = f.store.row(&page).unwrap();
        assert_eq!(row.last_checked, before);
        assert!(!row.is_dispatched(now()));
        assert!(f.store.row(&ObjectRef::post("p", "1")).is_some());
        assert_eq!(f.bus.ready_len(COMMENTS_STORE), 1);
        assert_eq!(f.bus.ready_len(COMMENTS_CLASSIFY), 0);
    }

    #[tokio::test]
    async fn invalid_or_misrouted_entries_are_dead_lettered() {
        let f = Fixture::new();
        let fetcher = f.fetcher(FetchKind::Comments);

        let mut entry = QueueEntry::new(&ObjectRef::page("p"), LastChecked::Never, Default::default());
        assert!(matches!(fetcher.fetch(entry.clone()).await, Disposition::DeadLetter(_)));

        entry.object_type = ObjectKind::Post;
        entry.object_id = "no-separator".into();
        assert!(matches!(fetcher.fetch(entry).await, Disposition::DeadLetter(_)));
        assert!(f.source.calls().is_empty());
    }

    #[test]
    fn post_row_falls_back_to_feed_page() {
        let page = ObjectRef::page("p");
        assert_eq!(post_row(&page, &post("q_7", "")), ("q", "7"));
        assert_eq!(post_row(&page, &post("7", "")), ("p", "7"));
    }
}
