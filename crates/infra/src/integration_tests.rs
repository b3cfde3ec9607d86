//! Integration tests for the full ingestion pipeline.
//!
//! Tests: Scheduler → page-fetch → Fetcher → comments-store/classify →
//! Storer + Classifier, all over in-memory adapters.
//!
//! Verifies:
//! - Only stale objects are dispatched, and only once per lease
//! - Failed fetches are retried on the next cycle
//! - Redelivered records are stored once
//! - Classification never reports a record against itself

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;

    use fbwatch_core::{
        Author, Comment, ContentRecord, LastChecked, ManualClock, ObjectKind, ObjectRef, Post, QueueEntry, Thresholds,
        Tier,
    };
    use fbwatch_core::Clock as _;
    use fbwatch_events::{
        InMemoryWorkQueue, WorkQueue, WorkQueueExt, COMMENTS_CLASSIFY, COMMENTS_STORE, COMMENT_FETCH, PAGE_FETCH,
    };

    use crate::classification_sink::InMemoryClassificationSink;
    use crate::content_source::InMemoryContentSource;
    use crate::metadata_store::{InMemoryMetadataStore, MetadataStore};
    use crate::search_index::{InMemorySearchIndex, SimilarityParams};
    use crate::workers::{
        Backoff, Classifier, ClassifierSettings, Consumer, Disposition, FetchKind, Fetcher, Scheduler,
        SchedulerSettings, Storer,
    };

    type Store = Arc<InMemoryMetadataStore>;
    type Bus = Arc<InMemoryWorkQueue>;
    type Source = Arc<InMemoryContentSource>;
    type Index = Arc<InMemorySearchIndex>;
    type Clock = Arc<ManualClock>;

    const PREFIX: &str = "fbcomments";
    const SPAM: &str = "buy cheap watches now at our store";

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).unwrap()
    }

    struct Pipeline {
        store: Store,
        bus: Bus,
        source: Source,
        index: Index,
        sink: Arc<InMemoryClassificationSink>,
        clock: Clock,
        scheduler: Scheduler<Store, Bus, Clock>,
        posts: Fetcher<Store, Bus, Source, Clock>,
        comments: Fetcher<Store, Bus, Source, Clock>,
        storer: Storer<Index, Clock>,
        classifier: Classifier<Index, Arc<InMemoryClassificationSink>, Clock>,
    }

    impl Pipeline {
        fn new() -> Self {
            let store = Arc::new(InMemoryMetadataStore::new());
            let bus = Arc::new(InMemoryWorkQueue::new());
            let source = Arc::new(InMemoryContentSource::new());
            let index = Arc::new(InMemorySearchIndex::new());
            let sink = Arc::new(InMemoryClassificationSink::new());
            let clock = Arc::new(ManualClock::new(start()));

            let scheduler = Scheduler::new(
                store.clone(),
                bus.clone(),
                clock.clone(),
                SchedulerSettings {
                    feed_interval: Duration::seconds(5),
                    comments_interval: Duration::seconds(5),
                    lease_ttl: Duration::seconds(600),
                    poll_interval: StdDuration::from_millis(10),
                },
            );
            let fetcher = |kind| Fetcher::new(kind, store.clone(), bus.clone(), source.clone(), clock.clone(), 5);
            let posts = fetcher(FetchKind::Posts);
            let comments = fetcher(FetchKind::Comments);
            let storer = Storer::new(index.clone(), clock.clone(), PREFIX);
            let classifier = Classifier::new(
                index.clone(),
                sink.clone(),
                clock.clone(),
                ClassifierSettings {
                    index_prefix: PREFIX.into(),
                    retention_days: 2,
                    thresholds: Thresholds::new(0.5, 0.8).unwrap(),
                    similarity: SimilarityParams::default(),
                },
            );

            Self {
                store,
                bus,
                source,
                index,
                sink,
                clock,
                scheduler,
                posts,
                comments,
                storer,
                classifier,
            }
        }

        fn consumer(&self, queue: &str) -> Consumer<Bus> {
            Consumer::new("it", self.bus.clone(), queue)
                .with_poll_wait(StdDuration::ZERO)
                .with_backoff(Backoff::new(StdDuration::from_millis(1), StdDuration::from_millis(1)))
        }

        /// Run every fetch, store, and classify delivery currently queued.
        async fn drain(&mut self) {
            let page_fetch = self.consumer(PAGE_FETCH);
            while page_fetch.process_next(&mut self.posts).await.unwrap().is_some() {}
            let comment_fetch = self.consumer(COMMENT_FETCH);
            while comment_fetch.process_next(&mut self.comments).await.unwrap().is_some() {}
            let store = self.consumer(COMMENTS_STORE);
            while store.process_next(&mut self.storer).await.unwrap().is_some() {}
            let classify = self.consumer(COMMENTS_CLASSIFY);
            while classify.process_next(&mut self.classifier).await.unwrap().is_some() {}
        }

        fn today(&self) -> String {
            fbwatch_core::index_for(PREFIX, self.clock.now())
        }
    }

    fn post(id: &str, message: &str) -> Post {
        Post {
            id: id.into(),
            message: message.into(),
            ..Post::default()
        }
    }

    fn comment(id: &str, author: &str, message: &str) -> Comment {
        Comment {
            id: id.into(),
            message: message.into(),
            from: Author {
                id: author.into(),
                ..Author::default()
            },
            ..Comment::default()
        }
    }

    #[tokio::test]
    async fn feed_flows_through_store_and_classify() {
        let mut p = Pipeline::new();
        p.store.add_page("42").await.unwrap();
        p.source
            .set_feed("42", vec![post("42_1", SPAM), post("42_2", SPAM), post("42_3", "weekly update")]);

        let report = p.scheduler.run_cycle().await.unwrap();
        assert_eq!(report.pages, 1);
        p.drain().await;

        let today = p.today();
        assert_eq!(p.index.document_count(&today), 3);
        assert_eq!(p.index.create_calls(), 1);
        assert_eq!(p.index.exists_calls(&today), 1);
        assert_eq!(p.index.search_calls(), 3);
        assert_eq!(p.store.rows_of_kind(ObjectKind::Post).len(), 3);

        let first = p.sink.for_record("42_1");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].matched_id, "42_2");
        assert_eq!(first[0].tier, Tier::Duplicate);
        assert!(p.sink.all().iter().all(|r| r.record_id != r.matched_id));
        assert!(p.sink.for_record("42_3").is_empty());

        // New posts become threads; the page itself is due again too.
        p.clock.advance(Duration::seconds(6));
        let report = p.scheduler.run_cycle().await.unwrap();
        assert_eq!(report.pages, 1);
        assert_eq!(report.threads, 3);
        let threads: Vec<QueueEntry> = p.bus.peek_json(COMMENT_FETCH);
        assert!(threads.iter().all(|e| e.object_type == ObjectKind::Post));
    }

    #[tokio::test]
    async fn comment_threads_discover_replies_without_scheduling_them() {
        let mut p = Pipeline::new();
        p.store.insert_post("42", "1").await.unwrap();
        let mut reply = comment("1_11", "u2", "me too");
        reply.parent = Some(fbwatch_core::ParentRef {
            id: "1_10".into(),
            ..Default::default()
        });
        p.source
            .set_comments("42_1", vec![comment("1_10", "u1", SPAM), reply]);

        p.scheduler.run_cycle().await.unwrap();
        p.drain().await;

        assert!(p.store.row(&ObjectRef::comment("1", "10")).is_some());
        assert_eq!(
            p.store.row(&ObjectRef::comment("1", "11")).unwrap().parent_id.as_deref(),
            Some("10")
        );
        assert_eq!(p.index.document_count(&p.today()), 2);

        p.clock.advance(Duration::seconds(6));
        p.scheduler.run_cycle().await.unwrap();
        let threads: Vec<QueueEntry> = p.bus.peek_json(COMMENT_FETCH);
        let ids: Vec<_> = threads.iter().map(|e| e.object_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"42_1"));
        assert!(ids.contains(&"1_10"));
    }

    #[tokio::test]
    async fn failed_fetch_is_retried_next_cycle() {
        let mut p = Pipeline::new();
        p.store.add_page("42").await.unwrap();
        p.source.fail("42");

        p.scheduler.run_cycle().await.unwrap();
        p.drain().await;
        assert_eq!(p.store.row(&ObjectRef::page("42")).unwrap().last_checked, LastChecked::Never);

        p.source.recover("42");
        p.source.set_feed("42", vec![post("42_1", "hello")]);
        let report = p.scheduler.run_cycle().await.unwrap();
        assert_eq!(report.pages, 1);
        p.drain().await;

        assert_eq!(
            p.store.row(&ObjectRef::page("42")).unwrap().last_checked,
            LastChecked::At(start())
        );
        assert_eq!(p.source.calls().len(), 2);
    }

    #[tokio::test]
    async fn lost_fetch_work_is_redispatched_after_lease_expiry() {
        let p = Pipeline::new();
        p.store.add_page("42").await.unwrap();

        p.scheduler.run_cycle().await.unwrap();
        // The fetch is lost: nobody consumes page-fetch.
        p.clock.advance(Duration::seconds(300));
        assert_eq!(p.scheduler.run_cycle().await.unwrap().pages, 0);

        p.clock.advance(Duration::seconds(301));
        assert_eq!(p.scheduler.run_cycle().await.unwrap().pages, 1);
    }

    #[tokio::test]
    async fn redelivered_records_are_stored_once() {
        let mut p = Pipeline::new();
        let record = ContentRecord::Comment(comment("1_10", "u1", SPAM));
        p.bus.publish_json(COMMENTS_STORE, &record).await.unwrap();
        p.bus.publish_json(COMMENTS_STORE, &record).await.unwrap();

        let store = p.consumer(COMMENTS_STORE);
        assert_eq!(store.process_next(&mut p.storer).await.unwrap(), Some(Disposition::Ack));
        assert_eq!(store.process_next(&mut p.storer).await.unwrap(), Some(Disposition::Ack));

        assert_eq!(p.index.document_count(&p.today()), 1);
        assert_eq!(p.index.exists_calls(&p.today()), 1);
    }

    #[tokio::test]
    async fn classifier_sees_yesterdays_index_after_midnight() {
        let mut p = Pipeline::new();
        p.clock.set(Utc.with_ymd_and_hms(2024, 4, 2, 23, 59, 0).unwrap());
        let early = ContentRecord::Comment(comment("1_10", "u1", SPAM));
        p.bus.publish_json(COMMENTS_STORE, &early).await.unwrap();
        p.drain().await;

        p.clock.advance(Duration::minutes(2));
        let late = ContentRecord::Comment(comment("1_20", "u2", SPAM));
        p.bus.publish_json(COMMENTS_STORE, &late).await.unwrap();
        p.bus.publish_json(COMMENTS_CLASSIFY, &late).await.unwrap();
        p.drain().await;

        assert_eq!(p.index.index_names(), vec!["fbcomments-2024.04.02", "fbcomments-2024.04.03"]);
        let matches = p.sink.for_record("1_20");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_index, "fbcomments-2024.04.02");
    }

    #[tokio::test]
    async fn malformed_work_is_dead_lettered() {
        let mut p = Pipeline::new();
        p.bus.publish(PAGE_FETCH, b"{\"object_id\": 1}".to_vec()).await.unwrap();

        let fetch = p.consumer(PAGE_FETCH);
        let outcome = fetch.process_next(&mut p.posts).await.unwrap();

        assert!(matches!(outcome, Some(Disposition::DeadLetter(_))));
        assert_eq!(p.bus.dead_letters(PAGE_FETCH).len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

        /// A page is dispatched exactly when its last check is older than one interval.
        #[test]
        fn pages_are_dispatched_iff_stale(ages in proptest::collection::vec(proptest::option::of(0i64..20), 1..8)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let p = Pipeline::new();
                let mut expected = 0;
                for (i, age) in ages.iter().enumerate() {
                    let page = format!("page{i}");
                    p.store.add_page(&page).await.unwrap();
                    if let Some(age) = age {
                        p.store.set_last_checked(
                            &ObjectRef::page(page.as_str()),
                            LastChecked::At(start() - Duration::seconds(*age)),
                        );
                    }
                    if age.is_none_or(|a| a > 5) {
                        expected += 1;
                    }
                }

                let report = p.scheduler.run_cycle().await.unwrap();
                prop_assert_eq!(report.pages, expected);
                prop_assert_eq!(p.bus.ready_len(PAGE_FETCH), expected);
                Ok(())
            })?;
        }
    }
}
