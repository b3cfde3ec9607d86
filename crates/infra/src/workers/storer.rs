//! Storer: indexes every fetched record into the day's search index.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use fbwatch_core::{index_for, Clock, ContentRecord};
use fbwatch_events::Delivery;

use super::consumer::{DeliveryHandler, Disposition};
use crate::search_index::{comment_mapping, SearchIndex, SearchIndexError};

pub struct Storer<I, C> {
    index: I,
    clock: C,
    prefix: String,
    /// Last index known to exist; checked again only when the day rolls over.
    current_index: Option<String>,
}

impl<I, C> Storer<I, C>
where
    I: SearchIndex,
    C: Clock,
{
    pub fn new(index: I, clock: C, prefix: impl Into<String>) -> Self {
        Self {
            index,
            clock,
            prefix: prefix.into(),
            current_index: None,
        }
    }

    /// Make sure `name` exists, creating it with the comment mapping.
    async fn ensure_index(&mut self, name: &str) -> Result<(), SearchIndexError> {
        if self.current_index.as_deref() == Some(name) {
            return Ok(());
        }

        if !self.index.index_exists(name).await? {
            match self.index.create_index(name, &comment_mapping()).await {
                Ok(()) => info!(index = name, "created index"),
                Err(e) if e.is_already_exists() => debug!(index = name, "index created concurrently"),
                Err(e) => return Err(e),
            }
        }

        self.current_index = Some(name.to_string());
        Ok(())
    }

    pub async fn store(&mut self, record: &ContentRecord) -> Disposition {
        if record.id().is_empty() {
            return Disposition::DeadLetter("record has no id".to_string());
        }
        let document = match serde_json::to_value(record) {
            Ok(document) => document,
            Err(e) => return Disposition::DeadLetter(format!("cannot encode record: {e}")),
        };

        let name = index_for(&self.prefix, self.clock.now());
        if let Err(e) = self.ensure_index(&name).await {
            warn!(index = %name, error = %e, "cannot prepare index");
            return Disposition::Requeue;
        }

        match self.index.upsert(&name, record.id(), &document).await {
            Ok(()) => {
                debug!(index = %name, record = %record.id(), kind = %record.kind(), "stored");
                Disposition::Ack
            }
            Err(e) => {
                warn!(index = %name, record = %record.id(), error = %e, "cannot store record");
                Disposition::Requeue
            }
        }
    }
}

#[async_trait]
impl<I, C> DeliveryHandler for Storer<I, C>
where
    I: SearchIndex,
    C: Clock,
{
    type Message = ContentRecord;

    async fn handle(&mut self, record: ContentRecord, _delivery: &Delivery) -> Disposition {
        self.store(&record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use fbwatch_core::{ManualClock, Post};

    use crate::search_index::InMemorySearchIndex;

    fn record(id: &str) -> ContentRecord {
        ContentRecord::Post(Post {
            id: id.into(),
            message: "hello".into(),
            ..Post::default()
        })
    }

    fn fixture() -> (Arc<InMemorySearchIndex>, Arc<ManualClock>, Storer<Arc<InMemorySearchIndex>, Arc<ManualClock>>) {
        let index = Arc::new(InMemorySearchIndex::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 23, 0, 0).unwrap()));
        let storer = Storer::new(index.clone(), clock.clone(), "fbcomments");
        (index, clock, storer)
    }

    #[tokio::test]
    async fn storing_twice_keeps_one_document() {
        let (index, _, mut storer) = fixture();

        assert_eq!(storer.store(&record("p_1")).await, Disposition::Ack);
        assert_eq!(storer.store(&record("p_1")).await, Disposition::Ack);

        assert_eq!(index.document_count("fbcomments-2024.05.01"), 1);
        let doc = index.document("fbcomments-2024.05.01", "p_1").unwrap();
        assert_eq!(doc["message"], "hello");
    }

    #[tokio::test]
    async fn index_existence_is_checked_once_per_day() {
        let (index, clock, mut storer) = fixture();

        for id in ["p_1", "p_2", "p_3"] {
            storer.store(&record(id)).await;
        }
        assert_eq!(index.exists_calls("fbcomments-2024.05.01"), 1);
        assert_eq!(index.create_calls(), 1);

        clock.advance(Duration::hours(2));
        storer.store(&record("p_4")).await;

        assert_eq!(index.exists_calls("fbcomments-2024.05.02"), 1);
        assert_eq!(index.document_count("fbcomments-2024.05.02"), 1);
        assert_eq!(index.create_calls(), 2);
    }

    #[tokio::test]
    async fn losing_the_create_race_is_not_an_error() {
        let (index, _, mut storer) = fixture();
        index.race_next_create("fbcomments-2024.05.01");

        assert_eq!(storer.store(&record("p_1")).await, Disposition::Ack);
        assert_eq!(index.document_count("fbcomments-2024.05.01"), 1);
    }

    #[tokio::test]
    async fn failed_upsert_is_requeued() {
        let (index, _, mut storer) = fixture();
        index.fail_next_upserts(1);

        assert_eq!(storer.store(&record("p_1")).await, Disposition::Requeue);
        assert_eq!(storer.store(&record("p_1")).await, Disposition::Ack);
    }

    #[tokio::test]
    async fn record_without_id_is_dead_lettered() {
        let (_, _, mut storer) = fixture();
        assert!(matches!(storer.store(&record("")).await, Disposition::DeadLetter(_)));
    }
}
