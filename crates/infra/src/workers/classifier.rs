//! Classifier: scores each new record against recently indexed content.
//!
//! Results are advisory. A failed similarity query is logged and the record
//! acknowledged; classification is never retried.

use async_trait::async_trait;
use tracing::{debug, error, info};

use fbwatch_core::{retention_indices, ClassificationResult, Clock, ContentRecord, Thresholds};
use fbwatch_events::Delivery;

use super::consumer::{DeliveryHandler, Disposition};
use crate::classification_sink::ClassificationSink;
use crate::config::Config;
use crate::search_index::{MoreLikeThis, SearchIndex, SearchIndexError, SimilarityParams};

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub index_prefix: String,
    pub retention_days: u32,
    pub thresholds: Thresholds,
    pub similarity: SimilarityParams,
}

impl ClassifierSettings {
    pub fn from_config(config: &Config) -> Result<Self, crate::config::ConfigError> {
        Ok(Self {
            index_prefix: config.es.index_prefix.clone(),
            retention_days: config.classify.retention_days,
            thresholds: config.classify.thresholds()?,
            similarity: config.classify.similarity.clone(),
        })
    }
}

pub struct Classifier<I, K, C> {
    index: I,
    sink: K,
    clock: C,
    settings: ClassifierSettings,
}

impl<I, K, C> Classifier<I, K, C>
where
    I: SearchIndex,
    K: ClassificationSink,
    C: Clock,
{
    pub fn new(index: I, sink: K, clock: C, settings: ClassifierSettings) -> Self {
        Self {
            index,
            sink,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    /// Query, tier and emit every match other than the record itself.
    pub async fn classify(&self, record: &ContentRecord) -> Result<Vec<ClassificationResult>, SearchIndexError> {
        if !record.has_text() {
            debug!(record = %record.id(), "no text to classify");
            return Ok(Vec::new());
        }

        let indices = retention_indices(&self.settings.index_prefix, self.clock.now(), self.settings.retention_days);
        let query = MoreLikeThis::message(record.message(), self.settings.similarity.clone());
        let hits = self.index.more_like_this(&indices, &query).await?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            if is_self_match(record, &hit.id, &hit.source) {
                continue;
            }
            let result = ClassificationResult {
                record_id: record.id().to_string(),
                matched_id: hit.id,
                matched_index: hit.index,
                score: hit.score,
                tier: self.settings.thresholds.classify(hit.score),
            };
            self.sink.emit(&result, &hit.source);
            results.push(result);
        }
        Ok(results)
    }
}

fn is_self_match(record: &ContentRecord, hit_id: &str, source: &serde_json::Value) -> bool {
    hit_id == record.id() || source["id"].as_str() == Some(record.id())
}

#[async_trait]
impl<I, K, C> DeliveryHandler for Classifier<I, K, C>
where
    I: SearchIndex,
    K: ClassificationSink,
    C: Clock,
{
    type Message = ContentRecord;

    async fn handle(&mut self, record: ContentRecord, _delivery: &Delivery) -> Disposition {
        match self.classify(&record).await {
            Ok(results) if !results.is_empty() => {
                info!(record = %record.id(), matches = results.len(), "classified")
            }
            Ok(_) => debug!(record = %record.id(), "no similar content"),
            Err(e) => error!(record = %record.id(), error = %e, "similarity query failed"),
        }
        Disposition::Ack
    }
}
