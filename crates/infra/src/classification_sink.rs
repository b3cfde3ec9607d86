//! Where classification results go.
//!
//! Results are advisory and never persisted; production logs them at a level
//! matching their tier so duplicates are alertable.

use std::sync::Mutex;

use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use fbwatch_core::{ClassificationResult, Tier};

pub trait ClassificationSink: Send + Sync + 'static {
    /// `matched` is the stored source document of the match.
    fn emit(&self, result: &ClassificationResult, matched: &JsonValue);
}

impl<S> ClassificationSink for std::sync::Arc<S>
where
    S: ClassificationSink + ?Sized,
{
    fn emit(&self, result: &ClassificationResult, matched: &JsonValue) {
        (**self).emit(result, matched)
    }
}

/// Logs discard at info, suspect at warn, duplicate at error.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ClassificationSink for TracingSink {
    fn emit(&self, result: &ClassificationResult, matched: &JsonValue) {
        let author = matched["from"]["id"].as_str().unwrap_or_default();
        let matched_message = matched["message"].as_str().unwrap_or_default();
        let score = result.score;
        let record = result.record_id.as_str();
        let matched_id = result.matched_id.as_str();
        let index = result.matched_index.as_str();

        match result.tier {
            Tier::Discard => info!(record, matched_id, index, score, author, matched_message, "low-scoring match"),
            Tier::Suspect => warn!(record, matched_id, index, score, author, matched_message, "suspect match"),
            Tier::Duplicate => error!(record, matched_id, index, score, author, matched_message, "duplicate content"),
        }
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryClassificationSink {
    inner: Mutex<Vec<ClassificationResult>>,
}

impl InMemoryClassificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<ClassificationResult> {
        self.inner.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn for_record(&self, record_id: &str) -> Vec<ClassificationResult> {
        self.all()
            .into_iter()
            .filter(|r| r.record_id == record_id)
            .collect()
    }
}

impl ClassificationSink for InMemoryClassificationSink {
    fn emit(&self, result: &ClassificationResult, _matched: &JsonValue) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.push(result.clone());
        }
    }
}
