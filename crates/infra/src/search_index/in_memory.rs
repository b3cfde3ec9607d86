use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::r#trait::{MoreLikeThis, SearchHit, SearchIndex, SearchIndexError};

/// In-memory search index.
///
/// Intended for tests/dev. Similarity is the share of distinct query terms
/// found in the document field, gated by `minimum_should_match`.
#[derive(Debug, Default)]
pub struct InMemorySearchIndex {
    indices: RwLock<BTreeMap<String, BTreeMap<String, JsonValue>>>,
    exists_calls: Mutex<HashMap<String, usize>>,
    create_calls: AtomicUsize,
    search_calls: AtomicUsize,
    raced: Mutex<HashSet<String>>,
    failing_upserts: AtomicUsize,
    failing_searches: AtomicBool,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, index: &str, id: &str) -> Option<JsonValue> {
        self.indices
            .read()
            .ok()
            .and_then(|i| i.get(index).and_then(|docs| docs.get(id).cloned()))
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.indices
            .read()
            .map(|i| i.get(index).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indices
            .read()
            .map(|i| i.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn exists_calls(&self, index: &str) -> usize {
        self.exists_calls
            .lock()
            .map(|c| c.get(index).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Similarity queries issued, failed ones included.
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// Make the next `create_index(index)` lose a race against another writer.
    pub fn race_next_create(&self, index: &str) {
        if let Ok(mut raced) = self.raced.lock() {
            raced.insert(index.to_string());
        }
    }

    /// Fail the next `n` upserts with `Unavailable`.
    pub fn fail_next_upserts(&self, n: usize) {
        self.failing_upserts.store(n, Ordering::SeqCst);
    }

    pub fn fail_searches(&self, failing: bool) {
        self.failing_searches.store(failing, Ordering::SeqCst);
    }

    fn write_lock(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, BTreeMap<String, JsonValue>>>, SearchIndexError>
    {
        self.indices
            .write()
            .map_err(|_| SearchIndexError::Unavailable("lock poisoned".to_string()))
    }
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// `"60%"` → `0.6`; anything unparseable means no gate.
fn should_match_ratio(value: &str) -> f64 {
    value.trim()
        .strip_suffix('%')
        .and_then(|p| p.trim().parse::<f64>().ok())
        .map(|p| (p / 100.0).clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError> {
        if let Ok(mut calls) = self.exists_calls.lock() {
            *calls.entry(index.to_string()).or_default() += 1;
        }
        let indices = self
            .indices
            .read()
            .map_err(|_| SearchIndexError::Unavailable("lock poisoned".to_string()))?;
        Ok(indices.contains_key(index))
    }

    async fn create_index(&self, index: &str, _body: &JsonValue) -> Result<(), SearchIndexError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut indices = self.write_lock()?;

        let raced = self
            .raced
            .lock()
            .map(|mut r| r.remove(index))
            .unwrap_or(false);
        if raced {
            indices.entry(index.to_string()).or_default();
        }

        if indices.contains_key(index) {
            return Err(SearchIndexError::AlreadyExists(index.to_string()));
        }
        indices.insert(index.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn upsert(&self, index: &str, id: &str, document: &JsonValue) -> Result<(), SearchIndexError> {
        let failing = self
            .failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SearchIndexError::Unavailable("injected upsert failure".to_string()));
        }

        let mut indices = self.write_lock()?;
        // Auto-create like an engine with dynamic index creation.
        indices
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn more_like_this(
        &self,
        indices: &[String],
        query: &MoreLikeThis,
    ) -> Result<Vec<SearchHit>, SearchIndexError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_searches.load(Ordering::SeqCst) {
            return Err(SearchIndexError::Unavailable("injected search failure".to_string()));
        }

        let wanted = terms(&query.like);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let gate = should_match_ratio(&query.params.minimum_should_match);

        let stored = self
            .indices
            .read()
            .map_err(|_| SearchIndexError::Unavailable("lock poisoned".to_string()))?;

        let mut hits = Vec::new();
        for index in indices {
            let Some(docs) = stored.get(index) else {
                continue;
            };
            for (id, doc) in docs {
                let text = doc.get(&query.field).and_then(JsonValue::as_str).unwrap_or_default();
                let found = terms(text);
                let overlap = wanted.intersection(&found).count();
                if overlap == 0 {
                    continue;
                }
                let score = overlap as f64 / wanted.len() as f64;
                if score < gate {
                    continue;
                }
                hits.push(SearchHit {
                    index: index.clone(),
                    id: id.clone(),
                    score,
                    source: doc.clone(),
                });
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));

        Ok(hits)
    }
}
