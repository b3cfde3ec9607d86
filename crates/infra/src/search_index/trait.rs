use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchIndexError {
    /// Another writer created the index first.
    #[error("index already exists: {0}")]
    AlreadyExists(String),

    #[error("index not found: {0}")]
    NotFound(String),

    #[error("search engine unavailable: {0}")]
    Unavailable(String),

    #[error("search request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected search response: {0}")]
    Response(String),
}

impl SearchIndexError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, SearchIndexError::AlreadyExists(_))
    }
}

/// Tuning knobs of the similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityParams {
    pub analyzer: String,
    pub min_term_freq: u32,
    pub max_query_terms: u32,
    pub min_doc_freq: u32,
    pub minimum_should_match: String,
}

impl Default for SimilarityParams {
    fn default() -> Self {
        Self {
            analyzer: "english".to_string(),
            min_term_freq: 1,
            max_query_terms: 150,
            min_doc_freq: 1,
            minimum_should_match: "60%".to_string(),
        }
    }
}

/// A more-like-this query over one text field.
#[derive(Debug, Clone, PartialEq)]
pub struct MoreLikeThis {
    pub field: String,
    pub like: String,
    pub params: SimilarityParams,
}

impl MoreLikeThis {
    /// Query against the `message` field.
    pub fn message(like: impl Into<String>, params: SimilarityParams) -> Self {
        Self {
            field: "message".to_string(),
            like: like.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub index: String,
    pub id: String,
    pub score: f64,
    pub source: JsonValue,
}

/// Full-text engine with per-document upsert and similarity search.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError>;

    /// Create an index with the given settings/mappings body.
    ///
    /// Fails with `AlreadyExists` if it was created concurrently.
    async fn create_index(&self, index: &str, body: &JsonValue) -> Result<(), SearchIndexError>;

    /// Insert or replace the document stored under `id`.
    async fn upsert(&self, index: &str, id: &str, document: &JsonValue) -> Result<(), SearchIndexError>;

    /// Run a similarity query across `indices`. Missing indices are skipped.
    async fn more_like_this(
        &self,
        indices: &[String],
        query: &MoreLikeThis,
    ) -> Result<Vec<SearchHit>, SearchIndexError>;
}

#[async_trait]
impl<S> SearchIndex for Arc<S>
where
    S: SearchIndex + ?Sized,
{
    async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError> {
        (**self).index_exists(index).await
    }

    async fn create_index(&self, index: &str, body: &JsonValue) -> Result<(), SearchIndexError> {
        (**self).create_index(index, body).await
    }

    async fn upsert(&self, index: &str, id: &str, document: &JsonValue) -> Result<(), SearchIndexError> {
        (**self).upsert(index, id, document).await
    }

    async fn more_like_this(
        &self,
        indices: &[String],
        query: &MoreLikeThis,
    ) -> Result<Vec<SearchHit>, SearchIndexError> {
        (**self).more_like_this(indices, query).await
    }
}
