//! Elasticsearch over its REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, instrument};

use super::r#trait::{MoreLikeThis, SearchHit, SearchIndex, SearchIndexError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ElasticsearchIndex {
    client: reqwest::Client,
    base_url: String,
}

impl ElasticsearchIndex {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SearchIndexError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

fn transport(e: reqwest::Error) -> SearchIndexError {
    SearchIndexError::Unavailable(e.to_string())
}

async fn rejected(resp: reqwest::Response) -> SearchIndexError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    SearchIndexError::Rejected { status, body }
}

/// Request body of a more-like-this search.
pub fn more_like_this_body(query: &MoreLikeThis) -> JsonValue {
    json!({
        "query": {
            "more_like_this": {
                "fields": [query.field],
                "like": [query.like],
                "analyzer": query.params.analyzer,
                "min_term_freq": query.params.min_term_freq,
                "max_query_terms": query.params.max_query_terms,
                "min_doc_freq": query.params.min_doc_freq,
                "minimum_should_match": query.params.minimum_should_match,
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    took: u64,
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: JsonValue,
}

fn parse_hits(body: JsonValue) -> Result<(u64, Vec<SearchHit>), SearchIndexError> {
    let response: SearchResponse = serde_json::from_value(body)
        .map_err(|e| SearchIndexError::Response(format!("malformed search response: {e}")))?;
    let hits = response
        .hits
        .hits
        .into_iter()
        .map(|h| SearchHit {
            index: h.index,
            id: h.id,
            score: h.score.unwrap_or(0.0),
            source: h.source,
        })
        .collect();
    Ok((response.took, hits))
}

fn is_already_exists(body: &JsonValue) -> bool {
    matches!(
        body["error"]["type"].as_str(),
        Some("resource_already_exists_exception" | "index_already_exists_exception")
    )
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    #[instrument(skip(self), err)]
    async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError> {
        let resp = self.client.head(self.url(index)).send().await.map_err(transport)?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(rejected(resp).await),
        }
    }

    #[instrument(skip(self, body), err)]
    async fn create_index(&self, index: &str, body: &JsonValue) -> Result<(), SearchIndexError> {
        let resp = self
            .client
            .put(self.url(index))
            .json(body)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::BAD_REQUEST {
            let text = resp.text().await.unwrap_or_default();
            let parsed: JsonValue = serde_json::from_str(&text).unwrap_or(JsonValue::Null);
            if is_already_exists(&parsed) {
                return Err(SearchIndexError::AlreadyExists(index.to_string()));
            }
            return Err(SearchIndexError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }
        Err(rejected(resp).await)
    }

    #[instrument(skip(self, document), err)]
    async fn upsert(&self, index: &str, id: &str, document: &JsonValue) -> Result<(), SearchIndexError> {
        let resp = self
            .client
            .put(self.url(&format!("{index}/_doc/{id}")))
            .json(document)
            .send()
            .await
            .map_err(transport)?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(SearchIndexError::NotFound(index.to_string())),
            _ => Err(rejected(resp).await),
        }
    }

    #[instrument(skip(self, indices, query), fields(indices = indices.len()), err)]
    async fn more_like_this(
        &self,
        indices: &[String],
        query: &MoreLikeThis,
    ) -> Result<Vec<SearchHit>, SearchIndexError> {
        if indices.is_empty() {
            return Ok(Vec::new());
        }
        let path = format!("{}/_search?ignore_unavailable=true", indices.join(","));
        let resp = self
            .client
            .post(self.url(&path))
            .json(&more_like_this_body(query))
            .send()
            .await
            .map_err(transport)?;

        if !resp.status().is_success() {
            return Err(rejected(resp).await);
        }
        let body: JsonValue = resp.json().await.map_err(transport)?;
        let (took, hits) = parse_hits(body)?;
        debug!(took_ms = took, matches = hits.len(), "similarity query finished");

        Ok(hits)
    }
}
