//! Graph API content source (app access token, cursor pagination).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use fbwatch_core::{Comment, LastChecked, Post};

use super::r#trait::{ContentSource, ContentSourceError};
use crate::config::FbConfig;

const FEED_FIELDS: &str = "id,created_time,permalink_url,link,message,story";
const COMMENT_FIELDS: &str = "id,created_time,from,message,parent,comment_count,like_count,permalink_url";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Graph API error codes that mean "slow down".
const RATE_LIMIT_CODES: [i64; 4] = [4, 17, 32, 613];

pub struct GraphApiSource {
    client: reqwest::Client,
    graph_url: String,
    access_token: String,
    page_size_feed: u32,
    page_size_comments: u32,
}

impl GraphApiSource {
    pub fn new(config: &FbConfig) -> Result<Self, ContentSourceError> {
        if config.app_id.is_empty() || config.app_secret.is_empty() {
            return Err(ContentSourceError::Api {
                status: 0,
                message: "fb.app_id and fb.app_secret are required".to_string(),
            });
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ContentSourceError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            graph_url: config.graph_url.trim_end_matches('/').to_string(),
            access_token: app_access_token(&config.app_id, &config.app_secret),
            page_size_feed: config.page_size_feed,
            page_size_comments: config.page_size_comments,
        })
    }

    /// Follow `paging.next` until it runs out or `cap` items were collected.
    async fn drain<T: DeserializeOwned>(
        &self,
        first: reqwest::RequestBuilder,
        cap: Option<usize>,
    ) -> Result<Vec<T>, ContentSourceError> {
        let mut items = Vec::new();
        let mut request = first;
        let mut pages = 0usize;

        loop {
            let page: GraphPage = self.fetch(request).await?;
            pages += 1;

            for raw in page.data {
                let item = serde_json::from_value(raw)
                    .map_err(|e| ContentSourceError::Decode(e.to_string()))?;
                items.push(item);
                if cap.is_some_and(|cap| items.len() >= cap) {
                    return Ok(items);
                }
            }

            match page.paging.and_then(|p| p.next) {
                Some(next) => {
                    debug!(pages, collected = items.len(), "loading next page");
                    request = self.client.get(next);
                }
                None => return Ok(items),
            }
        }
    }

    async fn fetch(&self, request: reqwest::RequestBuilder) -> Result<GraphPage, ContentSourceError> {
        let resp = request
            .send()
            .await
            .map_err(|e| ContentSourceError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }
        resp.json()
            .await
            .map_err(|e| ContentSourceError::Decode(e.to_string()))
    }

    fn since_param(since: LastChecked) -> Option<(&'static str, String)> {
        since.since().map(|s| ("since", s.to_string()))
    }
}

pub fn app_access_token(app_id: &str, app_secret: &str) -> String {
    format!("{app_id}|{app_secret}")
}

#[derive(Debug, Deserialize)]
struct GraphPage {
    #[serde(default)]
    data: Vec<serde_json::Value>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

fn api_error(status: u16, body: &str) -> ContentSourceError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error }) if RATE_LIMIT_CODES.contains(&error.code) => {
            ContentSourceError::RateLimited(error.message)
        }
        Ok(ErrorBody { error }) => ContentSourceError::Api {
            status,
            message: format!("{} (code {})", error.message, error.code),
        },
        Err(_) => ContentSourceError::Api {
            status,
            message: body.to_string(),
        },
    }
}

#[async_trait]
impl ContentSource for GraphApiSource {
    #[instrument(skip(self), err)]
    async fn load_feed(
        &self,
        page_id: &str,
        since: LastChecked,
        max_items: usize,
    ) -> Result<Vec<Post>, ContentSourceError> {
        info!(page_id, since = since.as_epoch_secs(), "loading feed");
        let limit = self.page_size_feed.to_string();
        let mut query = vec![
            ("access_token", self.access_token.clone()),
            ("limit", limit),
            ("fields", FEED_FIELDS.to_string()),
        ];
        query.extend(Self::since_param(since));

        let request = self
            .client
            .get(format!("{}/{}/feed", self.graph_url, page_id))
            .query(&query);
        self.drain(request, Some(max_items)).await
    }

    #[instrument(skip(self), err)]
    async fn load_comments(
        &self,
        object_id: &str,
        since: LastChecked,
    ) -> Result<Vec<Comment>, ContentSourceError> {
        info!(object_id, since = since.as_epoch_secs(), "loading comments");
        let mut query = vec![
            ("access_token", self.access_token.clone()),
            ("limit", self.page_size_comments.to_string()),
            ("order", "chronological".to_string()),
            ("fields", COMMENT_FIELDS.to_string()),
        ];
        query.extend(Self::since_param(since));

        let request = self
            .client
            .get(format!("{}/{}/comments", self.graph_url, object_id))
            .query(&query);
        self.drain(request, None).await
    }
}
