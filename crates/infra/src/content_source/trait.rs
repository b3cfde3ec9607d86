use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use fbwatch_core::{Comment, LastChecked, Post};

#[derive(Debug, Error)]
pub enum ContentSourceError {
    #[error("content source unavailable: {0}")]
    Unavailable(String),

    #[error("content source rate limited: {0}")]
    RateLimited(String),

    #[error("content source error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("cannot decode content source response: {0}")]
    Decode(String),
}

/// Paginated read API for page feeds and comment threads.
///
/// Implementations drain every page of results before returning.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Posts on a page's feed since `since`, at most `max_items` of them.
    async fn load_feed(
        &self,
        page_id: &str,
        since: LastChecked,
        max_items: usize,
    ) -> Result<Vec<Post>, ContentSourceError>;

    /// Comments on a post or comment since `since`, oldest first.
    async fn load_comments(
        &self,
        object_id: &str,
        since: LastChecked,
    ) -> Result<Vec<Comment>, ContentSourceError>;
}

#[async_trait]
impl<S> ContentSource for Arc<S>
where
    S: ContentSource + ?Sized,
{
    async fn load_feed(
        &self,
        page_id: &str,
        since: LastChecked,
        max_items: usize,
    ) -> Result<Vec<Post>, ContentSourceError> {
        (**self).load_feed(page_id, since, max_items).await
    }

    async fn load_comments(
        &self,
        object_id: &str,
        since: LastChecked,
    ) -> Result<Vec<Comment>, ContentSourceError> {
        (**self).load_comments(object_id, since).await
    }
}
