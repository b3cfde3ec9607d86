use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use fbwatch_core::{Comment, LastChecked, Post};

use super::r#trait::{ContentSource, ContentSourceError};

/// A recorded content source call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCall {
    pub object_id: String,
    pub since: LastChecked,
}

/// Scripted content source for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryContentSource {
    feeds: Mutex<HashMap<String, Vec<Post>>>,
    comments: Mutex<HashMap<String, Vec<Comment>>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<SourceCall>>,
}

impl InMemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_feed(&self, page_id: &str, posts: Vec<Post>) {
        if let Ok(mut feeds) = self.feeds.lock() {
            feeds.insert(page_id.to_string(), posts);
        }
    }

    pub fn set_comments(&self, object_id: &str, comments: Vec<Comment>) {
        if let Ok(mut all) = self.comments.lock() {
            all.insert(object_id.to_string(), comments);
        }
    }

    /// Make every call for `object_id` fail until `recover` is called.
    pub fn fail(&self, object_id: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(object_id.to_string());
        }
    }

    pub fn recover(&self, object_id: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(object_id);
        }
    }

    pub fn calls(&self) -> Vec<SourceCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, object_id: &str, since: LastChecked) -> Result<(), ContentSourceError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(SourceCall {
                object_id: object_id.to_string(),
                since,
            });
        }
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(object_id))
            .unwrap_or(false);
        if failing {
            return Err(ContentSourceError::Unavailable(format!("scripted failure for {object_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentSource for InMemoryContentSource {
    async fn load_feed(
        &self,
        page_id: &str,
        since: LastChecked,
        max_items: usize,
    ) -> Result<Vec<Post>, ContentSourceError> {
        self.record(page_id, since)?;
        let feeds = self
            .feeds
            .lock()
            .map_err(|_| ContentSourceError::Unavailable("lock poisoned".to_string()))?;
        Ok(feeds
            .get(page_id)
            .map(|posts| posts.iter().take(max_items).cloned().collect())
            .unwrap_or_default())
    }

    async fn load_comments(
        &self,
        object_id: &str,
        since: LastChecked,
    ) -> Result<Vec<Comment>, ContentSourceError> {
        self.record(object_id, since)?;
        let comments = self
            .comments
            .lock()
            .map_err(|_| ContentSourceError::Unavailable("lock poisoned".to_string()))?;
        Ok(comments.get(object_id).cloned().unwrap_or_default())
    }
}
