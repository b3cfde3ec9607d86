use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use fbwatch_core::{DispatchToken, LastChecked, Lease, ObjectRef};

/// A tracked object due for a fetch, as selected by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledObject {
    pub object: ObjectRef,
    pub last_checked: LastChecked,
}

/// Metadata row for a fetched comment.
///
/// `comment_id` and `parent_id` are the local (second) segments of the
/// composite ids; `parent_id` is `None` for top-level comments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRow {
    pub comment_id: String,
    pub post_id: String,
    pub parent_id: Option<String>,
    pub user_id: String,
}

impl CommentRow {
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn object(&self) -> ObjectRef {
        ObjectRef::comment(&self.post_id, &self.comment_id)
    }
}

#[derive(Debug, Error)]
pub enum MetadataStoreError {
    /// The row already exists. Inserts treat this as success.
    #[error("duplicate row: {0}")]
    Duplicate(String),

    #[error("object not tracked: {0}")]
    NotFound(String),

    #[error("metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("metadata store query failed: {0}")]
    Query(String),
}

impl MetadataStoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, MetadataStoreError::Duplicate(_))
    }
}

/// Per-object tracking rows for pages, posts, and comments.
///
/// An object is *dispatched* while it holds an unexpired lease. Expired leases
/// make the object selectable again, so a crashed fetch never pins it.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Pages checked longer than `interval` ago (or never) with no active lease.
    async fn stale_pages(
        &self,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledObject>, MetadataStoreError>;

    /// Posts and top-level comments checked longer than `interval` ago (or
    /// never) with no active lease.
    async fn stale_threads(
        &self,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledObject>, MetadataStoreError>;

    /// Attach a dispatch lease, provided the object still carries the
    /// `selected` check time it was scheduled with.
    ///
    /// Returns `false` when a fetch already recorded a newer check.
    async fn mark_dispatched(
        &self,
        object: &ObjectRef,
        lease: Lease,
        selected: LastChecked,
    ) -> Result<bool, MetadataStoreError>;

    /// Record a completed check and clear any lease.
    async fn record_check(
        &self,
        object: &ObjectRef,
        last_checked: LastChecked,
    ) -> Result<(), MetadataStoreError>;

    /// Clear the lease if it is still the one identified by `token`.
    ///
    /// Returns whether a lease was cleared.
    async fn release(&self, object: &ObjectRef, token: DispatchToken) -> Result<bool, MetadataStoreError>;

    async fn insert_post(&self, page_id: &str, post_id: &str) -> Result<(), MetadataStoreError>;

    async fn insert_comment(&self, row: &CommentRow) -> Result<(), MetadataStoreError>;

    /// Register a page to monitor.
    async fn add_page(&self, page_id: &str) -> Result<(), MetadataStoreError>;
}

#[async_trait]
impl<S> MetadataStore for Arc<S>
where
    S: MetadataStore + ?Sized,
{
    async fn stale_pages(
        &self,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledObject>, MetadataStoreError> {
        (**self).stale_pages(interval, now).await
    }

    async fn stale_threads(
        &self,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledObject>, MetadataStoreError> {
        (**self).stale_threads(interval, now).await
    }

    async fn mark_dispatched(
        &self,
        object: &ObjectRef,
        lease: Lease,
        selected: LastChecked,
    ) -> Result<bool, MetadataStoreError> {
        (**self).mark_dispatched(object, lease, selected).await
    }

    async fn record_check(
        &self,
        object: &ObjectRef,
        last_checked: LastChecked,
    ) -> Result<(), MetadataStoreError> {
        (**self).record_check(object, last_checked).await
    }

    async fn release(&self, object: &ObjectRef, token: DispatchToken) -> Result<bool, MetadataStoreError> {
        (**self).release(object, token).await
    }

    async fn insert_post(&self, page_id: &str, post_id: &str) -> Result<(), MetadataStoreError> {
        (**self).insert_post(page_id, post_id).await
    }

    async fn insert_comment(&self, row: &CommentRow) -> Result<(), MetadataStoreError> {
        (**self).insert_comment(row).await
    }

    async fn add_page(&self, page_id: &str) -> Result<(), MetadataStoreError> {
        (**self).add_page(page_id).await
    }
}
