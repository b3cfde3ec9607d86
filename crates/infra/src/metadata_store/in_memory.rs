use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use fbwatch_core::{DispatchToken, LastChecked, Lease, ObjectKind, ObjectRef};

use super::r#trait::{CommentRow, MetadataStore, MetadataStoreError, ScheduledObject};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RowKey {
    kind: ObjectKind,
    local_id: String,
}

impl RowKey {
    fn of(object: &ObjectRef) -> Self {
        Self {
            kind: object.kind(),
            local_id: object.local_id().to_string(),
        }
    }
}

/// Snapshot of one tracking row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRow {
    pub object: ObjectRef,
    pub parent_id: Option<String>,
    pub user_id: Option<String>,
    pub last_checked: LastChecked,
    pub lease: Option<Lease>,
}

impl TrackedRow {
    fn new(object: ObjectRef) -> Self {
        Self {
            object,
            parent_id: None,
            user_id: None,
            last_checked: LastChecked::Never,
            lease: None,
        }
    }

    pub fn is_dispatched(&self, now: DateTime<Utc>) -> bool {
        self.lease.is_some_and(|l| l.is_active(now))
    }

    fn is_due(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        self.last_checked.is_stale(interval, now) && !self.is_dispatched(now)
    }

    fn scheduled(&self) -> ScheduledObject {
        ScheduledObject {
            object: self.object.clone(),
            last_checked: self.last_checked,
        }
    }
}

/// In-memory metadata store.
///
/// Intended for tests/dev. Selection order is never-checked first, then
/// oldest check first.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    rows: RwLock<HashMap<RowKey, TrackedRow>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(&self, object: &ObjectRef) -> Option<TrackedRow> {
        self.rows
            .read()
            .ok()
            .and_then(|rows| rows.get(&RowKey::of(object)).cloned())
    }

    pub fn rows_of_kind(&self, kind: ObjectKind) -> Vec<TrackedRow> {
        let Ok(rows) = self.rows.read() else {
            return Vec::new();
        };
        rows.values().filter(|r| r.object.kind() == kind).cloned().collect()
    }

    /// Overwrite `last_checked` without touching the lease (test setup).
    pub fn set_last_checked(&self, object: &ObjectRef, last_checked: LastChecked) {
        if let Ok(mut rows) = self.rows.write() {
            if let Some(row) = rows.get_mut(&RowKey::of(object)) {
                row.last_checked = last_checked;
            }
        }
    }

    fn select<F>(&self, interval: Duration, now: DateTime<Utc>, filter: F) -> Result<Vec<ScheduledObject>, MetadataStoreError>
    where
        F: Fn(&TrackedRow) -> bool,
    {
        let rows = self
            .rows
            .read()
            .map_err(|_| MetadataStoreError::Unavailable("lock poisoned".to_string()))?;

        let mut due: Vec<&TrackedRow> = rows
            .values()
            .filter(|r| filter(r) && r.is_due(interval, now))
            .collect();
        due.sort_by_key(|r| r.last_checked.as_epoch_secs());

        Ok(due.into_iter().map(TrackedRow::scheduled).collect())
    }

    fn update<F, T>(&self, object: &ObjectRef, f: F) -> Result<T, MetadataStoreError>
    where
        F: FnOnce(&mut TrackedRow) -> T,
    {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| MetadataStoreError::Unavailable("lock poisoned".to_string()))?;
        let row = rows
            .get_mut(&RowKey::of(object))
            .ok_or_else(|| MetadataStoreError::NotFound(object.to_string()))?;
        Ok(f(row))
    }

    fn insert(&self, row: TrackedRow) -> Result<(), MetadataStoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| MetadataStoreError::Unavailable("lock poisoned".to_string()))?;
        let key = RowKey::of(&row.object);
        if rows.contains_key(&key) {
            return Err(MetadataStoreError::Duplicate(row.object.to_string()));
        }
        rows.insert(key, row);
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn stale_pages(
        &self,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledObject>, MetadataStoreError> {
        self.select(interval, now, |r| r.object.kind() == ObjectKind::Page)
    }

    async fn stale_threads(
        &self,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledObject>, MetadataStoreError> {
        self.select(interval, now, |r| match r.object.kind() {
            ObjectKind::Post => true,
            ObjectKind::Comment => r.parent_id.is_none(),
            ObjectKind::Page => false,
        })
    }

    async fn mark_dispatched(
        &self,
        object: &ObjectRef,
        lease: Lease,
        selected: LastChecked,
    ) -> Result<bool, MetadataStoreError> {
        self.update(object, |row| {
            if row.last_checked != selected {
                return false;
            }
            row.lease = Some(lease);
            true
        })
    }

    async fn record_check(
        &self,
        object: &ObjectRef,
        last_checked: LastChecked,
    ) -> Result<(), MetadataStoreError> {
        self.update(object, |row| {
            row.last_checked = last_checked;
            row.lease = None;
        })
    }

    async fn release(&self, object: &ObjectRef, token: DispatchToken) -> Result<bool, MetadataStoreError> {
        self.update(object, |row| match row.lease {
            Some(lease) if lease.token == token => {
                row.lease = None;
                true
            }
            _ => false,
        })
    }

    async fn insert_post(&self, page_id: &str, post_id: &str) -> Result<(), MetadataStoreError> {
        self.insert(TrackedRow::new(ObjectRef::post(page_id, post_id)))
    }

    async fn insert_comment(&self, row: &CommentRow) -> Result<(), MetadataStoreError> {
        self.insert(TrackedRow {
            parent_id: row.parent_id.clone(),
            user_id: Some(row.user_id.clone()),
            ..TrackedRow::new(row.object())
        })
    }

    async fn add_page(&self, page_id: &str) -> Result<(), MetadataStoreError> {
        self.insert(TrackedRow::new(ObjectRef::page(page_id)))
    }
}
