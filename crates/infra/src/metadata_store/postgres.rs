//! Postgres-backed metadata store.
//!
//! One table per object kind (`pages`, `posts`, `comments`), see
//! `migrations/0001_init.sql`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | MetadataStoreError |
//! |------------|----------------------|--------------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (other) | Any other | `Query` |
//! | PoolClosed / Io / PoolTimedOut | N/A | `Unavailable` |
//! | Other | N/A | `Query` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::instrument;

use fbwatch_core::{DispatchToken, LastChecked, Lease, ObjectKind, ObjectRef};

use super::r#trait::{CommentRow, MetadataStore, MetadataStoreError, ScheduledObject};

#[derive(Debug, Clone)]
pub struct PostgresMetadataStore {
    pool: Arc<PgPool>,
}

impl PostgresMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(url: &str) -> Result<Self, MetadataStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), MetadataStoreError> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| MetadataStoreError::Query(format!("migration failed: {e}")))
    }

    async fn execute(
        &self,
        operation: &str,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<u64, MetadataStoreError> {
        let result = query
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(result.rows_affected())
    }
}

fn require_row(affected: u64, object: &ObjectRef) -> Result<(), MetadataStoreError> {
    if affected == 0 {
        return Err(MetadataStoreError::NotFound(object.to_string()));
    }
    Ok(())
}

/// `(table, key column)` holding rows of the given kind.
fn table_of(kind: ObjectKind) -> (&'static str, &'static str) {
    match kind {
        ObjectKind::Page => ("pages", "page_id"),
        ObjectKind::Post => ("posts", "post_id"),
        ObjectKind::Comment => ("comments", "comment_id"),
    }
}

fn scheduled(object: ObjectRef, last_checked: Option<DateTime<Utc>>) -> ScheduledObject {
    ScheduledObject {
        object,
        last_checked: LastChecked::from(last_checked),
    }
}

fn read_err(e: sqlx::Error) -> MetadataStoreError {
    MetadataStoreError::Query(format!("failed to read row: {e}"))
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    #[instrument(skip(self), err)]
    async fn stale_pages(
        &self,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledObject>, MetadataStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT page_id, last_checked
            FROM pages
            WHERE (last_checked IS NULL OR last_checked < $1)
              AND (dispatched_until IS NULL OR dispatched_until <= $2)
            ORDER BY last_checked ASC NULLS FIRST
            "#,
        )
        .bind(now - interval)
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stale_pages", e))?;

        rows.iter()
            .map(|row| {
                let page_id: String = row.try_get("page_id").map_err(read_err)?;
                let last_checked: Option<DateTime<Utc>> = row.try_get("last_checked").map_err(read_err)?;
                Ok(scheduled(ObjectRef::page(page_id), last_checked))
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn stale_threads(
        &self,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledObject>, MetadataStoreError> {
        let posts = sqlx::query(
            r#"
            SELECT page_id, post_id, last_checked
            FROM posts
            WHERE (last_checked IS NULL OR last_checked < $1)
              AND (dispatched_until IS NULL OR dispatched_until <= $2)
            "#,
        )
        .bind(now - interval)
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stale_threads", e))?;

        let comments = sqlx::query(
            r#"
            SELECT post_id, comment_id, last_checked
            FROM comments
            WHERE parent_id IS NULL
              AND (last_checked IS NULL OR last_checked < $1)
              AND (dispatched_until IS NULL OR dispatched_until <= $2)
            "#,
        )
        .bind(now - interval)
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stale_threads", e))?;

        let mut due = Vec::with_capacity(posts.len() + comments.len());
        for row in &posts {
            let page_id: String = row.try_get("page_id").map_err(read_err)?;
            let post_id: String = row.try_get("post_id").map_err(read_err)?;
            let last_checked: Option<DateTime<Utc>> = row.try_get("last_checked").map_err(read_err)?;
            due.push(scheduled(ObjectRef::post(page_id, post_id), last_checked));
        }
        for row in &comments {
            let post_id: String = row.try_get("post_id").map_err(read_err)?;
            let comment_id: String = row.try_get("comment_id").map_err(read_err)?;
            let last_checked: Option<DateTime<Utc>> = row.try_get("last_checked").map_err(read_err)?;
            due.push(scheduled(ObjectRef::comment(post_id, comment_id), last_checked));
        }
        due.sort_by_key(|s| s.last_checked.as_epoch_secs());

        Ok(due)
    }

    #[instrument(skip(self, object), fields(object = %object), err)]
    async fn mark_dispatched(
        &self,
        object: &ObjectRef,
        lease: Lease,
        selected: LastChecked,
    ) -> Result<bool, MetadataStoreError> {
        let (table, key) = table_of(object.kind());
        let sql = format!(
            "UPDATE {table} SET dispatch_token = $1, dispatched_until = $2 \
             WHERE {key} = $3 AND last_checked IS NOT DISTINCT FROM $4"
        );
        let query = sqlx::query(&sql)
            .bind(*lease.token.as_uuid())
            .bind(lease.expires_at)
            .bind(object.local_id())
            .bind(selected.at());
        if self.execute("mark_dispatched", query).await? > 0 {
            return Ok(true);
        }

        let sql = format!("SELECT 1 FROM {table} WHERE {key} = $1");
        let found = sqlx::query(&sql)
            .bind(object.local_id())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_dispatched", e))?;
        match found {
            Some(_) => Ok(false),
            None => Err(MetadataStoreError::NotFound(object.to_string())),
        }
    }

    #[instrument(skip(self, object), fields(object = %object), err)]
    async fn record_check(
        &self,
        object: &ObjectRef,
        last_checked: LastChecked,
    ) -> Result<(), MetadataStoreError> {
        let (table, key) = table_of(object.kind());
        let sql = format!(
            "UPDATE {table} SET last_checked = $1, dispatch_token = NULL, dispatched_until = NULL \
             WHERE {key} = $2"
        );
        let query = sqlx::query(&sql)
            .bind(last_checked.at())
            .bind(object.local_id());
        let affected = self.execute("record_check", query).await?;
        require_row(affected, object)
    }

    #[instrument(skip(self, object), fields(object = %object), err)]
    async fn release(&self, object: &ObjectRef, token: DispatchToken) -> Result<bool, MetadataStoreError> {
        let (table, key) = table_of(object.kind());
        let sql = format!(
            "UPDATE {table} SET dispatch_token = NULL, dispatched_until = NULL \
             WHERE {key} = $1 AND dispatch_token = $2"
        );
        let query = sqlx::query(&sql)
            .bind(object.local_id())
            .bind(*token.as_uuid());
        Ok(self.execute("release", query).await? > 0)
    }

    #[instrument(skip(self), err)]
    async fn insert_post(&self, page_id: &str, post_id: &str) -> Result<(), MetadataStoreError> {
        sqlx::query("INSERT INTO posts (post_id, page_id) VALUES ($1, $2)")
            .bind(post_id)
            .bind(page_id)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_post", e))?;
        Ok(())
    }

    #[instrument(skip(self, row), fields(comment_id = %row.comment_id), err)]
    async fn insert_comment(&self, row: &CommentRow) -> Result<(), MetadataStoreError> {
        sqlx::query(
            "INSERT INTO comments (comment_id, post_id, parent_id, user_id) VALUES ($1, $2, $3, $4)",
        )
        .bind(&row.comment_id)
        .bind(&row.post_id)
        .bind(row.parent_id.as_deref())
        .bind(&row.user_id)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_comment", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn add_page(&self, page_id: &str) -> Result<(), MetadataStoreError> {
        sqlx::query("INSERT INTO pages (page_id) VALUES ($1)")
            .bind(page_id)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("add_page", e))?;
        Ok(())
    }
}

/// Map SQLx errors to MetadataStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> MetadataStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) if code.as_ref() == "23505" => MetadataStoreError::Duplicate(msg),
                _ => MetadataStoreError::Query(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            MetadataStoreError::Unavailable(format!("{operation}: {err}"))
        }
        _ => MetadataStoreError::Query(format!("sqlx error in {operation}: {err}")),
    }
}
