//! Tracking rows for pages, posts, and comments.
//!
//! The scheduler reads stale objects from here and leases them; fetchers
//! record completed checks and insert rows for newly discovered content.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryMetadataStore, TrackedRow};
pub use postgres::PostgresMetadataStore;
pub use r#trait::{CommentRow, MetadataStore, MetadataStoreError, ScheduledObject};
