//! `fbwatch-core`: domain building blocks for the ingestion pipeline.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! object references, fetch work items, content records, leases, index
//! naming, and similarity tiers.

pub mod classification;
pub mod clock;
pub mod content;
pub mod entry;
pub mod error;
pub mod id;
pub mod index;
pub mod lease;

pub use classification::{ClassificationResult, Thresholds, Tier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use content::{Author, Comment, ContentRecord, ParentRef, Post};
pub use entry::{LastChecked, QueueEntry};
pub use error::{DomainError, DomainResult};
pub use id::{split_composite, ObjectKind, ObjectRef};
pub use index::{daily_index_name, index_for, retention_indices, DEFAULT_INDEX_PREFIX};
pub use lease::{DispatchToken, Lease};
