//! Read side of the social network: page feeds and comment threads.

pub mod graph;
pub mod in_memory;
pub mod r#trait;

pub use graph::GraphApiSource;
pub use in_memory::{InMemoryContentSource, SourceCall};
pub use r#trait::{ContentSource, ContentSourceError};
