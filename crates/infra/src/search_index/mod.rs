//! Full-text search boundary: day-partitioned content indices and the
//! similarity query used by the classifier.

pub mod elasticsearch;
pub mod in_memory;
pub mod mapping;
pub mod r#trait;

pub use elasticsearch::ElasticsearchIndex;
pub use in_memory::InMemorySearchIndex;
pub use mapping::comment_mapping;
pub use r#trait::{MoreLikeThis, SearchHit, SearchIndex, SearchIndexError, SimilarityParams};
