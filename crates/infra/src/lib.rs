//! Infrastructure layer: storage, search, content source, message bus
//! adapters, configuration, and the pipeline stages built on them.

pub mod classification_sink;
pub mod config;
pub mod content_source;
pub mod event_bus;
pub mod metadata_store;
pub mod search_index;
pub mod workers;

#[cfg(test)]
mod integration_tests;
