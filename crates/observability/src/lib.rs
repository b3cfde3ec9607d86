//! Tracing/logging setup shared by every daemon.

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use self::tracing::{default_directive, init, LevelError};
