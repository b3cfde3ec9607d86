//! Tracing/logging initialization.
//!
//! JSON lines on stdout. `RUST_LOG` wins when set; otherwise the level given
//! on the command line applies to every target.

use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
#[error("unknown log level '{0}' (expected debug, info, warn or error)")]
pub struct LevelError(String);

/// Map a command-line level name to a filter directive.
///
/// `warning` and `critical` are accepted as aliases.
pub fn default_directive(level: &str) -> Result<LevelFilter, LevelError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" | "warning" => Ok(LevelFilter::WARN),
        "error" | "critical" => Ok(LevelFilter::ERROR),
        other => Err(LevelError(other.to_string())),
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(level: &str) -> Result<(), LevelError> {
    let directive = default_directive(level)?;
    let filter = EnvFilter::builder()
        .with_default_directive(directive.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
    Ok(())
}
