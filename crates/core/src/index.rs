//! Day-partitioned search index naming.

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Default prefix of the daily content indices.
pub const DEFAULT_INDEX_PREFIX: &str = "fbcomments";

/// `prefix-YYYY.MM.DD` for the given calendar day.
pub fn daily_index_name(prefix: &str, day: NaiveDate) -> String {
    format!("{prefix}-{}", day.format("%Y.%m.%d"))
}

/// The index a record processed at `at` (UTC) belongs to.
pub fn index_for(prefix: &str, at: DateTime<Utc>) -> String {
    daily_index_name(prefix, at.date_naive())
}

/// Indices covering the last `days` calendar days, newest first.
///
/// A window of zero days still covers today.
pub fn retention_indices(prefix: &str, now: DateTime<Utc>, days: u32) -> Vec<String> {
    let today = now.date_naive();
    (0..days.max(1))
        .map(|back| daily_index_name(prefix, today - Duration::days(i64::from(back))))
        .collect()
}
