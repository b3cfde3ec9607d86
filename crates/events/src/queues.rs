//! Queue names shared by every stage.

/// Page feed fetch work (scheduler → page fetcher).
pub const PAGE_FETCH: &str = "page-fetch";

/// Post / top-level comment thread fetch work (scheduler → comment fetcher).
pub const COMMENT_FETCH: &str = "comment-fetch";

/// Fetched records to persist in the search index.
pub const COMMENTS_STORE: &str = "comments-store";

/// Fetched records to run similarity classification on.
pub const COMMENTS_CLASSIFY: &str = "comments-classify";

/// Side channel for deliveries that can never succeed.
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{queue}.dlq")
}
