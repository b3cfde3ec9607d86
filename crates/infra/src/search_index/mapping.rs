use serde_json::{json, Value};

/// Fixed schema of the daily content indices.
///
/// `message` keeps term vectors so more-like-this queries can reuse them.
pub fn comment_mapping() -> Value {
    json!({
        "settings": {
            "number_of_shards": 1
        },
        "mappings": {
            "properties": {
                "id": { "type": "keyword" },
                "message": {
                    "type": "text",
                    "store": true,
                    "term_vector": "with_positions_offsets"
                },
                "story": { "type": "text" },
                "link": { "type": "keyword" },
                "from": {
                    "properties": {
                        "id": { "type": "keyword" },
                        "name": { "type": "text" },
                        "first_name": { "type": "text" },
                        "last_name": { "type": "text" },
                        "short_name": { "type": "text" },
                        "name_format": { "type": "keyword" },
                        "is_verified": { "type": "boolean" }
                    }
                },
                "parent": {
                    "properties": {
                        "id": { "type": "keyword" }
                    }
                },
                "permalink_url": { "type": "text" },
                "created_time": {
                    "type": "date",
                    "format": "strict_date_optional_time||yyyy-MM-dd'T'HH:mm:ssZ"
                },
                "comment_count": { "type": "long" },
                "like_count": { "type": "long" }
            }
        }
    })
}
