//! Fetched content records (posts and comments).
//!
//! Records are immutable once created by a fetcher. They travel as JSON to the
//! storer and the classifier and are stored verbatim in the search index.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DomainError;
use crate::id::{split_composite, ObjectKind, ObjectRef};

/// Author of a comment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub name_format: String,
    #[serde(default)]
    pub is_verified: bool,
}

/// Reference to the comment a reply was made on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Author>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub created_time: String,
    #[serde(default)]
    pub message: String,
    /// Empty when the Graph API withholds the author.
    #[serde(default)]
    pub from: Author,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,
    #[serde(default)]
    pub permalink_url: String,
    #[serde(default)]
    pub comment_count: u64,
    #[serde(default)]
    pub like_count: u64,
}

impl Comment {
    pub fn object_ref(&self) -> Result<ObjectRef, DomainError> {
        ObjectRef::parse(ObjectKind::Comment, &self.id)
    }

    /// Second segment of the parent's composite id; `None` for top-level comments.
    pub fn parent_local_id(&self) -> Option<&str> {
        let parent = self.parent.as_ref()?;
        if parent.id.is_empty() {
            return None;
        }
        match split_composite(&parent.id) {
            Some((_, child)) => Some(child),
            None => Some(parent.id.as_str()),
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_local_id().is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub created_time: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub story: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub permalink_url: String,
}

impl Post {
    pub fn object_ref(&self) -> Result<ObjectRef, DomainError> {
        ObjectRef::parse(ObjectKind::Post, &self.id)
    }
}

/// A fetched item as published downstream.
///
/// Untagged on the wire. A body carrying any comment-only key (`from`,
/// `parent`, `comment_count`, `like_count`) reads as a comment, anything else
/// as a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ContentRecord {
    Comment(Comment),
    Post(Post),
}

/// Union of post and comment keys, used to pick the variant.
#[derive(Deserialize)]
struct RecordFields {
    id: String,
    #[serde(default)]
    created_time: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    permalink_url: String,
    #[serde(default)]
    story: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    from: Option<Author>,
    #[serde(default)]
    parent: Option<ParentRef>,
    #[serde(default)]
    comment_count: Option<u64>,
    #[serde(default)]
    like_count: Option<u64>,
}

impl From<RecordFields> for ContentRecord {
    fn from(f: RecordFields) -> Self {
        let is_comment =
            f.from.is_some() || f.parent.is_some() || f.comment_count.is_some() || f.like_count.is_some();
        if is_comment {
            ContentRecord::Comment(Comment {
                id: f.id,
                created_time: f.created_time,
                message: f.message,
                from: f.from.unwrap_or_default(),
                parent: f.parent,
                permalink_url: f.permalink_url,
                comment_count: f.comment_count.unwrap_or(0),
                like_count: f.like_count.unwrap_or(0),
            })
        } else {
            ContentRecord::Post(Post {
                id: f.id,
                created_time: f.created_time,
                message: f.message,
                story: f.story,
                link: f.link,
                permalink_url: f.permalink_url,
            })
        }
    }
}

impl<'de> Deserialize<'de> for ContentRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RecordFields::deserialize(deserializer).map(ContentRecord::from)
    }
}

impl ContentRecord {
    pub fn id(&self) -> &str {
        match self {
            ContentRecord::Comment(c) => &c.id,
            ContentRecord::Post(p) => &p.id,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            ContentRecord::Comment(_) => ObjectKind::Comment,
            ContentRecord::Post(_) => ObjectKind::Post,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ContentRecord::Comment(c) => &c.message,
            ContentRecord::Post(p) => &p.message,
        }
    }

    pub fn has_text(&self) -> bool {
        !self.message().trim().is_empty()
    }

    pub fn author_id(&self) -> Option<&str> {
        match self {
            ContentRecord::Comment(c) if !c.from.id.is_empty() => Some(&c.from.id),
            _ => None,
        }
    }
}

impl From<Comment> for ContentRecord {
    fn from(value: Comment) -> Self {
        ContentRecord::Comment(value)
    }
}

impl From<Post> for ContentRecord {
    fn from(value: Post) -> Self {
        ContentRecord::Post(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn comment_body_decodes_as_comment() {
        let record: ContentRecord = serde_json::from_value(json!({
            "id": "123_456",
            "created_time": "2017-09-07T10:00:00+0000",
            "message": "hello there",
            "from": {"id": "u1", "name": "Some One"},
            "parent": {"id": "123_111"},
            "permalink_url": "https://example.com/c/456",
            "comment_count": 2,
            "like_count": 7
        }))
        .unwrap();

        let ContentRecord::Comment(comment) = &record else {
            panic!("expected a comment, got {record:?}");
        };
        assert_eq!(comment.parent_local_id(), Some("111"));
        assert_eq!(record.author_id(), Some("u1"));
        assert_eq!(record.kind(), ObjectKind::Comment);
    }

    #[test]
    fn post_body_decodes_as_post() {
        let record: ContentRecord = serde_json::from_value(json!({
            "id": "789_123",
            "created_time": "2017-09-07T10:00:00+0000",
            "message": "breaking news",
            "story": "",
            "link": "https://example.com/a",
            "permalink_url": "https://example.com/p/123"
        }))
        .unwrap();

        assert!(matches!(record, ContentRecord::Post(_)));
        assert_eq!(record.id(), "789_123");
    }

    #[test]
    fn comment_without_author_still_decodes() {
        let body = json!({
            "id": "1_2",
            "created_time": "2017-09-07T10:00:00+0000",
            "message": "hi",
            "comment_count": 0,
            "like_count": 3
        });

        let comment: Comment = serde_json::from_value(body.clone()).unwrap();
        assert_eq!(comment.from, Author::default());

        let record: ContentRecord = serde_json::from_value(body).unwrap();
        assert_eq!(record.kind(), ObjectKind::Comment);
        assert_eq!(record.author_id(), None);
    }

    #[test]
    fn published_comment_reads_back_as_comment() {
        let sent = ContentRecord::from(Comment {
            id: "1_2".into(),
            message: "anonymous".into(),
            ..Default::default()
        });

        let wire = serde_json::to_vec(&sent).unwrap();
        let received: ContentRecord = serde_json::from_slice(&wire).unwrap();

        assert_eq!(received, sent);
    }

    #[test]
    fn top_level_comment_has_no_parent_segment() {
        let comment = Comment {
            id: "1_2".into(),
            parent: Some(ParentRef::default()),
            ..Default::default()
        };
        assert!(comment.is_top_level());
    }

    #[test]
    fn blank_message_has_no_text() {
        let record = ContentRecord::from(Post {
            id: "1_2".into(),
            message: "   ".into(),
            ..Default::default()
        });
        assert!(!record.has_text());
    }
}
