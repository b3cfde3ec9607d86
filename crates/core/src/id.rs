//! Strongly-typed references to tracked content objects.
//!
//! The content source hands out composite identifiers that encode the parent
//! linkage of an object:
//!
//! - posts are `<page_id>_<post_id>`
//! - comments are `<post_id>_<comment_id>`
//! - pages are a bare id (numeric or vanity name)
//!
//! `ObjectRef` keeps both halves so callers never split strings themselves.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Separator between the parent and child segments of a composite id.
pub const COMPOSITE_SEPARATOR: char = '_';

/// Kind of a tracked object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Page,
    Post,
    Comment,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Page => "page",
            ObjectKind::Post => "post",
            ObjectKind::Comment => "comment",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page" => Ok(ObjectKind::Page),
            "post" => Ok(ObjectKind::Post),
            "comment" => Ok(ObjectKind::Comment),
            other => Err(DomainError::invalid_id(format!(
                "unknown object kind '{other}' (expected page, post or comment)"
            ))),
        }
    }
}

/// Split a composite id into `(parent, child)` at the first separator.
///
/// Returns `None` when either segment would be empty.
pub fn split_composite(id: &str) -> Option<(&str, &str)> {
    let (parent, child) = id.split_once(COMPOSITE_SEPARATOR)?;
    if parent.is_empty() || child.is_empty() {
        return None;
    }
    Some((parent, child))
}

/// Reference to a page, post, or comment with its parent linkage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    Page { page_id: String },
    Post { page_id: String, post_id: String },
    Comment { post_id: String, comment_id: String },
}

impl ObjectRef {
    pub fn page(page_id: impl Into<String>) -> Self {
        Self::Page {
            page_id: page_id.into(),
        }
    }

    pub fn post(page_id: impl Into<String>, post_id: impl Into<String>) -> Self {
        Self::Post {
            page_id: page_id.into(),
            post_id: post_id.into(),
        }
    }

    pub fn comment(post_id: impl Into<String>, comment_id: impl Into<String>) -> Self {
        Self::Comment {
            post_id: post_id.into(),
            comment_id: comment_id.into(),
        }
    }

    /// Parse a wire-level `(kind, object_id)` pair.
    pub fn parse(kind: ObjectKind, object_id: &str) -> Result<Self, DomainError> {
        match kind {
            ObjectKind::Page => {
                if object_id.is_empty() || object_id.contains(COMPOSITE_SEPARATOR) {
                    return Err(DomainError::invalid_id(format!(
                        "page id must be a single non-empty segment: '{object_id}'"
                    )));
                }
                Ok(Self::page(object_id))
            }
            ObjectKind::Post => {
                let (page_id, post_id) = split_composite(object_id).ok_or_else(|| {
                    DomainError::invalid_id(format!("post id must be <page>_<post>: '{object_id}'"))
                })?;
                Ok(Self::post(page_id, post_id))
            }
            ObjectKind::Comment => {
                let (post_id, comment_id) = split_composite(object_id).ok_or_else(|| {
                    DomainError::invalid_id(format!(
                        "comment id must be <post>_<comment>: '{object_id}'"
                    ))
                })?;
                Ok(Self::comment(post_id, comment_id))
            }
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectRef::Page { .. } => ObjectKind::Page,
            ObjectRef::Post { .. } => ObjectKind::Post,
            ObjectRef::Comment { .. } => ObjectKind::Comment,
        }
    }

    /// The composite id as the content source knows it.
    pub fn object_id(&self) -> String {
        match self {
            ObjectRef::Page { page_id } => page_id.clone(),
            ObjectRef::Post { page_id, post_id } => {
                format!("{page_id}{COMPOSITE_SEPARATOR}{post_id}")
            }
            ObjectRef::Comment {
                post_id,
                comment_id,
            } => format!("{post_id}{COMPOSITE_SEPARATOR}{comment_id}"),
        }
    }

    /// The object's own segment, used as the metadata row key.
    pub fn local_id(&self) -> &str {
        match self {
            ObjectRef::Page { page_id } => page_id,
            ObjectRef::Post { post_id, .. } => post_id,
            ObjectRef::Comment { comment_id, .. } => comment_id,
        }
    }

    /// The post a comment thread hangs off.
    ///
    /// Posts own themselves; comments carry their post as the first segment.
    pub fn owning_post_id(&self) -> Option<&str> {
        match self {
            ObjectRef::Page { .. } => None,
            ObjectRef::Post { post_id, .. } => Some(post_id),
            ObjectRef::Comment { post_id, .. } => Some(post_id),
        }
    }

    pub fn page_id(&self) -> Option<&str> {
        match self {
            ObjectRef::Page { page_id } | ObjectRef::Post { page_id, .. } => Some(page_id),
            ObjectRef::Comment { .. } => None,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.object_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn comment_owning_post_is_first_segment() {
        let obj = ObjectRef::parse(ObjectKind::Comment, "123_456").unwrap();
        assert_eq!(obj.owning_post_id(), Some("123"));
        assert_eq!(obj.local_id(), "456");
    }

    #[test]
    fn post_page_is_first_segment_and_post_is_second() {
        let obj = ObjectRef::parse(ObjectKind::Post, "789_123").unwrap();
        assert_eq!(obj.page_id(), Some("789"));
        assert_eq!(obj.owning_post_id(), Some("123"));
    }

    #[test]
    fn page_ids_may_be_vanity_names() {
        let obj = ObjectRef::parse(ObjectKind::Page, "washingtonpost").unwrap();
        assert_eq!(obj.local_id(), "washingtonpost");
        assert_eq!(obj.owning_post_id(), None);
    }

    #[test]
    fn malformed_composites_are_rejected() {
        assert!(ObjectRef::parse(ObjectKind::Post, "789").is_err());
        assert!(ObjectRef::parse(ObjectKind::Comment, "_456").is_err());
        assert!(ObjectRef::parse(ObjectKind::Comment, "123_").is_err());
        assert!(ObjectRef::parse(ObjectKind::Page, "").is_err());
    }

    #[test]
    fn kind_parses_wire_names() {
        assert_eq!("comment".parse::<ObjectKind>().unwrap(), ObjectKind::Comment);
        assert!("thread".parse::<ObjectKind>().is_err());
    }

    proptest! {
        /// Property: parsing a composed id yields the same reference back.
        #[test]
        fn composite_ids_survive_parse(parent in "[0-9]{1,12}", child in "[0-9]{1,12}") {
            for obj in [ObjectRef::post(&parent, &child), ObjectRef::comment(&parent, &child)] {
                let parsed = ObjectRef::parse(obj.kind(), &obj.object_id()).unwrap();
                prop_assert_eq!(parsed, obj);
            }
        }
    }
}
