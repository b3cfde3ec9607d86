//! Fetch work items handed from the scheduler to the fetchers.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{ObjectKind, ObjectRef};
use crate::lease::DispatchToken;

/// When an object was last checked against the content source.
///
/// `Never` is its own state rather than epoch zero. On the wire it is
/// encoded as `0` (or an absent/null field).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<i64>", into = "i64")]
pub enum LastChecked {
    #[default]
    Never,
    At(DateTime<Utc>),
}

impl LastChecked {
    pub fn from_epoch_secs(secs: i64) -> Self {
        if secs <= 0 {
            return LastChecked::Never;
        }
        match Utc.timestamp_opt(secs, 0).single() {
            Some(at) => LastChecked::At(at),
            None => LastChecked::Never,
        }
    }

    pub fn as_epoch_secs(&self) -> i64 {
        match self {
            LastChecked::Never => 0,
            LastChecked::At(at) => at.timestamp(),
        }
    }

    /// Whether the object is due for another check.
    ///
    /// Never-checked objects are always due.
    pub fn is_stale(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        match self {
            LastChecked::Never => true,
            LastChecked::At(at) => *at < now - interval,
        }
    }

    pub fn at(&self) -> Option<DateTime<Utc>> {
        match self {
            LastChecked::Never => None,
            LastChecked::At(at) => Some(*at),
        }
    }

    /// The `since` bound to pass to the content source, if any.
    pub fn since(&self) -> Option<i64> {
        match self {
            LastChecked::Never => None,
            LastChecked::At(at) => Some(at.timestamp()),
        }
    }
}

impl From<Option<i64>> for LastChecked {
    fn from(value: Option<i64>) -> Self {
        value.map(Self::from_epoch_secs).unwrap_or_default()
    }
}

impl From<LastChecked> for i64 {
    fn from(value: LastChecked) -> Self {
        value.as_epoch_secs()
    }
}

impl From<Option<DateTime<Utc>>> for LastChecked {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        value.map(LastChecked::At).unwrap_or_default()
    }
}

/// A unit of fetch work: one object, checked since `last_checked`.
///
/// Created by the scheduler, consumed once by a fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub object_id: String,
    pub object_type: ObjectKind,
    #[serde(default)]
    pub last_checked: LastChecked,
    /// Token of the dispatch lease this entry was published under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_token: Option<DispatchToken>,
}

impl QueueEntry {
    pub fn new(object: &ObjectRef, last_checked: LastChecked, lease_token: DispatchToken) -> Self {
        Self {
            object_id: object.object_id(),
            object_type: object.kind(),
            last_checked,
            lease_token: Some(lease_token),
        }
    }

    pub fn object(&self) -> Result<ObjectRef, DomainError> {
        ObjectRef::parse(self.object_type, &self.object_id)
    }
}
