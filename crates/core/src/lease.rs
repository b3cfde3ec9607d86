//! Dispatch leases.
//!
//! A lease replaces a bare "dispatched" flag: the scheduler grants one when it
//! publishes fetch work, and the object is only re-selected once the lease has
//! been cleared by a fetcher or has expired.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one dispatch of an object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchToken(Uuid);

impl DispatchToken {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DispatchToken {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for DispatchToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Time-bounded claim on an object's fetch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub token: DispatchToken,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn grant(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            token: DispatchToken::new(),
            expires_at: now + ttl,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
