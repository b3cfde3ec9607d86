//! Similarity score tiers.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Classification outcome for one similarity match.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Below the discard threshold; informational only.
    Discard,
    /// Between the thresholds (inclusive).
    Suspect,
    /// Above the match threshold.
    Duplicate,
}

/// Score thresholds, `0 <= discard_score <= match_score`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    discard_score: f64,
    match_score: f64,
}

impl Thresholds {
    pub fn new(discard_score: f64, match_score: f64) -> Result<Self, DomainError> {
        if !discard_score.is_finite() || !match_score.is_finite() {
            return Err(DomainError::validation("score thresholds must be finite"));
        }
        if discard_score < 0.0 {
            return Err(DomainError::validation(format!(
                "discard_score must be >= 0 (got {discard_score})"
            )));
        }
        if discard_score > match_score {
            return Err(DomainError::validation(format!(
                "discard_score ({discard_score}) must not exceed match_score ({match_score})"
            )));
        }
        Ok(Self {
            discard_score,
            match_score,
        })
    }

    pub fn discard_score(&self) -> f64 {
        self.discard_score
    }

    pub fn match_score(&self) -> f64 {
        self.match_score
    }

    pub fn classify(&self, score: f64) -> Tier {
        if score < self.discard_score {
            Tier::Discard
        } else if score > self.match_score {
            Tier::Duplicate
        } else {
            Tier::Suspect
        }
    }
}

/// A similarity match between a new record and previously indexed content.
///
/// Derived per classification run and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub record_id: String,
    pub matched_id: String,
    pub matched_index: String,
    pub score: f64,
    pub tier: Tier,
}
