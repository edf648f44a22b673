//! Reconciliation match types and run summary.

use chrono::{DateTime, Utc};
use clearbook_shared::types::{JournalEntryId, MatchId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::exceptions::ReconciliationException;

/// How a match was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    /// Amount and date within tolerance, or linked by event id.
    Exact,
    /// Description similarity above threshold.
    Fuzzy,
    /// Linked by an operator.
    Manual,
}

impl MatchConfidence {
    /// Returns the string representation of the confidence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
            Self::Manual => "manual",
        }
    }

    /// Parses a confidence from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(Self::Exact),
            "fuzzy" => Some(Self::Fuzzy),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Link between one journal entry and one feed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationMatch {
    /// Match id.
    pub id: MatchId,
    /// Matched entry.
    pub entry_id: JournalEntryId,
    /// Matched event.
    pub event_id: String,
    /// Confidence class.
    pub confidence: MatchConfidence,
    /// Similarity score for fuzzy matches.
    pub score: Option<Decimal>,
    /// When matched.
    pub matched_at: DateTime<Utc>,
    /// Who matched it (`reconciler` or an operator).
    pub matched_by: String,
}

/// Result of a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Matches recorded by this run.
    pub matched: usize,
    /// Open exceptions raised or confirmed by this run.
    pub exceptions: Vec<ReconciliationException>,
    /// Exceptions first raised by this run.
    pub new_exceptions: usize,
    /// Exceptions closed because their targets got matched.
    pub auto_resolved: usize,
    /// Chunks fully processed.
    pub chunks_completed: usize,
    /// True if the run stopped early on cancellation.
    pub cancelled: bool,
}
