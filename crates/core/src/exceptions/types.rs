//! Reconciliation exception types.

use chrono::{DateTime, NaiveDate, Utc};
use clearbook_shared::types::{Currency, ExceptionId, JournalEntryId, MatchId};
use serde::{Deserialize, Serialize};

use crate::ledger::JournalLine;
use crate::template::TemplateId;

/// An item an exception is about.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ExceptionTarget {
    /// A journal entry.
    Entry(JournalEntryId),
    /// A processor feed event.
    Event(String),
}

impl ExceptionTarget {
    /// Stable key of the target, used in fingerprints and audit records.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Entry(id) => format!("entry:{id}"),
            Self::Event(id) => format!("event:{id}"),
        }
    }

    /// Parses a key produced by [`Self::key`].
    pub fn parse(key: &str) -> Option<Self> {
        if let Some(id) = key.strip_prefix("entry:") {
            return id.parse().ok().map(Self::Entry);
        }
        key.strip_prefix("event:").map(|id| Self::Event(id.to_string()))
    }
}

/// Kind of discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionType {
    /// Feed event with no journal entry.
    MissingEntry,
    /// Journal entry with no feed event.
    MissingEvent,
    /// Event id listed more than once in the feed.
    Duplicate,
    /// Descriptions match but amounts are beyond tolerance.
    AmountMismatch,
    /// Several equally good candidates.
    AmbiguousMatch,
}

impl ExceptionType {
    /// Returns the string representation of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingEntry => "missing_entry",
            Self::MissingEvent => "missing_event",
            Self::Duplicate => "duplicate",
            Self::AmountMismatch => "amount_mismatch",
            Self::AmbiguousMatch => "ambiguous_match",
        }
    }

    /// Parses a type from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "missing_entry" => Some(Self::MissingEntry),
            "missing_event" => Some(Self::MissingEvent),
            "duplicate" => Some(Self::Duplicate),
            "amount_mismatch" => Some(Self::AmountMismatch),
            "ambiguous_match" => Some(Self::AmbiguousMatch),
            _ => None,
        }
    }
}

/// Exception severity; ordered Low < Medium < High.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low.
    Low,
    /// Medium.
    Medium,
    /// High.
    High,
}

impl Severity {
    /// Returns the string representation of the severity.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parses a severity from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Exception lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionStatus {
    /// Awaiting triage.
    Open,
    /// Being worked on.
    UnderReview,
    /// Closed with a ledger or match effect.
    Resolved,
    /// Closed without effect.
    Dismissed,
}

impl ExceptionStatus {
    /// Returns true if the exception still accepts resolution actions.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::UnderReview)
    }

    /// Returns the string representation of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::UnderReview => "under_review",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    /// Parses a status from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "under_review" => Some(Self::UnderReview),
            "resolved" => Some(Self::Resolved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExceptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolution action requested by an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Generate the missing entry from the event, then match the pair.
    CreateEntry {
        /// Template to use; the highest-priority applicable one when `None`.
        #[serde(default)]
        template: Option<TemplateId>,
    },
    /// Link an entry and an event directly.
    ManualMatch {
        /// Entry to link.
        entry_id: JournalEntryId,
        /// Event to link.
        event_id: String,
    },
    /// Post a correcting entry.
    Adjust {
        /// Accounting date; today when `None`.
        #[serde(default)]
        date: Option<NaiveDate>,
        /// Entry description.
        description: String,
        /// Balanced correcting lines.
        lines: Vec<JournalLine>,
    },
    /// Close without ledger effect.
    Dismiss {
        /// Why the exception needs no action.
        reason: String,
    },
}

impl ResolutionAction {
    /// Short action name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateEntry { .. } => "create_entry",
            Self::ManualMatch { .. } => "manual_match",
            Self::Adjust { .. } => "adjust",
            Self::Dismiss { .. } => "dismiss",
        }
    }
}

/// Recorded outcome of a closed exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Action name (`create_entry`, `manual_match`, `adjust`, `dismiss`, `auto_match`).
    pub action: String,
    /// Who resolved it.
    pub actor: String,
    /// Operator note.
    pub note: String,
    /// Entry created or linked.
    pub entry_id: Option<JournalEntryId>,
    /// Match created.
    pub match_id: Option<MatchId>,
    /// When it was resolved.
    pub resolved_at: DateTime<Utc>,
}

/// An unmatched or ambiguous item awaiting resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationException {
    /// Exception id.
    pub id: ExceptionId,
    /// Discrepancy kind.
    pub exception_type: ExceptionType,
    /// Severity.
    pub severity: Severity,
    /// Lifecycle status.
    pub status: ExceptionStatus,
    /// Items involved, sorted.
    pub targets: Vec<ExceptionTarget>,
    /// Type plus sorted targets; unique.
    pub fingerprint: String,
    /// Largest absolute amount among the targets.
    pub amount: i64,
    /// Currency of the targets, when known.
    pub currency: Option<Currency>,
    /// Oldest accounting date among the targets.
    pub item_date: NaiveDate,
    /// Human-readable detail.
    pub detail: String,
    /// When first raised.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
    /// Set once resolved or dismissed.
    pub resolution: Option<Resolution>,
}

impl ReconciliationException {
    /// Fingerprint of a type and target set.
    #[must_use]
    pub fn fingerprint_of(exception_type: ExceptionType, targets: &[ExceptionTarget]) -> String {
        let mut keys: Vec<String> = targets.iter().map(ExceptionTarget::key).collect();
        keys.sort();
        keys.dedup();
        format!("{}|{}", exception_type.as_str(), keys.join(","))
    }

    /// Entry targets.
    pub fn entry_targets(&self) -> impl Iterator<Item = JournalEntryId> + '_ {
        self.targets.iter().filter_map(|t| match t {
            ExceptionTarget::Entry(id) => Some(*id),
            ExceptionTarget::Event(_) => None,
        })
    }

    /// Event targets.
    pub fn event_targets(&self) -> impl Iterator<Item = &str> + '_ {
        self.targets.iter().filter_map(|t| match t {
            ExceptionTarget::Event(id) => Some(id.as_str()),
            ExceptionTarget::Entry(_) => None,
        })
    }
}

/// Filter for listing exceptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExceptionFilter {
    /// Only this severity.
    pub severity: Option<Severity>,
    /// Only this status.
    pub status: Option<ExceptionStatus>,
    /// Only open or under-review exceptions.
    pub open_only: bool,
}

impl ExceptionFilter {
    /// Returns true if the exception passes the filter.
    #[must_use]
    pub fn accepts(&self, exception: &ReconciliationException) -> bool {
        self.severity.is_none_or(|s| exception.severity == s)
            && self.status.is_none_or(|s| exception.status == s)
            && (!self.open_only || exception.status.is_open())
    }
}
