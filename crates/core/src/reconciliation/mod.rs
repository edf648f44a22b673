//! Reconciliation of journal entries against the processor feed.
//!
//! Each run walks its window in chunks. A chunk is planned in memory from the
//! unmatched entries and events around it, then the plan's matches and
//! exceptions are written. Re-running a window is safe: matched items are
//! excluded and exceptions are keyed by fingerprint.

mod error;
mod matcher;
mod planner;
mod severity;
mod similarity;
mod types;

#[cfg(test)]
mod planner_props;

pub use error::ReconciliationError;
pub use matcher::{Reconciler, RECONCILER_ACTOR};
pub use planner::{
    EntryCandidate, EventCandidate, MatchPlan, MatchPlanner, PlannedException, PlannedMatch,
};
pub use severity::classify;
pub use similarity::{tokens, DescriptionSimilarity, TokenJaccard};
pub use types::{MatchConfidence, ReconcileSummary, ReconciliationMatch};
