//! Exception lifecycle transitions.
//!
//! ```text
//! Open ──► UnderReview ──► Resolved
//!  ▲  ◄──      │      ──► Dismissed
//!  └───────────┘
//! ```
//!
//! Open exceptions may also be resolved or dismissed directly; both review
//! states accept resolution actions. Resolved and Dismissed are terminal.

use super::error::ExceptionError;
use super::types::ExceptionStatus;

/// Stateless validator of status transitions.
pub struct ExceptionWorkflow;

impl ExceptionWorkflow {
    /// Returns true if `from` may move to `to`.
    #[must_use]
    pub const fn can_transition(from: ExceptionStatus, to: ExceptionStatus) -> bool {
        use ExceptionStatus::{Dismissed, Open, Resolved, UnderReview};
        matches!(
            (from, to),
            (Open, UnderReview)
                | (UnderReview, Open)
                | (Open | UnderReview, Resolved | Dismissed)
        )
    }

    /// Starts a review of an open exception.
    pub fn begin_review(current: ExceptionStatus) -> Result<ExceptionStatus, ExceptionError> {
        Self::transition(current, ExceptionStatus::UnderReview)
    }

    /// Returns an exception under review to the triage queue.
    pub fn reopen(current: ExceptionStatus) -> Result<ExceptionStatus, ExceptionError> {
        Self::transition(current, ExceptionStatus::Open)
    }

    /// Closes an exception as Resolved or Dismissed.
    pub fn close(
        current: ExceptionStatus,
        to: ExceptionStatus,
    ) -> Result<ExceptionStatus, ExceptionError> {
        if to.is_open() {
            return Err(ExceptionError::InvalidTransition { from: current, to });
        }
        Self::transition(current, to)
    }

    fn transition(
        from: ExceptionStatus,
        to: ExceptionStatus,
    ) -> Result<ExceptionStatus, ExceptionError> {
        if Self::can_transition(from, to) {
            Ok(to)
        } else {
            Err(ExceptionError::InvalidTransition { from, to })
        }
    }
}
