//! Exception manager error types.

use clearbook_shared::types::ExceptionId;
use thiserror::Error;

use super::types::{ExceptionStatus, ExceptionType};
use crate::ledger::LedgerError;
use crate::store::StoreError;
use crate::template::TemplateError;

/// Errors from exception triage and resolution.
#[derive(Debug, Error)]
pub enum ExceptionError {
    /// No exception with the id.
    #[error("Exception not found: {0}")]
    NotFound(ExceptionId),

    /// The lifecycle does not allow the transition.
    #[error("Invalid exception transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: ExceptionStatus,
        /// Requested status.
        to: ExceptionStatus,
    },

    /// The exception is already resolved or dismissed.
    #[error("Exception {id} is already {status}")]
    ExceptionClosed {
        /// Exception id.
        id: ExceptionId,
        /// Closed status.
        status: ExceptionStatus,
    },

    /// A target no longer exists or was matched elsewhere; the exception is
    /// back in Open for re-triage.
    #[error("Exception {id} is stale: {reason}")]
    StaleException {
        /// Exception id.
        id: ExceptionId,
        /// What changed.
        reason: String,
    },

    /// Dismissal needs a reason.
    #[error("Dismissing an exception requires a reason")]
    DismissReasonRequired,

    /// The action cannot resolve this kind of exception.
    #[error("Action {action} does not apply to {exception_type:?} exceptions")]
    ActionNotApplicable {
        /// Action name.
        action: &'static str,
        /// Exception kind.
        exception_type: ExceptionType,
    },

    /// Entry generation failed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Posting failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ExceptionError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "EXCEPTION_NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ExceptionClosed { .. } => "EXCEPTION_CLOSED",
            Self::StaleException { .. } => "STALE_EXCEPTION",
            Self::DismissReasonRequired => "DISMISS_REASON_REQUIRED",
            Self::ActionNotApplicable { .. } => "ACTION_NOT_APPLICABLE",
            Self::Template(e) => e.error_code(),
            Self::Ledger(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Template(e) => e.is_retryable(),
            Self::Ledger(e) => e.is_retryable(),
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}
