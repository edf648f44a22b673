//! Engine-level error taxonomy.

use serde::Serialize;
use thiserror::Error;

use crate::config::BookError;
use crate::exceptions::ExceptionError;
use crate::fees::FeeError;
use crate::idempotency::IdempotencyError;
use crate::ledger::LedgerError;
use crate::reconciliation::ReconciliationError;
use crate::store::StoreError;
use crate::template::TemplateError;

/// Broad class of a failure, for routing by collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing or malformed input; rejected before any ledger effect.
    Validation,
    /// Would break a ledger or lifecycle invariant; never partially applied.
    Invariant,
    /// Concurrent delivery of the same event.
    Idempotency,
    /// Needs a human decision.
    Ambiguity,
    /// Rules, templates or book are inconsistent.
    Configuration,
    /// Storage or transport failure.
    Infrastructure,
}

/// Any error surfaced by [`crate::engine::Clearbook`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// Ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Fee calculation failed.
    #[error(transparent)]
    Fee(#[from] FeeError),

    /// Event journaling failed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Idempotency reservation failed.
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    /// Reconciliation run aborted.
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    /// Exception triage failed.
    #[error(transparent)]
    Exception(#[from] ExceptionError),

    /// Book configuration rejected.
    #[error(transparent)]
    Book(#[from] BookError),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Category of the underlying failure.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Ledger(e) => ledger_category(e),
            Self::Fee(e) => fee_category(e),
            Self::Template(e) => template_category(e),
            Self::Idempotency(e) => idempotency_category(e),
            Self::Reconciliation(ReconciliationError::InvalidWindow { .. }) => {
                ErrorCategory::Validation
            }
            Self::Reconciliation(ReconciliationError::Store(_)) | Self::Store(_) => {
                ErrorCategory::Infrastructure
            }
            Self::Exception(e) => exception_category(e),
            Self::Book(_) => ErrorCategory::Configuration,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Ledger(e) => e.error_code(),
            Self::Fee(e) => e.error_code(),
            Self::Template(e) => e.error_code(),
            Self::Idempotency(e) => e.error_code(),
            Self::Reconciliation(e) => e.error_code(),
            Self::Exception(e) => e.error_code(),
            Self::Book(_) => "INVALID_BOOK",
            Self::Store(e) => e.error_code(),
        }
    }

    /// Returns true if the caller may retry unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(e) => e.is_retryable(),
            Self::Fee(_) | Self::Book(_) => false,
            Self::Template(e) => e.is_retryable(),
            Self::Idempotency(e) => e.is_retryable(),
            Self::Reconciliation(e) => e.is_retryable(),
            Self::Exception(e) => e.is_retryable(),
            Self::Store(e) => e.is_retryable(),
        }
    }
}

fn ledger_category(err: &LedgerError) -> ErrorCategory {
    match err {
        LedgerError::EntryNotFound(_)
        | LedgerError::ReversalReasonRequired
        | LedgerError::InvalidDateRange { .. } => ErrorCategory::Validation,
        LedgerError::DuplicateSourceEvent { .. } => ErrorCategory::Idempotency,
        LedgerError::DuplicateAccount(_) => ErrorCategory::Configuration,
        LedgerError::Store(_) => ErrorCategory::Infrastructure,
        _ => ErrorCategory::Invariant,
    }
}

fn fee_category(err: &FeeError) -> ErrorCategory {
    if err.is_configuration() {
        ErrorCategory::Configuration
    } else if matches!(err, FeeError::Overflow) {
        ErrorCategory::Invariant
    } else {
        ErrorCategory::Validation
    }
}

fn idempotency_category(err: &IdempotencyError) -> ErrorCategory {
    match err {
        IdempotencyError::InFlight { .. } => ErrorCategory::Idempotency,
        IdempotencyError::Store(_) => ErrorCategory::Infrastructure,
    }
}

fn template_category(err: &TemplateError) -> ErrorCategory {
    match err {
        TemplateError::UnknownTemplate(_)
        | TemplateError::NotApplicable { .. }
        | TemplateError::NoApplicableTemplate { .. }
        | TemplateError::Validation(_) => ErrorCategory::Validation,
        TemplateError::Misconfigured { .. } | TemplateError::DuplicateTemplate(_) => {
            ErrorCategory::Configuration
        }
        TemplateError::Fee(e) => fee_category(e),
        TemplateError::Ledger(e) => ledger_category(e),
        TemplateError::Idempotency(e) => idempotency_category(e),
        TemplateError::Store(_) => ErrorCategory::Infrastructure,
    }
}

fn exception_category(err: &ExceptionError) -> ErrorCategory {
    match err {
        ExceptionError::StaleException { .. } => ErrorCategory::Ambiguity,
        ExceptionError::InvalidTransition { .. } | ExceptionError::ExceptionClosed { .. } => {
            ErrorCategory::Invariant
        }
        ExceptionError::NotFound(_)
        | ExceptionError::DismissReasonRequired
        | ExceptionError::ActionNotApplicable { .. } => ErrorCategory::Validation,
        ExceptionError::Template(e) => template_category(e),
        ExceptionError::Ledger(e) => ledger_category(e),
        ExceptionError::Store(_) => ErrorCategory::Infrastructure,
    }
}
