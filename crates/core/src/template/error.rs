//! Template engine error types.

use thiserror::Error;

use super::types::TemplateId;
use crate::event::TransactionType;
use crate::fees::FeeError;
use crate::idempotency::IdempotencyError;
use crate::ledger::LedgerError;
use crate::store::StoreError;
use crate::validation::ValidationErrors;

/// Errors that can occur while generating entries from events.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Template not registered.
    #[error("Unknown template: {0}")]
    UnknownTemplate(TemplateId),

    /// Template handles a different transaction type.
    #[error("Template {template} does not handle {transaction_type} events")]
    NotApplicable {
        /// Template.
        template: TemplateId,
        /// Event type.
        transaction_type: TransactionType,
    },

    /// No template is registered for the event type.
    #[error("No template for event {event_id} of type {transaction_type}")]
    NoApplicableTemplate {
        /// Event id.
        event_id: String,
        /// Event type.
        transaction_type: TransactionType,
    },

    /// Template definition is inconsistent.
    #[error("Template {template} is misconfigured: {reason}")]
    Misconfigured {
        /// Template.
        template: TemplateId,
        /// Explanation.
        reason: String,
    },

    /// Template name registered twice.
    #[error("Duplicate template: {0}")]
    DuplicateTemplate(TemplateId),

    /// Event fields failed validation.
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Fee calculation failed.
    #[error(transparent)]
    Fee(#[from] FeeError),

    /// Posting failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Idempotency reservation failed.
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    /// Storage failure outside posting.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ValidationErrors> for TemplateError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl TemplateError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownTemplate(_) => "UNKNOWN_TEMPLATE",
            Self::NotApplicable { .. } => "TEMPLATE_NOT_APPLICABLE",
            Self::NoApplicableTemplate { .. } => "NO_APPLICABLE_TEMPLATE",
            Self::Misconfigured { .. } => "TEMPLATE_MISCONFIGURED",
            Self::DuplicateTemplate(_) => "DUPLICATE_TEMPLATE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Fee(e) => e.error_code(),
            Self::Ledger(e) => e.error_code(),
            Self::Idempotency(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(e) => e.is_retryable(),
            Self::Idempotency(e) => e.is_retryable(),
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}
