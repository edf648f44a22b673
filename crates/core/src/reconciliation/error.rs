//! Reconciliation error types.

use chrono::NaiveDate;
use thiserror::Error;

use crate::store::StoreError;

/// Errors that abort a reconciliation run.
///
/// Data problems never surface here; they become exception records.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    /// End precedes start.
    #[error("Invalid reconciliation window: {start} to {end}")]
    InvalidWindow {
        /// Requested start.
        start: NaiveDate,
        /// Requested end.
        end: NaiveDate,
    },

    /// Storage or feed failure; aborts the current chunk.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconciliationError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidWindow { .. } => "INVALID_WINDOW",
            Self::Store(e) => e.error_code(),
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidWindow { .. } => false,
            Self::Store(e) => e.is_retryable(),
        }
    }
}
