//! Ledger error types for validation and state errors.

use clearbook_shared::types::{AccountId, Currency, JournalEntryId};
use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// Entry must have at least 2 lines.
    #[error("Journal entry must have at least 2 lines")]
    InsufficientLines,

    /// Line amount must be positive.
    #[error("Line amount for account {account_id} must be positive, got {amount}")]
    NonPositiveAmount {
        /// Account on the offending line.
        account_id: AccountId,
        /// The rejected amount.
        amount: i64,
    },

    /// Entry is not balanced in one of its currencies.
    #[error("Entry is not balanced in {currency}. Debit: {debit}, Credit: {credit}")]
    UnbalancedEntry {
        /// Currency that does not balance.
        currency: Currency,
        /// Total debits in minor units.
        debit: i64,
        /// Total credits in minor units.
        credit: i64,
    },

    /// Line total overflowed.
    #[error("Entry totals overflow in {0}")]
    AmountOverflow(Currency),

    // ========== Account Errors ==========
    /// Account is not in the chart of accounts.
    #[error("Unknown account: {0}")]
    UnknownAccount(AccountId),

    /// Line currency differs from the account currency.
    #[error("Account {account_id} is denominated in {expected}, line uses {actual}")]
    CurrencyMismatch {
        /// The account.
        account_id: AccountId,
        /// Account currency.
        expected: Currency,
        /// Line currency.
        actual: Currency,
    },

    /// Account number appears twice in the chart.
    #[error("Duplicate account in chart: {0}")]
    DuplicateAccount(AccountId),

    // ========== Entry State Errors ==========
    /// Only pending entries can be posted.
    #[error("Entry {0} is already posted")]
    AlreadyPosted(JournalEntryId),

    /// Only posted entries can be reversed.
    #[error("Entry {0} is not posted")]
    NotPosted(JournalEntryId),

    /// Entry not found.
    #[error("Journal entry not found: {0}")]
    EntryNotFound(JournalEntryId),

    /// Entry already has a reversal.
    #[error("Entry {original} was already reversed by {reversal}")]
    AlreadyReversed {
        /// The entry being reversed.
        original: JournalEntryId,
        /// The existing reversal.
        reversal: JournalEntryId,
    },

    /// Reversal requires a reason.
    #[error("Reversal reason is required")]
    ReversalReasonRequired,

    /// Another entry was already generated from the same external event.
    #[error("Event {event_id} already produced entry {existing}")]
    DuplicateSourceEvent {
        /// External event id.
        event_id: String,
        /// Entry that already exists.
        existing: JournalEntryId,
    },

    /// Posting would overflow an account's running totals.
    #[error("Running totals of account {0} would overflow")]
    BalanceOverflow(AccountId),

    /// Date range end precedes its start.
    #[error("Invalid date range: {start} is after {end}")]
    InvalidDateRange {
        /// Range start.
        start: chrono::NaiveDate,
        /// Range end.
        end: chrono::NaiveDate,
    },

    // ========== Storage Errors ==========
    /// Storage failure.
    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateSourceEvent { event_id, existing } => {
                Self::DuplicateSourceEvent { event_id, existing }
            }
            StoreError::AlreadyReversed { original, existing } => Self::AlreadyReversed {
                original,
                reversal: existing,
            },
            StoreError::BalanceOverflow(account_id) => Self::BalanceOverflow(account_id),
            other => Self::Store(other),
        }
    }
}

impl LedgerError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InsufficientLines => "INSUFFICIENT_LINES",
            Self::NonPositiveAmount { .. } => "NON_POSITIVE_AMOUNT",
            Self::UnbalancedEntry { .. } => "UNBALANCED_ENTRY",
            Self::AmountOverflow(_) => "AMOUNT_OVERFLOW",
            Self::UnknownAccount(_) => "UNKNOWN_ACCOUNT",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::DuplicateAccount(_) => "DUPLICATE_ACCOUNT",
            Self::AlreadyPosted(_) => "ALREADY_POSTED",
            Self::NotPosted(_) => "NOT_POSTED",
            Self::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            Self::AlreadyReversed { .. } => "ALREADY_REVERSED",
            Self::ReversalReasonRequired => "REVERSAL_REASON_REQUIRED",
            Self::DuplicateSourceEvent { .. } => "DUPLICATE_SOURCE_EVENT",
            Self::BalanceOverflow(_) => "BALANCE_OVERFLOW",
            Self::InvalidDateRange { .. } => "INVALID_DATE_RANGE",
            Self::Store(_) => "STORAGE_ERROR",
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_retryable())
    }

    /// Returns true for errors a posting attempt can never recover from by retrying.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InsufficientLines
                | Self::NonPositiveAmount { .. }
                | Self::UnbalancedEntry { .. }
                | Self::AmountOverflow(_)
                | Self::UnknownAccount(_)
                | Self::CurrencyMismatch { .. }
                | Self::DuplicateAccount(_)
                | Self::ReversalReasonRequired
                | Self::InvalidDateRange { .. }
        )
    }
}
