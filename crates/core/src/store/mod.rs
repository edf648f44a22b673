//! Persistence seams.
//!
//! Components talk to storage only through these traits. In-memory
//! implementations live in [`memory`]; the Postgres implementations live in
//! the `clearbook-db` crate. Every write method is atomic on its own and
//! persists the audit records passed with it in the same step.

pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use clearbook_shared::types::{AccountId, ExceptionId, JournalEntryId};
use thiserror::Error;

use crate::audit::AuditRecord;
use crate::exceptions::{ExceptionFilter, ExceptionTarget, ReconciliationException};
use crate::fees::FeeCalculation;
use crate::ledger::{BalanceTotals, DateRange, JournalEntry};
use crate::reconciliation::ReconciliationMatch;

/// Storage errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// An entry for the event already exists.
    #[error("Event {event_id} already produced entry {existing}")]
    DuplicateSourceEvent {
        /// Event id.
        event_id: String,
        /// Existing entry.
        existing: JournalEntryId,
    },

    /// The entry already has a reversal.
    #[error("Entry {original} is already reversed by {existing}")]
    AlreadyReversed {
        /// Reversed entry.
        original: JournalEntryId,
        /// Existing reversal.
        existing: JournalEntryId,
    },

    /// Entry or event already matched.
    #[error("Entry {entry_id} or event {event_id} is already matched")]
    MatchConflict {
        /// Entry of the rejected match.
        entry_id: JournalEntryId,
        /// Event of the rejected match.
        event_id: String,
    },

    /// Applying an entry would overflow an account's running totals.
    #[error("Balance totals of account {0} would overflow")]
    BalanceOverflow(AccountId),

    /// An exception with the fingerprint already exists.
    #[error("Exception with fingerprint {0} already exists")]
    FingerprintConflict(String),

    /// Record not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient failure; safe to retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Stored data could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateSourceEvent { .. } => "DUPLICATE_SOURCE_EVENT",
            Self::AlreadyReversed { .. } => "ALREADY_REVERSED",
            Self::MatchConflict { .. } => "MATCH_CONFLICT",
            Self::BalanceOverflow(_) => "BALANCE_OVERFLOW",
            Self::FingerprintConflict(_) => "FINGERPRINT_CONFLICT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unavailable(_) => "STORE_UNAVAILABLE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result of an idempotency reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The caller now owns the key.
    Acquired,
    /// The key was completed into this entry.
    Completed(JournalEntryId),
    /// Another caller holds an unexpired reservation.
    Held,
}

/// Append-only journal storage.
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Appends a posted entry, its optional fee calculation and the balance
    /// totals together with `audit` in one atomic step. Returns the assigned
    /// sequence.
    ///
    /// Rejects a second entry for the same `source_event_id`, a second
    /// reversal of the same entry and totals that would overflow.
    async fn append(
        &self,
        entry: &JournalEntry,
        fee: Option<&FeeCalculation>,
        audit: &[AuditRecord],
    ) -> Result<u64, StoreError>;

    /// Entry by id.
    async fn get(&self, id: JournalEntryId) -> Result<Option<JournalEntry>, StoreError>;

    /// Entry generated from an event.
    async fn find_by_source_event(&self, event_id: &str) -> Result<Option<JournalEntry>, StoreError>;

    /// Reversal of an entry.
    async fn reversal_of(&self, id: JournalEntryId) -> Result<Option<JournalEntryId>, StoreError>;

    /// Entries dated in `range`, ordered by date then sequence.
    async fn entries_between(&self, range: DateRange) -> Result<Vec<JournalEntry>, StoreError>;

    /// Entries touching an account dated in `range`, ordered by date then sequence.
    async fn entries_for_account(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<Vec<JournalEntry>, StoreError>;

    /// Running totals of an account.
    async fn balance(&self, account_id: AccountId) -> Result<BalanceTotals, StoreError>;

    /// Fee calculation stored with an entry.
    async fn fee_calculation(
        &self,
        entry_id: JournalEntryId,
    ) -> Result<Option<FeeCalculation>, StoreError>;

    /// Number of posted entries.
    async fn count(&self) -> Result<u64, StoreError>;
}

/// Idempotency key storage.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically reserves `key` unless it is completed or held by an
    /// unexpired reservation. A reservation older than `lease` is taken over.
    async fn reserve(
        &self,
        key: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Reservation, StoreError>;

    /// Marks the key completed into `entry_id`.
    async fn complete(&self, key: &str, entry_id: JournalEntryId) -> Result<(), StoreError>;

    /// Drops an uncompleted reservation.
    async fn release(&self, key: &str) -> Result<(), StoreError>;

    /// Entry a key was completed into.
    async fn lookup(&self, key: &str) -> Result<Option<JournalEntryId>, StoreError>;
}

/// Append-only audit storage.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Appends a record.
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Appends records in order. Implementations override this when they can
    /// write the batch atomically.
    async fn append_all(&self, records: &[AuditRecord]) -> Result<(), StoreError> {
        for record in records {
            self.append(record).await?;
        }
        Ok(())
    }

    /// Records for a target, oldest first.
    async fn for_target(&self, target_id: &str) -> Result<Vec<AuditRecord>, StoreError>;
}

/// Match and exception storage.
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Inserts a match with its audit records; `MatchConflict` if either side
    /// is already matched.
    async fn insert_match(
        &self,
        m: &ReconciliationMatch,
        audit: &[AuditRecord],
    ) -> Result<(), StoreError>;

    /// Match of an entry.
    async fn match_for_entry(
        &self,
        entry_id: JournalEntryId,
    ) -> Result<Option<ReconciliationMatch>, StoreError>;

    /// Match of an event.
    async fn match_for_event(&self, event_id: &str)
    -> Result<Option<ReconciliationMatch>, StoreError>;

    /// Which of the entries are matched.
    async fn matched_entries(
        &self,
        entry_ids: &[JournalEntryId],
    ) -> Result<HashSet<JournalEntryId>, StoreError>;

    /// Which of the events are matched.
    async fn matched_events(&self, event_ids: &[String]) -> Result<HashSet<String>, StoreError>;

    /// Number of matches.
    async fn count_matches(&self) -> Result<u64, StoreError>;

    /// Inserts an exception with its audit records; `FingerprintConflict` if
    /// the fingerprint exists.
    async fn insert_exception(
        &self,
        exception: &ReconciliationException,
        audit: &[AuditRecord],
    ) -> Result<(), StoreError>;

    /// Replaces a stored exception and appends its audit records.
    async fn update_exception(
        &self,
        exception: &ReconciliationException,
        audit: &[AuditRecord],
    ) -> Result<(), StoreError>;

    /// Exception by id.
    async fn get_exception(
        &self,
        id: ExceptionId,
    ) -> Result<Option<ReconciliationException>, StoreError>;

    /// Exception by fingerprint.
    async fn exception_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<ReconciliationException>, StoreError>;

    /// Exceptions passing the filter, highest severity first, then oldest.
    async fn list_exceptions(
        &self,
        filter: &ExceptionFilter,
    ) -> Result<Vec<ReconciliationException>, StoreError>;

    /// Exceptions naming a target.
    async fn exceptions_for_target(
        &self,
        target: &ExceptionTarget,
    ) -> Result<Vec<ReconciliationException>, StoreError>;

    /// Number of exceptions.
    async fn count_exceptions(&self) -> Result<u64, StoreError>;
}
