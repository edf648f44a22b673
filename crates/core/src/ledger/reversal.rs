//! Reversing entries for posted journal entries.
//!
//! Posted entries are immutable, so a correction is a new entry with every
//! line's direction swapped. Posting the reversal is the ledger's job; this
//! module only builds it.

use chrono::NaiveDate;

use super::error::LedgerError;
use super::types::{EntrySource, EntryStatus, JournalEntry, JournalLine};

/// Stateless service for building reversing entries.
pub struct ReversalService;

impl ReversalService {
    /// Builds a pending entry that exactly offsets `original`.
    ///
    /// - Debits become credits and credits become debits
    /// - Accounts, amounts and currencies are preserved
    /// - Memos are prefixed with "Reversal: "
    ///
    /// # Errors
    ///
    /// Returns `NotPosted` if the original has not been posted and
    /// `ReversalReasonRequired` if `reason` is blank.
    pub fn create_reversal(
        original: &JournalEntry,
        reason: &str,
        date: NaiveDate,
    ) -> Result<JournalEntry, LedgerError> {
        if original.status != EntryStatus::Posted {
            return Err(LedgerError::NotPosted(original.id));
        }
        if reason.trim().is_empty() {
            return Err(LedgerError::ReversalReasonRequired);
        }

        let lines = original
            .lines
            .iter()
            .map(|line| JournalLine {
                account_id: line.account_id,
                direction: line.direction.reversed(),
                amount: line.amount,
                currency: line.currency,
                memo: Some(format!(
                    "Reversal: {}",
                    line.memo.clone().unwrap_or_default()
                )),
            })
            .collect();

        let mut reversal = JournalEntry::pending(
            date,
            format!("Reversal of entry {}. Reason: {}", original.id, reason.trim()),
            EntrySource::Reversal,
            lines,
        );
        reversal.reverses = Some(original.id);
        reversal.reference_amount = original.reference_amount;
        Ok(reversal)
    }
}
