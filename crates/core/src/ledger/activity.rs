//! Account activity snapshots.
//!
//! An [`AccountActivity`] is taken once from the store and then iterated as
//! many times as needed. Iteration walks the snapshot lazily and never sees
//! entries posted after the snapshot was taken.

use std::sync::Arc;

use clearbook_shared::types::AccountId;

use super::balance::BalanceTotals;
use super::types::{DateRange, JournalEntry, JournalLine};

/// Posted activity of one account over a date range.
#[derive(Debug, Clone)]
pub struct AccountActivity {
    account_id: AccountId,
    range: DateRange,
    entries: Arc<[JournalEntry]>,
}

/// One line of account activity together with its entry.
#[derive(Debug, Clone, Copy)]
pub struct ActivityLine<'a> {
    /// Entry the line belongs to.
    pub entry: &'a JournalEntry,
    /// The line posted to the account.
    pub line: &'a JournalLine,
}

impl AccountActivity {
    /// Wraps entries in posting order (date, then sequence).
    #[must_use]
    pub fn new(account_id: AccountId, range: DateRange, entries: Vec<JournalEntry>) -> Self {
        Self {
            account_id,
            range,
            entries: entries.into(),
        }
    }

    /// The account.
    #[must_use]
    pub const fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// The covered date range.
    #[must_use]
    pub const fn range(&self) -> DateRange {
        self.range
    }

    /// Entries in the snapshot.
    #[must_use]
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Iterates the account's lines in posting order. Restartable.
    #[must_use]
    pub fn iter(&self) -> ActivityIter<'_> {
        ActivityIter {
            account_id: self.account_id,
            entries: &self.entries,
            entry_idx: 0,
            line_idx: 0,
        }
    }

    /// Debit and credit totals over the snapshot.
    #[must_use]
    pub fn totals(&self) -> BalanceTotals {
        let mut totals = BalanceTotals::default();
        for item in self {
            totals.apply(item.line.direction, item.line.amount);
        }
        totals
    }
}

impl<'a> IntoIterator for &'a AccountActivity {
    type Item = ActivityLine<'a>;
    type IntoIter = ActivityIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the lines of an [`AccountActivity`].
#[derive(Debug, Clone)]
pub struct ActivityIter<'a> {
    account_id: AccountId,
    entries: &'a [JournalEntry],
    entry_idx: usize,
    line_idx: usize,
}

impl<'a> Iterator for ActivityIter<'a> {
    type Item = ActivityLine<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(entry) = self.entries.get(self.entry_idx) {
            while let Some(line) = entry.lines.get(self.line_idx) {
                self.line_idx += 1;
                if line.account_id == self.account_id {
                    return Some(ActivityLine { entry, line });
                }
            }
            self.entry_idx += 1;
            self.line_idx = 0;
        }
        None
    }
}
