//! Ledger domain types: accounts, journal entries and date windows.
//!
//! Amounts are integer minor units. An entry is built `Pending`, becomes
//! `Posted` only through [`super::Ledger::post`], and is never mutated after
//! that; corrections are new entries.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Days, NaiveDate, Utc};
use clearbook_shared::types::{AccountId, Currency, JournalEntryId};
use serde::{Deserialize, Serialize};

/// Account classification in the chart of accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountCategory {
    /// Resources owned (cash, clearing, receivables).
    Asset,
    /// Obligations (customer balances, payables).
    Liability,
    /// Owner's equity.
    Equity,
    /// Revenue.
    Income,
    /// Costs (processing fees, return fees).
    Expense,
}

impl AccountCategory {
    /// Returns true for debit-normal categories (Asset, Expense).
    #[must_use]
    pub const fn is_debit_normal(self) -> bool {
        matches!(self, Self::Asset | Self::Expense)
    }

    /// Returns the string representation of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::Liability => "liability",
            Self::Equity => "equity",
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    /// Parses a category from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "asset" => Some(Self::Asset),
            "liability" => Some(Self::Liability),
            "equity" => Some(Self::Equity),
            "income" => Some(Self::Income),
            "expense" => Some(Self::Expense),
            _ => None,
        }
    }
}

/// A chart-of-accounts entry.
///
/// Loaded from configuration; immutable once a posted entry references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account number.
    pub id: AccountId,
    /// Human-readable name.
    pub name: String,
    /// Account category.
    pub category: AccountCategory,
    /// Owning legal entity.
    pub legal_entity: String,
    /// Currency every line on this account is denominated in.
    pub currency: Currency,
}

/// Side of a journal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Debit line.
    Debit,
    /// Credit line.
    Credit,
}

impl Direction {
    /// Returns the opposite side.
    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            Self::Debit => Self::Credit,
            Self::Credit => Self::Debit,
        }
    }

    /// Returns the string representation of the direction.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    /// Parses a direction from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debit" => Some(Self::Debit),
            "credit" => Some(Self::Credit),
            _ => None,
        }
    }
}

/// A single debit or credit line of a journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    /// Account posted to.
    pub account_id: AccountId,
    /// Debit or credit.
    pub direction: Direction,
    /// Amount in minor units (must be positive).
    pub amount: i64,
    /// Currency of the amount.
    pub currency: Currency,
    /// Optional line memo.
    #[serde(default)]
    pub memo: Option<String>,
}

impl JournalLine {
    /// Creates a debit line.
    #[must_use]
    pub fn debit(account_id: AccountId, amount: i64, currency: Currency) -> Self {
        Self {
            account_id,
            direction: Direction::Debit,
            amount,
            currency,
            memo: None,
        }
    }

    /// Creates a credit line.
    #[must_use]
    pub fn credit(account_id: AccountId, amount: i64, currency: Currency) -> Self {
        Self {
            account_id,
            direction: Direction::Credit,
            amount,
            currency,
            memo: None,
        }
    }

    /// Attaches a memo to the line.
    #[must_use]
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

/// The process that originated an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// Card charge collected by the processor.
    CardCharge,
    /// ACH debit collected from a customer.
    AchPayment,
    /// ACH return of an earlier payment.
    AchReturn,
    /// Payout from the processor balance to the bank.
    Payout,
    /// Refund to a customer.
    Refund,
    /// Account verification fee.
    Verification,
    /// Reversal of an earlier entry.
    Reversal,
    /// Correcting entry posted while resolving a reconciliation exception.
    ReconciliationAdjustment,
    /// Manually keyed entry.
    Manual,
}

impl EntrySource {
    /// Returns the string representation of the source.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CardCharge => "card_charge",
            Self::AchPayment => "ach_payment",
            Self::AchReturn => "ach_return",
            Self::Payout => "payout",
            Self::Refund => "refund",
            Self::Verification => "verification",
            Self::Reversal => "reversal",
            Self::ReconciliationAdjustment => "reconciliation_adjustment",
            Self::Manual => "manual",
        }
    }

    /// Parses a source from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "card_charge" => Some(Self::CardCharge),
            "ach_payment" => Some(Self::AchPayment),
            "ach_return" => Some(Self::AchReturn),
            "payout" => Some(Self::Payout),
            "refund" => Some(Self::Refund),
            "verification" => Some(Self::Verification),
            "reversal" => Some(Self::Reversal),
            "reconciliation_adjustment" => Some(Self::ReconciliationAdjustment),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Returns true if entries from this source are expected in the processor feed.
    #[must_use]
    pub const fn is_reconcilable(self) -> bool {
        !matches!(self, Self::Reversal | Self::ReconciliationAdjustment)
    }
}

/// Entry lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Built but not yet appended to the ledger.
    Pending,
    /// Appended to the ledger (immutable).
    Posted,
}

/// Debit and credit totals for one currency of an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyTotals {
    /// Sum of debit lines.
    pub debit: i64,
    /// Sum of credit lines.
    pub credit: i64,
}

impl CurrencyTotals {
    /// Returns true when debits equal credits.
    #[must_use]
    pub const fn is_balanced(&self) -> bool {
        self.debit == self.credit
    }
}

/// A double-entry journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Entry id, assigned when the entry is built.
    pub id: JournalEntryId,
    /// Accounting date.
    pub date: NaiveDate,
    /// Free-text description.
    pub description: String,
    /// Ordered lines.
    pub lines: Vec<JournalLine>,
    /// Originating process.
    pub source: EntrySource,
    /// Lifecycle status.
    pub status: EntryStatus,
    /// External event this entry was generated from.
    #[serde(default)]
    pub source_event_id: Option<String>,
    /// Entry reversed by this one.
    #[serde(default)]
    pub reverses: Option<JournalEntryId>,
    /// Processor amount this entry represents, used by reconciliation.
    #[serde(default)]
    pub reference_amount: Option<i64>,
    /// Template that produced the entry.
    #[serde(default)]
    pub template: Option<String>,
    /// Insertion order, assigned by the store on posting.
    #[serde(default)]
    pub sequence: Option<u64>,
    /// When the entry was built.
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Builds a pending entry.
    #[must_use]
    pub fn pending(
        date: NaiveDate,
        description: impl Into<String>,
        source: EntrySource,
        lines: Vec<JournalLine>,
    ) -> Self {
        Self {
            id: JournalEntryId::new(),
            date,
            description: description.into(),
            lines,
            source,
            status: EntryStatus::Pending,
            source_event_id: None,
            reverses: None,
            reference_amount: None,
            template: None,
            sequence: None,
            created_at: Utc::now(),
        }
    }

    /// Records the external event this entry was generated from.
    #[must_use]
    pub fn with_source_event(mut self, event_id: impl Into<String>) -> Self {
        self.source_event_id = Some(event_id.into());
        self
    }

    /// Records the processor amount the entry represents.
    #[must_use]
    pub const fn with_reference_amount(mut self, amount: i64) -> Self {
        self.reference_amount = Some(amount);
        self
    }

    /// Records the template that produced the entry.
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Returns the distinct accounts touched, in ascending order.
    #[must_use]
    pub fn account_ids(&self) -> BTreeSet<AccountId> {
        self.lines.iter().map(|l| l.account_id).collect()
    }

    /// Returns true if any line posts to the account.
    #[must_use]
    pub fn touches(&self, account_id: AccountId) -> bool {
        self.lines.iter().any(|l| l.account_id == account_id)
    }

    /// Returns per-currency debit/credit totals, saturating on overflow.
    ///
    /// Posting uses the checked variant in `validation`; this is for display
    /// and matching of entries that are already known to be valid.
    #[must_use]
    pub fn totals(&self) -> BTreeMap<Currency, CurrencyTotals> {
        let mut totals: BTreeMap<Currency, CurrencyTotals> = BTreeMap::new();
        for line in &self.lines {
            let t = totals.entry(line.currency).or_default();
            match line.direction {
                Direction::Debit => t.debit = t.debit.saturating_add(line.amount),
                Direction::Credit => t.credit = t.credit.saturating_add(line.amount),
            }
        }
        totals
    }

    /// Returns the entry currency when every line shares one.
    #[must_use]
    pub fn currency(&self) -> Option<Currency> {
        let first = self.lines.first()?.currency;
        self.lines
            .iter()
            .all(|l| l.currency == first)
            .then_some(first)
    }

    /// Amount the matcher compares against the processor feed.
    ///
    /// The reference amount when the entry carries one, else the debit total.
    #[must_use]
    pub fn match_amount(&self) -> i64 {
        self.reference_amount.unwrap_or_else(|| {
            self.totals()
                .values()
                .next()
                .map_or(0, |t| t.debit)
        })
    }
}

/// An inclusive range of accounting dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    /// First date (inclusive).
    pub start: NaiveDate,
    /// Last date (inclusive).
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a range, returning `None` if `end` precedes `start`.
    #[must_use]
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// A range covering a single day.
    #[must_use]
    pub const fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Returns true if the date lies inside the range.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Widens the range by `days` on both sides, clamped to the calendar.
    #[must_use]
    pub fn expand(&self, days: i64) -> Self {
        let days = Days::new(days.max(0).unsigned_abs());
        Self {
            start: self.start.checked_sub_days(days).unwrap_or(NaiveDate::MIN),
            end: self.end.checked_add_days(days).unwrap_or(NaiveDate::MAX),
        }
    }

    /// Splits the range into consecutive chunks of at most `days` days.
    #[must_use]
    pub fn chunks(&self, days: i64) -> DateChunks {
        DateChunks {
            next: Some(self.start),
            end: self.end,
            span: Days::new(days.max(1).unsigned_abs() - 1),
        }
    }
}

/// Iterator over the chunks of a [`DateRange`].
#[derive(Debug, Clone)]
pub struct DateChunks {
    next: Option<NaiveDate>,
    end: NaiveDate,
    span: Days,
}

impl Iterator for DateChunks {
    type Item = DateRange;

    fn next(&mut self) -> Option<DateRange> {
        let start = self.next?;
        let end = start
            .checked_add_days(self.span)
            .map_or(self.end, |end| end.min(self.end));
        self.next = if end < self.end { end.succ_opt() } else { None };
        Some(DateRange { start, end })
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_entry_totals_per_currency() {
        let entry = JournalEntry::pending(
            date(2026, 3, 1),
            "mixed",
            EntrySource::Manual,
            vec![
                JournalLine::debit(AccountId(1), 500, Currency::Usd),
                JournalLine::credit(AccountId(2), 500, Currency::Usd),
                JournalLine::debit(AccountId(3), 700, Currency::Eur),
                JournalLine::credit(AccountId(4), 600, Currency::Eur),
            ],
        );
        let totals = entry.totals();
        assert!(totals[&Currency::Usd].is_balanced());
        assert!(!totals[&Currency::Eur].is_balanced());
        assert_eq!(entry.currency(), None);
    }

    #[test]
    fn test_match_amount_prefers_reference() {
        let entry = JournalEntry::pending(
            date(2026, 3, 1),
            "charge",
            EntrySource::CardCharge,
            vec![
                JournalLine::debit(AccountId(1), 9_680, Currency::Usd),
                JournalLine::debit(AccountId(5), 320, Currency::Usd),
                JournalLine::credit(AccountId(4), 10_000, Currency::Usd),
            ],
        );
        assert_eq!(entry.match_amount(), 10_000);
        assert_eq!(entry.clone().with_reference_amount(9_999).match_amount(), 9_999);
        assert_eq!(entry.currency(), Some(Currency::Usd));
    }

    #[test]
    fn test_date_range_chunks_cover_range() {
        let range = DateRange::new(date(2026, 1, 1), date(2026, 1, 17)).unwrap();
        let chunks: Vec<DateRange> = range.chunks(7).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], DateRange::new(date(2026, 1, 1), date(2026, 1, 7)).unwrap());
        assert_eq!(chunks[2], DateRange::new(date(2026, 1, 15), date(2026, 1, 17)).unwrap());
    }

    #[test]
    fn test_date_range_at_calendar_limits() {
        let last = DateRange::day(NaiveDate::MAX);
        assert_eq!(last.expand(7), DateRange::new(NaiveDate::MAX - Days::new(7), NaiveDate::MAX).unwrap());
        assert_eq!(last.chunks(30).collect::<Vec<_>>(), vec![last]);

        let first = DateRange::day(NaiveDate::MIN);
        assert_eq!(first.expand(3).start, NaiveDate::MIN);
        assert_eq!(first.expand(3).end, NaiveDate::MIN + Days::new(3));

        let tail = DateRange::new(NaiveDate::MAX - Days::new(9), NaiveDate::MAX).unwrap();
        let chunks: Vec<DateRange> = tail.chunks(i64::MAX).collect();
        assert_eq!(chunks, vec![tail]);
        assert_eq!(tail.chunks(4).count(), 3);
        assert_eq!(tail.chunks(4).last().map(|c| c.end), Some(NaiveDate::MAX));
    }

    #[test]
    fn test_date_range_rejects_inverted() {
        assert!(DateRange::new(date(2026, 2, 1), date(2026, 1, 1)).is_none());
        assert!(DateRange::day(date(2026, 2, 1)).contains(date(2026, 2, 1)));
    }

    #[test]
    fn test_direction_reversed() {
        assert_eq!(Direction::Debit.reversed(), Direction::Credit);
        assert_eq!(Direction::parse("CREDIT"), Some(Direction::Credit));
        assert_eq!(EntrySource::parse("ach_return"), Some(EntrySource::AchReturn));
        assert!(!EntrySource::Reversal.is_reconcilable());
    }
}
