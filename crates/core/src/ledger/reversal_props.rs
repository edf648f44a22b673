//! Property-based tests for reversing entries.

use chrono::NaiveDate;
use clearbook_shared::types::{AccountId, Currency};
use proptest::prelude::*;

use super::balance::BalanceTotals;
use super::reversal::ReversalService;
use super::types::{EntrySource, EntryStatus, JournalEntry, JournalLine};
use super::validation::check_balance;

fn posted_entry(amounts: &[i64]) -> JournalEntry {
    let total: i64 = amounts.iter().sum();
    let mut lines: Vec<JournalLine> = amounts
        .iter()
        .map(|a| JournalLine::debit(AccountId(1010), *a, Currency::Usd))
        .collect();
    lines.push(JournalLine::credit(AccountId(4010), total, Currency::Usd));
    let mut entry = JournalEntry::pending(
        NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
        "original",
        EntrySource::Manual,
        lines,
    );
    entry.status = EntryStatus::Posted;
    entry
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 1: A reversal nets every account to zero.
    ///
    /// *For any* balanced posted entry, applying it and its reversal to
    /// running totals SHALL leave each account with equal debits and credits.
    #[test]
    fn prop_reversal_nets_to_zero(amounts in prop::collection::vec(1i64..10_000_000, 1..6)) {
        let original = posted_entry(&amounts);
        let reversal = ReversalService::create_reversal(
            &original,
            "correction",
            NaiveDate::from_ymd_opt(2026, 1, 20).unwrap(),
        ).unwrap();

        for account in original.account_ids() {
            let mut totals = BalanceTotals::default();
            for line in original.lines.iter().chain(reversal.lines.iter()) {
                if line.account_id == account {
                    totals.apply(line.direction, line.amount);
                }
            }
            prop_assert_eq!(totals.debits, totals.credits);
        }
    }

    /// Property 2: A reversal of a balanced entry is itself balanced.
    #[test]
    fn prop_reversal_is_balanced(amounts in prop::collection::vec(1i64..10_000_000, 1..6)) {
        let original = posted_entry(&amounts);
        let reversal = ReversalService::create_reversal(
            &original,
            "correction",
            NaiveDate::from_ymd_opt(2026, 1, 20).unwrap(),
        ).unwrap();
        prop_assert!(check_balance(&reversal.lines).is_ok());
        prop_assert_eq!(reversal.lines.len(), original.lines.len());
    }
}
