//! Property-based tests for journal entry balance rules.

use clearbook_shared::types::{AccountId, Currency};
use proptest::prelude::*;

use super::error::LedgerError;
use super::types::{Direction, JournalLine};
use super::validation::check_balance;

/// Strategy to generate a valid positive amount (> 0).
fn positive_amount() -> impl Strategy<Value = i64> {
    1i64..100_000_000i64
}

fn currency_strategy() -> impl Strategy<Value = Currency> {
    prop_oneof![Just(Currency::Usd), Just(Currency::Eur), Just(Currency::Gbp)]
}

fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Debit), Just(Direction::Credit)]
}

/// Builds a balanced set of lines by splitting `total` across debit lines
/// and offsetting it with a single credit.
fn balanced_lines(debits: &[i64], currency: Currency) -> Vec<JournalLine> {
    let total: i64 = debits.iter().sum();
    let mut lines: Vec<JournalLine> = debits
        .iter()
        .enumerate()
        .map(|(i, amount)| {
            JournalLine::debit(AccountId(1000 + i64::try_from(i).unwrap()), *amount, currency)
        })
        .collect();
    lines.push(JournalLine::credit(AccountId(4000), total, currency));
    lines
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 1: Balanced lines always validate.
    ///
    /// *For any* set of positive debits offset by one credit of their sum,
    /// validation SHALL accept and report matching totals.
    #[test]
    fn prop_balanced_lines_accepted(
        debits in prop::collection::vec(positive_amount(), 1..8),
        currency in currency_strategy(),
    ) {
        let lines = balanced_lines(&debits, currency);
        let totals = check_balance(&lines);
        prop_assert!(totals.is_ok(), "balanced lines rejected: {:?}", totals);
        let totals = totals.unwrap();
        prop_assert_eq!(totals[&currency].debit, debits.iter().sum::<i64>());
        prop_assert!(totals[&currency].is_balanced());
    }

    /// Property 2: Any skew between sides is rejected.
    ///
    /// *For any* balanced set with one line perturbed by a non-zero delta,
    /// validation SHALL report `UnbalancedEntry` for that currency.
    #[test]
    fn prop_skewed_lines_rejected(
        debits in prop::collection::vec(positive_amount(), 1..8),
        delta in 1i64..1_000,
        currency in currency_strategy(),
    ) {
        let mut lines = balanced_lines(&debits, currency);
        lines[0].amount += delta;
        let result = check_balance(&lines);
        prop_assert!(
            matches!(result, Err(LedgerError::UnbalancedEntry { currency: c, .. }) if c == currency),
            "expected unbalanced, got: {:?}",
            result
        );
    }

    /// Property 3: Non-positive amounts are rejected.
    ///
    /// *For any* line with amount <= 0, validation SHALL reject the entry
    /// before checking balance.
    #[test]
    fn prop_non_positive_amount_rejected(
        bad in -100_000i64..=0,
        direction in direction_strategy(),
        other in positive_amount(),
    ) {
        let lines = vec![
            JournalLine {
                account_id: AccountId(1010),
                direction,
                amount: bad,
                currency: Currency::Usd,
                memo: None,
            },
            JournalLine::credit(AccountId(4010), other, Currency::Usd),
        ];
        let result = check_balance(&lines);
        prop_assert!(
            matches!(result, Err(LedgerError::NonPositiveAmount { amount, .. }) if amount == bad),
            "expected non-positive rejection, got: {:?}",
            result
        );
    }

    /// Property 4: Each currency must balance on its own.
    ///
    /// *For any* two currencies where debits in one are offset by credits in
    /// the other, validation SHALL reject even though the raw sums agree.
    #[test]
    fn prop_cross_currency_offset_rejected(amount in positive_amount()) {
        let lines = vec![
            JournalLine::debit(AccountId(1010), amount, Currency::Usd),
            JournalLine::credit(AccountId(4010), amount, Currency::Eur),
        ];
        let result = check_balance(&lines);
        prop_assert!(
            matches!(result, Err(LedgerError::UnbalancedEntry { .. })),
            "cross-currency offset accepted: {:?}",
            result
        );
    }
}
