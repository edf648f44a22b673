//! Business rule validation for journal entries.

use std::collections::BTreeMap;

use clearbook_shared::types::Currency;

use super::chart::AccountDirectory;
use super::error::LedgerError;
use super::types::{CurrencyTotals, Direction, JournalEntry, JournalLine};

/// Checks that lines are positive and balance per currency.
///
/// Returns the per-currency totals on success. When several currencies are
/// unbalanced the first in currency order is reported.
///
/// # Errors
///
/// Returns an error if there are fewer than two lines, an amount is not
/// positive, a total overflows, or any currency does not balance.
pub fn check_balance(
    lines: &[JournalLine],
) -> Result<BTreeMap<Currency, CurrencyTotals>, LedgerError> {
    if lines.len() < 2 {
        return Err(LedgerError::InsufficientLines);
    }

    let mut totals: BTreeMap<Currency, CurrencyTotals> = BTreeMap::new();
    for line in lines {
        if line.amount <= 0 {
            return Err(LedgerError::NonPositiveAmount {
                account_id: line.account_id,
                amount: line.amount,
            });
        }

        let t = totals.entry(line.currency).or_default();
        let side = match line.direction {
            Direction::Debit => &mut t.debit,
            Direction::Credit => &mut t.credit,
        };
        *side = side
            .checked_add(line.amount)
            .ok_or(LedgerError::AmountOverflow(line.currency))?;
    }

    if let Some((currency, t)) = totals.iter().find(|(_, t)| !t.is_balanced()) {
        return Err(LedgerError::UnbalancedEntry {
            currency: *currency,
            debit: t.debit,
            credit: t.credit,
        });
    }

    Ok(totals)
}

/// Validates an entry against the balance rules and the chart of accounts.
///
/// # Errors
///
/// Returns the first rule violation found.
pub fn validate_entry(
    entry: &JournalEntry,
    directory: &dyn AccountDirectory,
) -> Result<BTreeMap<Currency, CurrencyTotals>, LedgerError> {
    let totals = check_balance(&entry.lines)?;

    for line in &entry.lines {
        let account = directory
            .account(line.account_id)
            .ok_or(LedgerError::UnknownAccount(line.account_id))?;
        if account.currency != line.currency {
            return Err(LedgerError::CurrencyMismatch {
                account_id: line.account_id,
                expected: account.currency,
                actual: line.currency,
            });
        }
    }

    Ok(totals)
}
