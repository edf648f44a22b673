//! Account balance calculations.
//!
//! - Asset/Expense: balance = debits - credits (debit-normal)
//! - Liability/Equity/Income: balance = credits - debits (credit-normal)

use clearbook_shared::types::{AccountId, Currency};
use serde::{Deserialize, Serialize};

use super::types::{Account, AccountCategory, Direction};

/// Running debit and credit totals of one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceTotals {
    /// Sum of posted debits.
    pub debits: i64,
    /// Sum of posted credits.
    pub credits: i64,
}

impl BalanceTotals {
    /// Totals with one more line applied, or `None` on overflow.
    #[must_use]
    pub fn checked_apply(self, direction: Direction, amount: i64) -> Option<Self> {
        match direction {
            Direction::Debit => self.debits.checked_add(amount).map(|debits| Self { debits, ..self }),
            Direction::Credit => {
                self.credits.checked_add(amount).map(|credits| Self { credits, ..self })
            }
        }
    }

    /// Applies one line to the totals, saturating on overflow.
    ///
    /// Only for totals recomputed from stored entries, whose running totals
    /// were admitted through [`Self::checked_apply`].
    pub fn apply(&mut self, direction: Direction, amount: i64) {
        match direction {
            Direction::Debit => self.debits = self.debits.saturating_add(amount),
            Direction::Credit => self.credits = self.credits.saturating_add(amount),
        }
    }
}

/// Account balance at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// The account ID.
    pub account_id: AccountId,
    /// Account category.
    pub category: AccountCategory,
    /// Account currency.
    pub currency: Currency,
    /// Total debit amount.
    pub debit_total: i64,
    /// Total credit amount.
    pub credit_total: i64,
    /// Net balance on the account's normal side.
    pub balance: i64,
}

impl AccountBalance {
    /// Builds the balance of an account from its running totals.
    #[must_use]
    pub fn from_totals(account: &Account, totals: BalanceTotals) -> Self {
        Self {
            account_id: account.id,
            category: account.category,
            currency: account.currency,
            debit_total: totals.debits,
            credit_total: totals.credits,
            balance: normal_balance(account.category, totals),
        }
    }
}

/// Net balance on the normal side of the category.
#[must_use]
pub fn normal_balance(category: AccountCategory, totals: BalanceTotals) -> i64 {
    if category.is_debit_normal() {
        totals.debits.saturating_sub(totals.credits)
    } else {
        totals.credits.saturating_sub(totals.debits)
    }
}
