//! Balanced line layouts.

use clearbook_shared::types::{AccountId, Currency};

use super::types::{JournalTemplate, LineLayout};
use crate::ledger::JournalLine;
use crate::validation::{ValidationError, ValidationErrors, ValidationReason};

/// Builds the lines of a template for an amount and its fee.
///
/// A zero fee posts no fee lines.
///
/// # Errors
///
/// `FeeExceedsAmount` when a collection fee leaves no net amount, and a
/// zero fee on a fee-only layout.
pub fn build_lines(
    template: &JournalTemplate,
    currency: Currency,
    amount: i64,
    fee: i64,
) -> Result<Vec<JournalLine>, ValidationErrors> {
    let debit = |account: AccountId, value: i64| JournalLine::debit(account, value, currency);
    let credit = |account: AccountId, value: i64| JournalLine::credit(account, value, currency);
    let fee_account = template.fee_account.filter(|_| fee > 0);

    let lines = match template.kind.layout() {
        LineLayout::Collection => {
            if fee >= amount {
                return Err(ValidationError::new(
                    "amount",
                    ValidationReason::FeeExceedsAmount { fee, amount },
                )
                .into());
            }
            let mut lines = vec![debit(template.debit_account, amount - fee)];
            if let Some(account) = fee_account {
                lines.push(debit(account, fee).with_memo("processing fee"));
            }
            lines.push(credit(template.credit_account, amount));
            lines
        }
        LineLayout::Return | LineLayout::Disbursement => {
            let mut lines = vec![
                debit(template.debit_account, amount),
                credit(template.credit_account, amount),
            ];
            if let Some(account) = fee_account {
                lines.push(debit(account, fee).with_memo("processing fee"));
                lines.push(credit(template.credit_account, fee).with_memo("processing fee"));
            }
            lines
        }
        LineLayout::FeeOnly => {
            let Some(account) = fee_account else {
                return Err(ValidationError::new(
                    "fee",
                    ValidationReason::BelowMinimum { min: 1, actual: fee },
                )
                .into());
            };
            vec![
                debit(account, fee).with_memo("verification fee"),
                credit(template.credit_account, fee),
            ]
        }
    };
    Ok(lines)
}
