//! Double-entry ledger.
//!
//! Every posted entry balances per currency, touches only known accounts in
//! their own currency, and is never modified after posting.

mod activity;
mod balance;
mod chart;
mod error;
mod locks;
mod reversal;
mod service;
mod types;
mod validation;

#[cfg(test)]
mod reversal_props;
#[cfg(test)]
mod validation_props;

pub use activity::{AccountActivity, ActivityIter, ActivityLine};
pub use balance::{normal_balance, AccountBalance, BalanceTotals};
pub use chart::{AccountDirectory, ChartOfAccounts};
pub use error::LedgerError;
pub use locks::{AccountGuards, AccountLocks};
pub use reversal::ReversalService;
pub use service::{Ledger, PostingAudit};
pub use types::{
    Account, AccountCategory, CurrencyTotals, DateChunks, DateRange, Direction, EntrySource,
    EntryStatus, JournalEntry, JournalLine,
};
pub use validation::{check_balance, validate_entry};
