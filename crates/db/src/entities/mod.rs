//! `SeaORM` entity definitions.

pub mod account_balances;
pub mod accounts;
pub mod audit_records;
pub mod fee_calculations;
pub mod feed_events;
pub mod idempotency_keys;
pub mod journal_entries;
pub mod journal_lines;
pub mod reconciliation_exceptions;
pub mod reconciliation_matches;

pub mod prelude {
    //! Entity re-exports.
    pub use super::account_balances::Entity as AccountBalances;
    pub use super::accounts::Entity as Accounts;
    pub use super::audit_records::Entity as AuditRecords;
    pub use super::fee_calculations::Entity as FeeCalculations;
    pub use super::feed_events::Entity as FeedEvents;
    pub use super::idempotency_keys::Entity as IdempotencyKeys;
    pub use super::journal_entries::Entity as JournalEntries;
    pub use super::journal_lines::Entity as JournalLines;
    pub use super::reconciliation_exceptions::Entity as ReconciliationExceptions;
    pub use super::reconciliation_matches::Entity as ReconciliationMatches;
}
