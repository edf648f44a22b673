//! Ledger service: posting, balances, activity and reversals.

use std::sync::Arc;

use chrono::NaiveDate;
use clearbook_shared::types::{AccountId, JournalEntryId};
use tracing::{debug, info, instrument};

use super::activity::AccountActivity;
use super::balance::AccountBalance;
use super::chart::AccountDirectory;
use super::error::LedgerError;
use super::locks::AccountLocks;
use super::reversal::ReversalService;
use super::types::{DateRange, EntryStatus, JournalEntry};
use super::validation::validate_entry;
use crate::audit::{AuditAction, AuditTrail};
use crate::fees::FeeCalculation;
use crate::store::JournalStore;

/// Audit record to store together with a posting.
///
/// The record targets the posted entry, or the original entry for a reversal.
#[derive(Clone, Copy)]
pub struct PostingAudit<'a> {
    /// Trail the record is prepared by.
    pub trail: &'a AuditTrail,
    /// Recorded action.
    pub action: AuditAction,
    /// Acting component or user.
    pub actor: &'a str,
}

/// The append-only double-entry ledger.
///
/// Validation runs before any lock is taken. Appending the entry, its fee
/// calculation, its audit record and the balance totals is a single store
/// operation performed while the touched accounts are locked.
pub struct Ledger {
    directory: Arc<dyn AccountDirectory>,
    store: Arc<dyn JournalStore>,
    locks: AccountLocks,
}

impl Ledger {
    /// Creates a ledger over an account directory and journal store.
    pub fn new(directory: Arc<dyn AccountDirectory>, store: Arc<dyn JournalStore>) -> Self {
        Self {
            directory,
            store,
            locks: AccountLocks::new(),
        }
    }

    /// The account directory the ledger validates against.
    #[must_use]
    pub fn directory(&self) -> &Arc<dyn AccountDirectory> {
        &self.directory
    }

    /// Posts a pending entry and returns its id.
    pub async fn post_entry(&self, entry: JournalEntry) -> Result<JournalEntryId, LedgerError> {
        self.post(entry, None, None).await.map(|posted| posted.id)
    }

    /// Posts a pending entry together with the fee calculation that produced
    /// it and, when given, its audit record.
    ///
    /// Returns the posted entry with its sequence assigned.
    #[instrument(skip(self, entry, fee, audit), fields(entry_id = %entry.id, source = entry.source.as_str()))]
    pub async fn post(
        &self,
        mut entry: JournalEntry,
        fee: Option<&FeeCalculation>,
        audit: Option<PostingAudit<'_>>,
    ) -> Result<JournalEntry, LedgerError> {
        if entry.status != EntryStatus::Pending {
            return Err(LedgerError::AlreadyPosted(entry.id));
        }
        validate_entry(&entry, self.directory.as_ref())?;

        let accounts = entry.account_ids();
        let _guards = self.locks.acquire(&accounts).await;
        debug!(accounts = accounts.len(), "account locks acquired");

        entry.status = EntryStatus::Posted;
        let records = match audit {
            Some(audit) => {
                let target = entry.reverses.unwrap_or(entry.id).to_string();
                vec![audit.trail.prepare(
                    audit.action,
                    audit.actor,
                    &target,
                    None::<&JournalEntry>,
                    Some(&entry),
                )?]
            }
            None => Vec::new(),
        };
        let sequence = self.store.append(&entry, fee, &records).await?;
        entry.sequence = Some(sequence);

        info!(
            sequence,
            event_id = entry.source_event_id.as_deref().unwrap_or(""),
            "journal entry posted"
        );
        Ok(entry)
    }

    /// Fetches an entry by id.
    pub async fn get_entry(&self, id: JournalEntryId) -> Result<JournalEntry, LedgerError> {
        self.store
            .get(id)
            .await?
            .ok_or(LedgerError::EntryNotFound(id))
    }

    /// Current balance of an account.
    pub async fn account_balance(&self, account_id: AccountId) -> Result<AccountBalance, LedgerError> {
        let account = self
            .directory
            .account(account_id)
            .ok_or(LedgerError::UnknownAccount(account_id))?;
        let totals = self.store.balance(account_id).await?;
        Ok(AccountBalance::from_totals(&account, totals))
    }

    /// Snapshot of an account's posted lines with dates in `range`.
    pub async fn account_activity(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<AccountActivity, LedgerError> {
        if self.directory.account(account_id).is_none() {
            return Err(LedgerError::UnknownAccount(account_id));
        }
        let entries = self.store.entries_for_account(account_id, range).await?;
        Ok(AccountActivity::new(account_id, range, entries))
    }

    /// Posted entries with dates in `range`, ordered by date then sequence.
    pub async fn entries_between(&self, range: DateRange) -> Result<Vec<JournalEntry>, LedgerError> {
        Ok(self.store.entries_between(range).await?)
    }

    /// Posts the reversal of a posted entry, dated `date`.
    ///
    /// An entry can be reversed at most once.
    #[instrument(skip(self, reason, audit), fields(entry_id = %id))]
    pub async fn reverse_entry(
        &self,
        id: JournalEntryId,
        reason: &str,
        date: NaiveDate,
        audit: Option<PostingAudit<'_>>,
    ) -> Result<JournalEntry, LedgerError> {
        let original = self.get_entry(id).await?;
        if let Some(existing) = self.store.reversal_of(id).await? {
            return Err(LedgerError::AlreadyReversed {
                original: id,
                reversal: existing,
            });
        }
        let reversal = ReversalService::create_reversal(&original, reason, date)?;
        let posted = self.post(reversal, None, audit).await?;
        info!(reversal_id = %posted.id, "entry reversed");
        Ok(posted)
    }
}
