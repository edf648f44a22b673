//! In-memory store implementations.
//!
//! Each store keeps its state behind one `parking_lot::RwLock` (or a
//! `DashMap` for idempotency keys), so every write is atomic and every read
//! sees a consistent snapshot.
//!
//! The journal and reconciliation stores write their audit records to a
//! shared [`AuditStore`]. A write is checked, then audited, then committed
//! while holding the store's write gate, so a failed audit append leaves the
//! state untouched.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use clearbook_shared::types::{AccountId, ExceptionId, JournalEntryId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::{
    AuditStore, IdempotencyStore, JournalStore, ReconciliationStore, Reservation, StoreError,
};
use crate::audit::AuditRecord;
use crate::exceptions::{ExceptionFilter, ExceptionTarget, ReconciliationException};
use crate::fees::FeeCalculation;
use crate::ledger::{BalanceTotals, DateRange, JournalEntry};
use crate::reconciliation::ReconciliationMatch;

// ============================================================================
// Journal
// ============================================================================

#[derive(Debug, Default)]
struct JournalState {
    entries: Vec<JournalEntry>,
    by_id: HashMap<JournalEntryId, usize>,
    by_event: HashMap<String, JournalEntryId>,
    reversals: HashMap<JournalEntryId, JournalEntryId>,
    balances: HashMap<AccountId, BalanceTotals>,
    fees: HashMap<JournalEntryId, FeeCalculation>,
}

impl JournalState {
    fn sorted(&self, keep: impl Fn(&JournalEntry) -> bool) -> Vec<JournalEntry> {
        let mut out: Vec<JournalEntry> = self.entries.iter().filter(|e| keep(e)).cloned().collect();
        out.sort_by_key(|e| (e.date, e.sequence));
        out
    }
}

/// In-memory [`JournalStore`].
pub struct MemoryJournalStore {
    state: RwLock<JournalState>,
    audit: Arc<dyn AuditStore>,
    writes: Mutex<()>,
}

impl MemoryJournalStore {
    /// Creates an empty store auditing into `audit`.
    #[must_use]
    pub fn new(audit: Arc<dyn AuditStore>) -> Self {
        Self {
            state: RwLock::default(),
            audit,
            writes: Mutex::new(()),
        }
    }
}

impl fmt::Debug for MemoryJournalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryJournalStore")
            .field("entries", &self.state.read().entries.len())
            .finish_non_exhaustive()
    }
}

impl JournalState {
    /// Rejects the append or returns the account totals it produces.
    fn admit(&self, entry: &JournalEntry) -> Result<HashMap<AccountId, BalanceTotals>, StoreError> {
        if let Some(event_id) = &entry.source_event_id {
            if let Some(existing) = self.by_event.get(event_id) {
                return Err(StoreError::DuplicateSourceEvent {
                    event_id: event_id.clone(),
                    existing: *existing,
                });
            }
        }
        if let Some(original) = entry.reverses {
            if let Some(existing) = self.reversals.get(&original) {
                return Err(StoreError::AlreadyReversed {
                    original,
                    existing: *existing,
                });
            }
        }

        let mut totals: HashMap<AccountId, BalanceTotals> = HashMap::new();
        for line in &entry.lines {
            let current = totals
                .get(&line.account_id)
                .or_else(|| self.balances.get(&line.account_id))
                .copied()
                .unwrap_or_default();
            let next = current
                .checked_apply(line.direction, line.amount)
                .ok_or(StoreError::BalanceOverflow(line.account_id))?;
            totals.insert(line.account_id, next);
        }
        Ok(totals)
    }
}

#[async_trait]
impl JournalStore for MemoryJournalStore {
    async fn append(
        &self,
        entry: &JournalEntry,
        fee: Option<&FeeCalculation>,
        audit: &[AuditRecord],
    ) -> Result<u64, StoreError> {
        let _gate = self.writes.lock().await;

        let totals = self.state.read().admit(entry)?;
        self.audit.append_all(audit).await?;

        let mut state = self.state.write();
        let sequence = u64::try_from(state.entries.len()).unwrap_or(u64::MAX) + 1;
        let mut stored = entry.clone();
        stored.sequence = Some(sequence);

        state.balances.extend(totals);
        if let Some(event_id) = &stored.source_event_id {
            state.by_event.insert(event_id.clone(), stored.id);
        }
        if let Some(original) = stored.reverses {
            state.reversals.insert(original, stored.id);
        }
        if let Some(fee) = fee {
            state.fees.insert(stored.id, fee.clone());
        }
        let idx = state.entries.len();
        state.by_id.insert(stored.id, idx);
        state.entries.push(stored);

        Ok(sequence)
    }

    async fn get(&self, id: JournalEntryId) -> Result<Option<JournalEntry>, StoreError> {
        let state = self.state.read();
        Ok(state.by_id.get(&id).map(|idx| state.entries[*idx].clone()))
    }

    async fn find_by_source_event(&self, event_id: &str) -> Result<Option<JournalEntry>, StoreError> {
        let state = self.state.read();
        Ok(state
            .by_event
            .get(event_id)
            .and_then(|id| state.by_id.get(id))
            .map(|idx| state.entries[*idx].clone()))
    }

    async fn reversal_of(&self, id: JournalEntryId) -> Result<Option<JournalEntryId>, StoreError> {
        Ok(self.state.read().reversals.get(&id).copied())
    }

    async fn entries_between(&self, range: DateRange) -> Result<Vec<JournalEntry>, StoreError> {
        Ok(self.state.read().sorted(|e| range.contains(e.date)))
    }

    async fn entries_for_account(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        Ok(self
            .state
            .read()
            .sorted(|e| range.contains(e.date) && e.touches(account_id)))
    }

    async fn balance(&self, account_id: AccountId) -> Result<BalanceTotals, StoreError> {
        Ok(self
            .state
            .read()
            .balances
            .get(&account_id)
            .copied()
            .unwrap_or_default())
    }

    async fn fee_calculation(
        &self,
        entry_id: JournalEntryId,
    ) -> Result<Option<FeeCalculation>, StoreError> {
        Ok(self.state.read().fees.get(&entry_id).cloned())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(u64::try_from(self.state.read().entries.len()).unwrap_or(u64::MAX))
    }
}

// ============================================================================
// Idempotency
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum KeyState {
    Reserved { at: DateTime<Utc> },
    Completed(JournalEntryId),
}

/// In-memory [`IdempotencyStore`].
///
/// Reservation goes through the `DashMap` entry API, which holds the shard
/// lock for the whole check-then-insert.
#[derive(Debug, Default)]
pub struct MemoryIdempotencyStore {
    keys: DashMap<String, KeyState>,
}

impl MemoryIdempotencyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn reserve(
        &self,
        key: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Reservation, StoreError> {
        let outcome = match self.keys.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(KeyState::Reserved { at: now });
                Reservation::Acquired
            }
            Entry::Occupied(mut slot) => match *slot.get() {
                KeyState::Completed(entry_id) => Reservation::Completed(entry_id),
                KeyState::Reserved { at } if now - at >= lease => {
                    slot.insert(KeyState::Reserved { at: now });
                    Reservation::Acquired
                }
                KeyState::Reserved { .. } => Reservation::Held,
            },
        };
        Ok(outcome)
    }

    async fn complete(&self, key: &str, entry_id: JournalEntryId) -> Result<(), StoreError> {
        self.keys.insert(key.to_string(), KeyState::Completed(entry_id));
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<(), StoreError> {
        self.keys
            .remove_if(key, |_, state| matches!(state, KeyState::Reserved { .. }));
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Result<Option<JournalEntryId>, StoreError> {
        Ok(self.keys.get(key).and_then(|state| match *state {
            KeyState::Completed(entry_id) => Some(entry_id),
            KeyState::Reserved { .. } => None,
        }))
    }
}

// ============================================================================
// Audit
// ============================================================================

/// In-memory [`AuditStore`].
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn append_all(&self, records: &[AuditRecord]) -> Result<(), StoreError> {
        self.records.write().extend_from_slice(records);
        Ok(())
    }

    async fn for_target(&self, target_id: &str) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.target_id == target_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

#[derive(Debug, Default)]
struct ReconciliationState {
    matches: Vec<ReconciliationMatch>,
    by_entry: HashMap<JournalEntryId, usize>,
    by_event: HashMap<String, usize>,
    exceptions: Vec<ReconciliationException>,
    by_fingerprint: HashMap<String, usize>,
    by_exception_id: HashMap<ExceptionId, usize>,
}

/// In-memory [`ReconciliationStore`].
pub struct MemoryReconciliationStore {
    state: RwLock<ReconciliationState>,
    audit: Arc<dyn AuditStore>,
    writes: Mutex<()>,
}

impl MemoryReconciliationStore {
    /// Creates an empty store auditing into `audit`.
    #[must_use]
    pub fn new(audit: Arc<dyn AuditStore>) -> Self {
        Self {
            state: RwLock::default(),
            audit,
            writes: Mutex::new(()),
        }
    }
}

impl fmt::Debug for MemoryReconciliationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryReconciliationStore")
            .field("matches", &state.matches.len())
            .field("exceptions", &state.exceptions.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReconciliationStore for MemoryReconciliationStore {
    async fn insert_match(
        &self,
        m: &ReconciliationMatch,
        audit: &[AuditRecord],
    ) -> Result<(), StoreError> {
        let _gate = self.writes.lock().await;
        {
            let state = self.state.read();
            if state.by_entry.contains_key(&m.entry_id) || state.by_event.contains_key(&m.event_id) {
                return Err(StoreError::MatchConflict {
                    entry_id: m.entry_id,
                    event_id: m.event_id.clone(),
                });
            }
        }
        self.audit.append_all(audit).await?;

        let mut state = self.state.write();
        let idx = state.matches.len();
        state.by_entry.insert(m.entry_id, idx);
        state.by_event.insert(m.event_id.clone(), idx);
        state.matches.push(m.clone());
        Ok(())
    }

    async fn match_for_entry(
        &self,
        entry_id: JournalEntryId,
    ) -> Result<Option<ReconciliationMatch>, StoreError> {
        let state = self.state.read();
        Ok(state.by_entry.get(&entry_id).map(|idx| state.matches[*idx].clone()))
    }

    async fn match_for_event(
        &self,
        event_id: &str,
    ) -> Result<Option<ReconciliationMatch>, StoreError> {
        let state = self.state.read();
        Ok(state.by_event.get(event_id).map(|idx| state.matches[*idx].clone()))
    }

    async fn matched_entries(
        &self,
        entry_ids: &[JournalEntryId],
    ) -> Result<HashSet<JournalEntryId>, StoreError> {
        let state = self.state.read();
        Ok(entry_ids
            .iter()
            .filter(|id| state.by_entry.contains_key(id))
            .copied()
            .collect())
    }

    async fn matched_events(&self, event_ids: &[String]) -> Result<HashSet<String>, StoreError> {
        let state = self.state.read();
        Ok(event_ids
            .iter()
            .filter(|id| state.by_event.contains_key(id.as_str()))
            .cloned()
            .collect())
    }

    async fn count_matches(&self) -> Result<u64, StoreError> {
        Ok(u64::try_from(self.state.read().matches.len()).unwrap_or(u64::MAX))
    }

    async fn insert_exception(
        &self,
        exception: &ReconciliationException,
        audit: &[AuditRecord],
    ) -> Result<(), StoreError> {
        let _gate = self.writes.lock().await;
        if self.state.read().by_fingerprint.contains_key(&exception.fingerprint) {
            return Err(StoreError::FingerprintConflict(exception.fingerprint.clone()));
        }
        self.audit.append_all(audit).await?;

        let mut state = self.state.write();
        let idx = state.exceptions.len();
        state.by_fingerprint.insert(exception.fingerprint.clone(), idx);
        state.by_exception_id.insert(exception.id, idx);
        state.exceptions.push(exception.clone());
        Ok(())
    }

    async fn update_exception(
        &self,
        exception: &ReconciliationException,
        audit: &[AuditRecord],
    ) -> Result<(), StoreError> {
        let _gate = self.writes.lock().await;
        let idx = *self
            .state
            .read()
            .by_exception_id
            .get(&exception.id)
            .ok_or_else(|| StoreError::NotFound(format!("exception {}", exception.id)))?;
        self.audit.append_all(audit).await?;

        self.state.write().exceptions[idx] = exception.clone();
        Ok(())
    }

    async fn get_exception(
        &self,
        id: ExceptionId,
    ) -> Result<Option<ReconciliationException>, StoreError> {
        let state = self.state.read();
        Ok(state.by_exception_id.get(&id).map(|idx| state.exceptions[*idx].clone()))
    }

    async fn exception_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<ReconciliationException>, StoreError> {
        let state = self.state.read();
        Ok(state
            .by_fingerprint
            .get(fingerprint)
            .map(|idx| state.exceptions[*idx].clone()))
    }

    async fn list_exceptions(
        &self,
        filter: &ExceptionFilter,
    ) -> Result<Vec<ReconciliationException>, StoreError> {
        let mut out: Vec<ReconciliationException> = self
            .state
            .read()
            .exceptions
            .iter()
            .filter(|e| filter.accepts(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.created_at.cmp(&b.created_at)));
        Ok(out)
    }

    async fn exceptions_for_target(
        &self,
        target: &ExceptionTarget,
    ) -> Result<Vec<ReconciliationException>, StoreError> {
        Ok(self
            .state
            .read()
            .exceptions
            .iter()
            .filter(|e| e.targets.contains(target))
            .cloned()
            .collect())
    }

    async fn count_exceptions(&self) -> Result<u64, StoreError> {
        Ok(u64::try_from(self.state.read().exceptions.len()).unwrap_or(u64::MAX))
    }
}
