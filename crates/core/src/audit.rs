//! Append-only audit trail.
//!
//! Every state-changing operation appends one record holding JSON snapshots
//! of the target before and after the change. Records are never updated.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clearbook_shared::types::AuditRecordId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::clock::Clock;
use crate::store::{AuditStore, StoreError};

/// Audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Journal entry posted.
    EntryPosted,
    /// Journal entry reversed.
    EntryReversed,
    /// Settlement request dispatched.
    SettlementRequested,
    /// Reconciliation match recorded.
    MatchRecorded,
    /// Exception raised.
    ExceptionRaised,
    /// Exception severity escalated.
    ExceptionEscalated,
    /// Exception taken under review.
    ExceptionReviewStarted,
    /// Exception sent back to open.
    ExceptionReopened,
    /// Exception resolved.
    ExceptionResolved,
    /// Exception dismissed.
    ExceptionDismissed,
}

impl AuditAction {
    /// Returns the string representation of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EntryPosted => "entry_posted",
            Self::EntryReversed => "entry_reversed",
            Self::SettlementRequested => "settlement_requested",
            Self::MatchRecorded => "match_recorded",
            Self::ExceptionRaised => "exception_raised",
            Self::ExceptionEscalated => "exception_escalated",
            Self::ExceptionReviewStarted => "exception_review_started",
            Self::ExceptionReopened => "exception_reopened",
            Self::ExceptionResolved => "exception_resolved",
            Self::ExceptionDismissed => "exception_dismissed",
        }
    }

    /// Parses an action from a string.
    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::EntryPosted,
            Self::EntryReversed,
            Self::SettlementRequested,
            Self::MatchRecorded,
            Self::ExceptionRaised,
            Self::ExceptionEscalated,
            Self::ExceptionReviewStarted,
            Self::ExceptionReopened,
            Self::ExceptionResolved,
            Self::ExceptionDismissed,
        ]
        .into_iter()
        .find(|a| a.as_str() == s)
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Record id.
    pub id: AuditRecordId,
    /// What happened.
    pub action: AuditAction,
    /// Who did it.
    pub actor: String,
    /// Id of the entity changed.
    pub target_id: String,
    /// Snapshot before the change.
    pub before: Option<Value>,
    /// Snapshot after the change.
    pub after: Option<Value>,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

/// Writes and reads audit records.
#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
}

impl AuditTrail {
    /// Creates a trail over a store.
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Builds a record with serialized snapshots without writing it.
    ///
    /// Journal and reconciliation stores persist prepared records in the
    /// same atomic step as the change they describe.
    pub fn prepare<B, A>(
        &self,
        action: AuditAction,
        actor: &str,
        target_id: &str,
        before: Option<&B>,
        after: Option<&A>,
    ) -> Result<AuditRecord, StoreError>
    where
        B: Serialize + ?Sized,
        A: Serialize + ?Sized,
    {
        Ok(AuditRecord {
            id: AuditRecordId::new(),
            action,
            actor: actor.to_string(),
            target_id: target_id.to_string(),
            before: before.map(snapshot).transpose()?,
            after: after.map(snapshot).transpose()?,
            recorded_at: self.clock.now(),
        })
    }

    /// Appends a record with serialized snapshots.
    pub async fn record<B, A>(
        &self,
        action: AuditAction,
        actor: &str,
        target_id: &str,
        before: Option<&B>,
        after: Option<&A>,
    ) -> Result<AuditRecordId, StoreError>
    where
        B: Serialize + Sync + ?Sized,
        A: Serialize + Sync + ?Sized,
    {
        let record = self.prepare(action, actor, target_id, before, after)?;
        self.store.append(&record).await?;
        debug!(action = action.as_str(), actor, target_id, "audit record written");
        Ok(record.id)
    }

    /// Returns true if the target has a record of `action`.
    pub async fn has_record(&self, target_id: &str, action: AuditAction) -> Result<bool, StoreError> {
        Ok(self
            .store
            .for_target(target_id)
            .await?
            .iter()
            .any(|r| r.action == action))
    }

    /// Records for a target, oldest first.
    pub async fn for_target(&self, target_id: &str) -> Result<Vec<AuditRecord>, StoreError> {
        self.store.for_target(target_id).await
    }
}

fn snapshot<T: Serialize + ?Sized>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}
