//! Triage and resolution of reconciliation exceptions.

use std::sync::Arc;

use clearbook_shared::types::{ExceptionId, JournalEntryId, MatchId};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};

use super::error::ExceptionError;
use super::types::{
    ExceptionFilter, ExceptionStatus, ExceptionTarget, ReconciliationException, Resolution,
    ResolutionAction,
};
use super::workflow::ExceptionWorkflow;
use crate::audit::{AuditAction, AuditTrail};
use crate::clock::Clock;
use crate::event::{ExternalTransactionEvent, TransactionFeed};
use crate::ledger::{EntrySource, JournalEntry, JournalLine, Ledger, LedgerError, PostingAudit};
use crate::reconciliation::{MatchConfidence, Reconciler};
use crate::store::{ReconciliationStore, StoreError};
use crate::template::{TemplateEngine, TemplateId};

/// Ledger and match effects of a resolution action.
#[derive(Debug, Default)]
struct Effect {
    entry_id: Option<JournalEntryId>,
    match_id: Option<MatchId>,
    matched: Vec<ExceptionTarget>,
}

/// Moves exceptions through review and applies resolution actions.
///
/// Operations on one exception are serialized; different exceptions proceed
/// in parallel.
pub struct ExceptionManager {
    store: Arc<dyn ReconciliationStore>,
    feed: Arc<dyn TransactionFeed>,
    ledger: Arc<Ledger>,
    templates: Arc<TemplateEngine>,
    reconciler: Arc<Reconciler>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    locks: DashMap<ExceptionId, Arc<Mutex<()>>>,
}

impl ExceptionManager {
    /// Creates a manager.
    pub fn new(
        store: Arc<dyn ReconciliationStore>,
        feed: Arc<dyn TransactionFeed>,
        ledger: Arc<Ledger>,
        templates: Arc<TemplateEngine>,
        reconciler: Arc<Reconciler>,
        audit: AuditTrail,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            feed,
            ledger,
            templates,
            reconciler,
            audit,
            clock,
            locks: DashMap::new(),
        }
    }

    /// Fetches an exception.
    pub async fn get(&self, id: ExceptionId) -> Result<ReconciliationException, ExceptionError> {
        self.store
            .get_exception(id)
            .await?
            .ok_or(ExceptionError::NotFound(id))
    }

    /// Exceptions passing the filter, highest severity first.
    pub async fn list(
        &self,
        filter: &ExceptionFilter,
    ) -> Result<Vec<ReconciliationException>, ExceptionError> {
        Ok(self.store.list_exceptions(filter).await?)
    }

    /// Moves an Open exception to UnderReview.
    #[instrument(skip(self), fields(exception_id = %id))]
    pub async fn begin_review(
        &self,
        id: ExceptionId,
        actor: &str,
    ) -> Result<ReconciliationException, ExceptionError> {
        let _guard = self.lock(id).await;
        let current = self.get(id).await?;
        ensure_open(&current)?;
        let status = ExceptionWorkflow::begin_review(current.status)?;
        self.transition(&current, status, None, AuditAction::ExceptionReviewStarted, actor)
            .await
    }

    /// Returns an exception under review to Open.
    #[instrument(skip(self), fields(exception_id = %id))]
    pub async fn reopen(
        &self,
        id: ExceptionId,
        actor: &str,
    ) -> Result<ReconciliationException, ExceptionError> {
        let _guard = self.lock(id).await;
        let current = self.get(id).await?;
        ensure_open(&current)?;
        let status = ExceptionWorkflow::reopen(current.status)?;
        self.transition(&current, status, None, AuditAction::ExceptionReopened, actor)
            .await
    }

    /// Applies a resolution action and closes the exception.
    ///
    /// When a target has disappeared or was matched elsewhere the exception
    /// is put back to Open, the re-triage is audited and `StaleException` is
    /// returned. Nothing is posted or matched in that case.
    #[instrument(skip(self, action, note), fields(exception_id = %id, action = action.name()))]
    pub async fn resolve(
        &self,
        id: ExceptionId,
        action: ResolutionAction,
        actor: &str,
        note: &str,
    ) -> Result<ReconciliationException, ExceptionError> {
        let _guard = self.lock(id).await;
        let current = self.get(id).await?;
        ensure_open(&current)?;

        let target = match action {
            ResolutionAction::Dismiss { .. } => ExceptionStatus::Dismissed,
            _ => ExceptionStatus::Resolved,
        };
        let status = ExceptionWorkflow::close(current.status, target)?;

        let (effect, note) = match &action {
            ResolutionAction::Dismiss { reason } => {
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(ExceptionError::DismissReasonRequired);
                }
                let note = if note.is_empty() {
                    reason.to_string()
                } else {
                    format!("{reason}; {note}")
                };
                (Effect::default(), note)
            }
            ResolutionAction::CreateEntry { template } => (
                self.stale_guarded(&current, actor, self.create_entry(&current, template.as_ref(), actor))
                    .await?,
                note.to_string(),
            ),
            ResolutionAction::ManualMatch { entry_id, event_id } => (
                self.stale_guarded(&current, actor, self.manual_match(&current, *entry_id, event_id, actor))
                    .await?,
                note.to_string(),
            ),
            ResolutionAction::Adjust {
                date,
                description,
                lines,
            } => (
                self.stale_guarded(
                    &current,
                    actor,
                    self.adjust(&current, *date, description, lines.clone()),
                )
                .await?,
                note.to_string(),
            ),
        };

        let resolution = Resolution {
            action: action.name().to_string(),
            actor: actor.to_string(),
            note,
            entry_id: effect.entry_id,
            match_id: effect.match_id,
            resolved_at: self.clock.now(),
        };
        let audit_action = if status == ExceptionStatus::Dismissed {
            AuditAction::ExceptionDismissed
        } else {
            AuditAction::ExceptionResolved
        };
        let closed = self
            .transition(&current, status, Some(resolution), audit_action, actor)
            .await?;

        if !effect.matched.is_empty() {
            let swept = self
                .reconciler
                .resolve_covered_exceptions(&effect.matched, Some(id))
                .await?;
            if swept > 0 {
                info!(swept, "related exceptions auto-resolved");
            }
        }
        Ok(closed)
    }

    async fn stale_guarded(
        &self,
        current: &ReconciliationException,
        actor: &str,
        action: impl Future<Output = Result<Effect, ExceptionError>>,
    ) -> Result<Effect, ExceptionError> {
        match action.await {
            Err(ExceptionError::StaleException { id, reason }) => {
                self.retriage(current, actor, &reason).await?;
                Err(ExceptionError::StaleException { id, reason })
            }
            other => other,
        }
    }

    async fn create_entry(
        &self,
        current: &ReconciliationException,
        template: Option<&TemplateId>,
        actor: &str,
    ) -> Result<Effect, ExceptionError> {
        let event_id = current
            .event_targets()
            .next()
            .ok_or(ExceptionError::ActionNotApplicable {
                action: "create_entry",
                exception_type: current.exception_type,
            })?
            .to_string();
        self.check_targets(current).await?;
        let event = self.live_event(current.id, &event_id).await?;

        let outcome = match template {
            Some(template) => self.templates.apply(template, &event).await?,
            None => self.templates.ingest(&event).await?,
        };
        let entry = self.ledger.get_entry(outcome.entry_id).await?;
        if self.store.match_for_entry(entry.id).await?.is_some() {
            return Err(stale(current.id, format!("entry {} is already matched", entry.id)));
        }

        let (confidence, score) = self
            .reconciler
            .evaluate_pair(&entry, &event)
            .unwrap_or((MatchConfidence::Manual, None));
        let match_id = self
            .record_match(current.id, entry.id, &event_id, confidence, score, actor)
            .await?;
        info!(
            entry_id = %entry.id,
            event_id,
            confidence = confidence.as_str(),
            duplicate = outcome.duplicate,
            "missing entry created"
        );
        Ok(Effect {
            entry_id: Some(entry.id),
            match_id: Some(match_id),
            matched: vec![ExceptionTarget::Entry(entry.id), ExceptionTarget::Event(event_id)],
        })
    }

    async fn manual_match(
        &self,
        current: &ReconciliationException,
        entry_id: JournalEntryId,
        event_id: &str,
        actor: &str,
    ) -> Result<Effect, ExceptionError> {
        let names_target = current.targets.contains(&ExceptionTarget::Entry(entry_id))
            || current
                .targets
                .contains(&ExceptionTarget::Event(event_id.to_string()));
        if !names_target {
            return Err(ExceptionError::ActionNotApplicable {
                action: "manual_match",
                exception_type: current.exception_type,
            });
        }
        self.check_targets(current).await?;
        self.live_entry(current.id, entry_id).await?;
        self.live_event(current.id, event_id).await?;
        if self.store.match_for_entry(entry_id).await?.is_some() {
            return Err(stale(current.id, format!("entry {entry_id} is already matched")));
        }

        let match_id = self
            .record_match(current.id, entry_id, event_id, MatchConfidence::Manual, None, actor)
            .await?;
        Ok(Effect {
            entry_id: Some(entry_id),
            match_id: Some(match_id),
            matched: vec![
                ExceptionTarget::Entry(entry_id),
                ExceptionTarget::Event(event_id.to_string()),
            ],
        })
    }

    async fn adjust(
        &self,
        current: &ReconciliationException,
        date: Option<chrono::NaiveDate>,
        description: &str,
        lines: Vec<JournalLine>,
    ) -> Result<Effect, ExceptionError> {
        self.check_targets(current).await?;
        let entry = JournalEntry::pending(
            date.unwrap_or_else(|| self.clock.today()),
            description,
            EntrySource::ReconciliationAdjustment,
            lines,
        );
        let audit = PostingAudit {
            trail: &self.audit,
            action: AuditAction::EntryPosted,
            actor: "exception-manager",
        };
        let posted = self.ledger.post(entry, None, Some(audit)).await?;
        info!(entry_id = %posted.id, "adjustment posted");
        Ok(Effect {
            entry_id: Some(posted.id),
            ..Effect::default()
        })
    }

    /// Every target must still exist and be unmatched.
    async fn check_targets(&self, current: &ReconciliationException) -> Result<(), ExceptionError> {
        for target in &current.targets {
            match target {
                ExceptionTarget::Entry(entry_id) => {
                    self.live_entry(current.id, *entry_id).await?;
                    if self.store.match_for_entry(*entry_id).await?.is_some() {
                        return Err(stale(current.id, format!("entry {entry_id} is already matched")));
                    }
                }
                ExceptionTarget::Event(event_id) => {
                    self.live_event(current.id, event_id).await?;
                    if self.store.match_for_event(event_id).await?.is_some() {
                        return Err(stale(current.id, format!("event {event_id} is already matched")));
                    }
                }
            }
        }
        Ok(())
    }

    async fn live_entry(&self, id: ExceptionId, entry_id: JournalEntryId) -> Result<JournalEntry, ExceptionError> {
        match self.ledger.get_entry(entry_id).await {
            Ok(entry) => Ok(entry),
            Err(LedgerError::EntryNotFound(_)) => {
                Err(stale(id, format!("entry {entry_id} no longer exists")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn live_event(
        &self,
        id: ExceptionId,
        event_id: &str,
    ) -> Result<ExternalTransactionEvent, ExceptionError> {
        self.feed
            .event(event_id)
            .await?
            .ok_or_else(|| stale(id, format!("event {event_id} is no longer in the feed")))
    }

    async fn record_match(
        &self,
        id: ExceptionId,
        entry_id: JournalEntryId,
        event_id: &str,
        confidence: MatchConfidence,
        score: Option<rust_decimal::Decimal>,
        actor: &str,
    ) -> Result<MatchId, ExceptionError> {
        match self
            .reconciler
            .record_match(entry_id, event_id, confidence, score, actor)
            .await
        {
            Ok(recorded) => Ok(recorded.id),
            Err(StoreError::MatchConflict { .. }) => Err(stale(
                id,
                format!("entry {entry_id} or event {event_id} was matched concurrently"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn retriage(
        &self,
        current: &ReconciliationException,
        actor: &str,
        reason: &str,
    ) -> Result<(), ExceptionError> {
        warn!(exception_id = %current.id, reason, "stale exception returned to open");
        self.transition(
            current,
            ExceptionStatus::Open,
            None,
            AuditAction::ExceptionReopened,
            actor,
        )
        .await?;
        Ok(())
    }

    async fn transition(
        &self,
        current: &ReconciliationException,
        status: ExceptionStatus,
        resolution: Option<Resolution>,
        action: AuditAction,
        actor: &str,
    ) -> Result<ReconciliationException, ExceptionError> {
        let mut updated = current.clone();
        updated.status = status;
        updated.updated_at = self.clock.now();
        if resolution.is_some() {
            updated.resolution = resolution;
        }
        let audit = self.audit.prepare(
            action,
            actor,
            &updated.id.to_string(),
            Some(current),
            Some(&updated),
        )?;
        self.store.update_exception(&updated, &[audit]).await?;
        info!(
            exception_id = %updated.id,
            from = %current.status,
            to = %updated.status,
            actor,
            "exception transitioned"
        );
        Ok(updated)
    }

    async fn lock(&self, id: ExceptionId) -> ExceptionLock<'_> {
        let lock = Arc::clone(self.locks.entry(id).or_default().value());
        ExceptionLock {
            id,
            locks: &self.locks,
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// Holds one exception's lock; drops the map slot once nobody else waits.
struct ExceptionLock<'a> {
    id: ExceptionId,
    locks: &'a DashMap<ExceptionId, Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ExceptionLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn ensure_open(exception: &ReconciliationException) -> Result<(), ExceptionError> {
    if exception.status.is_open() {
        Ok(())
    } else {
        Err(ExceptionError::ExceptionClosed {
            id: exception.id,
            status: exception.status,
        })
    }
}

fn stale(id: ExceptionId, reason: String) -> ExceptionError {
    ExceptionError::StaleException { id, reason }
}
