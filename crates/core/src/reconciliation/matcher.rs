//! Chunked, cancellable reconciliation runs.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use clearbook_shared::config::ReconciliationConfig;
use clearbook_shared::types::{ExceptionId, JournalEntryId, MatchId};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::ReconciliationError;
use super::planner::{EntryCandidate, EventCandidate, MatchPlanner, PlannedException};
use super::similarity::{DescriptionSimilarity, TokenJaccard};
use super::types::{MatchConfidence, ReconcileSummary, ReconciliationMatch};
use crate::audit::{AuditAction, AuditTrail};
use crate::clock::Clock;
use crate::event::{ExternalTransactionEvent, TransactionFeed};
use crate::exceptions::{
    ExceptionStatus, ExceptionTarget, ExceptionType, ReconciliationException, Resolution,
};
use crate::ledger::{DateRange, JournalEntry};
use crate::store::{JournalStore, ReconciliationStore, StoreError};

/// Actor recorded for automatic matches and resolutions.
pub const RECONCILER_ACTOR: &str = "reconciler";

/// Matches journal entries against the processor feed.
pub struct Reconciler {
    journal: Arc<dyn JournalStore>,
    feed: Arc<dyn TransactionFeed>,
    store: Arc<dyn ReconciliationStore>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    config: ReconciliationConfig,
    similarity: Arc<dyn DescriptionSimilarity>,
}

impl Reconciler {
    /// Creates a reconciler scoring descriptions with [`TokenJaccard`].
    pub fn new(
        journal: Arc<dyn JournalStore>,
        feed: Arc<dyn TransactionFeed>,
        store: Arc<dyn ReconciliationStore>,
        audit: AuditTrail,
        clock: Arc<dyn Clock>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            journal,
            feed,
            store,
            audit,
            clock,
            config,
            similarity: Arc::new(TokenJaccard),
        }
    }

    /// Replaces the description similarity function.
    #[must_use]
    pub fn with_similarity(mut self, similarity: Arc<dyn DescriptionSimilarity>) -> Self {
        self.similarity = similarity;
        self
    }

    /// Matcher configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Reconciles `[start, end]` to completion.
    pub async fn reconcile(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ReconcileSummary, ReconciliationError> {
        self.reconcile_with_cancel(start, end, &CancellationToken::new())
            .await
    }

    /// Reconciles `[start, end]` chunk by chunk.
    ///
    /// Cancellation is observed between chunks; chunks already processed stay
    /// committed and the summary reports `cancelled`.
    #[instrument(skip(self, cancel), fields(start = %start, end = %end))]
    pub async fn reconcile_with_cancel(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, ReconciliationError> {
        let range =
            DateRange::new(start, end).ok_or(ReconciliationError::InvalidWindow { start, end })?;
        let mut summary = ReconcileSummary::default();

        for chunk in range.chunks(self.config.chunk_days) {
            if cancel.is_cancelled() {
                info!(chunk_start = %chunk.start, "reconciliation cancelled");
                summary.cancelled = true;
                break;
            }
            self.reconcile_chunk(chunk, &mut summary).await?;
            summary.chunks_completed += 1;
        }

        info!(
            matched = summary.matched,
            exceptions = summary.exceptions.len(),
            new_exceptions = summary.new_exceptions,
            auto_resolved = summary.auto_resolved,
            "reconciliation finished"
        );
        Ok(summary)
    }

    async fn reconcile_chunk(
        &self,
        chunk: DateRange,
        summary: &mut ReconcileSummary,
    ) -> Result<(), ReconciliationError> {
        let window = chunk.expand(
            self.config
                .date_tolerance_days
                .max(self.config.fuzzy_date_tolerance_days),
        );

        let entries = self.journal.entries_between(window).await?;
        let reversed: HashSet<JournalEntryId> = entries.iter().filter_map(|e| e.reverses).collect();
        let reconcilable: Vec<&JournalEntry> = entries
            .iter()
            .filter(|e| e.source.is_reconcilable() && !reversed.contains(&e.id))
            .collect();
        let entry_ids: Vec<JournalEntryId> = reconcilable.iter().map(|e| e.id).collect();
        let matched_entries = self.store.matched_entries(&entry_ids).await?;
        let entry_candidates: Vec<EntryCandidate> = reconcilable
            .into_iter()
            .filter(|e| !matched_entries.contains(&e.id))
            .map(EntryCandidate::from_entry)
            .collect();

        let events = self.feed.events_between(window).await?;
        let event_ids: Vec<String> = events
            .iter()
            .map(|e| e.event_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let matched_events = self.store.matched_events(&event_ids).await?;
        let event_candidates: Vec<EventCandidate> =
            events.iter().map(EventCandidate::from_event).collect();

        let planner = MatchPlanner::new(&self.config, self.similarity.as_ref());
        let plan = planner.plan(
            chunk,
            self.clock.today(),
            &entry_candidates,
            &event_candidates,
            &matched_events,
        );
        debug!(
            chunk_start = %chunk.start,
            entries = entry_candidates.len(),
            events = event_candidates.len(),
            planned_matches = plan.matches.len(),
            planned_exceptions = plan.exceptions.len(),
            "chunk planned"
        );

        let mut newly_matched = Vec::new();
        for planned in plan.matches {
            match self
                .record_match(
                    planned.entry_id,
                    &planned.event_id,
                    planned.confidence,
                    planned.score,
                    RECONCILER_ACTOR,
                )
                .await
            {
                Ok(_) => {
                    summary.matched += 1;
                    newly_matched.push(ExceptionTarget::Entry(planned.entry_id));
                    newly_matched.push(ExceptionTarget::Event(planned.event_id));
                }
                Err(StoreError::MatchConflict { entry_id, event_id }) => {
                    warn!(entry_id = %entry_id, event_id = %event_id, "match already recorded; skipped");
                }
                Err(e) => return Err(e.into()),
            }
        }

        for planned in plan.exceptions {
            self.upsert_exception(planned, summary).await?;
        }

        summary.auto_resolved += self.resolve_covered_exceptions(&newly_matched, None).await?;
        info!(chunk_start = %chunk.start, matched = summary.matched, "chunk reconciled");
        Ok(())
    }

    /// Confidence a single entry/event pair would be matched with.
    #[must_use]
    pub fn evaluate_pair(
        &self,
        entry: &JournalEntry,
        event: &ExternalTransactionEvent,
    ) -> Option<(MatchConfidence, Option<Decimal>)> {
        MatchPlanner::new(&self.config, self.similarity.as_ref()).evaluate(
            &EntryCandidate::from_entry(entry),
            &EventCandidate::from_event(event),
        )
    }

    /// Records a match and its audit record.
    ///
    /// # Errors
    ///
    /// `MatchConflict` if either side is already matched.
    pub async fn record_match(
        &self,
        entry_id: JournalEntryId,
        event_id: &str,
        confidence: MatchConfidence,
        score: Option<Decimal>,
        actor: &str,
    ) -> Result<ReconciliationMatch, StoreError> {
        let recorded = ReconciliationMatch {
            id: MatchId::new(),
            entry_id,
            event_id: event_id.to_string(),
            confidence,
            score,
            matched_at: self.clock.now(),
            matched_by: actor.to_string(),
        };
        let audit = self.audit.prepare(
            AuditAction::MatchRecorded,
            actor,
            &entry_id.to_string(),
            None::<&ReconciliationMatch>,
            Some(&recorded),
        )?;
        self.store.insert_match(&recorded, &[audit]).await?;
        info!(
            entry_id = %entry_id,
            event_id,
            confidence = confidence.as_str(),
            "match recorded"
        );
        Ok(recorded)
    }

    async fn upsert_exception(
        &self,
        planned: PlannedException,
        summary: &mut ReconcileSummary,
    ) -> Result<(), StoreError> {
        let fingerprint = planned.fingerprint();
        let now = self.clock.now();

        match self.store.exception_by_fingerprint(&fingerprint).await? {
            None => {
                let exception = ReconciliationException {
                    id: ExceptionId::new(),
                    exception_type: planned.exception_type,
                    severity: planned.severity,
                    status: ExceptionStatus::Open,
                    targets: planned.targets,
                    fingerprint,
                    amount: planned.amount,
                    currency: planned.currency,
                    item_date: planned.item_date,
                    detail: planned.detail,
                    created_at: now,
                    updated_at: now,
                    resolution: None,
                };
                let audit = self.audit.prepare(
                    AuditAction::ExceptionRaised,
                    RECONCILER_ACTOR,
                    &exception.id.to_string(),
                    None::<&ReconciliationException>,
                    Some(&exception),
                )?;
                match self.store.insert_exception(&exception, &[audit]).await {
                    Ok(()) => {}
                    Err(StoreError::FingerprintConflict(fingerprint)) => {
                        debug!(fingerprint, "exception raised concurrently; skipped");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
                warn!(
                    exception_id = %exception.id,
                    exception_type = exception.exception_type.as_str(),
                    severity = exception.severity.as_str(),
                    "reconciliation exception raised"
                );
                summary.new_exceptions += 1;
                summary.exceptions.push(exception);
            }
            Some(existing) if existing.status.is_open() => {
                if planned.severity > existing.severity {
                    let mut escalated = existing.clone();
                    escalated.severity = planned.severity;
                    escalated.updated_at = now;
                    let audit = self.audit.prepare(
                        AuditAction::ExceptionEscalated,
                        RECONCILER_ACTOR,
                        &escalated.id.to_string(),
                        Some(&existing),
                        Some(&escalated),
                    )?;
                    self.store.update_exception(&escalated, &[audit]).await?;
                    info!(
                        exception_id = %escalated.id,
                        severity = escalated.severity.as_str(),
                        "exception escalated"
                    );
                    summary.exceptions.push(escalated);
                } else {
                    summary.exceptions.push(existing);
                }
            }
            Some(closed) => {
                debug!(exception_id = %closed.id, status = %closed.status, "exception closed; not recreated");
            }
        }
        Ok(())
    }

    /// Resolves open exceptions on `targets` whose every target is now matched.
    ///
    /// Duplicate-listing exceptions stay open: matching does not remove the
    /// repeated feed record. Returns how many were resolved.
    pub async fn resolve_covered_exceptions(
        &self,
        targets: &[ExceptionTarget],
        skip: Option<ExceptionId>,
    ) -> Result<usize, StoreError> {
        let mut checked = HashSet::new();
        let mut resolved = 0;
        for target in targets {
            for exception in self.store.exceptions_for_target(target).await? {
                if !checked.insert(exception.id)
                    || skip == Some(exception.id)
                    || !exception.status.is_open()
                    || exception.exception_type == ExceptionType::Duplicate
                    || !self.all_targets_matched(&exception).await?
                {
                    continue;
                }

                let now = self.clock.now();
                let mut closed = exception.clone();
                closed.status = ExceptionStatus::Resolved;
                closed.updated_at = now;
                closed.resolution = Some(Resolution {
                    action: "auto_match".to_string(),
                    actor: RECONCILER_ACTOR.to_string(),
                    note: "all targets matched".to_string(),
                    entry_id: None,
                    match_id: None,
                    resolved_at: now,
                });
                let audit = self.audit.prepare(
                    AuditAction::ExceptionResolved,
                    RECONCILER_ACTOR,
                    &closed.id.to_string(),
                    Some(&exception),
                    Some(&closed),
                )?;
                self.store.update_exception(&closed, &[audit]).await?;
                info!(exception_id = %closed.id, "exception auto-resolved");
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    async fn all_targets_matched(&self, exception: &ReconciliationException) -> Result<bool, StoreError> {
        let entries: Vec<JournalEntryId> = exception.entry_targets().collect();
        let events: Vec<String> = exception.event_targets().map(str::to_string).collect();
        let matched_entries = self.store.matched_entries(&entries).await?;
        let matched_events = self.store.matched_events(&events).await?;
        Ok(matched_entries.len() == entries.len() && matched_events.len() == events.len())
    }
}
