//! Event to entry generation.

use std::sync::Arc;

use clearbook_shared::types::{Currency, JournalEntryId};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::builder::build_lines;
use super::error::TemplateError;
use super::registry::TemplateRegistry;
use super::types::{JournalTemplate, TemplateId};
use super::validation::validate_event;
use crate::audit::{AuditAction, AuditTrail};
use crate::event::ExternalTransactionEvent;
use crate::fees::{FeeAttributes, FeeCalculation, FeeCalculator};
use crate::idempotency::{Begin, IdempotencyLedger};
use crate::ledger::{JournalEntry, Ledger, LedgerError, PostingAudit};
use crate::settlement::{SettlementDispatcher, SettlementRequest};

const INGEST_ACTOR: &str = "ingest";

/// Result of processing one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    /// The entry for the event.
    pub entry_id: JournalEntryId,
    /// True when the event had already been journaled.
    pub duplicate: bool,
}

/// An entry built from an event but not posted.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    /// Pending entry.
    pub entry: JournalEntry,
    /// Fee calculation, when the template has a fee line.
    pub fee: Option<FeeCalculation>,
    /// Currency of every line.
    pub currency: Currency,
}

/// Applies journal templates to external events.
pub struct TemplateEngine {
    registry: TemplateRegistry,
    fees: FeeCalculator,
    ledger: Arc<Ledger>,
    idempotency: IdempotencyLedger,
    audit: AuditTrail,
    settlement: Option<SettlementDispatcher>,
}

impl TemplateEngine {
    /// Creates an engine.
    pub fn new(
        registry: TemplateRegistry,
        fees: FeeCalculator,
        ledger: Arc<Ledger>,
        idempotency: IdempotencyLedger,
        audit: AuditTrail,
    ) -> Self {
        Self {
            registry,
            fees,
            ledger,
            idempotency,
            audit,
            settlement: None,
        }
    }

    /// Sends settlement requests for templates that require them.
    #[must_use]
    pub fn with_settlement(mut self, dispatcher: SettlementDispatcher) -> Self {
        self.settlement = Some(dispatcher);
        self
    }

    /// The template registry.
    #[must_use]
    pub const fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Templates for the event whose required fields are present, by priority.
    #[must_use]
    pub fn find_applicable_templates(&self, event: &ExternalTransactionEvent) -> Vec<&JournalTemplate> {
        self.registry.find_applicable_templates(event)
    }

    /// Journals an event with the best applicable template.
    ///
    /// When no template's required fields are satisfied, the highest-priority
    /// template of the type is applied so its validation errors are reported.
    pub async fn ingest(&self, event: &ExternalTransactionEvent) -> Result<IngestOutcome, TemplateError> {
        let template_id = self.select(event)?.id.clone();
        self.apply(&template_id, event).await
    }

    /// Builds the entry a template would post, without posting it.
    pub fn preview(
        &self,
        template_id: &TemplateId,
        event: &ExternalTransactionEvent,
    ) -> Result<EntryDraft, TemplateError> {
        let template = self.resolve(template_id, event)?;
        self.draft(template, event)
    }

    /// Journals an event with a specific template.
    ///
    /// A delivery of an already journaled event returns the prior entry. The
    /// idempotency key is completed only once the entry and its settlement
    /// request are both recorded, so a delivery that failed after posting is
    /// finished by the next one.
    #[instrument(skip(self, event), fields(event_id = %event.event_id, template = %template_id))]
    pub async fn apply(
        &self,
        template_id: &TemplateId,
        event: &ExternalTransactionEvent,
    ) -> Result<IngestOutcome, TemplateError> {
        let template = self.resolve(template_id, event)?;

        let guard = match self.idempotency.begin(&event.event_id).await? {
            Begin::Fresh(guard) => guard,
            Begin::Completed(entry_id) => {
                info!(entry_id = %entry_id, "duplicate delivery; returning prior entry");
                self.settle_existing(template, entry_id, event).await?;
                return Ok(IngestOutcome {
                    entry_id,
                    duplicate: true,
                });
            }
        };

        let entry_id = match self.draft_and_post(template, event).await {
            Ok((posted, currency)) => {
                let settled = if template.requires_settlement {
                    self.request_settlement(template, &posted, event, currency).await
                } else {
                    Ok(())
                };
                settled.map(|()| (posted.id, false))
            }
            Err(TemplateError::Ledger(LedgerError::DuplicateSourceEvent { existing, .. })) => {
                info!(entry_id = %existing, "event already journaled; returning prior entry");
                self.settle_existing(template, existing, event)
                    .await
                    .map(|()| (existing, true))
            }
            Err(e) => Err(e),
        };

        match entry_id {
            Ok((entry_id, duplicate)) => {
                guard.complete(entry_id).await?;
                if !duplicate {
                    info!(entry_id = %entry_id, "event journaled");
                }
                Ok(IngestOutcome {
                    entry_id,
                    duplicate,
                })
            }
            Err(e) => {
                if let Err(release) = guard.release().await {
                    warn!(error = %release, "failed to release idempotency key");
                }
                Err(e)
            }
        }
    }

    fn select(&self, event: &ExternalTransactionEvent) -> Result<&JournalTemplate, TemplateError> {
        self.registry
            .find_applicable_templates(event)
            .into_iter()
            .next()
            .or_else(|| self.registry.for_type(event).into_iter().next())
            .ok_or_else(|| TemplateError::NoApplicableTemplate {
                event_id: event.event_id.clone(),
                transaction_type: event.transaction_type,
            })
    }

    fn resolve(
        &self,
        template_id: &TemplateId,
        event: &ExternalTransactionEvent,
    ) -> Result<&JournalTemplate, TemplateError> {
        let template = self
            .registry
            .get(template_id)
            .ok_or_else(|| TemplateError::UnknownTemplate(template_id.clone()))?;
        if template.transaction_type() != event.transaction_type {
            return Err(TemplateError::NotApplicable {
                template: template_id.clone(),
                transaction_type: event.transaction_type,
            });
        }
        Ok(template)
    }

    fn draft(
        &self,
        template: &JournalTemplate,
        event: &ExternalTransactionEvent,
    ) -> Result<EntryDraft, TemplateError> {
        let currency = validate_event(template, event)?;

        let fee = if template.has_fee_line {
            let attributes = FeeAttributes::from_event(event, currency);
            Some(
                self.fees
                    .calculate_fee(event.transaction_type, event.amount, &attributes)?,
            )
        } else {
            None
        };
        let fee_amount = fee.as_ref().map_or(0, |f| f.total_fee);

        let lines = build_lines(template, currency, event.amount, fee_amount)?;
        let entry = JournalEntry::pending(
            event.date(),
            event.description(),
            event.transaction_type.entry_source(),
            lines,
        )
        .with_source_event(event.event_id.clone())
        .with_reference_amount(event.amount)
        .with_template(template.id.as_str());

        Ok(EntryDraft {
            entry,
            fee,
            currency,
        })
    }

    async fn draft_and_post(
        &self,
        template: &JournalTemplate,
        event: &ExternalTransactionEvent,
    ) -> Result<(JournalEntry, Currency), TemplateError> {
        let draft = self.draft(template, event)?;
        let audit = PostingAudit {
            trail: &self.audit,
            action: AuditAction::EntryPosted,
            actor: INGEST_ACTOR,
        };
        let posted = self
            .ledger
            .post(draft.entry, draft.fee.as_ref(), Some(audit))
            .await?;
        Ok((posted, draft.currency))
    }

    /// Re-sends the settlement request of an existing entry whose template
    /// requires one and that has no `SettlementRequested` record yet.
    async fn settle_existing(
        &self,
        fallback: &JournalTemplate,
        entry_id: JournalEntryId,
        event: &ExternalTransactionEvent,
    ) -> Result<(), TemplateError> {
        let entry = self.ledger.get_entry(entry_id).await?;
        let template = entry
            .template
            .as_deref()
            .and_then(|id| self.registry.get(&TemplateId::new(id)))
            .unwrap_or(fallback);
        if !template.requires_settlement {
            return Ok(());
        }
        if self
            .audit
            .has_record(&entry_id.to_string(), AuditAction::SettlementRequested)
            .await?
        {
            return Ok(());
        }
        let Some(currency) = entry.currency() else {
            warn!(entry_id = %entry_id, "entry has no lines; settlement not requested");
            return Ok(());
        };
        info!(entry_id = %entry_id, "settlement request missing; sending again");
        self.request_settlement(template, &entry, event, currency).await
    }

    async fn request_settlement(
        &self,
        template: &JournalTemplate,
        posted: &JournalEntry,
        event: &ExternalTransactionEvent,
        currency: Currency,
    ) -> Result<(), TemplateError> {
        let Some(dispatcher) = &self.settlement else {
            warn!(entry_id = %posted.id, "settlement required but no dispatcher configured");
            return Ok(());
        };
        let request = SettlementRequest {
            entry_id: posted.id,
            debit_account: template.debit_account,
            credit_account: template.credit_account,
            amount: event.amount,
            currency,
            idempotency_key: format!("settle:{}", event.event_id),
        };
        let target = posted.id.to_string();
        let snapshot = request.clone();
        match dispatcher.dispatch(request) {
            Ok(()) => {
                self.audit
                    .record(
                        AuditAction::SettlementRequested,
                        INGEST_ACTOR,
                        &target,
                        None::<&SettlementRequest>,
                        Some(&snapshot),
                    )
                    .await?;
            }
            Err(e) => warn!(error = %e, "settlement request not queued"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::event::{KnownField, TransactionType};
    use crate::fees::{FeeWarning, ReturnCodeTable};
    use crate::store::memory::{MemoryAuditStore, MemoryIdempotencyStore, MemoryJournalStore};
    use crate::store::{AuditStore, JournalStore};
    use crate::test_support::{self, day, event, FlakyAuditStore};
    use clearbook_shared::config::{FeeConfig, IdempotencyConfig};
    use tokio::sync::mpsc;

    struct Harness {
        engine: Arc<TemplateEngine>,
        journal: Arc<MemoryJournalStore>,
        audit: AuditTrail,
        ledger: Arc<Ledger>,
    }

    fn harness() -> Harness {
        harness_with(None)
    }

    fn harness_with(settlement: Option<SettlementDispatcher>) -> Harness {
        harness_over(settlement, Arc::new(MemoryAuditStore::new()))
    }

    fn harness_over(
        settlement: Option<SettlementDispatcher>,
        records: Arc<dyn AuditStore>,
    ) -> Harness {
        let chart = Arc::new(test_support::chart());
        let clock = Arc::new(FixedClock::at_date(day(20)));
        let journal = Arc::new(MemoryJournalStore::new(records.clone()));
        let ledger = Arc::new(Ledger::new(chart.clone(), journal.clone()));
        let audit = AuditTrail::new(records, clock.clone());
        let registry = TemplateRegistry::new(test_support::templates(), chart.as_ref()).unwrap();
        let config = FeeConfig::default();
        let fees = FeeCalculator::new(
            test_support::fee_rules(),
            ReturnCodeTable::standard(config.default_return_fee_minor),
            config,
        );
        let idempotency = IdempotencyLedger::new(
            Arc::new(MemoryIdempotencyStore::new()),
            clock,
            IdempotencyConfig::default(),
        );
        let mut engine =
            TemplateEngine::new(registry, fees, Arc::clone(&ledger), idempotency, audit.clone());
        if let Some(dispatcher) = settlement {
            engine = engine.with_settlement(dispatcher);
        }
        Harness {
            engine: Arc::new(engine),
            journal,
            audit,
            ledger,
        }
    }

    #[tokio::test]
    async fn test_card_charge_posts_net_of_fee() {
        let h = harness();
        let outcome = h
            .engine
            .ingest(&event("evt_card", TransactionType::CardCharge, 10_000, 2))
            .await
            .unwrap();
        assert!(!outcome.duplicate);

        let entry = h.ledger.get_entry(outcome.entry_id).await.unwrap();
        assert_eq!(entry.source_event_id.as_deref(), Some("evt_card"));
        assert_eq!(entry.reference_amount, Some(10_000));
        assert_eq!(entry.template.as_deref(), Some("card-charge"));
        assert_eq!(entry.date, day(2));

        let clearing = h.ledger.account_balance(test_support::CLEARING).await.unwrap();
        assert_eq!(clearing.debit_total, 9_680);
        let fees = h.ledger.account_balance(test_support::PROCESSING_FEES).await.unwrap();
        assert_eq!(fees.debit_total, 320);
        let revenue = h.ledger.account_balance(test_support::CARD_REVENUE).await.unwrap();
        assert_eq!(revenue.credit_total, 10_000);

        let stored = h.journal.fee_calculation(outcome.entry_id).await.unwrap().unwrap();
        assert_eq!(stored.total_fee, 320);
        assert_eq!(stored.net_amount, 9_680);

        let audit = h.audit.for_target(&outcome.entry_id.to_string()).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::EntryPosted);
    }

    #[tokio::test]
    async fn test_redelivery_returns_prior_entry() {
        let h = harness();
        let e = event("evt_dup", TransactionType::AchPayment, 150_000, 3);
        let first = h.engine.ingest(&e).await.unwrap();
        let second = h.engine.ingest(&e).await.unwrap();
        let third = h.engine.ingest(&e).await.unwrap();

        assert_eq!(first.entry_id, second.entry_id);
        assert_eq!(first.entry_id, third.entry_id);
        assert!(second.duplicate && third.duplicate);
        assert_eq!(h.journal.count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deliveries_post_once() {
        let h = harness();
        let e = event("evt_race", TransactionType::CardCharge, 4_200, 4);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let engine = Arc::clone(&h.engine);
            let e = e.clone();
            tasks.spawn(async move { engine.ingest(&e).await });
        }
        let mut ids = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            ids.push(joined.unwrap().unwrap().entry_id);
        }

        assert_eq!(ids.len(), 8);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(h.journal.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_releases_key() {
        let h = harness();
        let mut bad = event("evt_ret", TransactionType::AchReturn, 0, 5);
        bad.currency = "XYZ".to_string();

        let err = h.engine.ingest(&bad).await.unwrap_err();
        let TemplateError::Validation(errors) = err else {
            panic!("expected validation errors, got {err:?}");
        };
        assert!(errors.has_field("currency"));
        assert!(errors.has_field("amount"));
        assert!(errors.has_field("return_code"));
        assert_eq!(h.journal.count().await.unwrap(), 0);

        let mut fixed = event("evt_ret", TransactionType::AchReturn, 10_000, 5);
        fixed.metadata.push(KnownField::ReturnCode("R01".to_string()));
        let outcome = h.engine.ingest(&fixed).await.unwrap();
        assert!(!outcome.duplicate);
        let fee = h.journal.fee_calculation(outcome.entry_id).await.unwrap().unwrap();
        assert_eq!(fee.total_fee, 2_500);
    }

    #[tokio::test]
    async fn test_unknown_return_code_uses_default_fee() {
        let h = harness();
        let mut e = event("evt_r99", TransactionType::AchReturn, 10_000, 6);
        e.metadata.push(KnownField::ReturnCode("R99".to_string()));
        let outcome = h.engine.ingest(&e).await.unwrap();

        let fee = h.journal.fee_calculation(outcome.entry_id).await.unwrap().unwrap();
        assert_eq!(fee.total_fee, 1_500);
        assert!(matches!(
            fee.warnings.as_slice(),
            [FeeWarning::UnknownReturnCode { code, default_fee: 1_500 }] if code == "R99"
        ));
        let return_fees = h.ledger.account_balance(test_support::RETURN_FEES).await.unwrap();
        assert_eq!(return_fees.debit_total, 1_500);
    }

    #[tokio::test]
    async fn test_payout_dispatches_settlement() {
        let (dispatcher, mut rx): (_, mpsc::UnboundedReceiver<SettlementRequest>) =
            SettlementDispatcher::channel();
        let h = harness_with(Some(dispatcher));
        let outcome = h
            .engine
            .ingest(&event("evt_po", TransactionType::Payout, 500_000, 7))
            .await
            .unwrap();

        let request = rx.recv().await.unwrap();
        assert_eq!(request.entry_id, outcome.entry_id);
        assert_eq!(request.idempotency_key, "settle:evt_po");
        assert_eq!(request.debit_account, test_support::BANK);
        assert_eq!(request.amount, 500_000);

        let actions: Vec<_> = h
            .audit
            .for_target(&outcome.entry_id.to_string())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.action)
            .collect();
        assert_eq!(actions, vec![AuditAction::EntryPosted, AuditAction::SettlementRequested]);
    }

    async fn actions(h: &Harness, entry_id: JournalEntryId) -> Vec<AuditAction> {
        h.audit
            .for_target(&entry_id.to_string())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.action)
            .collect()
    }

    #[tokio::test]
    async fn test_failed_entry_audit_leaves_event_unjournaled() {
        let (dispatcher, mut rx) = SettlementDispatcher::channel();
        let records = Arc::new(MemoryAuditStore::new());
        let h = harness_over(Some(dispatcher), Arc::new(FlakyAuditStore::new(records, 1)));
        let e = event("evt_po_blip", TransactionType::Payout, 80_000, 10);

        let err = h.engine.ingest(&e).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.journal.count().await.unwrap(), 0);
        assert!(rx.try_recv().is_err());

        let outcome = h.engine.ingest(&e).await.unwrap();
        assert!(!outcome.duplicate);
        assert_eq!(rx.try_recv().unwrap().entry_id, outcome.entry_id);
        assert_eq!(
            actions(&h, outcome.entry_id).await,
            vec![AuditAction::EntryPosted, AuditAction::SettlementRequested]
        );
    }

    #[tokio::test]
    async fn test_redelivery_finishes_unrecorded_settlement() {
        let (dispatcher, mut rx) = SettlementDispatcher::channel();
        let records = Arc::new(MemoryAuditStore::new());
        let h = harness_over(Some(dispatcher), Arc::new(FlakyAuditStore::new(records, 2)));
        let e = event("evt_po_half", TransactionType::Payout, 80_000, 11);

        assert!(h.engine.ingest(&e).await.is_err());
        assert_eq!(h.journal.count().await.unwrap(), 1);
        let first = rx.try_recv().unwrap();

        let outcome = h.engine.ingest(&e).await.unwrap();
        assert!(outcome.duplicate);
        assert_eq!(outcome.entry_id, first.entry_id);
        let resent = rx.try_recv().unwrap();
        assert_eq!(resent.idempotency_key, first.idempotency_key);
        assert_eq!(
            actions(&h, outcome.entry_id).await,
            vec![AuditAction::EntryPosted, AuditAction::SettlementRequested]
        );

        let again = h.engine.ingest(&e).await.unwrap();
        assert!(again.duplicate);
        assert!(rx.try_recv().is_err());
        assert_eq!(actions(&h, outcome.entry_id).await.len(), 2);
        assert_eq!(h.journal.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_preview_does_not_post() {
        let h = harness();
        let draft = h
            .engine
            .preview(
                &TemplateId::new("verification"),
                &event("evt_ver", TransactionType::Verification, 1, 8),
            )
            .unwrap();
        assert_eq!(draft.entry.lines.len(), 2);
        assert_eq!(draft.fee.map(|f| f.total_fee), Some(150));
        assert_eq!(h.journal.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_template_type_must_match_event() {
        let h = harness();
        let err = h
            .engine
            .apply(
                &TemplateId::new("payout"),
                &event("evt_x", TransactionType::CardCharge, 100, 9),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::NotApplicable { .. }));

        let err = h
            .engine
            .apply(&TemplateId::new("wire"), &event("evt_y", TransactionType::CardCharge, 100, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::UnknownTemplate(_)));
    }
}
