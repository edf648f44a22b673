//! The engine facade wired from a book, stores and a feed.

use std::sync::Arc;

use chrono::NaiveDate;
use clearbook_shared::config::{AppConfig, FeeConfig, IdempotencyConfig, ReconciliationConfig};
use clearbook_shared::types::{AccountId, ExceptionId, JournalEntryId};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::audit::{AuditAction, AuditRecord, AuditTrail};
use crate::clock::{Clock, SystemClock};
use crate::config::Book;
use crate::error::EngineError;
use crate::event::{ExternalTransactionEvent, TransactionFeed};
use crate::exceptions::{
    ExceptionFilter, ExceptionManager, ReconciliationException, ResolutionAction, Severity,
};
use crate::fees::FeeCalculator;
use crate::idempotency::IdempotencyLedger;
use crate::ledger::{AccountActivity, AccountBalance, DateRange, JournalEntry, Ledger, PostingAudit};
use crate::reconciliation::{DescriptionSimilarity, ReconcileSummary, Reconciler};
use crate::settlement::SettlementDispatcher;
use crate::store::memory::{
    MemoryAuditStore, MemoryIdempotencyStore, MemoryJournalStore, MemoryReconciliationStore,
};
use crate::store::{AuditStore, IdempotencyStore, JournalStore, ReconciliationStore};
use crate::template::{EntryDraft, IngestOutcome, TemplateEngine, TemplateId};

/// Persistence backing an engine.
#[derive(Clone)]
pub struct Stores {
    /// Journal entries, fee calculations and balances.
    pub journal: Arc<dyn JournalStore>,
    /// Idempotency reservations.
    pub idempotency: Arc<dyn IdempotencyStore>,
    /// Audit records.
    pub audit: Arc<dyn AuditStore>,
    /// Matches and exceptions.
    pub reconciliation: Arc<dyn ReconciliationStore>,
}

impl Stores {
    /// Stores held in process memory, sharing one audit store.
    #[must_use]
    pub fn in_memory() -> Self {
        let audit: Arc<dyn AuditStore> = Arc::new(MemoryAuditStore::new());
        Self {
            journal: Arc::new(MemoryJournalStore::new(Arc::clone(&audit))),
            idempotency: Arc::new(MemoryIdempotencyStore::new()),
            reconciliation: Arc::new(MemoryReconciliationStore::new(Arc::clone(&audit))),
            audit,
        }
    }
}

/// Runtime tuning of an engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Matcher settings.
    pub reconciliation: ReconciliationConfig,
    /// Fee engine settings.
    pub fees: FeeConfig,
    /// Reservation lease and wait settings.
    pub idempotency: IdempotencyConfig,
}

impl From<&AppConfig> for EngineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            reconciliation: config.reconciliation.clone(),
            fees: config.fees.clone(),
            idempotency: config.idempotency.clone(),
        }
    }
}

/// Assembles a [`Clearbook`].
pub struct ClearbookBuilder {
    book: Book,
    feed: Arc<dyn TransactionFeed>,
    stores: Stores,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    settlement: Option<SettlementDispatcher>,
    similarity: Option<Arc<dyn DescriptionSimilarity>>,
}

impl ClearbookBuilder {
    /// Uses the given stores instead of in-memory ones.
    #[must_use]
    pub fn stores(mut self, stores: Stores) -> Self {
        self.stores = stores;
        self
    }

    /// Uses the given clock instead of the wall clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Uses the given settings.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sends settlement requests through the dispatcher.
    #[must_use]
    pub fn settlement(mut self, dispatcher: SettlementDispatcher) -> Self {
        self.settlement = Some(dispatcher);
        self
    }

    /// Replaces the description similarity used for fuzzy matching.
    #[must_use]
    pub fn similarity(mut self, similarity: Arc<dyn DescriptionSimilarity>) -> Self {
        self.similarity = Some(similarity);
        self
    }

    /// Wires the components.
    #[must_use]
    pub fn build(self) -> Clearbook {
        let Self {
            book,
            feed,
            stores,
            clock,
            config,
            settlement,
            similarity,
        } = self;

        let audit = AuditTrail::new(stores.audit, Arc::clone(&clock));
        let ledger = Arc::new(Ledger::new(Arc::new(book.chart), Arc::clone(&stores.journal)));
        let fees = FeeCalculator::new(book.fee_rules, book.return_codes, config.fees);
        let idempotency =
            IdempotencyLedger::new(stores.idempotency, Arc::clone(&clock), config.idempotency);
        let mut templates = TemplateEngine::new(
            book.templates,
            fees,
            Arc::clone(&ledger),
            idempotency,
            audit.clone(),
        );
        if let Some(dispatcher) = settlement {
            templates = templates.with_settlement(dispatcher);
        }
        let templates = Arc::new(templates);

        let mut reconciler = Reconciler::new(
            stores.journal,
            Arc::clone(&feed),
            Arc::clone(&stores.reconciliation),
            audit.clone(),
            Arc::clone(&clock),
            config.reconciliation,
        );
        if let Some(similarity) = similarity {
            reconciler = reconciler.with_similarity(similarity);
        }
        let reconciler = Arc::new(reconciler);

        let exceptions = ExceptionManager::new(
            stores.reconciliation,
            feed,
            Arc::clone(&ledger),
            Arc::clone(&templates),
            Arc::clone(&reconciler),
            audit.clone(),
            Arc::clone(&clock),
        );

        Clearbook {
            ledger,
            templates,
            reconciler,
            exceptions,
            audit,
            clock,
        }
    }
}

/// Journal generation and reconciliation for one book.
pub struct Clearbook {
    ledger: Arc<Ledger>,
    templates: Arc<TemplateEngine>,
    reconciler: Arc<Reconciler>,
    exceptions: ExceptionManager,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
}

impl Clearbook {
    /// Starts assembling an engine over in-memory stores and the wall clock.
    #[must_use]
    pub fn builder(book: Book, feed: Arc<dyn TransactionFeed>) -> ClearbookBuilder {
        ClearbookBuilder {
            book,
            feed,
            stores: Stores::in_memory(),
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
            settlement: None,
            similarity: None,
        }
    }

    /// Journals an event and returns its entry; redeliveries return the
    /// original entry.
    pub async fn ingest(&self, event: &ExternalTransactionEvent) -> Result<JournalEntryId, EngineError> {
        Ok(self.ingest_outcome(event).await?.entry_id)
    }

    /// Journals an event, reporting whether it was a redelivery.
    pub async fn ingest_outcome(
        &self,
        event: &ExternalTransactionEvent,
    ) -> Result<IngestOutcome, EngineError> {
        Ok(self.templates.ingest(event).await?)
    }

    /// Journals an event with a named template.
    pub async fn apply_template(
        &self,
        template_id: &TemplateId,
        event: &ExternalTransactionEvent,
    ) -> Result<IngestOutcome, EngineError> {
        Ok(self.templates.apply(template_id, event).await?)
    }

    /// Builds the entry a template would post for the event.
    pub fn preview(
        &self,
        template_id: &TemplateId,
        event: &ExternalTransactionEvent,
    ) -> Result<EntryDraft, EngineError> {
        Ok(self.templates.preview(template_id, event)?)
    }

    /// Reconciles `[start, end]`.
    pub async fn reconcile(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ReconcileSummary, EngineError> {
        Ok(self.reconciler.reconcile(start, end).await?)
    }

    /// Reconciles `[start, end]`, stopping between chunks once cancelled.
    pub async fn reconcile_with_cancel(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, EngineError> {
        Ok(self.reconciler.reconcile_with_cancel(start, end, cancel).await?)
    }

    /// Reconciles the configured trailing window ending today.
    pub async fn reconcile_trailing(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, EngineError> {
        let end = self.clock.today();
        let start = DateRange::day(end)
            .expand(self.reconciler.config().trailing_window_days)
            .start;
        self.reconcile_with_cancel(start, end, cancel).await
    }

    /// Open exceptions, optionally of one severity, highest severity first.
    pub async fn list_exceptions(
        &self,
        severity: Option<Severity>,
    ) -> Result<Vec<ReconciliationException>, EngineError> {
        let filter = ExceptionFilter {
            severity,
            status: None,
            open_only: true,
        };
        self.exceptions_matching(&filter).await
    }

    /// Exceptions passing an arbitrary filter.
    pub async fn exceptions_matching(
        &self,
        filter: &ExceptionFilter,
    ) -> Result<Vec<ReconciliationException>, EngineError> {
        Ok(self.exceptions.list(filter).await?)
    }

    /// Fetches an exception.
    pub async fn get_exception(&self, id: ExceptionId) -> Result<ReconciliationException, EngineError> {
        Ok(self.exceptions.get(id).await?)
    }

    /// Moves an exception to UnderReview.
    pub async fn begin_review(
        &self,
        id: ExceptionId,
        actor: &str,
    ) -> Result<ReconciliationException, EngineError> {
        Ok(self.exceptions.begin_review(id, actor).await?)
    }

    /// Returns an exception under review to Open.
    pub async fn reopen_exception(
        &self,
        id: ExceptionId,
        actor: &str,
    ) -> Result<ReconciliationException, EngineError> {
        Ok(self.exceptions.reopen(id, actor).await?)
    }

    /// Applies a resolution action.
    pub async fn resolve_exception(
        &self,
        id: ExceptionId,
        action: ResolutionAction,
        actor: &str,
        note: &str,
    ) -> Result<ReconciliationException, EngineError> {
        Ok(self.exceptions.resolve(id, action, actor, note).await?)
    }

    /// Derived balance of an account.
    pub async fn account_balance(&self, account_id: AccountId) -> Result<AccountBalance, EngineError> {
        Ok(self.ledger.account_balance(account_id).await?)
    }

    /// Posted lines of an account in a date range.
    pub async fn account_activity(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<AccountActivity, EngineError> {
        Ok(self.ledger.account_activity(account_id, range).await?)
    }

    /// Fetches a posted entry.
    pub async fn get_entry(&self, id: JournalEntryId) -> Result<JournalEntry, EngineError> {
        Ok(self.ledger.get_entry(id).await?)
    }

    /// Posts the reversal of an entry, dated today.
    #[instrument(skip(self, reason), fields(entry_id = %id))]
    pub async fn reverse_entry(
        &self,
        id: JournalEntryId,
        reason: &str,
        actor: &str,
    ) -> Result<JournalEntry, EngineError> {
        let audit = PostingAudit {
            trail: &self.audit,
            action: AuditAction::EntryReversed,
            actor,
        };
        let reversal = self
            .ledger
            .reverse_entry(id, reason, self.clock.today(), Some(audit))
            .await?;
        info!(reversal_id = %reversal.id, actor, "entry reversal recorded");
        Ok(reversal)
    }

    /// Audit records naming a target id, oldest first.
    pub async fn audit_trail(&self, target_id: &str) -> Result<Vec<AuditRecord>, EngineError> {
        Ok(self.audit.for_target(target_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::event::{MemoryFeed, TransactionType};
    use crate::exceptions::{ExceptionStatus, ExceptionType};
    use crate::ledger::ChartOfAccounts;
    use crate::reconciliation::MatchConfidence;
    use crate::template::TemplateRegistry;
    use crate::test_support::{self, day, event, CARD_REVENUE, CLEARING, PROCESSING_FEES};
    use crate::fees::ReturnCodeTable;
    use tokio::task::JoinSet;

    struct Harness {
        engine: Arc<Clearbook>,
        feed: Arc<MemoryFeed>,
        stores: Stores,
    }

    fn book() -> Book {
        let chart: ChartOfAccounts = test_support::chart();
        let templates = TemplateRegistry::new(test_support::templates(), &chart).unwrap();
        Book {
            chart,
            fee_rules: test_support::fee_rules(),
            return_codes: ReturnCodeTable::standard(1500),
            templates,
        }
    }

    fn harness_with(config: EngineConfig) -> Harness {
        let feed = Arc::new(MemoryFeed::new());
        let stores = Stores::in_memory();
        let engine = Clearbook::builder(book(), feed.clone())
            .stores(stores.clone())
            .clock(Arc::new(FixedClock::at_date(day(10))))
            .config(config)
            .build();
        Harness {
            engine: Arc::new(engine),
            feed,
            stores,
        }
    }

    fn harness() -> Harness {
        harness_with(EngineConfig::default())
    }

    #[tokio::test]
    async fn test_ingest_posts_and_updates_balances() {
        let h = harness();
        let id = h
            .engine
            .ingest(&event("evt_1", TransactionType::CardCharge, 10_000, 2))
            .await
            .unwrap();

        let entry = h.engine.get_entry(id).await.unwrap();
        assert_eq!(entry.source_event_id.as_deref(), Some("evt_1"));
        assert_eq!(h.engine.account_balance(CLEARING).await.unwrap().balance, 9_680);
        assert_eq!(h.engine.account_balance(PROCESSING_FEES).await.unwrap().balance, 320);
        assert_eq!(h.engine.account_balance(CARD_REVENUE).await.unwrap().balance, 10_000);
    }

    #[tokio::test]
    async fn test_redelivery_returns_same_entry() {
        let h = harness();
        let delivery = event("evt_dup", TransactionType::CardCharge, 2_500, 2);
        let first = h.engine.ingest(&delivery).await.unwrap();
        for _ in 0..3 {
            let again = h.engine.ingest_outcome(&delivery).await.unwrap();
            assert_eq!(again.entry_id, first);
            assert!(again.duplicate);
        }
        assert_eq!(h.stores.journal.count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deliveries_post_once() {
        let h = harness();
        let delivery = event("evt_race", TransactionType::AchPayment, 150_000, 2);
        let mut set = JoinSet::new();
        for _ in 0..8 {
            let engine = Arc::clone(&h.engine);
            let delivery = delivery.clone();
            set.spawn(async move { engine.ingest(&delivery).await.unwrap() });
        }
        let ids: Vec<_> = set.join_all().await;
        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(h.stores.journal.count().await.unwrap(), 1);
    }

    async fn boundary(epsilon: i64) -> Option<MatchConfidence> {
        let h = harness_with(EngineConfig {
            reconciliation: ReconciliationConfig {
                amount_epsilon_minor: epsilon,
                link_by_reference: false,
                ..ReconciliationConfig::default()
            },
            ..EngineConfig::default()
        });
        let entry_id = h
            .engine
            .ingest(&event("evt_ledger", TransactionType::CardCharge, 10_000, 1))
            .await
            .unwrap();
        h.feed.push(event("evt_feed", TransactionType::CardCharge, 10_001, 3));
        h.engine.reconcile(day(1), day(7)).await.unwrap();
        h.stores
            .reconciliation
            .match_for_entry(entry_id)
            .await
            .unwrap()
            .map(|m| m.confidence)
    }

    #[tokio::test]
    async fn test_epsilon_boundary_is_inclusive() {
        assert_eq!(boundary(1).await, Some(MatchConfidence::Exact));
        assert_eq!(boundary(0).await, Some(MatchConfidence::Fuzzy));
    }

    #[tokio::test]
    async fn test_tie_defers_to_operator() {
        let h = harness_with(EngineConfig {
            reconciliation: ReconciliationConfig {
                link_by_reference: false,
                ..ReconciliationConfig::default()
            },
            ..EngineConfig::default()
        });
        let first = h
            .engine
            .ingest(&event("evt_a", TransactionType::Refund, 4_000, 3))
            .await
            .unwrap();
        let second = h
            .engine
            .ingest(&event("evt_b", TransactionType::Refund, 4_000, 4))
            .await
            .unwrap();
        h.feed.push(event("evt_tie", TransactionType::Refund, 4_000, 3));

        let summary = h.engine.reconcile(day(1), day(7)).await.unwrap();
        assert_eq!(summary.matched, 0);
        let ambiguous: Vec<_> = summary
            .exceptions
            .iter()
            .filter(|e| e.exception_type == ExceptionType::AmbiguousMatch)
            .collect();
        assert_eq!(ambiguous.len(), 1);
        let recon = &h.stores.reconciliation;
        assert!(recon.match_for_entry(first).await.unwrap().is_none());
        assert!(recon.match_for_entry(second).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_entry_resolution_is_audited() {
        let h = harness();
        h.feed.push(event("evt_missed", TransactionType::CardCharge, 10_000, 4));
        h.engine.reconcile(day(1), day(7)).await.unwrap();
        let open = h.engine.list_exceptions(None).await.unwrap();
        assert_eq!(open.len(), 1);
        let exception = &open[0];
        assert_eq!(exception.exception_type, ExceptionType::MissingEntry);

        let entries = h.stores.journal.count().await.unwrap();
        let matches = h.stores.reconciliation.count_matches().await.unwrap();
        let resolved = h
            .engine
            .resolve_exception(
                exception.id,
                ResolutionAction::CreateEntry { template: None },
                "ops@acme",
                "webhook never arrived",
            )
            .await
            .unwrap();

        assert_eq!(resolved.status, ExceptionStatus::Resolved);
        assert_eq!(h.stores.journal.count().await.unwrap(), entries + 1);
        assert_eq!(h.stores.reconciliation.count_matches().await.unwrap(), matches + 1);
        let trail = h.engine.audit_trail(&exception.id.to_string()).await.unwrap();
        assert!(!trail.is_empty());
        assert!(h.engine.list_exceptions(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let h = harness();
        h.engine
            .ingest(&event("evt_m", TransactionType::CardCharge, 10_000, 2))
            .await
            .unwrap();
        h.engine
            .ingest(&event("evt_orphan", TransactionType::Payout, 50_000, 3))
            .await
            .unwrap();
        h.feed.push(event("evt_m", TransactionType::CardCharge, 10_000, 2));
        h.feed.push(event("evt_stray", TransactionType::Refund, 1_200, 5));

        let first = h.engine.reconcile(day(1), day(14)).await.unwrap();
        assert_eq!(first.matched, 1);
        let matches = h.stores.reconciliation.count_matches().await.unwrap();
        let exceptions = h.stores.reconciliation.count_exceptions().await.unwrap();

        let second = h.engine.reconcile(day(1), day(14)).await.unwrap();
        assert_eq!(second.matched, 0);
        assert_eq!(second.new_exceptions, 0);
        assert_eq!(h.stores.reconciliation.count_matches().await.unwrap(), matches);
        assert_eq!(h.stores.reconciliation.count_exceptions().await.unwrap(), exceptions);
    }

    #[tokio::test]
    async fn test_reverse_entry_is_audited_and_offsets_balances() {
        let h = harness();
        let id = h
            .engine
            .ingest(&event("evt_r", TransactionType::Refund, 700, 2))
            .await
            .unwrap();
        let reversal = h.engine.reverse_entry(id, "refund voided", "ops@acme").await.unwrap();
        assert_eq!(reversal.reverses, Some(id));
        assert_eq!(reversal.date, day(10));
        assert_eq!(h.engine.account_balance(CLEARING).await.unwrap().balance, 0);

        let trail = h.engine.audit_trail(&id.to_string()).await.unwrap();
        assert_eq!(trail.last().unwrap().action, AuditAction::EntryReversed);
        assert!(h.engine.reverse_entry(id, "again", "ops@acme").await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_trailing_run_keeps_nothing_partial() {
        let h = harness();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = h.engine.reconcile_trailing(&cancel).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.chunks_completed, 0);
    }
}
