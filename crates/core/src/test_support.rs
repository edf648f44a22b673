//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use clearbook_shared::types::{AccountId, Currency, FeeRuleId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::audit::AuditRecord;
use crate::store::memory::MemoryAuditStore;
use crate::store::{AuditStore, StoreError};
use crate::event::{EventMetadata, ExternalTransactionEvent, TransactionType};
use crate::fees::{FeeRule, FeeRuleSet};
use crate::ledger::{Account, AccountCategory, ChartOfAccounts};
use crate::template::{JournalTemplate, TemplateId, TemplateKind};

pub const CLEARING: AccountId = AccountId(1010);
pub const BANK: AccountId = AccountId(1020);
pub const ACH_RECEIVABLE: AccountId = AccountId(1100);
pub const SUSPENSE: AccountId = AccountId(1900);
pub const CARD_REVENUE: AccountId = AccountId(4010);
pub const ACH_REVENUE: AccountId = AccountId(4020);
pub const PROCESSING_FEES: AccountId = AccountId(5010);
pub const RETURN_FEES: AccountId = AccountId(5020);

/// A date in March 2026.
pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

pub fn chart() -> ChartOfAccounts {
    let account = |id: AccountId, name: &str, category| Account {
        id,
        name: name.to_string(),
        category,
        legal_entity: "acme-us".to_string(),
        currency: Currency::Usd,
    };
    ChartOfAccounts::new(vec![
        account(CLEARING, "Processor Clearing", AccountCategory::Asset),
        account(BANK, "Operating Bank", AccountCategory::Asset),
        account(ACH_RECEIVABLE, "ACH Receivable", AccountCategory::Asset),
        account(SUSPENSE, "Reconciliation Suspense", AccountCategory::Asset),
        account(CARD_REVENUE, "Card Revenue", AccountCategory::Income),
        account(ACH_REVENUE, "ACH Revenue", AccountCategory::Income),
        account(PROCESSING_FEES, "Processing Fees", AccountCategory::Expense),
        account(RETURN_FEES, "Return Fees", AccountCategory::Expense),
    ])
    .unwrap()
}

pub fn fee_rule(
    transaction_type: TransactionType,
    base_fee: i64,
    percentage: Decimal,
    cap: Option<i64>,
) -> FeeRule {
    FeeRule {
        id: FeeRuleId::new(),
        name: format!("{transaction_type}-standard"),
        transaction_type,
        version: 1,
        base_fee,
        percentage,
        cap,
        discount_tiers: vec![],
        risk_surcharge: 0,
        effective_from: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        effective_to: None,
        active: true,
    }
}

/// Card 30 + 2.9%, ACH 80 capped at 500, verification 150.
pub fn fee_rules() -> FeeRuleSet {
    FeeRuleSet::from_rules([
        fee_rule(TransactionType::CardCharge, 30, dec!(0.029), None),
        fee_rule(TransactionType::AchPayment, 80, Decimal::ZERO, Some(500)),
        fee_rule(TransactionType::Payout, 25, Decimal::ZERO, None),
        fee_rule(TransactionType::Verification, 150, Decimal::ZERO, None),
    ])
    .unwrap()
}

pub fn template(
    name: &str,
    kind: TemplateKind,
    debit: AccountId,
    credit: AccountId,
    fee: Option<AccountId>,
) -> JournalTemplate {
    JournalTemplate {
        id: TemplateId::new(name),
        kind,
        debit_account: debit,
        credit_account: credit,
        fee_account: fee,
        required_fields: vec![],
        field_rules: vec![],
        has_fee_line: fee.is_some(),
        requires_settlement: false,
        priority: 0,
    }
}

pub fn templates() -> Vec<JournalTemplate> {
    let mut payout = template("payout", TemplateKind::Payout, BANK, CLEARING, None);
    payout.requires_settlement = true;
    vec![
        template(
            "card-charge",
            TemplateKind::CardCharge,
            CLEARING,
            CARD_REVENUE,
            Some(PROCESSING_FEES),
        ),
        template(
            "ach-payment",
            TemplateKind::AchPayment,
            ACH_RECEIVABLE,
            ACH_REVENUE,
            Some(PROCESSING_FEES),
        ),
        template(
            "ach-return",
            TemplateKind::AchReturn,
            ACH_REVENUE,
            ACH_RECEIVABLE,
            Some(RETURN_FEES),
        ),
        payout,
        template("refund", TemplateKind::Refund, CARD_REVENUE, CLEARING, None),
        template(
            "verification",
            TemplateKind::Verification,
            PROCESSING_FEES,
            CLEARING,
            Some(PROCESSING_FEES),
        ),
    ]
}

/// A USD event occurring at midday of `day(d)`.
pub fn event(
    event_id: &str,
    transaction_type: TransactionType,
    amount: i64,
    d: u32,
) -> ExternalTransactionEvent {
    let occurred_at = Utc.from_utc_datetime(&day(d).and_hms_opt(12, 0, 0).unwrap());
    ExternalTransactionEvent {
        event_id: event_id.to_string(),
        transaction_type,
        amount,
        currency: "USD".to_string(),
        customer_ref: "cus_test".to_string(),
        payment_method_ref: None,
        occurred_at,
        received_at: occurred_at,
        metadata: EventMetadata::default(),
    }
}

/// Audit sink whose `fail_on`-th non-empty write (1-based) fails once with
/// `Unavailable`. Every other write lands in `inner`.
pub struct FlakyAuditStore {
    inner: Arc<MemoryAuditStore>,
    fail_on: usize,
    writes: AtomicUsize,
}

impl FlakyAuditStore {
    pub fn new(inner: Arc<MemoryAuditStore>, fail_on: usize) -> Self {
        Self {
            inner,
            fail_on,
            writes: AtomicUsize::new(0),
        }
    }

    fn attempt(&self) -> Result<(), StoreError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            Err(StoreError::Unavailable("blip".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AuditStore for FlakyAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        self.attempt()?;
        self.inner.append(record).await
    }

    async fn append_all(&self, records: &[AuditRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        self.attempt()?;
        self.inner.append_all(records).await
    }

    async fn for_target(&self, target_id: &str) -> Result<Vec<AuditRecord>, StoreError> {
        self.inner.for_target(target_id).await
    }
}
