//! Postgres [`JournalStore`].

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use clearbook_core::audit::AuditRecord;
use clearbook_core::fees::FeeCalculation;
use clearbook_core::ledger::{
    BalanceTotals, DateRange, Direction, EntrySource, EntryStatus, JournalEntry, JournalLine,
};
use clearbook_core::store::{JournalStore, StoreError};
use clearbook_shared::types::{AccountId, Currency, FeeRuleId, JournalEntryId};
use sea_orm::sea_query::Query;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbBackend, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, Statement,
    TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

use super::audit::insert_records;
use crate::entities::{account_balances, fee_calculations, journal_entries, journal_lines};
use crate::error::{corrupt, db_error, is_out_of_range, is_unique_violation, json_error};

const ADD_TO_BALANCE_SQL: &str = r"
INSERT INTO account_balances (account_id, debits, credits, updated_at)
VALUES ($1, $2, $3, NOW())
ON CONFLICT (account_id) DO UPDATE
SET debits = account_balances.debits + EXCLUDED.debits,
    credits = account_balances.credits + EXCLUDED.credits,
    updated_at = NOW()
";

/// Why an append transaction was rolled back.
enum AppendFailure {
    Db(DbErr),
    Overflow(AccountId),
}

impl From<DbErr> for AppendFailure {
    fn from(err: DbErr) -> Self {
        Self::Db(err)
    }
}

/// Journal entries, lines, fee calculations and running balances in Postgres.
#[derive(Debug, Clone)]
pub struct PgJournalStore {
    db: DatabaseConnection,
}

impl PgJournalStore {
    /// Creates a store over a connection pool.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Inserts the entry, its lines, the fee calculation, the audit records
    /// and the balance deltas inside `txn`.
    async fn insert_entry(
        txn: &DatabaseTransaction,
        entry: &JournalEntry,
        fee: Option<fee_calculations::ActiveModel>,
        audit: &[AuditRecord],
    ) -> Result<i64, AppendFailure> {
        let header = journal_entries::ActiveModel {
            id: Set(entry.id.into_inner()),
            entry_date: Set(entry.date),
            description: Set(entry.description.clone()),
            source: Set(entry.source.as_str().to_string()),
            source_event_id: Set(entry.source_event_id.clone()),
            reverses: Set(entry.reverses.map(JournalEntryId::into_inner)),
            reference_amount: Set(entry.reference_amount),
            template: Set(entry.template.clone()),
            created_at: Set(entry.created_at.into()),
            ..Default::default()
        };
        let inserted = header.insert(txn).await?;

        let lines = entry
            .lines
            .iter()
            .zip(0_i32..)
            .map(|(line, line_no)| journal_lines::ActiveModel {
                entry_id: Set(inserted.id),
                line_no: Set(line_no),
                account_id: Set(line.account_id.get()),
                direction: Set(line.direction.as_str().to_string()),
                amount: Set(line.amount),
                currency: Set(line.currency.code().to_string()),
                memo: Set(line.memo.clone()),
            });
        journal_lines::Entity::insert_many(lines).exec(txn).await?;

        if let Some(fee) = fee {
            fee.insert(txn).await?;
        }

        // Ascending account order keeps concurrent appends from deadlocking.
        let mut deltas: BTreeMap<AccountId, BalanceTotals> = BTreeMap::new();
        for line in &entry.lines {
            let delta = deltas.entry(line.account_id).or_default();
            *delta = delta
                .checked_apply(line.direction, line.amount)
                .ok_or(AppendFailure::Overflow(line.account_id))?;
        }
        for (account_id, totals) in deltas {
            txn.execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                ADD_TO_BALANCE_SQL,
                [account_id.get().into(), totals.debits.into(), totals.credits.into()],
            ))
            .await
            .map_err(|err| {
                if is_out_of_range(&err) {
                    AppendFailure::Overflow(account_id)
                } else {
                    AppendFailure::Db(err)
                }
            })?;
        }

        insert_records(txn, audit).await?;
        Ok(inserted.sequence)
    }

    /// Explains a unique violation on append.
    async fn conflict(&self, entry: &JournalEntry) -> Result<StoreError, StoreError> {
        if let Some(event_id) = &entry.source_event_id {
            if let Some(existing) = self.find_by_source_event(event_id).await? {
                return Ok(StoreError::DuplicateSourceEvent {
                    event_id: event_id.clone(),
                    existing: existing.id,
                });
            }
        }
        if let Some(original) = entry.reverses {
            if let Some(existing) = self.reversal_of(original).await? {
                return Ok(StoreError::AlreadyReversed { original, existing });
            }
        }
        Ok(StoreError::Database(format!(
            "unique violation appending entry {}",
            entry.id
        )))
    }

    /// Attaches lines to entry headers, keeping header order.
    async fn with_lines(
        &self,
        headers: Vec<journal_entries::Model>,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        if headers.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = headers.iter().map(|h| h.id).collect();
        let rows = journal_lines::Entity::find()
            .filter(journal_lines::Column::EntryId.is_in(ids))
            .order_by_asc(journal_lines::Column::EntryId)
            .order_by_asc(journal_lines::Column::LineNo)
            .all(&self.db)
            .await
            .map_err(db_error)?;

        let mut lines: HashMap<Uuid, Vec<JournalLine>> = HashMap::new();
        for row in rows {
            lines.entry(row.entry_id).or_default().push(line_from_row(row)?);
        }

        headers
            .into_iter()
            .map(|header| {
                let entry_lines = lines.remove(&header.id).unwrap_or_default();
                entry_from_row(header, entry_lines)
            })
            .collect()
    }
}

fn fee_row(
    entry_id: JournalEntryId,
    fee: &FeeCalculation,
) -> Result<fee_calculations::ActiveModel, StoreError> {
    let detail = serde_json::to_value(fee).map_err(|e| json_error(&e))?;
    let rule_version = fee
        .rule_version
        .map(i32::try_from)
        .transpose()
        .map_err(|_| corrupt("rule version", format!("{:?}", fee.rule_version)))?;
    Ok(fee_calculations::ActiveModel {
        entry_id: Set(entry_id.into_inner()),
        rule_id: Set(fee.rule_id.map(FeeRuleId::into_inner)),
        rule_version: Set(rule_version),
        return_code: Set(fee.return_code.clone()),
        total_fee: Set(fee.total_fee),
        net_amount: Set(fee.net_amount),
        detail: Set(detail),
    })
}

fn line_from_row(row: journal_lines::Model) -> Result<JournalLine, StoreError> {
    let direction =
        Direction::parse(&row.direction).ok_or_else(|| corrupt("direction", &row.direction))?;
    let currency: Currency = row
        .currency
        .parse()
        .map_err(|_| corrupt("currency", &row.currency))?;
    Ok(JournalLine {
        account_id: AccountId(row.account_id),
        direction,
        amount: row.amount,
        currency,
        memo: row.memo,
    })
}

fn entry_from_row(
    row: journal_entries::Model,
    lines: Vec<JournalLine>,
) -> Result<JournalEntry, StoreError> {
    let source = EntrySource::parse(&row.source).ok_or_else(|| corrupt("entry source", &row.source))?;
    let sequence =
        u64::try_from(row.sequence).map_err(|_| corrupt("entry sequence", row.sequence))?;
    Ok(JournalEntry {
        id: JournalEntryId::from_uuid(row.id),
        date: row.entry_date,
        description: row.description,
        lines,
        source,
        status: EntryStatus::Posted,
        source_event_id: row.source_event_id,
        reverses: row.reverses.map(JournalEntryId::from_uuid),
        reference_amount: row.reference_amount,
        template: row.template,
        sequence: Some(sequence),
        created_at: row.created_at.with_timezone(&Utc),
    })
}

#[async_trait]
impl JournalStore for PgJournalStore {
    async fn append(
        &self,
        entry: &JournalEntry,
        fee: Option<&FeeCalculation>,
        audit: &[AuditRecord],
    ) -> Result<u64, StoreError> {
        let fee = fee.map(|f| fee_row(entry.id, f)).transpose()?;

        let txn = self.db.begin().await.map_err(db_error)?;
        match Self::insert_entry(&txn, entry, fee, audit).await {
            Ok(sequence) => {
                txn.commit().await.map_err(db_error)?;
                debug!(entry_id = %entry.id, sequence, records = audit.len(), "journal entry stored");
                u64::try_from(sequence).map_err(|_| corrupt("entry sequence", sequence))
            }
            Err(failure) => {
                txn.rollback().await.map_err(db_error)?;
                match failure {
                    AppendFailure::Overflow(account_id) => Err(StoreError::BalanceOverflow(account_id)),
                    AppendFailure::Db(err) if is_unique_violation(&err) => {
                        Err(self.conflict(entry).await?)
                    }
                    AppendFailure::Db(err) => Err(db_error(err)),
                }
            }
        }
    }

    async fn get(&self, id: JournalEntryId) -> Result<Option<JournalEntry>, StoreError> {
        let header = journal_entries::Entity::find_by_id(id.into_inner())
            .one(&self.db)
            .await
            .map_err(db_error)?;
        Ok(self
            .with_lines(header.into_iter().collect())
            .await?
            .pop())
    }

    async fn find_by_source_event(&self, event_id: &str) -> Result<Option<JournalEntry>, StoreError> {
        let header = journal_entries::Entity::find()
            .filter(journal_entries::Column::SourceEventId.eq(event_id))
            .one(&self.db)
            .await
            .map_err(db_error)?;
        Ok(self
            .with_lines(header.into_iter().collect())
            .await?
            .pop())
    }

    async fn reversal_of(&self, id: JournalEntryId) -> Result<Option<JournalEntryId>, StoreError> {
        let reversal = journal_entries::Entity::find()
            .filter(journal_entries::Column::Reverses.eq(id.into_inner()))
            .one(&self.db)
            .await
            .map_err(db_error)?;
        Ok(reversal.map(|r| JournalEntryId::from_uuid(r.id)))
    }

    async fn entries_between(&self, range: DateRange) -> Result<Vec<JournalEntry>, StoreError> {
        let headers = journal_entries::Entity::find()
            .filter(journal_entries::Column::EntryDate.between(range.start, range.end))
            .order_by_asc(journal_entries::Column::EntryDate)
            .order_by_asc(journal_entries::Column::Sequence)
            .all(&self.db)
            .await
            .map_err(db_error)?;
        self.with_lines(headers).await
    }

    async fn entries_for_account(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        let touching = Query::select()
            .column(journal_lines::Column::EntryId)
            .from(journal_lines::Entity)
            .and_where(journal_lines::Column::AccountId.eq(account_id.get()))
            .to_owned();
        let headers = journal_entries::Entity::find()
            .filter(journal_entries::Column::EntryDate.between(range.start, range.end))
            .filter(journal_entries::Column::Id.in_subquery(touching))
            .order_by_asc(journal_entries::Column::EntryDate)
            .order_by_asc(journal_entries::Column::Sequence)
            .all(&self.db)
            .await
            .map_err(db_error)?;
        self.with_lines(headers).await
    }

    async fn balance(&self, account_id: AccountId) -> Result<BalanceTotals, StoreError> {
        let row = account_balances::Entity::find_by_id(account_id.get())
            .one(&self.db)
            .await
            .map_err(db_error)?;
        Ok(row.map_or_else(BalanceTotals::default, |r| BalanceTotals {
            debits: r.debits,
            credits: r.credits,
        }))
    }

    async fn fee_calculation(
        &self,
        entry_id: JournalEntryId,
    ) -> Result<Option<FeeCalculation>, StoreError> {
        let row = fee_calculations::Entity::find_by_id(entry_id.into_inner())
            .one(&self.db)
            .await
            .map_err(db_error)?;
        row.map(|r| serde_json::from_value(r.detail).map_err(|e| json_error(&e)))
            .transpose()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        journal_entries::Entity::find()
            .count(&self.db)
            .await
            .map_err(db_error)
    }
}
