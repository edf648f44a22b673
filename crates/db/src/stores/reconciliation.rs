//! Postgres [`ReconciliationStore`].

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use clearbook_core::audit::AuditRecord;
use clearbook_core::exceptions::{
    ExceptionFilter, ExceptionStatus, ExceptionTarget, ExceptionType, ReconciliationException,
    Severity,
};
use clearbook_core::reconciliation::{MatchConfidence, ReconciliationMatch};
use clearbook_core::store::{ReconciliationStore, StoreError};
use clearbook_shared::types::{Currency, ExceptionId, JournalEntryId, MatchId};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde_json::json;
use uuid::Uuid;

use super::audit::insert_records;
use super::settle;
use crate::entities::{reconciliation_exceptions, reconciliation_matches};
use crate::error::{corrupt, db_error, is_unique_violation, json_error};

/// Scale of the stored similarity score.
const SCORE_SCALE: u32 = 4;

/// Matches and exceptions in Postgres.
///
/// `entry_id` and `event_id` are each unique on the match table, and
/// `fingerprint` on the exception table, so concurrent runs cannot double
/// book either side.
#[derive(Debug, Clone)]
pub struct PgReconciliationStore {
    db: DatabaseConnection,
}

impl PgReconciliationStore {
    /// Creates a store over a connection pool.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

const fn severity_rank(severity: Severity) -> i16 {
    match severity {
        Severity::Low => 0,
        Severity::Medium => 1,
        Severity::High => 2,
    }
}

fn match_from_row(row: reconciliation_matches::Model) -> Result<ReconciliationMatch, StoreError> {
    let confidence = MatchConfidence::parse(&row.confidence)
        .ok_or_else(|| corrupt("match confidence", &row.confidence))?;
    Ok(ReconciliationMatch {
        id: MatchId::from_uuid(row.id),
        entry_id: JournalEntryId::from_uuid(row.entry_id),
        event_id: row.event_id,
        confidence,
        score: row.score,
        matched_at: row.matched_at.with_timezone(&Utc),
        matched_by: row.matched_by,
    })
}

fn exception_row(
    exception: &ReconciliationException,
) -> Result<reconciliation_exceptions::Model, StoreError> {
    let targets: Vec<String> = exception.targets.iter().map(ExceptionTarget::key).collect();
    let resolution = exception
        .resolution
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| json_error(&e))?;
    Ok(reconciliation_exceptions::Model {
        id: exception.id.into_inner(),
        exception_type: exception.exception_type.as_str().to_string(),
        severity: exception.severity.as_str().to_string(),
        severity_rank: severity_rank(exception.severity),
        status: exception.status.as_str().to_string(),
        targets: json!(targets),
        fingerprint: exception.fingerprint.clone(),
        amount: exception.amount,
        currency: exception.currency.map(|c| c.code().to_string()),
        item_date: exception.item_date,
        detail: exception.detail.clone(),
        resolution,
        created_at: exception.created_at.into(),
        updated_at: exception.updated_at.into(),
    })
}

fn exception_from_row(
    row: reconciliation_exceptions::Model,
) -> Result<ReconciliationException, StoreError> {
    let exception_type = ExceptionType::parse(&row.exception_type)
        .ok_or_else(|| corrupt("exception type", &row.exception_type))?;
    let severity = Severity::parse(&row.severity).ok_or_else(|| corrupt("severity", &row.severity))?;
    let status =
        ExceptionStatus::parse(&row.status).ok_or_else(|| corrupt("exception status", &row.status))?;
    let keys: Vec<String> = serde_json::from_value(row.targets).map_err(|e| json_error(&e))?;
    let targets = keys
        .iter()
        .map(|key| ExceptionTarget::parse(key).ok_or_else(|| corrupt("exception target", key)))
        .collect::<Result<Vec<_>, _>>()?;
    let currency = row
        .currency
        .map(|code| code.parse::<Currency>().map_err(|_| corrupt("currency", &code)))
        .transpose()?;
    let resolution = row
        .resolution
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| json_error(&e))?;
    Ok(ReconciliationException {
        id: ExceptionId::from_uuid(row.id),
        exception_type,
        severity,
        status,
        targets,
        fingerprint: row.fingerprint,
        amount: row.amount,
        currency,
        item_date: row.item_date,
        detail: row.detail,
        created_at: row.created_at.with_timezone(&Utc),
        updated_at: row.updated_at.with_timezone(&Utc),
        resolution,
    })
}

fn exceptions_from_rows(
    rows: Vec<reconciliation_exceptions::Model>,
) -> Result<Vec<ReconciliationException>, StoreError> {
    rows.into_iter().map(exception_from_row).collect()
}

#[async_trait]
impl ReconciliationStore for PgReconciliationStore {
    async fn insert_match(
        &self,
        m: &ReconciliationMatch,
        audit: &[AuditRecord],
    ) -> Result<(), StoreError> {
        let row = reconciliation_matches::ActiveModel {
            id: Set(m.id.into_inner()),
            entry_id: Set(m.entry_id.into_inner()),
            event_id: Set(m.event_id.clone()),
            confidence: Set(m.confidence.as_str().to_string()),
            score: Set(m.score.map(|s| s.round_dp(SCORE_SCALE))),
            matched_at: Set(m.matched_at.into()),
            matched_by: Set(m.matched_by.clone()),
        };
        let txn = self.db.begin().await.map_err(db_error)?;
        let written = async {
            row.insert(&txn).await?;
            insert_records(&txn, audit).await
        }
        .await;
        match settle(txn, written).await {
            Ok(()) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::MatchConflict {
                entry_id: m.entry_id,
                event_id: m.event_id.clone(),
            }),
            Err(err) => Err(db_error(err)),
        }
    }

    async fn match_for_entry(
        &self,
        entry_id: JournalEntryId,
    ) -> Result<Option<ReconciliationMatch>, StoreError> {
        reconciliation_matches::Entity::find()
            .filter(reconciliation_matches::Column::EntryId.eq(entry_id.into_inner()))
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(match_from_row)
            .transpose()
    }

    async fn match_for_event(
        &self,
        event_id: &str,
    ) -> Result<Option<ReconciliationMatch>, StoreError> {
        reconciliation_matches::Entity::find()
            .filter(reconciliation_matches::Column::EventId.eq(event_id))
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(match_from_row)
            .transpose()
    }

    async fn matched_entries(
        &self,
        entry_ids: &[JournalEntryId],
    ) -> Result<HashSet<JournalEntryId>, StoreError> {
        if entry_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let ids: Vec<Uuid> = entry_ids.iter().map(|id| id.into_inner()).collect();
        let rows = reconciliation_matches::Entity::find()
            .filter(reconciliation_matches::Column::EntryId.is_in(ids))
            .all(&self.db)
            .await
            .map_err(db_error)?;
        Ok(rows
            .into_iter()
            .map(|r| JournalEntryId::from_uuid(r.entry_id))
            .collect())
    }

    async fn matched_events(&self, event_ids: &[String]) -> Result<HashSet<String>, StoreError> {
        if event_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = reconciliation_matches::Entity::find()
            .filter(reconciliation_matches::Column::EventId.is_in(event_ids.iter().cloned()))
            .all(&self.db)
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(|r| r.event_id).collect())
    }

    async fn count_matches(&self) -> Result<u64, StoreError> {
        reconciliation_matches::Entity::find()
            .count(&self.db)
            .await
            .map_err(db_error)
    }

    async fn insert_exception(
        &self,
        exception: &ReconciliationException,
        audit: &[AuditRecord],
    ) -> Result<(), StoreError> {
        let active = exception_row(exception)?.into_active_model().reset_all();
        let txn = self.db.begin().await.map_err(db_error)?;
        let written = async {
            active.insert(&txn).await?;
            insert_records(&txn, audit).await
        }
        .await;
        match settle(txn, written).await {
            Ok(()) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::FingerprintConflict(exception.fingerprint.clone()))
            }
            Err(err) => Err(db_error(err)),
        }
    }

    async fn update_exception(
        &self,
        exception: &ReconciliationException,
        audit: &[AuditRecord],
    ) -> Result<(), StoreError> {
        let active = exception_row(exception)?.into_active_model().reset_all();
        let txn = self.db.begin().await.map_err(db_error)?;
        let written = async {
            let result = reconciliation_exceptions::Entity::update_many()
                .set(active)
                .filter(reconciliation_exceptions::Column::Id.eq(exception.id.into_inner()))
                .exec(&txn)
                .await?;
            if result.rows_affected == 0 {
                return Ok(false);
            }
            insert_records(&txn, audit).await?;
            Ok::<_, DbErr>(true)
        }
        .await;
        if settle(txn, written).await.map_err(db_error)? {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("exception {}", exception.id)))
        }
    }

    async fn get_exception(
        &self,
        id: ExceptionId,
    ) -> Result<Option<ReconciliationException>, StoreError> {
        reconciliation_exceptions::Entity::find_by_id(id.into_inner())
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(exception_from_row)
            .transpose()
    }

    async fn exception_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<ReconciliationException>, StoreError> {
        reconciliation_exceptions::Entity::find()
            .filter(reconciliation_exceptions::Column::Fingerprint.eq(fingerprint))
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(exception_from_row)
            .transpose()
    }

    async fn list_exceptions(
        &self,
        filter: &ExceptionFilter,
    ) -> Result<Vec<ReconciliationException>, StoreError> {
        let mut query = reconciliation_exceptions::Entity::find();

        if let Some(severity) = filter.severity {
            query = query.filter(reconciliation_exceptions::Column::Severity.eq(severity.as_str()));
        }

        if let Some(status) = filter.status {
            query = query.filter(reconciliation_exceptions::Column::Status.eq(status.as_str()));
        }

        if filter.open_only {
            query = query.filter(reconciliation_exceptions::Column::Status.is_in([
                ExceptionStatus::Open.as_str(),
                ExceptionStatus::UnderReview.as_str(),
            ]));
        }

        let rows = query
            .order_by_desc(reconciliation_exceptions::Column::SeverityRank)
            .order_by_asc(reconciliation_exceptions::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(db_error)?;
        exceptions_from_rows(rows)
    }

    async fn exceptions_for_target(
        &self,
        target: &ExceptionTarget,
    ) -> Result<Vec<ReconciliationException>, StoreError> {
        let rows = reconciliation_exceptions::Entity::find()
            .filter(Expr::cust_with_values(
                "targets @> $1",
                [json!([target.key()])],
            ))
            .order_by_asc(reconciliation_exceptions::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(db_error)?;
        exceptions_from_rows(rows)
    }

    async fn count_exceptions(&self) -> Result<u64, StoreError> {
        reconciliation_exceptions::Entity::find()
            .count(&self.db)
            .await
            .map_err(db_error)
    }
}
