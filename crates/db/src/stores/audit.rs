//! Postgres [`AuditStore`].

use async_trait::async_trait;
use chrono::Utc;
use clearbook_core::audit::{AuditAction, AuditRecord};
use clearbook_core::store::{AuditStore, StoreError};
use clearbook_shared::types::AuditRecordId;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};

use crate::entities::audit_records;
use crate::error::{corrupt, db_error};

/// Audit records in Postgres. The table rejects updates and deletes.
#[derive(Debug, Clone)]
pub struct PgAuditStore {
    db: DatabaseConnection,
}

impl PgAuditStore {
    /// Creates a store over a connection pool.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn record_row(record: &AuditRecord) -> audit_records::ActiveModel {
    audit_records::ActiveModel {
        id: Set(record.id.into_inner()),
        action: Set(record.action.as_str().to_string()),
        actor: Set(record.actor.clone()),
        target_id: Set(record.target_id.clone()),
        before: Set(record.before.clone()),
        after: Set(record.after.clone()),
        recorded_at: Set(record.recorded_at.into()),
        ..Default::default()
    }
}

/// Inserts records in one statement on `conn`, usually the transaction of
/// the write they describe.
pub(crate) async fn insert_records<C: ConnectionTrait>(
    conn: &C,
    records: &[AuditRecord],
) -> Result<(), DbErr> {
    if records.is_empty() {
        return Ok(());
    }
    audit_records::Entity::insert_many(records.iter().map(record_row))
        .exec(conn)
        .await?;
    Ok(())
}

fn record_from_row(row: audit_records::Model) -> Result<AuditRecord, StoreError> {
    let action = AuditAction::parse(&row.action).ok_or_else(|| corrupt("audit action", &row.action))?;
    Ok(AuditRecord {
        id: AuditRecordId::from_uuid(row.id),
        action,
        actor: row.actor,
        target_id: row.target_id,
        before: row.before,
        after: row.after,
        recorded_at: row.recorded_at.with_timezone(&Utc),
    })
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        insert_records(&self.db, std::slice::from_ref(record))
            .await
            .map_err(db_error)
    }

    async fn append_all(&self, records: &[AuditRecord]) -> Result<(), StoreError> {
        insert_records(&self.db, records).await.map_err(db_error)
    }

    async fn for_target(&self, target_id: &str) -> Result<Vec<AuditRecord>, StoreError> {
        audit_records::Entity::find()
            .filter(audit_records::Column::TargetId.eq(target_id))
            .order_by_asc(audit_records::Column::Seq)
            .all(&self.db)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(record_from_row)
            .collect()
    }
}
