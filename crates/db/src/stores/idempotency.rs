//! Postgres [`IdempotencyStore`].
//!
//! Reservation is a single `INSERT … ON CONFLICT` statement, so two
//! deliveries racing on one key cannot both acquire it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use clearbook_core::store::{IdempotencyStore, Reservation, StoreError};
use clearbook_shared::types::JournalEntryId;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, QueryFilter,
    Statement,
};

use crate::entities::idempotency_keys;
use crate::error::db_error;

// Takes over a stale, uncompleted reservation; leaves completed keys alone.
const RESERVE_SQL: &str = r"
INSERT INTO idempotency_keys (key, reserved_at)
VALUES ($1, $2)
ON CONFLICT (key) DO UPDATE
SET reserved_at = EXCLUDED.reserved_at
WHERE idempotency_keys.entry_id IS NULL
  AND idempotency_keys.reserved_at <= $3
RETURNING key
";

const COMPLETE_SQL: &str = r"
INSERT INTO idempotency_keys (key, reserved_at, entry_id, completed_at)
VALUES ($1, NOW(), $2, NOW())
ON CONFLICT (key) DO UPDATE
SET entry_id = EXCLUDED.entry_id,
    completed_at = EXCLUDED.completed_at
";

/// Idempotency keys in Postgres.
#[derive(Debug, Clone)]
pub struct PgIdempotencyStore {
    db: DatabaseConnection,
}

impl PgIdempotencyStore {
    /// Creates a store over a connection pool.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn reserve(
        &self,
        key: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Reservation, StoreError> {
        let acquired = self
            .db
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                RESERVE_SQL,
                [key.into(), now.into(), (now - lease).into()],
            ))
            .await
            .map_err(db_error)?
            .is_some();
        if acquired {
            return Ok(Reservation::Acquired);
        }

        let row = idempotency_keys::Entity::find_by_id(key.to_string())
            .one(&self.db)
            .await
            .map_err(db_error)?;
        Ok(match row.and_then(|r| r.entry_id) {
            Some(entry_id) => Reservation::Completed(JournalEntryId::from_uuid(entry_id)),
            None => Reservation::Held,
        })
    }

    async fn complete(&self, key: &str, entry_id: JournalEntryId) -> Result<(), StoreError> {
        self.db
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                COMPLETE_SQL,
                [key.into(), entry_id.into_inner().into()],
            ))
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<(), StoreError> {
        idempotency_keys::Entity::delete_many()
            .filter(idempotency_keys::Column::Key.eq(key))
            .filter(idempotency_keys::Column::EntryId.is_null())
            .exec(&self.db)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Result<Option<JournalEntryId>, StoreError> {
        let row = idempotency_keys::Entity::find_by_id(key.to_string())
            .one(&self.db)
            .await
            .map_err(db_error)?;
        Ok(row
            .and_then(|r| r.entry_id)
            .map(JournalEntryId::from_uuid))
    }
}
