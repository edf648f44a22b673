//! Postgres implementations of the core store traits.

mod audit;
mod feed;
mod idempotency;
mod journal;
mod reconciliation;

use std::sync::Arc;

use clearbook_core::Stores;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr};

pub use audit::PgAuditStore;
pub use feed::PgFeed;
pub use idempotency::PgIdempotencyStore;
pub use journal::PgJournalStore;
pub use reconciliation::PgReconciliationStore;

/// Engine stores sharing one connection pool.
#[must_use]
pub fn pg_stores(db: &DatabaseConnection) -> Stores {
    Stores {
        journal: Arc::new(PgJournalStore::new(db.clone())),
        idempotency: Arc::new(PgIdempotencyStore::new(db.clone())),
        audit: Arc::new(PgAuditStore::new(db.clone())),
        reconciliation: Arc::new(PgReconciliationStore::new(db.clone())),
    }
}

/// Commits `txn` when `written` succeeded, otherwise rolls it back and
/// returns the write error.
pub(crate) async fn settle<T>(txn: DatabaseTransaction, written: Result<T, DbErr>) -> Result<T, DbErr> {
    match written {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            txn.rollback().await?;
            Err(err)
        }
    }
}
