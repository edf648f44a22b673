//! Database layer with `SeaORM` entities, migrations and Postgres stores.
//!
//! This crate provides:
//! - `SeaORM` entity definitions
//! - Postgres implementations of the `clearbook-core` store traits
//! - The accounts repository used by the seeder
//! - Database migrations

pub mod entities;
pub mod error;
pub mod migration;
pub mod repositories;
pub mod stores;

pub use repositories::{AccountError, AccountRepository};
pub use stores::{
    PgAuditStore, PgFeed, PgIdempotencyStore, PgJournalStore, PgReconciliationStore, pg_stores,
};

use std::time::Duration;

use clearbook_shared::DatabaseConfig;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tracing::info;

/// Establishes a connection to the database.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(database_url).await
}

/// Establishes a pooled connection sized by configuration.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect_with(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    info!(
        max_connections = config.max_connections,
        "database pool ready"
    );
    Ok(db)
}
