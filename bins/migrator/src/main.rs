//! Database migration runner for Clearbook.
//!
//! Usage:
//!   migrator up      - Create the journal, idempotency, feed and reconciliation tables
//!   migrator down    - Drop them again
//!   migrator status  - Show migration status
//!   migrator fresh   - Drop everything and re-run migrations
//!
//! Reads `DATABASE_URL` from the environment or `.env`.

use clearbook_db::migration::Migrator;
use sea_orm_migration::prelude::*;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // sea-orm-migration sets up its own tracing
    cli::run_cli(Migrator).await;
}
