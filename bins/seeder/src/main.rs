//! Database seeder for Clearbook development and testing.
//!
//! Stores the chart of accounts from the configured book and, when given a
//! JSON file of processor events, imports it into the feed table.
//!
//! Usage: cargo run --bin seeder -- [feed.json]

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clearbook_core::config::BookConfig;
use clearbook_core::event::ExternalTransactionEvent;
use clearbook_db::{AccountRepository, PgFeed, connect_with};
use clearbook_shared::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clearbook=info,seeder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let book = BookConfig::load(&config.book_path)
        .and_then(|book| book.build(&config.fees))
        .context("failed to load book")?;

    let db = connect_with(&config.database).await?;

    let stored = AccountRepository::new(db.clone())
        .upsert_chart(&book.chart)
        .await
        .context("failed to store chart of accounts")?;
    info!(accounts = stored, "seeded chart of accounts");

    if let Some(path) = std::env::args().nth(1) {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read feed file {path}"))?;
        let events: Vec<ExternalTransactionEvent> = serde_json::from_str(&raw)
            .with_context(|| format!("feed file {path} is not a JSON array of events"))?;
        let imported = PgFeed::new(db).import(&events).await?;
        info!(events = imported, path = %path, "seeded processor feed");
    }

    info!("Seeding complete");
    Ok(())
}
