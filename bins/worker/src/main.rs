//! Clearbook reconciliation worker.
//!
//! Loads the runtime configuration and the book, connects to Postgres and
//! reconciles the trailing window on a fixed schedule until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clearbook_core::config::BookConfig;
use clearbook_core::{Clearbook, EngineConfig};
use clearbook_db::repositories::chart_drift;
use clearbook_db::{AccountRepository, PgFeed, connect_with, pg_stores};
use clearbook_shared::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clearbook=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = AppConfig::load().context("failed to load configuration")?;
    let book = BookConfig::load(&config.book_path)
        .and_then(|book| book.build(&config.fees))
        .context("failed to load book")?;

    // Connect to database
    let db = connect_with(&config.database).await?;
    info!("Connected to database");

    let stored = AccountRepository::new(db.clone()).load_chart().await?;
    let drift = chart_drift(&book.chart, &stored);
    if !drift.is_empty() {
        warn!(
            accounts = ?drift,
            "stored chart of accounts differs from the book; run the seeder"
        );
    }

    let engine = Clearbook::builder(book, Arc::new(PgFeed::new(db.clone())))
        .stores(pg_stores(&db))
        .config(EngineConfig::from(&config))
        .build();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
            }
            cancel.cancel();
        }
    });

    let every = Duration::from_secs(config.reconciliation.schedule_interval_secs.max(1));
    info!(
        interval_secs = every.as_secs(),
        trailing_window_days = config.reconciliation.trailing_window_days,
        "reconciliation worker started"
    );
    run_schedule(&engine, every, &cancel).await;

    info!("reconciliation worker stopped");
    Ok(())
}

/// Reconciles the trailing window every `every` until cancelled.
async fn run_schedule(engine: &Clearbook, every: Duration, cancel: &CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match engine.reconcile_trailing(cancel).await {
            Ok(summary) => info!(
                matched = summary.matched,
                new_exceptions = summary.new_exceptions,
                open_exceptions = summary.exceptions.len(),
                auto_resolved = summary.auto_resolved,
                chunks = summary.chunks_completed,
                cancelled = summary.cancelled,
                "scheduled reconciliation finished"
            ),
            Err(err) => error!(
                error = %err,
                code = err.error_code(),
                retryable = err.is_retryable(),
                "scheduled reconciliation failed"
            ),
        }
    }
}
