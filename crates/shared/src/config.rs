//! Application configuration management.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::Currency;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Reconciliation matcher tunables.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Fee engine configuration.
    #[serde(default)]
    pub fees: FeeConfig,
    /// Idempotency reservation configuration.
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    /// Path of the book file (chart of accounts, fee rules, templates).
    #[serde(default = "default_book_path")]
    pub book_path: String,
}

fn default_book_path() -> String {
    "config/book".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Reconciliation matcher configuration.
///
/// Every threshold the matcher uses is configurable; the defaults below are
/// the documented baseline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Maximum absolute amount difference (minor units, inclusive) for an exact match.
    pub amount_epsilon_minor: i64,
    /// Maximum date difference (days, inclusive) for an exact match.
    pub date_tolerance_days: i64,
    /// Description similarity a fuzzy candidate must strictly exceed.
    pub fuzzy_threshold: Decimal,
    /// Maximum date difference (days, inclusive) for a fuzzy candidate.
    pub fuzzy_date_tolerance_days: i64,
    /// Amount difference a fuzzy match tolerates, in basis points of the larger amount.
    pub fuzzy_amount_tolerance_bps: i64,
    /// Match entries to the event they were generated from before amount/date matching.
    pub link_by_reference: bool,
    /// Size of one cancellable reconciliation chunk, in days.
    pub chunk_days: i64,
    /// Severity escalation thresholds.
    pub severity: SeverityThresholds,
    /// Interval between scheduled reconciliation runs.
    pub schedule_interval_secs: u64,
    /// Trailing window, in days, covered by a scheduled run.
    pub trailing_window_days: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            amount_epsilon_minor: 1,
            date_tolerance_days: 3,
            fuzzy_threshold: Decimal::new(8, 1),
            fuzzy_date_tolerance_days: 7,
            fuzzy_amount_tolerance_bps: 100,
            link_by_reference: true,
            chunk_days: 7,
            severity: SeverityThresholds::default(),
            schedule_interval_secs: 3600,
            trailing_window_days: 30,
        }
    }
}

/// Thresholds at which an unmatched item escalates severity.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    /// Age (days) at which severity becomes at least medium.
    pub medium_age_days: i64,
    /// Age (days) at which severity becomes high.
    pub high_age_days: i64,
    /// Absolute amount (minor units) at which severity becomes at least medium.
    pub medium_amount_minor: i64,
    /// Absolute amount (minor units) at which severity becomes high.
    pub high_amount_minor: i64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            medium_age_days: 7,
            high_age_days: 30,
            medium_amount_minor: 100_000,
            high_amount_minor: 1_000_000,
        }
    }
}

/// Fee engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Currencies the fee engine accepts.
    pub supported_currencies: Vec<Currency>,
    /// Flat fee charged for an ACH return code missing from the table.
    pub default_return_fee_minor: i64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            supported_currencies: vec![Currency::Usd],
            default_return_fee_minor: 1500,
        }
    }
}

impl FeeConfig {
    /// Returns true if the fee engine accepts the currency.
    #[must_use]
    pub fn supports(&self, currency: Currency) -> bool {
        self.supported_currencies.contains(&currency)
    }
}

/// Idempotency reservation configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// Seconds after which an uncompleted reservation may be taken over.
    pub lease_secs: u64,
    /// How many times a delivery waits for a concurrent reservation to finish.
    pub wait_attempts: u32,
    /// Delay between waits, in milliseconds.
    pub wait_backoff_ms: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            lease_secs: 300,
            wait_attempts: 20,
            wait_backoff_ms: 25,
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("CLEARBOOK").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
