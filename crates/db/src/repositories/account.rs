//! Account repository for the persisted chart of accounts.
//!
//! The book file is the source of truth for the chart; this table mirrors
//! it so journal lines can reference accounts by foreign key.

use chrono::Utc;
use clearbook_core::ledger::{Account, AccountCategory, ChartOfAccounts, LedgerError};
use clearbook_shared::types::{AccountId, Currency};
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, DbErr, EntityTrait, QueryOrder, Set};
use tracing::info;

use crate::entities::accounts;

/// Error types for account operations.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// A stored row no longer parses.
    #[error("Account {id} has invalid {field} '{value}'")]
    InvalidRow {
        /// Account number.
        id: i64,
        /// Offending column.
        field: &'static str,
        /// Stored value.
        value: String,
    },

    /// Stored accounts do not form a valid chart.
    #[error("Invalid chart of accounts: {0}")]
    Chart(#[from] LedgerError),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Account repository.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    db: DatabaseConnection,
}

impl AccountRepository {
    /// Creates a new account repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Inserts or updates every account of the chart.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn upsert_chart(&self, chart: &ChartOfAccounts) -> Result<usize, AccountError> {
        if chart.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let rows = chart.iter().map(|account| accounts::ActiveModel {
            id: Set(account.id.get()),
            name: Set(account.name.clone()),
            category: Set(account.category.as_str().to_string()),
            legal_entity: Set(account.legal_entity.clone()),
            currency: Set(account.currency.code().to_string()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        });

        let on_conflict = OnConflict::column(accounts::Column::Id)
            .update_columns([
                accounts::Column::Name,
                accounts::Column::Category,
                accounts::Column::LegalEntity,
                accounts::Column::Currency,
                accounts::Column::UpdatedAt,
            ])
            .to_owned();

        accounts::Entity::insert_many(rows)
            .on_conflict(on_conflict)
            .exec(&self.db)
            .await?;

        info!(accounts = chart.len(), "chart of accounts stored");
        Ok(chart.len())
    }

    /// Loads the stored chart of accounts.
    ///
    /// # Errors
    ///
    /// Returns an error if a row is invalid or the query fails.
    pub async fn load_chart(&self) -> Result<ChartOfAccounts, AccountError> {
        let rows = accounts::Entity::find()
            .order_by_asc(accounts::Column::Id)
            .all(&self.db)
            .await?;
        let accounts = rows
            .into_iter()
            .map(account_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ChartOfAccounts::new(accounts)?)
    }
}

fn account_from_row(row: accounts::Model) -> Result<Account, AccountError> {
    let category = AccountCategory::parse(&row.category).ok_or_else(|| AccountError::InvalidRow {
        id: row.id,
        field: "category",
        value: row.category.clone(),
    })?;
    let currency: Currency = row
        .currency
        .trim()
        .parse()
        .map_err(|_| AccountError::InvalidRow {
            id: row.id,
            field: "currency",
            value: row.currency.clone(),
        })?;
    Ok(Account {
        id: AccountId(row.id),
        name: row.name,
        category,
        legal_entity: row.legal_entity,
        currency,
    })
}

/// Accounts whose stored form differs from the book, by id.
pub fn chart_drift(book: &ChartOfAccounts, stored: &ChartOfAccounts) -> Vec<AccountId> {
    let mut drifted: Vec<AccountId> = book
        .iter()
        .filter(|account| stored.get(account.id) != Some(account))
        .map(|account| account.id)
        .collect();
    drifted.extend(
        stored
            .iter()
            .filter(|account| book.get(account.id).is_none())
            .map(|account| account.id),
    );
    drifted.sort();
    drifted
}
