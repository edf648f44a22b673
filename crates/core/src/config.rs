//! Book configuration: chart of accounts, fee rules, return codes, templates.
//!
//! A book is a TOML document:
//!
//! ```toml
//! [[accounts]]
//! id = 1010
//! name = "Processor Clearing"
//! category = "asset"
//! legal_entity = "acme-us"
//! currency = "USD"
//!
//! [[fee_rules]]
//! name = "card-standard"
//! transaction_type = "card_charge"
//! base_fee = 30
//! percentage = "0.029"
//! effective_from = "2026-01-01"
//!
//! [return_codes.R01]
//! description = "Insufficient funds"
//! fee = 2500
//!
//! [[templates]]
//! id = "card-charge"
//! kind = "card_charge"
//! debit_account = 1010
//! credit_account = 4010
//! fee_account = 5010
//! has_fee_line = true
//! ```
//!
//! An empty `[return_codes]` section selects the standard NACHA table.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use clearbook_shared::config::FeeConfig;
use clearbook_shared::types::FeeRuleId;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::event::TransactionType;
use crate::fees::{DiscountTier, FeeError, FeeRule, FeeRuleSet, ReturnCodeFee, ReturnCodeTable};
use crate::ledger::{Account, ChartOfAccounts, LedgerError};
use crate::template::{JournalTemplate, TemplateError, TemplateRegistry};

/// Namespace for fee rule ids derived from `name:version`.
const FEE_RULE_NAMESPACE: Uuid = Uuid::from_u128(0x6c1e_a0b4_8f3d_4d5e_9a27_41c2_0b6e_f3a1);

/// Errors loading or assembling a book.
#[derive(Debug, Error)]
pub enum BookError {
    /// File missing or malformed.
    #[error("Book configuration could not be read: {0}")]
    Load(#[from] config::ConfigError),

    /// Chart of accounts rejected.
    #[error("Invalid chart of accounts: {0}")]
    Chart(#[from] LedgerError),

    /// Fee rules rejected.
    #[error("Invalid fee rules: {0}")]
    FeeRules(#[from] FeeError),

    /// Templates rejected.
    #[error("Invalid templates: {0}")]
    Templates(#[from] TemplateError),
}

/// Authored form of a fee rule.
#[derive(Debug, Clone, Deserialize)]
pub struct FeeRuleConfig {
    /// Rule name; with the version it determines the rule id.
    pub name: String,
    /// Transaction type priced.
    pub transaction_type: TransactionType,
    /// Rule version.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Flat fee in minor units.
    #[serde(default)]
    pub base_fee: i64,
    /// Fraction of the amount.
    #[serde(default)]
    pub percentage: Decimal,
    /// Upper bound on base plus percentage.
    #[serde(default)]
    pub cap: Option<i64>,
    /// Volume discount tiers.
    #[serde(default)]
    pub discount_tiers: Vec<DiscountTier>,
    /// Surcharge for elevated or high risk.
    #[serde(default)]
    pub risk_surcharge: i64,
    /// First effective date.
    pub effective_from: NaiveDate,
    /// End of the effective range (exclusive).
    #[serde(default)]
    pub effective_to: Option<NaiveDate>,
    /// Whether the rule participates in selection.
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_version() -> u32 {
    1
}

const fn default_active() -> bool {
    true
}

impl FeeRuleConfig {
    /// Stable id of the rule; reloading the same book yields the same ids.
    #[must_use]
    pub fn rule_id(&self) -> FeeRuleId {
        let key = format!("{}:{}", self.name, self.version);
        FeeRuleId::from_uuid(Uuid::new_v5(&FEE_RULE_NAMESPACE, key.as_bytes()))
    }

    fn into_rule(self) -> FeeRule {
        FeeRule {
            id: self.rule_id(),
            name: self.name,
            transaction_type: self.transaction_type,
            version: self.version,
            base_fee: self.base_fee,
            percentage: self.percentage,
            cap: self.cap,
            discount_tiers: self.discount_tiers,
            risk_surcharge: self.risk_surcharge,
            effective_from: self.effective_from,
            effective_to: self.effective_to,
            active: self.active,
        }
    }
}

/// A book as authored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookConfig {
    /// Chart of accounts.
    #[serde(default)]
    pub accounts: Vec<Account>,
    /// Fee rules.
    #[serde(default)]
    pub fee_rules: Vec<FeeRuleConfig>,
    /// ACH return code fees by code.
    #[serde(default)]
    pub return_codes: BTreeMap<String, ReturnCodeFee>,
    /// Journal templates.
    #[serde(default)]
    pub templates: Vec<JournalTemplate>,
}

/// A validated book, ready to wire into the engine.
#[derive(Debug)]
pub struct Book {
    /// Chart of accounts.
    pub chart: ChartOfAccounts,
    /// Fee rules.
    pub fee_rules: FeeRuleSet,
    /// Return code fees.
    pub return_codes: ReturnCodeTable,
    /// Template registry.
    pub templates: TemplateRegistry,
}

impl BookConfig {
    /// Loads a book file; the extension may be omitted.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BookError> {
        let path = path.as_ref();
        let name = path.to_string_lossy();
        let config = config::Config::builder()
            .add_source(config::File::with_name(&name))
            .build()?;
        let book: Self = config.try_deserialize()?;
        info!(
            path = %path.display(),
            accounts = book.accounts.len(),
            fee_rules = book.fee_rules.len(),
            templates = book.templates.len(),
            "book configuration loaded"
        );
        Ok(book)
    }

    /// Parses a book from TOML text.
    pub fn from_toml_str(toml: &str) -> Result<Self, BookError> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Validates the book and builds its runtime parts.
    pub fn build(self, fees: &FeeConfig) -> Result<Book, BookError> {
        let chart = ChartOfAccounts::new(self.accounts)?;
        let fee_rules = FeeRuleSet::from_rules(self.fee_rules.into_iter().map(FeeRuleConfig::into_rule))?;
        let return_codes = if self.return_codes.is_empty() {
            ReturnCodeTable::standard(fees.default_return_fee_minor)
        } else {
            let codes = self
                .return_codes
                .into_iter()
                .map(|(code, fee)| (code.to_uppercase(), fee))
                .collect();
            ReturnCodeTable::new(codes, fees.default_return_fee_minor)
        };
        let templates = TemplateRegistry::new(self.templates, &chart)?;
        Ok(Book {
            chart,
            fee_rules,
            return_codes,
            templates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateId;
    use clearbook_shared::types::AccountId;
    use rust_decimal_macros::dec;

    const BOOK: &str = r#"
        [[accounts]]
        id = 1010
        name = "Processor Clearing"
        category = "asset"
        legal_entity = "acme-us"
        currency = "USD"

        [[accounts]]
        id = 4010
        name = "Card Revenue"
        category = "income"
        legal_entity = "acme-us"
        currency = "USD"

        [[accounts]]
        id = 5010
        name = "Processing Fees"
        category = "expense"
        legal_entity = "acme-us"
        currency = "USD"

        [[fee_rules]]
        name = "card-standard"
        transaction_type = "card_charge"
        base_fee = 30
        percentage = "0.029"
        effective_from = "2026-01-01"

        [[templates]]
        id = "card-charge"
        kind = "card_charge"
        debit_account = 1010
        credit_account = 4010
        fee_account = 5010
        has_fee_line = true
        priority = 10
    "#;

    #[test]
    fn test_book_builds() {
        let book = BookConfig::from_toml_str(BOOK)
            .unwrap()
            .build(&FeeConfig::default())
            .unwrap();
        assert_eq!(book.chart.len(), 3);
        assert_eq!(book.fee_rules.len(), 1);
        assert!(book.return_codes.lookup("R01").is_some());

        let template = book.templates.get(&TemplateId::new("card-charge")).unwrap();
        assert_eq!(template.fee_account, Some(AccountId(5010)));
        assert_eq!(template.priority, 10);

        let rule = book.fee_rules.iter().next().unwrap();
        assert_eq!(rule.percentage, dec!(0.029));
        assert_eq!(rule.version, 1);
        assert!(rule.active);
    }

    #[test]
    fn test_rule_ids_are_stable() {
        let first = BookConfig::from_toml_str(BOOK).unwrap();
        let second = BookConfig::from_toml_str(BOOK).unwrap();
        assert_eq!(first.fee_rules[0].rule_id(), second.fee_rules[0].rule_id());

        let mut bumped = first.fee_rules[0].clone();
        bumped.version = 2;
        assert_ne!(bumped.rule_id(), first.fee_rules[0].rule_id());
    }

    #[test]
    fn test_custom_return_codes_replace_standard_table() {
        let toml = format!(
            "{BOOK}\n[return_codes.R01]\ndescription = \"Insufficient funds\"\nfee = 3000\n"
        );
        let book = BookConfig::from_toml_str(&toml)
            .unwrap()
            .build(&FeeConfig::default())
            .unwrap();
        assert_eq!(book.return_codes.lookup("R01").unwrap().fee, 3000);
        assert!(book.return_codes.lookup("R10").is_none());
    }

    #[test]
    fn test_template_with_unknown_account_is_rejected() {
        let toml = BOOK.replace("credit_account = 4010", "credit_account = 4999");
        let err = BookConfig::from_toml_str(&toml)
            .unwrap()
            .build(&FeeConfig::default())
            .unwrap_err();
        assert!(matches!(err, BookError::Templates(_)));
    }

    #[test]
    fn test_overlapping_rules_are_rejected() {
        let toml = format!(
            "{BOOK}\n[[fee_rules]]\nname = \"card-promo\"\ntransaction_type = \"card_charge\"\nbase_fee = 0\neffective_from = \"2026-06-01\"\n"
        );
        let err = BookConfig::from_toml_str(&toml)
            .unwrap()
            .build(&FeeConfig::default())
            .unwrap_err();
        assert!(matches!(err, BookError::FeeRules(_)));
    }

    #[test]
    fn test_shipped_book_builds() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/book");
        let book = BookConfig::load(path)
            .unwrap()
            .build(&FeeConfig::default())
            .unwrap();
        assert_eq!(book.chart.len(), 8);
        assert_eq!(book.return_codes.lookup("R01").unwrap().fee, 2500);
        assert!(book.templates.get(&TemplateId::new("refund")).is_some());
    }

    #[test]
    fn test_missing_file_is_a_load_error() {
        let err = BookConfig::load("does/not/exist/book").unwrap_err();
        assert!(matches!(err, BookError::Load(_)));
    }
}
