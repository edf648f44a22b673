//! Fee calculation.
//!
//! All intermediate arithmetic is `Decimal`; only the final components are
//! rounded to minor units, half away from zero (half-up for positive fees).

use chrono::NaiveDate;
use clearbook_shared::types::{Currency, FeeRuleId};
use clearbook_shared::FeeConfig;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::FeeError;
use super::return_codes::ReturnCodeTable;
use super::rule::FeeRuleSet;
use crate::event::{ExternalTransactionEvent, RiskLevel, TransactionType};

/// Transaction attributes the fee depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeAttributes {
    /// Transaction currency.
    pub currency: Currency,
    /// Transaction date; selects the effective rule.
    pub date: NaiveDate,
    /// Customer's monthly volume, for tier discounts.
    pub monthly_volume: Option<i64>,
    /// Risk level, for the surcharge.
    pub risk_level: Option<RiskLevel>,
    /// ACH return code.
    pub return_code: Option<String>,
}

impl FeeAttributes {
    /// Attributes with only currency and date set.
    #[must_use]
    pub const fn new(currency: Currency, date: NaiveDate) -> Self {
        Self {
            currency,
            date,
            monthly_volume: None,
            risk_level: None,
            return_code: None,
        }
    }

    /// Reads attributes from an event whose currency is already parsed.
    #[must_use]
    pub fn from_event(event: &ExternalTransactionEvent, currency: Currency) -> Self {
        Self {
            currency,
            date: event.date(),
            monthly_volume: event.metadata.monthly_volume(),
            risk_level: event.metadata.risk_level(),
            return_code: event.metadata.return_code().map(str::to_string),
        }
    }
}

/// Non-fatal condition noticed during calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeeWarning {
    /// Return code missing from the table; the default fee was used.
    UnknownReturnCode {
        /// The code received.
        code: String,
        /// Fee applied.
        default_fee: i64,
    },
}

/// Immutable record of one fee calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeCalculation {
    /// Rule applied; `None` for return-code fees.
    pub rule_id: Option<FeeRuleId>,
    /// Version of the rule applied.
    pub rule_version: Option<u32>,
    /// Transaction type.
    pub transaction_type: TransactionType,
    /// Transaction amount in minor units.
    pub amount: i64,
    /// Currency.
    pub currency: Currency,
    /// Flat component.
    pub base_fee: i64,
    /// Percentage component, rounded.
    pub percentage_fee: i64,
    /// True if the cap reduced the fee.
    pub cap_applied: bool,
    /// Volume discount rate applied.
    pub discount_rate: Decimal,
    /// Discount amount, rounded.
    pub discount_amount: i64,
    /// Risk surcharge added.
    pub risk_adjustment: i64,
    /// Total fee.
    pub total_fee: i64,
    /// `amount - total_fee`.
    pub net_amount: i64,
    /// Return code, for ACH returns.
    pub return_code: Option<String>,
    /// Warnings raised.
    pub warnings: Vec<FeeWarning>,
}

/// Deterministic fee engine over a rule set and return code table.
#[derive(Debug, Clone)]
pub struct FeeCalculator {
    rules: FeeRuleSet,
    return_codes: ReturnCodeTable,
    config: FeeConfig,
}

fn round_minor(value: Decimal) -> Result<i64, FeeError> {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(FeeError::Overflow)
}

impl FeeCalculator {
    /// Creates a calculator.
    #[must_use]
    pub const fn new(rules: FeeRuleSet, return_codes: ReturnCodeTable, config: FeeConfig) -> Self {
        Self {
            rules,
            return_codes,
            config,
        }
    }

    /// The rule set.
    #[must_use]
    pub const fn rules(&self) -> &FeeRuleSet {
        &self.rules
    }

    /// Computes the fee of a transaction.
    ///
    /// # Errors
    ///
    /// `InvalidFeeInput` for a non-positive amount, an unsupported currency,
    /// or a return without a code; `NoEffectiveRule` when no rule applies.
    pub fn calculate_fee(
        &self,
        transaction_type: TransactionType,
        amount: i64,
        attributes: &FeeAttributes,
    ) -> Result<FeeCalculation, FeeError> {
        if amount <= 0 {
            return Err(FeeError::InvalidFeeInput {
                field: "amount",
                reason: format!("must be positive, got {amount}"),
            });
        }
        if !self.config.supports(attributes.currency) {
            return Err(FeeError::InvalidFeeInput {
                field: "currency",
                reason: format!("{} is not supported", attributes.currency),
            });
        }

        if transaction_type == TransactionType::AchReturn {
            return self.return_fee(amount, attributes);
        }

        let rule = self
            .rules
            .effective(transaction_type, attributes.date)
            .ok_or(FeeError::NoEffectiveRule {
                transaction_type,
                date: attributes.date,
            })?;

        let base = Decimal::from(rule.base_fee);
        let percentage_fee = Decimal::from(amount) * rule.percentage;
        let raw = base + percentage_fee;

        let (capped, cap_applied) = match rule.cap.map(Decimal::from) {
            Some(cap) if raw > cap => (cap, true),
            _ => (raw, false),
        };

        let discount_rate = rule.discount_for(attributes.monthly_volume);
        let discount = capped * discount_rate;

        let risk_adjustment = if attributes.risk_level.is_some_and(RiskLevel::is_elevated) {
            rule.risk_surcharge
        } else {
            0
        };

        let total_fee = round_minor(capped - discount + Decimal::from(risk_adjustment))?;

        Ok(FeeCalculation {
            rule_id: Some(rule.id),
            rule_version: Some(rule.version),
            transaction_type,
            amount,
            currency: attributes.currency,
            base_fee: rule.base_fee,
            percentage_fee: round_minor(percentage_fee)?,
            cap_applied,
            discount_rate,
            discount_amount: round_minor(discount)?,
            risk_adjustment,
            total_fee,
            net_amount: amount - total_fee,
            return_code: None,
            warnings: Vec::new(),
        })
    }

    fn return_fee(&self, amount: i64, attributes: &FeeAttributes) -> Result<FeeCalculation, FeeError> {
        let code = attributes
            .return_code
            .as_deref()
            .ok_or(FeeError::InvalidFeeInput {
                field: "return_code",
                reason: "is required for ACH returns".to_string(),
            })?;

        let mut warnings = Vec::new();
        let fee = if let Some(known) = self.return_codes.lookup(code) {
            known.fee
        } else {
            let default_fee = self.return_codes.default_fee();
            warn!(
                return_code = code,
                default_fee, "UnknownReturnCodeWarning: return code not in table, applying default fee"
            );
            warnings.push(FeeWarning::UnknownReturnCode {
                code: code.to_string(),
                default_fee,
            });
            default_fee
        };

        Ok(FeeCalculation {
            rule_id: None,
            rule_version: None,
            transaction_type: TransactionType::AchReturn,
            amount,
            currency: attributes.currency,
            base_fee: fee,
            percentage_fee: 0,
            cap_applied: false,
            discount_rate: Decimal::ZERO,
            discount_amount: 0,
            risk_adjustment: 0,
            total_fee: fee,
            net_amount: amount - fee,
            return_code: Some(code.to_string()),
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::rule::{DiscountTier, FeeRule};
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn rule(
        transaction_type: TransactionType,
        base_fee: i64,
        percentage: Decimal,
        cap: Option<i64>,
    ) -> FeeRule {
        FeeRule {
            id: FeeRuleId::new(),
            name: format!("{transaction_type}-rule"),
            transaction_type,
            version: 1,
            base_fee,
            percentage,
            cap,
            discount_tiers: vec![],
            risk_surcharge: 0,
            effective_from: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            effective_to: None,
            active: true,
        }
    }

    fn calculator(rules: Vec<FeeRule>) -> FeeCalculator {
        FeeCalculator::new(
            FeeRuleSet::from_rules(rules).unwrap(),
            ReturnCodeTable::standard(1_500),
            FeeConfig::default(),
        )
    }

    fn attrs() -> FeeAttributes {
        FeeAttributes::new(Currency::Usd, date())
    }

    #[rstest]
    #[case(dec!(0), 150_000, 80, false)]
    #[case(dec!(0.01), 200_000, 500, true)]
    #[case(dec!(0.01), 10_000, 180, false)]
    fn test_ach_cap(
        #[case] percentage: Decimal,
        #[case] amount: i64,
        #[case] expected: i64,
        #[case] capped: bool,
    ) {
        let calc = calculator(vec![rule(TransactionType::AchPayment, 80, percentage, Some(500))]);
        let fee = calc.calculate_fee(TransactionType::AchPayment, amount, &attrs()).unwrap();
        assert_eq!(fee.total_fee, expected);
        assert_eq!(fee.cap_applied, capped);
        assert_eq!(fee.net_amount, amount - expected);
    }

    #[test]
    fn test_card_fee_rounds_half_up() {
        // 30 + 1050 * 0.029 = 60.45 -> 60; 30 + 1550 * 0.029 = 74.95 -> 75
        let calc = calculator(vec![rule(TransactionType::CardCharge, 30, dec!(0.029), None)]);
        let low = calc.calculate_fee(TransactionType::CardCharge, 1_050, &attrs()).unwrap();
        assert_eq!(low.total_fee, 60);
        let high = calc.calculate_fee(TransactionType::CardCharge, 1_550, &attrs()).unwrap();
        assert_eq!(high.total_fee, 75);

        // 0.5 exactly rounds up: 1 * 0.5 = 0.5 -> 1
        let calc = calculator(vec![rule(TransactionType::CardCharge, 0, dec!(0.5), None)]);
        assert_eq!(
            calc.calculate_fee(TransactionType::CardCharge, 1, &attrs()).unwrap().total_fee,
            1
        );
    }

    #[test]
    fn test_volume_discount_and_risk_surcharge() {
        let mut r = rule(TransactionType::CardCharge, 30, dec!(0.029), None);
        r.discount_tiers = vec![
            DiscountTier { min_monthly_volume: 1_000_000, discount: dec!(0.10) },
            DiscountTier { min_monthly_volume: 10_000_000, discount: dec!(0.20) },
        ];
        r.risk_surcharge = 25;
        let calc = calculator(vec![r]);

        let mut a = attrs();
        a.monthly_volume = Some(2_000_000);
        // raw = 30 + 290 = 320; discount 32 -> 288
        let fee = calc.calculate_fee(TransactionType::CardCharge, 10_000, &a).unwrap();
        assert_eq!(fee.total_fee, 288);
        assert_eq!(fee.discount_amount, 32);
        assert_eq!(fee.discount_rate, dec!(0.10));

        a.risk_level = Some(RiskLevel::High);
        let fee = calc.calculate_fee(TransactionType::CardCharge, 10_000, &a).unwrap();
        assert_eq!(fee.total_fee, 313);
        assert_eq!(fee.risk_adjustment, 25);

        a.risk_level = Some(RiskLevel::Normal);
        let fee = calc.calculate_fee(TransactionType::CardCharge, 10_000, &a).unwrap();
        assert_eq!(fee.risk_adjustment, 0);
    }

    #[rstest]
    #[case(0)]
    #[case(-100)]
    fn test_non_positive_amount_rejected(#[case] amount: i64) {
        let calc = calculator(vec![rule(TransactionType::CardCharge, 30, dec!(0.029), None)]);
        let result = calc.calculate_fee(TransactionType::CardCharge, amount, &attrs());
        assert!(matches!(result, Err(FeeError::InvalidFeeInput { field: "amount", .. })));
    }

    #[test]
    fn test_unsupported_currency_rejected() {
        let calc = calculator(vec![rule(TransactionType::CardCharge, 30, dec!(0.029), None)]);
        let a = FeeAttributes::new(Currency::Jpy, date());
        let result = calc.calculate_fee(TransactionType::CardCharge, 1_000, &a);
        assert!(matches!(result, Err(FeeError::InvalidFeeInput { field: "currency", .. })));
    }

    #[test]
    fn test_no_effective_rule() {
        let calc = calculator(vec![]);
        let result = calc.calculate_fee(TransactionType::Payout, 1_000, &attrs());
        assert!(matches!(result, Err(FeeError::NoEffectiveRule { .. })));
    }

    #[test]
    fn test_return_code_fees() {
        let calc = calculator(vec![]);
        let mut a = attrs();
        a.return_code = Some("R01".to_string());
        let nsf = calc.calculate_fee(TransactionType::AchReturn, 5_000, &a).unwrap();
        assert_eq!(nsf.total_fee, 2_500);
        assert!(nsf.warnings.is_empty());
        assert_eq!(nsf.rule_id, None);

        a.return_code = Some("R03".to_string());
        let admin = calc.calculate_fee(TransactionType::AchReturn, 5_000, &a).unwrap();
        assert!(admin.total_fee < nsf.total_fee);
    }

    #[test]
    fn test_unknown_return_code_uses_default_and_warns() {
        let calc = calculator(vec![]);
        let mut a = attrs();
        a.return_code = Some("R84".to_string());
        let fee = calc.calculate_fee(TransactionType::AchReturn, 5_000, &a).unwrap();
        assert_eq!(fee.total_fee, 1_500);
        assert_eq!(
            fee.warnings,
            vec![FeeWarning::UnknownReturnCode { code: "R84".to_string(), default_fee: 1_500 }]
        );
    }

    #[test]
    fn test_return_without_code_rejected() {
        let calc = calculator(vec![]);
        let result = calc.calculate_fee(TransactionType::AchReturn, 5_000, &attrs());
        assert!(matches!(result, Err(FeeError::InvalidFeeInput { field: "return_code", .. })));
    }
}
