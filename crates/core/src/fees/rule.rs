//! Versioned fee rules and the rule set that keeps them non-overlapping.

use chrono::NaiveDate;
use clearbook_shared::types::FeeRuleId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::FeeError;
use crate::event::TransactionType;

/// Volume discount tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountTier {
    /// Monthly volume (minor units) from which the tier applies.
    pub min_monthly_volume: i64,
    /// Fraction of the fee discounted, in (0, 1].
    pub discount: Decimal,
}

/// A versioned pricing policy for one transaction type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRule {
    /// Rule id.
    pub id: FeeRuleId,
    /// Rule name, shared across versions.
    pub name: String,
    /// Transaction type priced by the rule.
    pub transaction_type: TransactionType,
    /// Version number.
    pub version: u32,
    /// Flat fee in minor units.
    pub base_fee: i64,
    /// Fraction of the amount charged, e.g. `0.029`.
    pub percentage: Decimal,
    /// Maximum of base + percentage, in minor units.
    pub cap: Option<i64>,
    /// Tiers ordered by strictly increasing volume and discount.
    pub discount_tiers: Vec<DiscountTier>,
    /// Surcharge for elevated or high risk, in minor units.
    pub risk_surcharge: i64,
    /// First effective date (inclusive).
    pub effective_from: NaiveDate,
    /// End of effectiveness (exclusive); open-ended when `None`.
    pub effective_to: Option<NaiveDate>,
    /// Inactive rules never apply and never conflict.
    pub active: bool,
}

impl FeeRule {
    /// Returns true if the rule applies on the date.
    #[must_use]
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.active
            && self.effective_from <= date
            && self.effective_to.is_none_or(|to| date < to)
    }

    /// Returns true if the effective ranges of two rules intersect.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let starts_before_other_ends = other.effective_to.is_none_or(|to| self.effective_from < to);
        let other_starts_before_end = self.effective_to.is_none_or(|to| other.effective_from < to);
        starts_before_other_ends && other_starts_before_end
    }

    /// Discount rate for a monthly volume: the highest satisfied tier.
    #[must_use]
    pub fn discount_for(&self, monthly_volume: Option<i64>) -> Decimal {
        let Some(volume) = monthly_volume else {
            return Decimal::ZERO;
        };
        self.discount_tiers
            .iter()
            .rev()
            .find(|tier| volume >= tier.min_monthly_volume)
            .map_or(Decimal::ZERO, |tier| tier.discount)
    }

    /// Checks the rule's own parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRule` describing the first inconsistency.
    pub fn validate(&self) -> Result<(), FeeError> {
        let invalid = |reason: &str| FeeError::InvalidRule {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.base_fee < 0 {
            return Err(invalid("base fee must not be negative"));
        }
        if self.percentage < Decimal::ZERO || self.percentage > Decimal::ONE {
            return Err(invalid("percentage must be between 0 and 1"));
        }
        if self.cap.is_some_and(|cap| cap < 0) {
            return Err(invalid("cap must not be negative"));
        }
        if self.risk_surcharge < 0 {
            return Err(invalid("risk surcharge must not be negative"));
        }
        if self.effective_to.is_some_and(|to| to <= self.effective_from) {
            return Err(invalid("effective range is empty"));
        }
        for tier in &self.discount_tiers {
            if tier.discount <= Decimal::ZERO || tier.discount > Decimal::ONE {
                return Err(invalid("tier discount must be in (0, 1]"));
            }
        }
        for pair in self.discount_tiers.windows(2) {
            if pair[1].min_monthly_volume <= pair[0].min_monthly_volume
                || pair[1].discount <= pair[0].discount
            {
                return Err(invalid(
                    "discount tiers must strictly increase in volume and discount",
                ));
            }
        }
        Ok(())
    }
}

/// All fee rules, with at most one active rule per type per date.
#[derive(Debug, Clone, Default)]
pub struct FeeRuleSet {
    rules: Vec<FeeRule>,
}

impl FeeRuleSet {
    /// Creates an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a rule set, inserting rules in order.
    ///
    /// # Errors
    ///
    /// Returns the first authoring error.
    pub fn from_rules(rules: impl IntoIterator<Item = FeeRule>) -> Result<Self, FeeError> {
        let mut set = Self::new();
        for rule in rules {
            set.insert(rule)?;
        }
        Ok(set)
    }

    /// Adds a rule.
    ///
    /// # Errors
    ///
    /// Rejects invalid parameters, duplicate ids, and active rules that
    /// overlap another active rule of the same type.
    pub fn insert(&mut self, rule: FeeRule) -> Result<(), FeeError> {
        rule.validate()?;
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(FeeError::DuplicateRule(rule.id));
        }
        if rule.active {
            self.check_overlap(&rule)?;
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Activates a rule.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound` or `OverlappingRule`.
    pub fn activate(&mut self, id: FeeRuleId) -> Result<(), FeeError> {
        let idx = self.position(id)?;
        if self.rules[idx].active {
            return Ok(());
        }
        self.check_overlap(&self.rules[idx])?;
        self.rules[idx].active = true;
        Ok(())
    }

    /// Deactivates a rule.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound`.
    pub fn deactivate(&mut self, id: FeeRuleId) -> Result<(), FeeError> {
        let idx = self.position(id)?;
        self.rules[idx].active = false;
        Ok(())
    }

    /// The rule effective for a type on a date.
    #[must_use]
    pub fn effective(&self, transaction_type: TransactionType, date: NaiveDate) -> Option<&FeeRule> {
        self.rules
            .iter()
            .find(|r| r.transaction_type == transaction_type && r.is_effective_on(date))
    }

    /// Looks up a rule by id.
    #[must_use]
    pub fn get(&self, id: FeeRuleId) -> Option<&FeeRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// All rules in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &FeeRule> {
        self.rules.iter()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn position(&self, id: FeeRuleId) -> Result<usize, FeeError> {
        self.rules
            .iter()
            .position(|r| r.id == id)
            .ok_or(FeeError::RuleNotFound(id))
    }

    fn check_overlap(&self, rule: &FeeRule) -> Result<(), FeeError> {
        match self.rules.iter().find(|r| {
            r.id != rule.id
                && r.active
                && r.transaction_type == rule.transaction_type
                && r.overlaps(rule)
        }) {
            Some(existing) => Err(FeeError::OverlappingRule {
                rule: rule.id,
                existing: existing.id,
                transaction_type: rule.transaction_type,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rule(from: NaiveDate, to: Option<NaiveDate>) -> FeeRule {
        FeeRule {
            id: FeeRuleId::new(),
            name: "card-standard".to_string(),
            transaction_type: TransactionType::CardCharge,
            version: 1,
            base_fee: 30,
            percentage: dec!(0.029),
            cap: None,
            discount_tiers: vec![],
            risk_surcharge: 0,
            effective_from: from,
            effective_to: to,
            active: true,
        }
    }

    #[test]
    fn test_effective_range_is_half_open() {
        let r = rule(date(2026, 1, 1), Some(date(2026, 7, 1)));
        assert!(r.is_effective_on(date(2026, 1, 1)));
        assert!(r.is_effective_on(date(2026, 6, 30)));
        assert!(!r.is_effective_on(date(2026, 7, 1)));
        assert!(!r.is_effective_on(date(2025, 12, 31)));
    }

    #[test]
    fn test_overlapping_active_rules_rejected() {
        let mut set = FeeRuleSet::new();
        set.insert(rule(date(2026, 1, 1), Some(date(2026, 7, 1)))).unwrap();
        let result = set.insert(rule(date(2026, 6, 1), None));
        assert!(matches!(result, Err(FeeError::OverlappingRule { .. })));
    }

    #[test]
    fn test_adjacent_rules_accepted() {
        let mut set = FeeRuleSet::new();
        set.insert(rule(date(2026, 1, 1), Some(date(2026, 7, 1)))).unwrap();
        let mut v2 = rule(date(2026, 7, 1), None);
        v2.version = 2;
        v2.base_fee = 25;
        set.insert(v2).unwrap();

        assert_eq!(set.effective(TransactionType::CardCharge, date(2026, 6, 30)).unwrap().version, 1);
        assert_eq!(set.effective(TransactionType::CardCharge, date(2026, 7, 1)).unwrap().version, 2);
    }

    #[test]
    fn test_activation_checks_overlap() {
        let mut set = FeeRuleSet::new();
        set.insert(rule(date(2026, 1, 1), None)).unwrap();
        let mut inactive = rule(date(2026, 3, 1), None);
        inactive.active = false;
        let id = inactive.id;
        set.insert(inactive).unwrap();

        assert!(matches!(set.activate(id), Err(FeeError::OverlappingRule { .. })));
        let first = set.iter().next().unwrap().id;
        set.deactivate(first).unwrap();
        set.activate(id).unwrap();
        assert_eq!(set.effective(TransactionType::CardCharge, date(2026, 4, 1)).unwrap().id, id);
    }

    #[test]
    fn test_tiers_must_increase() {
        let mut r = rule(date(2026, 1, 1), None);
        r.discount_tiers = vec![
            DiscountTier { min_monthly_volume: 1_000_000, discount: dec!(0.10) },
            DiscountTier { min_monthly_volume: 5_000_000, discount: dec!(0.05) },
        ];
        assert!(matches!(r.validate(), Err(FeeError::InvalidRule { .. })));
    }

    #[test]
    fn test_discount_for_highest_satisfied_tier() {
        let mut r = rule(date(2026, 1, 1), None);
        r.discount_tiers = vec![
            DiscountTier { min_monthly_volume: 1_000_000, discount: dec!(0.05) },
            DiscountTier { min_monthly_volume: 5_000_000, discount: dec!(0.10) },
        ];
        assert_eq!(r.discount_for(None), Decimal::ZERO);
        assert_eq!(r.discount_for(Some(999_999)), Decimal::ZERO);
        assert_eq!(r.discount_for(Some(1_000_000)), dec!(0.05));
        assert_eq!(r.discount_for(Some(9_000_000)), dec!(0.10));
    }
}
