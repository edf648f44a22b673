//! Property-based tests for fee calculation.

use chrono::NaiveDate;
use clearbook_shared::types::{Currency, FeeRuleId};
use clearbook_shared::FeeConfig;
use proptest::prelude::*;
use rust_decimal::Decimal;

use super::calculator::{FeeAttributes, FeeCalculator};
use super::return_codes::ReturnCodeTable;
use super::rule::{DiscountTier, FeeRule, FeeRuleSet};
use crate::event::{RiskLevel, TransactionType};

fn calculator(base_fee: i64, pct_bps: i64, cap: Option<i64>, surcharge: i64) -> FeeCalculator {
    let rule = FeeRule {
        id: FeeRuleId::new(),
        name: "prop".to_string(),
        transaction_type: TransactionType::CardCharge,
        version: 1,
        base_fee,
        percentage: Decimal::new(pct_bps, 4),
        cap,
        discount_tiers: vec![
            DiscountTier { min_monthly_volume: 1_000_000, discount: Decimal::new(5, 2) },
            DiscountTier { min_monthly_volume: 5_000_000, discount: Decimal::new(10, 2) },
            DiscountTier { min_monthly_volume: 20_000_000, discount: Decimal::new(25, 2) },
        ],
        risk_surcharge: surcharge,
        effective_from: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        effective_to: None,
        active: true,
    };
    FeeCalculator::new(
        FeeRuleSet::from_rules([rule]).unwrap(),
        ReturnCodeTable::standard(1_500),
        FeeConfig::default(),
    )
}

fn attrs(volume: Option<i64>, risk: Option<RiskLevel>) -> FeeAttributes {
    FeeAttributes {
        currency: Currency::Usd,
        date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
        monthly_volume: volume,
        risk_level: risk,
        return_code: None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 1: The cap bounds the fee before surcharges.
    ///
    /// *For any* amount and capped rule, the total fee SHALL NOT exceed the cap.
    #[test]
    fn prop_cap_bounds_fee(
        amount in 1i64..1_000_000_000,
        base in 0i64..1_000,
        pct_bps in 0i64..500,
        cap in 0i64..10_000,
    ) {
        let calc = calculator(base, pct_bps, Some(cap), 0);
        let fee = calc.calculate_fee(TransactionType::CardCharge, amount, &attrs(None, None)).unwrap();
        prop_assert!(fee.total_fee <= cap);
        prop_assert_eq!(fee.cap_applied, Decimal::from(base) + Decimal::from(amount) * Decimal::new(pct_bps, 4) > Decimal::from(cap));
    }

    /// Property 2: Higher volume never raises the fee.
    ///
    /// *For any* amount, moving to a higher monthly volume SHALL yield a fee
    /// no greater than the lower volume's fee.
    #[test]
    fn prop_volume_discount_monotonic(
        amount in 1i64..100_000_000,
        low in 0i64..30_000_000,
        extra in 0i64..30_000_000,
    ) {
        let calc = calculator(30, 290, None, 0);
        let at_low = calc.calculate_fee(TransactionType::CardCharge, amount, &attrs(Some(low), None)).unwrap();
        let at_high = calc.calculate_fee(TransactionType::CardCharge, amount, &attrs(Some(low + extra), None)).unwrap();
        prop_assert!(at_high.total_fee <= at_low.total_fee);
    }

    /// Property 3: Elevated risk adds exactly the surcharge.
    #[test]
    fn prop_risk_surcharge_additive(
        amount in 1i64..100_000_000,
        surcharge in 0i64..1_000,
    ) {
        let calc = calculator(30, 290, None, surcharge);
        let normal = calc.calculate_fee(TransactionType::CardCharge, amount, &attrs(None, Some(RiskLevel::Normal))).unwrap();
        let elevated = calc.calculate_fee(TransactionType::CardCharge, amount, &attrs(None, Some(RiskLevel::Elevated))).unwrap();
        prop_assert_eq!(elevated.total_fee - normal.total_fee, surcharge);
    }

    /// Property 4: Calculation is deterministic and net is consistent.
    #[test]
    fn prop_deterministic(amount in 1i64..1_000_000_000, volume in proptest::option::of(0i64..50_000_000)) {
        let calc = calculator(30, 290, Some(5_000), 10);
        let a = calc.calculate_fee(TransactionType::CardCharge, amount, &attrs(volume, None)).unwrap();
        let b = calc.calculate_fee(TransactionType::CardCharge, amount, &attrs(volume, None)).unwrap();
        prop_assert_eq!(a.net_amount, amount - a.total_fee);
        prop_assert_eq!(a, b);
    }
}
