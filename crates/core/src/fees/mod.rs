//! Fee calculation engine.
//!
//! Processing fees come from the single active [`FeeRule`] effective for the
//! transaction type on the transaction date. ACH returns are priced by
//! return code instead.

mod calculator;
mod error;
mod return_codes;
mod rule;

#[cfg(test)]
mod calculator_props;

pub use calculator::{FeeAttributes, FeeCalculation, FeeCalculator, FeeWarning};
pub use error::FeeError;
pub use return_codes::{ReturnCodeFee, ReturnCodeTable};
pub use rule::{DiscountTier, FeeRule, FeeRuleSet};
