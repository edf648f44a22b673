//! Fee engine error types.

use chrono::NaiveDate;
use clearbook_shared::types::FeeRuleId;
use thiserror::Error;

use crate::event::TransactionType;

/// Errors that can occur while authoring rules or calculating fees.
#[derive(Debug, Error)]
pub enum FeeError {
    /// Calculation input rejected.
    #[error("Invalid fee input: {field} {reason}")]
    InvalidFeeInput {
        /// Offending input.
        field: &'static str,
        /// Explanation.
        reason: String,
    },

    /// No active rule covers the type on the date.
    #[error("No fee rule effective for {transaction_type} on {date}")]
    NoEffectiveRule {
        /// Transaction type.
        transaction_type: TransactionType,
        /// Transaction date.
        date: NaiveDate,
    },

    /// Rule overlaps an active rule of the same type.
    #[error("Fee rule {rule} overlaps active rule {existing} for {transaction_type}")]
    OverlappingRule {
        /// Rule being inserted or activated.
        rule: FeeRuleId,
        /// Active rule it collides with.
        existing: FeeRuleId,
        /// Transaction type of both.
        transaction_type: TransactionType,
    },

    /// Rule parameters are inconsistent.
    #[error("Invalid fee rule {name}: {reason}")]
    InvalidRule {
        /// Rule name.
        name: String,
        /// Explanation.
        reason: String,
    },

    /// Rule id already present.
    #[error("Duplicate fee rule: {0}")]
    DuplicateRule(FeeRuleId),

    /// Rule not found.
    #[error("Fee rule not found: {0}")]
    RuleNotFound(FeeRuleId),

    /// Fee does not fit in minor units.
    #[error("Fee calculation overflowed")]
    Overflow,
}

impl FeeError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidFeeInput { .. } => "INVALID_FEE_INPUT",
            Self::NoEffectiveRule { .. } => "NO_EFFECTIVE_FEE_RULE",
            Self::OverlappingRule { .. } => "OVERLAPPING_FEE_RULE",
            Self::InvalidRule { .. } => "INVALID_FEE_RULE",
            Self::DuplicateRule(_) => "DUPLICATE_FEE_RULE",
            Self::RuleNotFound(_) => "FEE_RULE_NOT_FOUND",
            Self::Overflow => "FEE_OVERFLOW",
        }
    }

    /// Returns true for rule-authoring errors.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoEffectiveRule { .. }
                | Self::OverlappingRule { .. }
                | Self::InvalidRule { .. }
                | Self::DuplicateRule(_)
                | Self::RuleNotFound(_)
        )
    }
}
