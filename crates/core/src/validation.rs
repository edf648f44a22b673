//! Field-level validation errors shared by event parsing and templates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a field failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationReason {
    /// Field is required but absent.
    Missing,
    /// Field is present but has the wrong shape.
    Malformed {
        /// What was expected.
        expected: String,
    },
    /// Numeric value below the minimum.
    BelowMinimum {
        /// Inclusive minimum.
        min: i64,
        /// Value received.
        actual: i64,
    },
    /// Numeric value above the maximum.
    AboveMaximum {
        /// Inclusive maximum.
        max: i64,
        /// Value received.
        actual: i64,
    },
    /// Value is well-formed but not accepted.
    Unsupported {
        /// The rejected value.
        value: String,
    },
    /// Computed fee leaves nothing to post.
    FeeExceedsAmount {
        /// Fee in minor units.
        fee: i64,
        /// Amount in minor units.
        amount: i64,
    },
}

impl std::fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => f.write_str("is required"),
            Self::Malformed { expected } => write!(f, "must be {expected}"),
            Self::BelowMinimum { min, actual } => write!(f, "{actual} is below minimum {min}"),
            Self::AboveMaximum { max, actual } => write!(f, "{actual} is above maximum {max}"),
            Self::Unsupported { value } => write!(f, "{value} is not supported"),
            Self::FeeExceedsAmount { fee, amount } => {
                write!(f, "fee {fee} is not less than amount {amount}")
            }
        }
    }
}

/// A single failing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{field} {reason}")]
pub struct ValidationError {
    /// Field name.
    pub field: String,
    /// Failure reason.
    pub reason: ValidationReason,
}

impl ValidationError {
    /// Creates a validation error.
    pub fn new(field: impl Into<String>, reason: ValidationReason) -> Self {
        Self {
            field: field.into(),
            reason,
        }
    }

    /// Shorthand for a missing field.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, ValidationReason::Missing)
    }

    /// Shorthand for a malformed field.
    pub fn malformed(field: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::new(
            field,
            ValidationReason::Malformed {
                expected: expected.into(),
            },
        )
    }
}

/// Every failing field of one input, in the order checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a failure.
    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    /// Appends all failures of another list.
    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Returns true if nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The failures.
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    /// Returns true if the named field failed.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// `Ok(value)` when empty, otherwise `Err(self)`.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        Self(vec![error])
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for error in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
            first = false;
        }
        Ok(())
    }
}
