//! Event field validation against a template.

use clearbook_shared::types::Currency;

use super::types::{FieldRule, JournalTemplate};
use crate::event::{ExternalTransactionEvent, FieldName};
use crate::validation::{ValidationError, ValidationErrors, ValidationReason};

/// Validates every field the template depends on, collecting all failures.
///
/// Returns the parsed currency.
///
/// # Errors
///
/// Every failing field, not just the first.
pub fn validate_event(
    template: &JournalTemplate,
    event: &ExternalTransactionEvent,
) -> Result<Currency, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let currency = match event.currency() {
        Ok(c) => Some(c),
        Err(e) => {
            errors.push(e);
            None
        }
    };

    if event.amount <= 0 {
        errors.push(ValidationError::new(
            "amount",
            ValidationReason::BelowMinimum {
                min: 1,
                actual: event.amount,
            },
        ));
    }

    for field in template.all_required_fields() {
        if !event.metadata.has(field) {
            errors.push(ValidationError::missing(field.key()));
        }
    }

    for rule in &template.field_rules {
        match *rule {
            FieldRule::AmountRange { min, max } => {
                check_range(&mut errors, "amount", event.amount, min, max);
            }
            FieldRule::MonthlyVolumeRange { min, max } => {
                if let Some(volume) = event.metadata.monthly_volume() {
                    check_range(&mut errors, FieldName::MonthlyVolume.key(), volume, min, max);
                }
            }
        }
    }

    match currency {
        Some(c) if errors.is_empty() => Ok(c),
        _ => Err(errors),
    }
}

fn check_range(
    errors: &mut ValidationErrors,
    field: &str,
    value: i64,
    min: Option<i64>,
    max: Option<i64>,
) {
    if let Some(min) = min.filter(|m| value < *m) {
        errors.push(ValidationError::new(
            field,
            ValidationReason::BelowMinimum { min, actual: value },
        ));
    }
    if let Some(max) = max.filter(|m| value > *m) {
        errors.push(ValidationError::new(
            field,
            ValidationReason::AboveMaximum { max, actual: value },
        ));
    }
}
