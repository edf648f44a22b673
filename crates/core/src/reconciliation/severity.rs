//! Exception severity from age and amount.

use chrono::NaiveDate;
use clearbook_shared::config::SeverityThresholds;

use crate::exceptions::Severity;

/// Severity of an unmatched item: the higher of its age and amount severities.
#[must_use]
pub fn classify(
    thresholds: &SeverityThresholds,
    item_date: NaiveDate,
    today: NaiveDate,
    amount: i64,
) -> Severity {
    let age = (today - item_date).num_days();
    let by_age = if age >= thresholds.high_age_days {
        Severity::High
    } else if age >= thresholds.medium_age_days {
        Severity::Medium
    } else {
        Severity::Low
    };

    let amount = amount.saturating_abs();
    let by_amount = if amount >= thresholds.high_amount_minor {
        Severity::High
    } else if amount >= thresholds.medium_amount_minor {
        Severity::Medium
    } else {
        Severity::Low
    };

    by_age.max(by_amount)
}
