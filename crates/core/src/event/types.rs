//! External transaction events as delivered by the payment processor.

use chrono::{DateTime, NaiveDate, Utc};
use clearbook_shared::types::Currency;
use serde::{Deserialize, Serialize};

use super::metadata::EventMetadata;
use crate::ledger::EntrySource;
use crate::validation::{ValidationError, ValidationReason};

/// Processor event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Card charge.
    CardCharge,
    /// ACH debit collected from a customer.
    AchPayment,
    /// ACH return of an earlier payment.
    AchReturn,
    /// Payout to the bank account.
    Payout,
    /// Refund to a customer.
    Refund,
    /// Account verification.
    Verification,
}

impl TransactionType {
    /// All transaction types.
    pub const ALL: [Self; 6] = [
        Self::CardCharge,
        Self::AchPayment,
        Self::AchReturn,
        Self::Payout,
        Self::Refund,
        Self::Verification,
    ];

    /// Returns the string representation of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CardCharge => "card_charge",
            Self::AchPayment => "ach_payment",
            Self::AchReturn => "ach_return",
            Self::Payout => "payout",
            Self::Refund => "refund",
            Self::Verification => "verification",
        }
    }

    /// Parses a type from a string.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Source tag of entries generated from this type.
    #[must_use]
    pub const fn entry_source(self) -> EntrySource {
        match self {
            Self::CardCharge => EntrySource::CardCharge,
            Self::AchPayment => EntrySource::AchPayment,
            Self::AchReturn => EntrySource::AchReturn,
            Self::Payout => EntrySource::Payout,
            Self::Refund => EntrySource::Refund,
            Self::Verification => EntrySource::Verification,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk classification attached to an event by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Low risk.
    Low,
    /// Normal risk.
    Normal,
    /// Elevated risk; surcharged.
    Elevated,
    /// High risk; surcharged.
    High,
}

impl RiskLevel {
    /// Returns true if the fee engine adds a risk surcharge.
    #[must_use]
    pub const fn is_elevated(self) -> bool {
        matches!(self, Self::Elevated | Self::High)
    }

    /// Parses a risk level from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "elevated" => Some(Self::Elevated),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// A transaction event from the processor. Read-only to the engine.
///
/// The same event may be delivered more than once and out of order; the
/// event id is the idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTransactionEvent {
    /// Globally unique event id.
    pub event_id: String,
    /// Event type.
    pub transaction_type: TransactionType,
    /// Amount in minor units.
    pub amount: i64,
    /// ISO 4217 currency code as sent by the processor.
    pub currency: String,
    /// Customer reference.
    pub customer_ref: String,
    /// Payment method reference.
    #[serde(default)]
    pub payment_method_ref: Option<String>,
    /// When the transaction happened at the processor.
    pub occurred_at: DateTime<Utc>,
    /// When the event was received.
    pub received_at: DateTime<Utc>,
    /// Typed known fields plus processor-specific extras.
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl ExternalTransactionEvent {
    /// Accounting date of the event.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.occurred_at.date_naive()
    }

    /// Parses the currency code.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown code.
    pub fn currency(&self) -> Result<Currency, ValidationError> {
        self.currency.parse().map_err(|_| {
            ValidationError::new(
                "currency",
                ValidationReason::Unsupported {
                    value: self.currency.clone(),
                },
            )
        })
    }

    /// Description used for entries and fuzzy matching.
    ///
    /// The metadata description when present, else type and customer.
    #[must_use]
    pub fn description(&self) -> String {
        self.metadata.description().map_or_else(
            || format!("{} {}", self.transaction_type.as_str().replace('_', " "), self.customer_ref),
            str::to_string,
        )
    }
}
