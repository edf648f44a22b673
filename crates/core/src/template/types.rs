//! Journal template definitions.

use clearbook_shared::types::AccountId;
use serde::{Deserialize, Serialize};

use crate::event::{FieldName, TransactionType};

/// Template name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub String);

impl TemplateId {
    /// Creates a template id.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of template variants, one per transaction type.
///
/// The variant fixes the line layout; the template supplies the accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// Card charge collected net of the processing fee.
    CardCharge,
    /// ACH debit collected net of the processing fee.
    AchPayment,
    /// ACH return reversing a collection plus a return fee.
    AchReturn,
    /// Payout from the processor balance.
    Payout,
    /// Refund to a customer.
    Refund,
    /// Verification fee only.
    Verification,
}

/// Line layout shared by several kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLayout {
    /// DR debit (net), DR fee (fee), CR credit (gross).
    Collection,
    /// DR debit (amount), CR credit (amount), DR fee (fee), CR credit (fee).
    Return,
    /// DR debit (amount), CR credit (amount), optionally DR fee / CR credit.
    Disbursement,
    /// DR fee (fee), CR credit (fee).
    FeeOnly,
}

impl TemplateKind {
    /// Transaction type the kind applies to.
    #[must_use]
    pub const fn transaction_type(self) -> TransactionType {
        match self {
            Self::CardCharge => TransactionType::CardCharge,
            Self::AchPayment => TransactionType::AchPayment,
            Self::AchReturn => TransactionType::AchReturn,
            Self::Payout => TransactionType::Payout,
            Self::Refund => TransactionType::Refund,
            Self::Verification => TransactionType::Verification,
        }
    }

    /// Line layout of the kind.
    #[must_use]
    pub const fn layout(self) -> LineLayout {
        match self {
            Self::CardCharge | Self::AchPayment => LineLayout::Collection,
            Self::AchReturn => LineLayout::Return,
            Self::Payout | Self::Refund => LineLayout::Disbursement,
            Self::Verification => LineLayout::FeeOnly,
        }
    }

    /// Fields the kind always needs on top of the template's own.
    #[must_use]
    pub const fn intrinsic_fields(self) -> &'static [FieldName] {
        match self {
            Self::AchReturn => &[FieldName::ReturnCode],
            _ => &[],
        }
    }
}

/// A per-field validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FieldRule {
    /// Event amount bounds (minor units, inclusive).
    AmountRange {
        /// Minimum, if any.
        #[serde(default)]
        min: Option<i64>,
        /// Maximum, if any.
        #[serde(default)]
        max: Option<i64>,
    },
    /// Monthly volume bounds, checked when the field is present.
    MonthlyVolumeRange {
        /// Minimum, if any.
        #[serde(default)]
        min: Option<i64>,
        /// Maximum, if any.
        #[serde(default)]
        max: Option<i64>,
    },
}

/// A named mapping from an event to a balanced entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalTemplate {
    /// Template name.
    pub id: TemplateId,
    /// Variant; fixes the layout and transaction type.
    pub kind: TemplateKind,
    /// Account debited with the principal.
    pub debit_account: AccountId,
    /// Account credited with the principal.
    pub credit_account: AccountId,
    /// Account carrying the fee.
    #[serde(default)]
    pub fee_account: Option<AccountId>,
    /// Metadata fields the event must carry.
    #[serde(default)]
    pub required_fields: Vec<FieldName>,
    /// Numeric bounds.
    #[serde(default)]
    pub field_rules: Vec<FieldRule>,
    /// Compute fees and post a fee line.
    #[serde(default)]
    pub has_fee_line: bool,
    /// Emit a settlement request after posting.
    #[serde(default)]
    pub requires_settlement: bool,
    /// Higher wins when several templates apply.
    #[serde(default)]
    pub priority: i32,
}

impl JournalTemplate {
    /// Transaction type the template handles.
    #[must_use]
    pub const fn transaction_type(&self) -> TransactionType {
        self.kind.transaction_type()
    }

    /// Required fields including those intrinsic to the kind.
    pub fn all_required_fields(&self) -> impl Iterator<Item = FieldName> + '_ {
        self.kind
            .intrinsic_fields()
            .iter()
            .copied()
            .chain(self.required_fields.iter().copied())
    }

    /// Every account the template may post to.
    pub fn accounts(&self) -> impl Iterator<Item = AccountId> + '_ {
        [Some(self.debit_account), Some(self.credit_account), self.fee_account]
            .into_iter()
            .flatten()
    }
}
