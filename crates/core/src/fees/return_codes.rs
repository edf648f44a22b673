//! ACH return code fee table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Flat fee for one return code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnCodeFee {
    /// NACHA description.
    pub description: String,
    /// Flat fee in minor units.
    pub fee: i64,
}

/// Return code to flat fee lookup, with a default for unknown codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnCodeTable {
    codes: BTreeMap<String, ReturnCodeFee>,
    default_fee: i64,
}

/// Fee for insufficient-funds and unauthorised returns.
const CUSTOMER_FAULT_FEE: i64 = 2_500;
/// Fee for administrative returns.
const ADMINISTRATIVE_FEE: i64 = 500;

impl ReturnCodeTable {
    /// Creates a table from explicit entries.
    #[must_use]
    pub fn new(codes: BTreeMap<String, ReturnCodeFee>, default_fee: i64) -> Self {
        let codes = codes
            .into_iter()
            .map(|(code, fee)| (code.trim().to_uppercase(), fee))
            .collect();
        Self { codes, default_fee }
    }

    /// The standard NACHA table.
    #[must_use]
    pub fn standard(default_fee: i64) -> Self {
        let entries = [
            ("R01", "Insufficient funds", CUSTOMER_FAULT_FEE),
            ("R05", "Unauthorized debit to consumer account", CUSTOMER_FAULT_FEE),
            ("R07", "Authorization revoked by customer", CUSTOMER_FAULT_FEE),
            ("R10", "Customer advises not authorized", CUSTOMER_FAULT_FEE),
            ("R29", "Corporate customer advises not authorized", CUSTOMER_FAULT_FEE),
            ("R02", "Account closed", ADMINISTRATIVE_FEE),
            ("R03", "No account or unable to locate account", ADMINISTRATIVE_FEE),
            ("R04", "Invalid account number", ADMINISTRATIVE_FEE),
        ];
        let codes = entries
            .into_iter()
            .map(|(code, description, fee)| {
                (
                    code.to_string(),
                    ReturnCodeFee {
                        description: description.to_string(),
                        fee,
                    },
                )
            })
            .collect();
        Self { codes, default_fee }
    }

    /// Fee for a known code.
    #[must_use]
    pub fn lookup(&self, code: &str) -> Option<&ReturnCodeFee> {
        self.codes.get(code.trim().to_uppercase().as_str())
    }

    /// Fee applied to codes missing from the table.
    #[must_use]
    pub const fn default_fee(&self) -> i64 {
        self.default_fee
    }

    /// Number of known codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Returns true if no code is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}
