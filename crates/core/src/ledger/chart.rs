//! Chart of accounts.

use std::collections::BTreeMap;

use clearbook_shared::types::AccountId;

use super::error::LedgerError;
use super::types::Account;

/// Read access to the chart of accounts.
pub trait AccountDirectory: Send + Sync {
    /// Looks up an account by number.
    fn account(&self, id: AccountId) -> Option<Account>;
}

/// In-memory chart of accounts keyed by account number.
#[derive(Debug, Clone, Default)]
pub struct ChartOfAccounts {
    accounts: BTreeMap<AccountId, Account>,
}

impl ChartOfAccounts {
    /// Builds a chart, rejecting duplicate account numbers.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateAccount` if two accounts share an id.
    pub fn new(accounts: Vec<Account>) -> Result<Self, LedgerError> {
        let mut map = BTreeMap::new();
        for account in accounts {
            let id = account.id;
            if map.insert(id, account).is_some() {
                return Err(LedgerError::DuplicateAccount(id));
            }
        }
        Ok(Self { accounts: map })
    }

    /// Returns the account with the given number.
    #[must_use]
    pub fn get(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    /// Iterates accounts in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    /// Number of accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Returns true if the chart is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl AccountDirectory for ChartOfAccounts {
    fn account(&self, id: AccountId) -> Option<Account> {
        self.accounts.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::AccountCategory;
    use clearbook_shared::types::Currency;

    fn account(id: i64) -> Account {
        Account {
            id: AccountId(id),
            name: format!("Account {id}"),
            category: AccountCategory::Asset,
            legal_entity: "acme".to_string(),
            currency: Currency::Usd,
        }
    }

    #[test]
    fn test_duplicate_account_rejected() {
        let result = ChartOfAccounts::new(vec![account(1010), account(1010)]);
        assert!(matches!(result, Err(LedgerError::DuplicateAccount(AccountId(1010)))));
    }

    #[test]
    fn test_lookup() {
        let chart = ChartOfAccounts::new(vec![account(2000), account(1010)]).unwrap();
        assert_eq!(chart.len(), 2);
        assert!(chart.account(AccountId(1010)).is_some());
        assert!(chart.account(AccountId(3000)).is_none());
        let ids: Vec<_> = chart.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![AccountId(1010), AccountId(2000)]);
    }
}
