//! Per-account posting locks.
//!
//! A posting holds the lock of every account it touches. Locks are taken in
//! ascending account order so two postings over overlapping accounts can
//! never deadlock.

use std::collections::BTreeSet;
use std::sync::Arc;

use clearbook_shared::types::AccountId;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-account async mutexes.
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

/// Guards for a set of accounts; released on drop.
#[derive(Debug)]
pub struct AccountGuards {
    guards: Vec<OwnedMutexGuard<()>>,
}

impl AccountGuards {
    /// Number of accounts held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Returns true if no account is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl AccountLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the locks of all accounts in ascending order.
    pub async fn acquire(&self, accounts: &BTreeSet<AccountId>) -> AccountGuards {
        let mut guards = Vec::with_capacity(accounts.len());
        for id in accounts {
            let lock = Arc::clone(self.locks.entry(*id).or_default().value());
            guards.push(lock.lock_owned().await);
        }
        AccountGuards { guards }
    }
}
