//! At-most-once processing of external event ids.
//!
//! A delivery first reserves its event id. Reservation is one atomic
//! check-then-insert in the store, so two concurrent deliveries of the same
//! event can never both acquire it.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use clearbook_shared::types::JournalEntryId;
use clearbook_shared::IdempotencyConfig;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::store::{IdempotencyStore, Reservation, StoreError};

/// Errors from the idempotency ledger.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// Another delivery holds the reservation.
    #[error("Event {key} is being processed by another delivery")]
    InFlight {
        /// Idempotency key.
        key: String,
    },

    /// Storage failure.
    #[error("Idempotency store error: {0}")]
    Store(#[from] StoreError),
}

impl IdempotencyError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InFlight { .. } => "EVENT_IN_FLIGHT",
            Self::Store(_) => "STORAGE_ERROR",
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InFlight { .. } => true,
            Self::Store(err) => err.is_retryable(),
        }
    }
}

/// Outcome of [`IdempotencyLedger::begin`].
pub enum Begin {
    /// This delivery owns the key and must complete or release it.
    Fresh(ReservationGuard),
    /// The key was already processed into this entry.
    Completed(JournalEntryId),
}

/// An acquired reservation.
///
/// Dropping the guard without completing leaves the reservation to expire
/// after the lease.
#[must_use = "a reservation must be completed or released"]
pub struct ReservationGuard {
    store: Arc<dyn IdempotencyStore>,
    key: String,
}

impl ReservationGuard {
    /// The reserved key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Marks the key processed into `entry_id`.
    pub async fn complete(self, entry_id: JournalEntryId) -> Result<(), IdempotencyError> {
        self.store.complete(&self.key, entry_id).await?;
        debug!(event_id = %self.key, entry_id = %entry_id, "idempotency key completed");
        Ok(())
    }

    /// Gives the key up so a later delivery can retry.
    pub async fn release(self) -> Result<(), IdempotencyError> {
        self.store.release(&self.key).await?;
        debug!(event_id = %self.key, "idempotency key released");
        Ok(())
    }
}

/// Reserves event ids before posting.
pub struct IdempotencyLedger {
    store: Arc<dyn IdempotencyStore>,
    clock: Arc<dyn Clock>,
    config: IdempotencyConfig,
}

impl IdempotencyLedger {
    /// Creates a ledger over a store.
    pub fn new(
        store: Arc<dyn IdempotencyStore>,
        clock: Arc<dyn Clock>,
        config: IdempotencyConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Reserves `key`, or reports the entry it already produced.
    ///
    /// A reservation held by a concurrent delivery is waited on with bounded
    /// backoff.
    ///
    /// # Errors
    ///
    /// `InFlight` if the other delivery neither completes nor releases in
    /// time.
    pub async fn begin(&self, key: &str) -> Result<Begin, IdempotencyError> {
        let lease = Duration::seconds(i64::try_from(self.config.lease_secs).unwrap_or(i64::MAX));
        let backoff = StdDuration::from_millis(self.config.wait_backoff_ms);

        for attempt in 0..=self.config.wait_attempts {
            match self.store.reserve(key, self.clock.now(), lease).await? {
                Reservation::Acquired => {
                    return Ok(Begin::Fresh(ReservationGuard {
                        store: Arc::clone(&self.store),
                        key: key.to_string(),
                    }));
                }
                Reservation::Completed(entry_id) => return Ok(Begin::Completed(entry_id)),
                Reservation::Held => {
                    if attempt < self.config.wait_attempts {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        warn!(event_id = key, "idempotency reservation still held by another delivery");
        Err(IdempotencyError::InFlight {
            key: key.to_string(),
        })
    }

    /// Entry produced for a key, if completed.
    pub async fn lookup(&self, key: &str) -> Result<Option<JournalEntryId>, IdempotencyError> {
        Ok(self.store.lookup(key).await?)
    }
}
