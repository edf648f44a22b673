//! The processor's transaction feed.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::types::ExternalTransactionEvent;
use crate::ledger::DateRange;
use crate::store::StoreError;

/// Pull access to the processor's own record of transactions.
///
/// The feed may list an event id more than once; the reconciler reports
/// such repeats as duplicates.
#[async_trait]
pub trait TransactionFeed: Send + Sync {
    /// Events whose `occurred_at` date falls in `range`, in feed order.
    async fn events_between(&self, range: DateRange)
    -> Result<Vec<ExternalTransactionEvent>, StoreError>;

    /// First feed record with the given event id.
    async fn event(&self, event_id: &str) -> Result<Option<ExternalTransactionEvent>, StoreError>;
}

/// Feed held in memory, for tests and replay.
#[derive(Debug, Default)]
pub struct MemoryFeed {
    events: RwLock<Vec<ExternalTransactionEvent>>,
}

impl MemoryFeed {
    /// Creates an empty feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a feed from events.
    #[must_use]
    pub fn from_events(events: Vec<ExternalTransactionEvent>) -> Self {
        Self {
            events: RwLock::new(events),
        }
    }

    /// Appends an event.
    pub fn push(&self, event: ExternalTransactionEvent) {
        self.events.write().push(event);
    }

    /// Removes every record of an event id.
    pub fn remove(&self, event_id: &str) {
        self.events.write().retain(|e| e.event_id != event_id);
    }
}

#[async_trait]
impl TransactionFeed for MemoryFeed {
    async fn events_between(
        &self,
        range: DateRange,
    ) -> Result<Vec<ExternalTransactionEvent>, StoreError> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| range.contains(e.date()))
            .cloned()
            .collect())
    }

    async fn event(&self, event_id: &str) -> Result<Option<ExternalTransactionEvent>, StoreError> {
        Ok(self
            .events
            .read()
            .iter()
            .find(|e| e.event_id == event_id)
            .cloned())
    }
}
