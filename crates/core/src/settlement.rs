//! Fire-and-forget settlement requests to the external clearing ledger.
//!
//! Posting never waits on the clearing client: requests go over an unbounded
//! channel to a background task that logs the outcome. A request whose
//! `SettlementRequested` audit record is missing is sent again on the next
//! delivery of its event, so the clearing ledger may see it more than once
//! and deduplicates on `idempotency_key`.

use std::sync::Arc;

use async_trait::async_trait;
use clearbook_shared::types::{AccountId, Currency, JournalEntryId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A transfer the clearing ledger should mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequest {
    /// Entry that triggered the transfer.
    pub entry_id: JournalEntryId,
    /// Debited account.
    pub debit_account: AccountId,
    /// Credited account.
    pub credit_account: AccountId,
    /// Amount in minor units.
    pub amount: i64,
    /// Currency.
    pub currency: Currency,
    /// Key the clearing ledger deduplicates on.
    pub idempotency_key: String,
}

/// Clearing client failures.
#[derive(Debug, Clone, Error)]
pub enum ClearingError {
    /// The clearing ledger refused the transfer.
    #[error("Transfer rejected: {0}")]
    Rejected(String),
    /// The clearing ledger could not be reached.
    #[error("Clearing ledger unavailable: {0}")]
    Unavailable(String),
}

/// External clearing ledger.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClearingClient: Send + Sync {
    /// Posts a transfer. `Ok(false)` means declined without error.
    async fn post_transfer(&self, request: &SettlementRequest) -> Result<bool, ClearingError>;
}

/// The settlement worker has stopped; the request was not queued.
#[derive(Debug, Error)]
#[error("Settlement worker stopped; request for entry {} dropped", .0.entry_id)]
pub struct DispatchError(pub SettlementRequest);

/// Sending half of the settlement queue.
#[derive(Debug, Clone)]
pub struct SettlementDispatcher {
    tx: mpsc::UnboundedSender<SettlementRequest>,
}

impl SettlementDispatcher {
    /// Creates a dispatcher and the receiving end of its queue.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SettlementRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Creates a dispatcher drained by a background task calling `client`.
    ///
    /// The task ends once every dispatcher clone is dropped.
    pub fn spawn(client: Arc<dyn ClearingClient>) -> (Self, JoinHandle<()>) {
        let (dispatcher, rx) = Self::channel();
        let handle = tokio::spawn(run_worker(rx, client));
        (dispatcher, handle)
    }

    /// Queues a request without waiting.
    ///
    /// # Errors
    ///
    /// Returns the request back if the worker is gone.
    pub fn dispatch(&self, request: SettlementRequest) -> Result<(), DispatchError> {
        debug!(entry_id = %request.entry_id, "settlement request queued");
        self.tx.send(request).map_err(|e| DispatchError(e.0))
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<SettlementRequest>,
    client: Arc<dyn ClearingClient>,
) {
    while let Some(request) = rx.recv().await {
        match client.post_transfer(&request).await {
            Ok(true) => info!(
                entry_id = %request.entry_id,
                amount = request.amount,
                "settlement accepted"
            ),
            Ok(false) => warn!(
                entry_id = %request.entry_id,
                key = %request.idempotency_key,
                "settlement declined by clearing ledger"
            ),
            Err(e) => error!(
                entry_id = %request.entry_id,
                key = %request.idempotency_key,
                error = %e,
                "settlement failed"
            ),
        }
    }
    debug!("settlement worker stopped");
}
