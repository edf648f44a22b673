//! Core business logic for Clearbook.
//!
//! This crate turns payment-processor events into balanced double-entry
//! journal entries and reconciles the journal against the processor feed.
//! It has ZERO web or database dependencies; persistence sits behind the
//! traits in [`store`].
//!
//! # Modules
//!
//! - `ledger` - Double-entry bookkeeping, balances, reversals
//! - `fees` - Processing, return and verification fees
//! - `template` - Event to journal entry generation
//! - `idempotency` / `audit` - Delivery dedup and the audit trail
//! - `reconciliation` - Matching entries against the feed
//! - `exceptions` - Triage and resolution of unmatched items
//! - `engine` - The facade collaborators call

pub mod audit;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod exceptions;
pub mod fees;
pub mod idempotency;
pub mod ledger;
pub mod reconciliation;
pub mod settlement;
pub mod store;
pub mod template;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use engine::{Clearbook, ClearbookBuilder, EngineConfig, Stores};
pub use error::{EngineError, ErrorCategory};
